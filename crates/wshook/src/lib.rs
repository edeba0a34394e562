//! WebSocket upgrade and framing engine (RFC 6455).
//!
//! Turns a raw byte-stream connection into a message-oriented WebSocket
//! connection. The host owns sockets and event dispatch; this crate only
//! interprets and produces bytes:
//!
//! - **Frame codec** (`frame`): single unfragmented data frames, 7/16-bit lengths out, 7/16/64-bit in
//! - **Handshake** (`handshake`): `Sec-WebSocket-Key` extraction, accept key, 101 response
//! - **Session** (`session`): the `Handshaking -> Open` state machine per connection
//! - **Host hooks** (`host`, `transport`): session registry and the byte I/O primitives it needs
//!
//! Fragmentation, ping/pong, the close handshake and extensions are not
//! handled; such frames decode to [`Decoded::Unsupported`].

pub mod error;
pub mod frame;
pub mod handshake;
pub mod host;
pub mod session;
pub mod transport;

pub use error::{EncodeError, HandshakeError, SessionError};
pub use frame::{
    apply_mask, decode, decode_frame, encode, encode_with, frame_len, Decoded, Frame, Malformed,
    MessageKind, Opcode, Unsupported,
};
pub use handshake::{build_response, compute_accept_key, parse_client_key, HandshakeRequest};
pub use host::{read_chunk, ConnectionId, HostError, Sessions};
pub use session::{Received, Session, State};
#[cfg(feature = "std-io")]
pub use transport::IoTransport;
pub use transport::Transport;
