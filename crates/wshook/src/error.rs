//! Error types shared by the codec, the handshake and the session.
//!
//! Decode outcomes that are not failures (`Incomplete`, unsupported frame
//! kinds) live in [`crate::frame::Decoded`] instead.

use std::io;

/// Failure to frame an outbound payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// The payload needs the 64-bit length field, which outbound frames never use.
    #[error("payload of {0} bytes needs a 64-bit frame length")]
    UnsupportedLength(usize),
}

/// Failure to understand a client's upgrade request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("client key was not provided")]
    MissingKey,
}

/// Failure reported by a [`Session`](crate::session::Session) hook.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("cannot frame payload: {0}")]
    Encode(#[from] EncodeError),
    /// Application data was offered before the upgrade completed.
    #[error("connection is still handshaking")]
    NotOpen,
    /// The transport accepted fewer bytes than requested. The connection is
    /// still usable but the frame (or response) was not delivered.
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

impl SessionError {
    /// Whether the host should tear the connection down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Transport(_))
    }
}
