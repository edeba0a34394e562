//! Per-connection WebSocket state machine.
//!
//! A [`Session`] starts in [`State::Handshaking`] and moves to
//! [`State::Open`] exactly once, after the client key was parsed and the
//! whole `101` response was written. It never moves back. While
//! handshaking, inbound bytes are only read as an upgrade request and
//! outbound payloads are refused; once open, every call maps to one frame
//! decode or encode.
//!
//! The session keeps no buffer between calls. Each `on_receive` sees exactly
//! the chunk the host read, so a frame split across reads comes back as
//! [`Decoded::Incomplete`] and is not reassembled.

use tracing::{debug, error, warn};

use crate::error::SessionError;
use crate::frame::{self, Decoded, MessageKind};
use crate::handshake;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Handshaking,
    Open,
}

/// What an inbound chunk turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// The upgrade completed with this chunk; the session is now open.
    Upgraded,
    /// Decode result of a chunk received while open, passed through as is.
    Frame(Decoded),
}

#[derive(Debug)]
pub struct Session {
    state: State,
    kind: MessageKind,
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

impl Session {
    /// A handshaking session that sends text frames once open.
    pub fn new() -> Self {
        Session::with_kind(MessageKind::Text)
    }

    pub fn with_kind(kind: MessageKind) -> Self {
        Session {
            state: State::Handshaking,
            kind,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == State::Open
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Handle one chunk of bytes read from the connection.
    ///
    /// Handshake failures leave the session handshaking; the host decides
    /// whether to wait for another chunk or drop the connection.
    pub fn on_receive<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        bytes: &[u8],
    ) -> Result<Received, SessionError> {
        match self.state {
            State::Handshaking => self.handshake(transport, bytes),
            State::Open => Ok(Received::Frame(frame::decode(bytes))),
        }
    }

    fn handshake<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        request: &[u8],
    ) -> Result<Received, SessionError> {
        let client_key = handshake::parse_client_key(request).map_err(|e| {
            warn!(error = %e, len = request.len(), "rejecting upgrade request");
            e
        })?;

        let accept_key = handshake::compute_accept_key(&client_key);
        let response = handshake::build_response(&accept_key);
        send_once(transport, &response).map_err(|e| {
            warn!(error = %e, "could not send the entire upgrade response");
            e
        })?;

        self.state = State::Open;
        debug!("websocket upgrade complete");
        Ok(Received::Upgraded)
    }

    /// Frame `payload` and write it to the connection.
    ///
    /// Refused with [`SessionError::NotOpen`] while handshaking, without
    /// touching the transport.
    pub fn on_send<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        payload: &[u8],
    ) -> Result<(), SessionError> {
        if self.state != State::Open {
            return Err(SessionError::NotOpen);
        }

        let frame = frame::encode_with(self.kind, payload)?;
        send_once(transport, &frame).map_err(|e| {
            match &e {
                SessionError::Transport(io) => error!(error = %io, "socket error while sending"),
                _ => warn!(error = %e, "frame not written entirely"),
            }
            e
        })
    }

    /// Tear the session down. No close frame is sent.
    pub fn on_close(self) {
        debug!(state = ?self.state, "session closed");
    }
}

/// Hand `bytes` to the transport once; anything short of all of them fails.
fn send_once<T: Transport + ?Sized>(transport: &mut T, bytes: &[u8]) -> Result<(), SessionError> {
    let written = transport.send(bytes)?;
    if written != bytes.len() {
        return Err(SessionError::ShortWrite {
            written,
            expected: bytes.len(),
        });
    }
    Ok(())
}
