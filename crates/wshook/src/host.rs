//! Host-facing lifecycle hooks.
//!
//! [`Sessions`] owns one [`Session`] per live connection, keyed by an opaque
//! [`ConnectionId`] the host hands out. The host calls
//! [`on_accept`](Sessions::on_accept) when a connection is accepted,
//! [`on_readable`](Sessions::on_readable) with each chunk it reads,
//! [`on_writable`](Sessions::on_writable) with each payload it wants framed
//! and [`on_close`](Sessions::on_close) when the connection goes away.
//!
//! `Sessions` is not synchronized. A host driving connections from several
//! threads wraps it in a lock so calls into one session never overlap.

use std::fmt;
use std::io;

use rustc_hash::FxHashMap;
use tracing::{debug, debug_span, warn};

use crate::error::SessionError;
use crate::frame::MessageKind;
use crate::session::{Received, Session, State};
use crate::transport::Transport;

/// Opaque handle identifying one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        ConnectionId(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("connection closed by peer")]
    Eof,
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl HostError {
    /// Whether the connection should be torn down.
    pub fn is_fatal(&self) -> bool {
        match self {
            HostError::Session(e) => e.is_fatal(),
            HostError::UnknownConnection(_) | HostError::Eof | HostError::Transport(_) => true,
        }
    }
}

/// Read one chunk from `transport`, mapping a zero-byte read to
/// [`HostError::Eof`].
pub fn read_chunk<'a, T: Transport + ?Sized>(
    transport: &mut T,
    buf: &'a mut [u8],
) -> Result<&'a [u8], HostError> {
    match transport.recv(buf) {
        Ok(0) => Err(HostError::Eof),
        Ok(n) => Ok(&buf[..n]),
        Err(e) => Err(HostError::Transport(e)),
    }
}

/// Registry of live sessions.
#[derive(Debug, Default)]
pub struct Sessions {
    sessions: FxHashMap<ConnectionId, Session>,
    kind: MessageKind,
}

impl Sessions {
    pub fn new() -> Self {
        Sessions::default()
    }

    /// Sessions created by this registry send frames of `kind`.
    pub fn with_kind(kind: MessageKind) -> Self {
        Sessions {
            sessions: FxHashMap::default(),
            kind,
        }
    }

    /// Register a fresh handshaking session for `id`.
    ///
    /// A stale session left under a reused id is replaced.
    pub fn on_accept(&mut self, id: ConnectionId) {
        let _span = debug_span!("conn", %id).entered();
        if self
            .sessions
            .insert(id, Session::with_kind(self.kind))
            .is_some()
        {
            warn!("replacing stale session");
        }
        debug!("session created");
    }

    /// Feed one chunk read from `id`'s connection to its session.
    pub fn on_readable<T: Transport + ?Sized>(
        &mut self,
        id: ConnectionId,
        transport: &mut T,
        bytes: &[u8],
    ) -> Result<Received, HostError> {
        let _span = debug_span!("conn", %id).entered();
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(HostError::UnknownConnection(id))?;
        Ok(session.on_receive(transport, bytes)?)
    }

    /// Frame `payload` and write it to `id`'s connection.
    pub fn on_writable<T: Transport + ?Sized>(
        &mut self,
        id: ConnectionId,
        transport: &mut T,
        payload: &[u8],
    ) -> Result<(), HostError> {
        let _span = debug_span!("conn", %id).entered();
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(HostError::UnknownConnection(id))?;
        Ok(session.on_send(transport, payload)?)
    }

    /// Drop `id`'s session. Returns `false` if none was registered.
    pub fn on_close(&mut self, id: ConnectionId) -> bool {
        let _span = debug_span!("conn", %id).entered();
        match self.sessions.remove(&id) {
            Some(session) => {
                session.on_close();
                true
            }
            None => false,
        }
    }

    pub fn state(&self, id: ConnectionId) -> Option<State> {
        self.sessions.get(&id).map(Session::state)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Decoded;
    use crate::session::tests::{masked_text, MockTransport, UPGRADE_REQUEST, UPGRADE_RESPONSE};

    #[test]
    fn accept_read_write_close() {
        let mut sessions = Sessions::new();
        let id = ConnectionId::new(7);
        let mut transport = MockTransport::default();

        sessions.on_accept(id);
        assert_eq!(sessions.state(id), Some(State::Handshaking));

        let received = sessions.on_readable(id, &mut transport, UPGRADE_REQUEST).unwrap();
        assert_eq!(received, Received::Upgraded);
        assert_eq!(transport.written, UPGRADE_RESPONSE);
        assert_eq!(sessions.state(id), Some(State::Open));

        let received = sessions
            .on_readable(id, &mut transport, &masked_text(b"NICK guest"))
            .unwrap();
        assert_eq!(received, Received::Frame(Decoded::Message(b"NICK guest".to_vec())));

        transport.written.clear();
        sessions.on_writable(id, &mut transport, b"PING :x").unwrap();
        assert_eq!(&transport.written[..2], &[0x81, 7]);

        assert!(sessions.on_close(id));
        assert!(sessions.is_empty());
        assert!(!sessions.on_close(id));
    }

    #[test]
    fn sessions_are_independent() {
        let mut sessions = Sessions::new();
        let (a, b) = (ConnectionId::new(1), ConnectionId::new(2));
        sessions.on_accept(a);
        sessions.on_accept(b);
        sessions
            .on_readable(a, &mut MockTransport::default(), UPGRADE_REQUEST)
            .unwrap();
        assert_eq!(sessions.state(a), Some(State::Open));
        assert_eq!(sessions.state(b), Some(State::Handshaking));
        assert_eq!(sessions.len(), 2);
    }

    #[test]
    fn reaccept_resets_session() {
        let mut sessions = Sessions::new();
        let id = ConnectionId::new(3);
        sessions.on_accept(id);
        sessions
            .on_readable(id, &mut MockTransport::default(), UPGRADE_REQUEST)
            .unwrap();
        sessions.on_accept(id);
        assert_eq!(sessions.state(id), Some(State::Handshaking));
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn unknown_connection_is_fatal() {
        let mut sessions = Sessions::new();
        let id = ConnectionId::new(99);
        let mut transport = MockTransport::default();
        let err = sessions.on_writable(id, &mut transport, b"x").unwrap_err();
        assert!(matches!(err, HostError::UnknownConnection(i) if i == id));
        assert!(err.is_fatal());
        assert_eq!(transport.sends, 0);
    }

    #[test]
    fn write_before_upgrade_is_not_fatal() {
        let mut sessions = Sessions::new();
        let id = ConnectionId::new(4);
        sessions.on_accept(id);
        let mut transport = MockTransport::default();
        let err = sessions.on_writable(id, &mut transport, b"x").unwrap_err();
        assert!(matches!(err, HostError::Session(SessionError::NotOpen)));
        assert!(!err.is_fatal());
        assert_eq!(transport.sends, 0);
    }

    #[test]
    fn binary_registry() {
        let mut sessions = Sessions::with_kind(MessageKind::Binary);
        let id = ConnectionId::new(5);
        sessions.on_accept(id);
        let mut transport = MockTransport::default();
        sessions.on_readable(id, &mut transport, UPGRADE_REQUEST).unwrap();
        transport.written.clear();
        sessions.on_writable(id, &mut transport, &[1, 2, 3]).unwrap();
        assert_eq!(transport.written, vec![0x82, 3, 1, 2, 3]);
    }

    #[test]
    fn read_chunk_maps_zero_to_eof() {
        let mut transport = MockTransport {
            inbound: b"abc".to_vec(),
            ..Default::default()
        };
        let mut buf = [0u8; 2];
        assert_eq!(read_chunk(&mut transport, &mut buf).unwrap(), b"ab");
        assert_eq!(read_chunk(&mut transport, &mut buf).unwrap(), b"c");
        assert!(matches!(
            read_chunk(&mut transport, &mut buf),
            Err(HostError::Eof)
        ));
    }

    #[test]
    fn connection_id_display() {
        assert_eq!(ConnectionId::new(42).to_string(), "#42");
        assert_eq!(ConnectionId::new(42).get(), 42);
    }
}
