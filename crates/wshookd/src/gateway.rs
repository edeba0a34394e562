//! WebSocket-to-TCP gateway.
//!
//! ## Architecture
//!
//! ```text
//! TcpListener (accept loop)
//!     |
//!     v  one thread per client
//! client reader: read_chunk -> Session::on_receive, frame by frame
//!     |   Upgraded        -> connect upstream, spawn upstream pump
//!     |   Message(bytes)  -> write bytes to upstream
//!     |   Close/Malformed -> tear down
//!     v
//! upstream pump: read upstream -> Session::on_send (one frame per chunk)
//! ```
//!
//! Each connection's session and client writer sit behind their own
//! `Mutex<Link>`, shared by that connection's reader and pump only. The
//! registry lock is taken to insert and remove links and is never held
//! across socket I/O, so a client that stops reading stalls nobody else.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, error, info, info_span, warn};
use wshook::frame::MAX_ENCODED_PAYLOAD;
use wshook::{
    frame_len, read_chunk, ConnectionId, Decoded, HostError, IoTransport, Malformed, MessageKind,
    Received, Session, SessionError, Transport, Unsupported,
};

use crate::config::{ConfigError, GatewayConfig};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to upstream {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("upstream write failed: {0}")]
    Upstream(#[source] io::Error),
    #[error("client socket error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("malformed frame: {0}")]
    Malformed(Malformed),
}

/// One connection's session together with the transport it writes to.
struct Link<T> {
    session: Session,
    client: T,
}

impl<T: Transport> Link<T> {
    fn new(kind: MessageKind, client: T) -> Self {
        Link {
            session: Session::with_kind(kind),
            client,
        }
    }

    fn on_readable(&mut self, bytes: &[u8]) -> Result<Received, SessionError> {
        self.session.on_receive(&mut self.client, bytes)
    }

    fn on_writable(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        self.session.on_send(&mut self.client, payload)
    }
}

type ClientLink = Arc<Mutex<Link<IoTransport<TcpStream>>>>;

struct Shared {
    config: GatewayConfig,
    links: Mutex<FxHashMap<ConnectionId, ClientLink>>,
    next_id: AtomicU64,
}

pub struct Gateway {
    listener: TcpListener,
    shared: Arc<Shared>,
}

impl Gateway {
    /// Validate `config` and bind the listening socket.
    pub fn bind(config: GatewayConfig) -> Result<Gateway, GatewayError> {
        config.validate()?;
        let listener = TcpListener::bind(&config.listen).map_err(|source| GatewayError::Bind {
            addr: config.listen.clone(),
            source,
        })?;
        Ok(Gateway {
            listener,
            shared: Arc::new(Shared {
                config,
                links: Mutex::new(FxHashMap::default()),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop on the calling thread.
    pub fn serve(self) -> Result<(), GatewayError> {
        info!(
            listen = %self.local_addr()?,
            upstream = %self.shared.config.upstream,
            "wshookd listening"
        );
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "accept error");
                    continue;
                }
            };
            let shared = Arc::clone(&self.shared);
            let id = ConnectionId::new(shared.next_id.fetch_add(1, Ordering::Relaxed));
            let spawned = thread::Builder::new()
                .name(format!("wshookd-conn-{}", id.get()))
                .spawn(move || handle_client(shared, id, stream));
            if let Err(e) = spawned {
                error!(error = %e, %id, "failed to spawn connection thread");
            }
        }
        Ok(())
    }

    /// Run the accept loop on a background thread.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("wshookd-accept".to_string())
            .spawn(move || {
                if let Err(e) = self.serve() {
                    error!(error = %e, "accept loop stopped");
                }
            })
    }

    /// Number of connections with a registered session.
    pub fn connections(&self) -> usize {
        self.shared.links.lock().len()
    }
}

fn handle_client(shared: Arc<Shared>, id: ConnectionId, client: TcpStream) {
    let peer = client
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".to_string());
    let span = info_span!("conn", %id, %peer);
    let _guard = span.enter();

    info!("client connected");
    let writer = match client.try_clone() {
        Ok(writer) => IoTransport::new(writer),
        Err(e) => {
            warn!(error = %e, "failed to clone client socket");
            return;
        }
    };
    let link = Arc::new(Mutex::new(Link::new(shared.config.message_kind(), writer)));
    shared.links.lock().insert(id, Arc::clone(&link));

    match relay(&shared, id, &link, client) {
        Ok(()) => info!("client disconnected"),
        Err(e) => warn!(error = %e, "connection closed"),
    }

    shared.links.lock().remove(&id);
    match Arc::try_unwrap(link) {
        Ok(link) => link.into_inner().session.on_close(),
        Err(_) => debug!("link still referenced after close"),
    }
}

/// Drive one client connection until either side goes away.
fn relay(
    shared: &Arc<Shared>,
    id: ConnectionId,
    link: &ClientLink,
    client: TcpStream,
) -> Result<(), GatewayError> {
    client.set_write_timeout(shared.config.write_timeout())?;
    let mut reader = IoTransport::new(client);
    let mut buf = vec![0u8; shared.config.read_buffer_size];
    let mut bridge = Bridge {
        shared,
        id,
        link,
        upstream: None,
        pump: None,
    };

    let outcome = loop {
        let chunk = match read_chunk(&mut reader, &mut buf) {
            Ok(chunk) => chunk,
            Err(HostError::Eof) => break Ok(()),
            Err(e) => break Err(e.into()),
        };
        match bridge.on_chunk(chunk) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    if let Some(stream) = bridge.upstream.take() {
        let _ = stream.shutdown(Shutdown::Both);
    }
    let _ = reader.get_ref().shutdown(Shutdown::Both);
    if let Some(pump) = bridge.pump.take() {
        let _ = pump.join();
    }
    outcome
}

enum Flow {
    Continue,
    Stop,
}

/// Client-to-upstream half of a connection.
struct Bridge<'a> {
    shared: &'a Arc<Shared>,
    id: ConnectionId,
    link: &'a ClientLink,
    upstream: Option<TcpStream>,
    pump: Option<JoinHandle<()>>,
}

impl Bridge<'_> {
    /// Hand one chunk to the session, frame by frame once it is open.
    fn on_chunk(&mut self, chunk: &[u8]) -> Result<Flow, GatewayError> {
        let mut pending = chunk;
        loop {
            let received = self.link.lock().on_readable(pending);
            match received {
                Ok(Received::Upgraded) => {
                    self.open_upstream()?;
                    return Ok(Flow::Continue);
                }
                Ok(Received::Frame(decoded)) => {
                    if let Flow::Stop = self.on_frame(decoded)? {
                        return Ok(Flow::Stop);
                    }
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(error = %e, "upgrade not completed");
                    return Ok(Flow::Continue);
                }
            }
            match frame_len(pending) {
                Some(used) if used < pending.len() => pending = &pending[used..],
                _ => return Ok(Flow::Continue),
            }
        }
    }

    fn on_frame(&mut self, decoded: Decoded) -> Result<Flow, GatewayError> {
        match decoded {
            Decoded::Message(payload) => {
                debug!(len = payload.len(), "message");
                if let Some(stream) = self.upstream.as_mut() {
                    stream.write_all(&payload).map_err(GatewayError::Upstream)?;
                }
            }
            Decoded::Incomplete => debug!("partial frame dropped"),
            Decoded::Unsupported(Unsupported::Close) => {
                debug!("client sent a close frame");
                return Ok(Flow::Stop);
            }
            Decoded::Unsupported(reason) => warn!(%reason, "ignoring unsupported frame"),
            Decoded::Malformed(reason) => return Err(GatewayError::Malformed(reason)),
        }
        Ok(Flow::Continue)
    }

    fn open_upstream(&mut self) -> Result<(), GatewayError> {
        let addr = &self.shared.config.upstream;
        let stream = TcpStream::connect(addr).map_err(|source| GatewayError::Connect {
            addr: addr.clone(),
            source,
        })?;
        info!(upstream = %addr, "upgraded, relaying to upstream");
        let read_half = stream.try_clone()?;
        // Stored before spawning so teardown reaches it on any later error.
        self.upstream = Some(stream);
        self.pump = Some(spawn_pump(
            self.id,
            read_half,
            Arc::clone(self.link),
            self.shared.config.read_buffer_size,
        )?);
        Ok(())
    }
}

/// Forward upstream bytes to the client as data frames.
fn spawn_pump(
    id: ConnectionId,
    mut upstream: TcpStream,
    link: ClientLink,
    buffer_size: usize,
) -> io::Result<JoinHandle<()>> {
    let span = tracing::Span::current();
    thread::Builder::new()
        .name(format!("wshookd-upstream-{}", id.get()))
        .spawn(move || {
            let _guard = span.enter();
            let mut buf = vec![0u8; buffer_size];
            loop {
                let n = match upstream.read(&mut buf) {
                    Ok(0) => {
                        debug!("upstream closed");
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        debug!(error = %e, "upstream read failed");
                        break;
                    }
                };
                if let Err(e) = forward(&*link, &buf[..n]) {
                    warn!(error = %e, "client stream unusable");
                    break;
                }
            }
            // Unblocks the client reader if it is still waiting.
            let _ = link.lock().client.get_ref().shutdown(Shutdown::Both);
        })
}

/// Frame `data` for the client, split to fit single frames.
///
/// Stops at the first failure. After a short write the client holds part of
/// a frame, so nothing further can be sent on that stream.
fn forward<T: Transport>(link: &Mutex<Link<T>>, data: &[u8]) -> Result<(), SessionError> {
    for chunk in data.chunks(MAX_ENCODED_PAYLOAD) {
        link.lock().on_writable(chunk)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPGRADE_REQUEST: &[u8] =
        b"GET / HTTP/1.1\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";

    /// Accepts at most `limit` bytes per send.
    struct Capped {
        written: Vec<u8>,
        sends: usize,
        limit: usize,
    }

    impl Transport for Capped {
        fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
            self.sends += 1;
            let n = bytes.len().min(self.limit);
            self.written.extend_from_slice(&bytes[..n]);
            Ok(n)
        }

        fn recv(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    fn open_link(limit: usize) -> Mutex<Link<Capped>> {
        let client = Capped {
            written: Vec::new(),
            sends: 0,
            limit: usize::MAX,
        };
        let mut link = Link::new(MessageKind::Text, client);
        assert_eq!(link.on_readable(UPGRADE_REQUEST).unwrap(), Received::Upgraded);
        link.client = Capped {
            written: Vec::new(),
            sends: 0,
            limit,
        };
        Mutex::new(link)
    }

    #[test]
    fn forward_splits_long_upstream_chunks() {
        let link = open_link(usize::MAX);
        forward(&link, &vec![b'x'; MAX_ENCODED_PAYLOAD + 10]).unwrap();

        let client = link.into_inner().client;
        assert_eq!(client.sends, 2);
        assert_eq!(&client.written[..4], &[0x81, 126, 0xFF, 0xFF]);
        let second = &client.written[4 + MAX_ENCODED_PAYLOAD..];
        assert_eq!(&second[..2], &[0x81, 10]);
        assert_eq!(second.len(), 12);
    }

    #[test]
    fn forward_stops_after_partial_frame() {
        let link = open_link(3);
        let err = forward(&link, &vec![b'x'; MAX_ENCODED_PAYLOAD + 10]).unwrap_err();

        assert!(
            matches!(
                err,
                SessionError::ShortWrite { written: 3, expected } if expected == MAX_ENCODED_PAYLOAD + 4
            ),
            "Error: {}",
            err
        );
        let client = link.into_inner().client;
        assert_eq!(client.sends, 1);
        assert_eq!(client.written, vec![0x81, 126, 0xFF]);
    }

    #[test]
    fn forward_before_upgrade_is_refused() {
        let link = Mutex::new(Link::new(
            MessageKind::Text,
            Capped {
                written: Vec::new(),
                sends: 0,
                limit: usize::MAX,
            },
        ));
        assert!(matches!(
            forward(&link, b"early"),
            Err(SessionError::NotOpen)
        ));
        assert_eq!(link.into_inner().client.sends, 0);
    }
}
