//! Byte-level transport primitives supplied by the host.
//!
//! A [`Session`](crate::session::Session) never touches sockets directly; it
//! calls [`Transport::send`] once per response or frame and reports short
//! writes instead of retrying.

use std::io;

/// The two primitives a session needs from its connection.
pub trait Transport {
    /// Write `bytes` once, returning how many were accepted.
    fn send(&mut self, bytes: &[u8]) -> io::Result<usize>;

    /// Read once into `buf`. `Ok(0)` means the peer closed the stream.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        (**self).send(bytes)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).recv(buf)
    }
}

/// [`Transport`] over any blocking `std::io` stream (`TcpStream`,
/// `UnixStream`, in-memory cursors in tests).
#[cfg(feature = "std-io")]
#[derive(Debug)]
pub struct IoTransport<S> {
    stream: S,
}

#[cfg(feature = "std-io")]
impl<S> IoTransport<S> {
    pub fn new(stream: S) -> Self {
        IoTransport { stream }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(feature = "std-io")]
impl<S: io::Read + io::Write> Transport for IoTransport<S> {
    fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let written = self.stream.write(bytes)?;
        self.stream.flush()?;
        Ok(written)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

#[cfg(all(test, feature = "std-io"))]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn io_transport_reads_and_writes_once() {
        let mut transport = IoTransport::new(Cursor::new(b"abcdef".to_vec()));
        let mut buf = [0u8; 4];
        assert_eq!(transport.recv(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");

        // Cursor<Vec<u8>> overwrites from the current position
        assert_eq!(transport.send(b"XY").unwrap(), 2);
        assert_eq!(transport.into_inner().into_inner(), b"abcdXY".to_vec());
    }

    #[test]
    fn io_transport_reports_eof_as_zero() {
        let mut transport = IoTransport::new(Cursor::new(Vec::new()));
        let mut buf = [0u8; 8];
        assert_eq!(transport.recv(&mut buf).unwrap(), 0);
    }

    #[test]
    fn io_transport_surfaces_short_writes() {
        let mut backing = [0u8; 3];
        let mut transport = IoTransport::new(Cursor::new(&mut backing[..]));
        assert_eq!(transport.send(b"hello").unwrap(), 3);
        assert_eq!(&backing, b"hel");
    }
}
