/*!
Raw bidirectional byte splicing for upgraded connections.

A session owns both connections. Two copy threads run concurrently (client→backend
and backend→client); each one, when its source hits end-of-stream or an error, shuts
down both of its connections so the opposite thread unblocks. `splice` joins both
threads before returning, so both connections are closed when it returns.
*/

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::net::UnixStream;
use std::thread;

/// A full-duplex stream that can be cloned into a reader and a writer half and
/// shut down from either half.
pub trait Duplex: Read + Write + Send + Sized {
    fn try_clone_duplex(&self) -> io::Result<Self>;
    fn shutdown_duplex(&self);
}

impl Duplex for UnixStream {
    fn try_clone_duplex(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn shutdown_duplex(&self) {
        let _ = self.shutdown(Shutdown::Both);
    }
}

impl Duplex for TcpStream {
    fn try_clone_duplex(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn shutdown_duplex(&self) {
        let _ = self.shutdown(Shutdown::Both);
    }
}

/// One side of a tunnel: reader and writer halves of the same connection plus bytes
/// already read from it that must reach the other side first.
pub struct TunnelEnd<S> {
    reader: S,
    writer: S,
    pending: Vec<u8>,
}

impl<S: Duplex> TunnelEnd<S> {
    pub fn new(reader: S, writer: S, pending: Vec<u8>) -> Self {
        TunnelEnd {
            reader,
            writer,
            pending,
        }
    }

    /// Take raw control of `stream` by cloning its descriptor.
    pub fn from_stream(stream: S, pending: Vec<u8>) -> io::Result<Self> {
        let writer = stream.try_clone_duplex()?;
        Ok(TunnelEnd::new(stream, writer, pending))
    }
}

/// Bytes relayed in each direction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TunnelStats {
    pub client_to_backend: u64,
    pub backend_to_client: u64,
}

// Copy src to dst until EOF/error, then close both connections of the pair.
fn pipe<R: Duplex, W: Duplex>(src: &mut R, dst: &mut W, pending: &[u8]) -> u64 {
    let mut n = 0u64;
    let mut ok = true;
    if !pending.is_empty() {
        ok = dst.write_all(pending).and_then(|_| dst.flush()).is_ok();
        if ok {
            n += pending.len() as u64;
        }
    }
    if ok {
        n += io::copy(src, dst).unwrap_or(0);
    }
    dst.shutdown_duplex();
    src.shutdown_duplex();
    n
}

/// Splice client and backend together until both directions finish.
pub fn splice<C: Duplex, B: Duplex>(client: TunnelEnd<C>, backend: TunnelEnd<B>) -> TunnelStats {
    let TunnelEnd {
        reader: mut client_rx,
        writer: mut client_tx,
        pending: client_pending,
    } = client;
    let TunnelEnd {
        reader: mut backend_rx,
        writer: mut backend_tx,
        pending: backend_pending,
    } = backend;

    thread::scope(|s| {
        let up = s.spawn(move || pipe(&mut client_rx, &mut backend_tx, &client_pending));
        let down = s.spawn(move || pipe(&mut backend_rx, &mut client_tx, &backend_pending));
        TunnelStats {
            client_to_backend: up.join().unwrap_or(0),
            backend_to_client: down.join().unwrap_or(0),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn end(s: UnixStream, pending: &[u8]) -> TunnelEnd<UnixStream> {
        TunnelEnd::from_stream(s, pending.to_vec()).expect("clone")
    }

    #[test]
    fn test_bytes_flow_both_ways_and_close_propagates() {
        let (mut client_outer, client_inner) = UnixStream::pair().unwrap();
        let (mut backend_outer, backend_inner) = UnixStream::pair().unwrap();
        client_outer
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        backend_outer
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let h = thread::spawn(move || {
            splice(end(client_inner, b"early"), end(backend_inner, b"HTTP/1.1 101 UPGRADED\r\n\r\n"))
        });

        let mut buf = [0u8; 5];
        backend_outer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"early");
        client_outer.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        backend_outer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        let mut head = [0u8; 25];
        client_outer.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"HTTP/1.1 101 UPGRADED\r\n\r\n");
        backend_outer.write_all(b"pong").unwrap();
        let mut buf = [0u8; 4];
        client_outer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");

        // Closing the backend side tears the client side down too.
        drop(backend_outer);
        let mut rest = Vec::new();
        client_outer.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());

        let stats = h.join().unwrap();
        assert_eq!(stats.client_to_backend, 9);
        assert_eq!(stats.backend_to_client, 29);
    }

    #[test]
    fn test_client_close_ends_session() {
        let (client_outer, client_inner) = UnixStream::pair().unwrap();
        let (mut backend_outer, backend_inner) = UnixStream::pair().unwrap();
        backend_outer
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let h = thread::spawn(move || splice(end(client_inner, b""), end(backend_inner, b"")));
        drop(client_outer);
        let mut rest = Vec::new();
        backend_outer.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
        assert_eq!(h.join().unwrap(), TunnelStats::default());
    }
}
