//! Stream-socket plumbing: peers, the readiness set, the connection
//! acceptor, and the large-message buffer pool.
//!
//! A `Peer` owns one TCP stream in nonblocking mode. Disconnects are
//! sticky: once any operation observes one, every later operation reports
//! `Disconnected` without touching the socket.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PeerError {
    #[error("peer is disconnected")]
    Disconnected,
}

/// Result of a non-waiting receive attempt.
#[derive(Debug, PartialEq)]
pub enum ReceiveStatus {
    /// This many bytes were read (> 0).
    Received(usize),
    NoWaitingData,
    Disconnected,
}

/// How many 1ms retries a blocked send gets before we give up on the peer.
const MAX_SEND_RETRIES: u32 = 500;

pub struct Peer {
    stream: TcpStream,
    connected: AtomicBool,
    ready: AtomicBool,
}

impl Peer {
    /// Initiates a TCP connection to a listening server.
    pub fn initiate<A: ToSocketAddrs>(addr: A) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream)
    }

    /// Wraps an accepted stream.
    pub fn from_stream(stream: TcpStream) -> std::io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            connected: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        })
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Whether this socket had data waiting at the last readiness sweep.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// Marks the peer disconnected, e.g. on a timeout or protocol error.
    /// The actual erasure happens at the owner's next sweep.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }

    /// Sends all of `bytes`. A short write that can't complete, or any
    /// socket error, transitions the peer to Disconnected.
    pub fn send(&self, bytes: &[u8]) -> Result<(), PeerError> {
        if !self.is_connected() {
            return Err(PeerError::Disconnected);
        }

        let mut sent = 0;
        let mut retries = 0;
        while sent < bytes.len() {
            match (&self.stream).write(&bytes[sent..]) {
                Ok(0) => {
                    self.disconnect();
                    return Err(PeerError::Disconnected);
                }
                Ok(n) => sent += n,
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    retries += 1;
                    if retries > MAX_SEND_RETRIES {
                        self.disconnect();
                        return Err(PeerError::Disconnected);
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(_) => {
                    self.disconnect();
                    return Err(PeerError::Disconnected);
                }
            }
        }
        Ok(())
    }

    /// Tries to read some bytes without waiting.
    pub fn receive_some(&self, buf: &mut [u8]) -> ReceiveStatus {
        if !self.is_connected() {
            return ReceiveStatus::Disconnected;
        }

        match (&self.stream).read(buf) {
            Ok(0) => {
                self.disconnect();
                ReceiveStatus::Disconnected
            }
            Ok(n) => ReceiveStatus::Received(n),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                ReceiveStatus::NoWaitingData
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {
                ReceiveStatus::NoWaitingData
            }
            Err(_) => {
                self.disconnect();
                ReceiveStatus::Disconnected
            }
        }
    }

    /// Reads exactly `buf.len()` bytes, waiting for them to arrive.
    pub fn receive_bytes_wait(&self, buf: &mut [u8]) -> Result<(), PeerError> {
        let mut received = 0;
        while received < buf.len() {
            match self.receive_some(&mut buf[received..]) {
                ReceiveStatus::Received(n) => received += n,
                ReceiveStatus::NoWaitingData => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                ReceiveStatus::Disconnected => return Err(PeerError::Disconnected),
            }
        }
        Ok(())
    }

    /// Peeks for readiness: does this socket have data (or a pending
    /// disconnect) waiting?
    fn poll_ready(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        let mut probe = [0u8; 1];
        match self.stream.peek(&mut probe) {
            // A zero-byte peek means the other side closed; report ready so
            // the receive path observes the disconnect.
            Ok(_) => true,
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => false,
            Err(_) => true,
        }
    }
}

/// A set of peers that can be checked for readiness together, standing in
/// for a select()-style wait.
#[derive(Default)]
pub struct SocketSet {
    peers: Mutex<Vec<Arc<Peer>>>,
}

impl SocketSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, peer: &Arc<Peer>) {
        self.peers.lock().unwrap_or_else(|e| e.into_inner()).push(Arc::clone(peer));
    }

    pub fn remove(&self, peer: &Arc<Peer>) {
        self.peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|candidate| !Arc::ptr_eq(candidate, peer));
    }

    /// Sweeps every socket, setting each peer's ready flag. If none are
    /// ready and a timeout was given, sleeps and sweeps once more.
    ///
    /// Returns the number of ready sockets.
    pub fn check_sockets(&self, timeout_ms: u64) -> usize {
        let peers: Vec<Arc<Peer>> = self
            .peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut ready_count = sweep(&peers);
        if ready_count == 0 && timeout_ms > 0 {
            std::thread::sleep(Duration::from_millis(timeout_ms));
            ready_count = sweep(&peers);
        }
        ready_count
    }
}

fn sweep(peers: &[Arc<Peer>]) -> usize {
    let mut ready_count = 0;
    for peer in peers {
        let ready = peer.poll_ready();
        peer.set_ready(ready);
        if ready {
            ready_count += 1;
        }
    }
    ready_count
}

/// Owns the listener socket and hands out accepted peers.
pub struct Acceptor {
    listener: TcpListener,
    client_set: Arc<SocketSet>,
}

impl Acceptor {
    pub fn bind<A: ToSocketAddrs>(addr: A, client_set: Arc<SocketSet>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            client_set,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts a waiting connection, if any, and adds it to the client
    /// socket set.
    pub fn accept(&self) -> std::io::Result<Option<Arc<Peer>>> {
        match self.listener.accept() {
            Ok((stream, _)) => {
                let peer = Arc::new(Peer::from_stream(stream)?);
                self.client_set.add(&peer);
                Ok(Some(peer))
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Accepts a waiting connection and immediately closes it. Used when
    /// the server is at capacity.
    pub fn reject(&self) -> bool {
        matches!(self.listener.accept(), Ok(_))
    }
}

/// A pool of reusable receive buffers for composing large messages.
#[derive(Default)]
pub struct BufferPool {
    buffers: Vec<Vec<u8>>,
    buffer_size: usize,
}

impl BufferPool {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffers: Vec::new(),
            buffer_size,
        }
    }

    pub fn acquire(&mut self) -> Vec<u8> {
        self.buffers
            .pop()
            .unwrap_or_else(|| vec![0; self.buffer_size])
    }

    pub fn release(&mut self, buffer: Vec<u8>) {
        debug_assert_eq!(buffer.len(), self.buffer_size);
        self.buffers.push(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_and_receive_over_loopback() {
        let set = Arc::new(SocketSet::new());
        let acceptor = Acceptor::bind("127.0.0.1:0", Arc::clone(&set)).unwrap();
        let addr = acceptor.local_addr().unwrap();

        let client = Arc::new(Peer::initiate(addr).unwrap());
        let server_side = loop {
            if let Some(peer) = acceptor.accept().unwrap() {
                break peer;
            }
            std::thread::sleep(Duration::from_millis(1));
        };

        client.send(b"hello").unwrap();

        let mut buf = [0u8; 5];
        server_side.receive_bytes_wait(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn readiness_sweep_flags_waiting_data() {
        let set = Arc::new(SocketSet::new());
        let acceptor = Acceptor::bind("127.0.0.1:0", Arc::clone(&set)).unwrap();
        let addr = acceptor.local_addr().unwrap();

        let client = Arc::new(Peer::initiate(addr).unwrap());
        let server_side = loop {
            if let Some(peer) = acceptor.accept().unwrap() {
                break peer;
            }
            std::thread::sleep(Duration::from_millis(1));
        };

        assert_eq!(set.check_sockets(0), 0);
        assert!(!server_side.is_ready());

        client.send(b"x").unwrap();
        // Give loopback delivery a moment.
        assert!(set.check_sockets(50) >= 1);
        assert!(server_side.is_ready());
    }

    #[test]
    fn closed_peer_reports_disconnected() {
        let set = Arc::new(SocketSet::new());
        let acceptor = Acceptor::bind("127.0.0.1:0", Arc::clone(&set)).unwrap();
        let addr = acceptor.local_addr().unwrap();

        let client = Peer::initiate(addr).unwrap();
        let server_side = loop {
            if let Some(peer) = acceptor.accept().unwrap() {
                break peer;
            }
            std::thread::sleep(Duration::from_millis(1));
        };

        drop(client);
        let mut buf = [0u8; 1];
        let status = loop {
            match server_side.receive_some(&mut buf) {
                ReceiveStatus::NoWaitingData => std::thread::sleep(Duration::from_millis(1)),
                status => break status,
            }
        };
        assert_eq!(status, ReceiveStatus::Disconnected);
        assert!(!server_side.is_connected());
    }

    #[test]
    fn buffer_pool_reuses_buffers() {
        let mut pool = BufferPool::new(64);
        let buffer = pool.acquire();
        assert_eq!(buffer.len(), 64);
        pool.release(buffer);
        let _again = pool.acquire();
        assert!(pool.buffers.is_empty());
    }
}
