//! Transport channels.
//!
//! Two kinds, matching the two wire contracts: a reliable ordered stream
//! with `[u32 length][payload]` framing, and an unreliable datagram channel
//! capped at 1400 bytes. Both come in a socket flavor (non-blocking std
//! networking) and an in-process loopback flavor used when one process
//! hosts both roles, and by the test suite.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::rc::Rc;

use crate::MAX_DATAGRAM;

/// Upper bound on a reliable payload; anything larger (or empty) is a
/// protocol violation and drops the connection.
pub const MAX_RELIABLE_PAYLOAD: usize = 65_000;

const LENGTH_PREFIX_BYTES: usize = 4;

/// Synthetic peer address reported by loopback channels.
fn loopback_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel i/o: {0}")]
    Io(#[from] io::Error),
    #[error("reliable framing violation: length {0}")]
    Framing(usize),
    #[error("peer closed the stream")]
    Closed,
}

type LoopbackQueue = Rc<RefCell<VecDeque<Vec<u8>>>>;

enum ReliableTransport {
    Tcp(TcpStream),
    Loopback {
        incoming: LoopbackQueue,
        outgoing: LoopbackQueue,
    },
}

/// One end of the reliable ordered stream. Reads accumulate across calls
/// and complete length-prefixed payloads are surfaced by `poll`.
pub struct ReliableChannel {
    transport: ReliableTransport,
    recv_buf: Vec<u8>,
    send_buf: Vec<u8>,
}

impl ReliableChannel {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        let _ = stream.set_nodelay(true);
        Ok(Self {
            transport: ReliableTransport::Tcp(stream),
            recv_buf: Vec::new(),
            send_buf: Vec::new(),
        })
    }

    /// Two connected in-process ends.
    pub fn loopback_pair() -> (Self, Self) {
        let a_to_b: LoopbackQueue = Rc::new(RefCell::new(VecDeque::new()));
        let b_to_a: LoopbackQueue = Rc::new(RefCell::new(VecDeque::new()));
        let a = Self {
            transport: ReliableTransport::Loopback {
                incoming: Rc::clone(&b_to_a),
                outgoing: Rc::clone(&a_to_b),
            },
            recv_buf: Vec::new(),
            send_buf: Vec::new(),
        };
        let b = Self {
            transport: ReliableTransport::Loopback {
                incoming: a_to_b,
                outgoing: b_to_a,
            },
            recv_buf: Vec::new(),
            send_buf: Vec::new(),
        };
        (a, b)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.transport {
            ReliableTransport::Tcp(stream) => stream.peer_addr().ok(),
            ReliableTransport::Loopback { .. } => None,
        }
    }

    /// Frames and queues a payload, then flushes as much as the socket will
    /// take without blocking.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), ChannelError> {
        if payload.is_empty() || payload.len() > MAX_RELIABLE_PAYLOAD {
            return Err(ChannelError::Framing(payload.len()));
        }

        if let ReliableTransport::Loopback { outgoing, .. } = &mut self.transport {
            outgoing.borrow_mut().push_back(payload.to_vec());
            return Ok(());
        }

        self.send_buf
            .extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.send_buf.extend_from_slice(payload);
        self.flush()
    }

    /// Pushes queued bytes into the socket. Partial writes keep the rest
    /// queued for the next call.
    pub fn flush(&mut self) -> Result<(), ChannelError> {
        let ReliableTransport::Tcp(stream) = &mut self.transport else {
            return Ok(());
        };
        while !self.send_buf.is_empty() {
            match stream.write(&self.send_buf) {
                Ok(0) => return Err(ChannelError::Closed),
                Ok(n) => {
                    self.send_buf.drain(..n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(ChannelError::Io(e)),
            }
        }
        Ok(())
    }

    /// Drains the stream and returns every complete payload. Framing
    /// violations and closed/errored streams surface as errors; the caller
    /// drops the connection.
    pub fn poll(&mut self) -> Result<Vec<Vec<u8>>, ChannelError> {
        match &mut self.transport {
            ReliableTransport::Loopback { incoming, .. } => {
                Ok(incoming.borrow_mut().drain(..).collect())
            }
            ReliableTransport::Tcp(stream) => {
                let mut chunk = [0u8; 4096];
                loop {
                    match stream.read(&mut chunk) {
                        Ok(0) => return Err(ChannelError::Closed),
                        Ok(n) => self.recv_buf.extend_from_slice(&chunk[..n]),
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => return Err(ChannelError::Io(e)),
                    }
                }

                let mut payloads = Vec::new();
                loop {
                    if self.recv_buf.len() < LENGTH_PREFIX_BYTES {
                        break;
                    }
                    let len = u32::from_le_bytes([
                        self.recv_buf[0],
                        self.recv_buf[1],
                        self.recv_buf[2],
                        self.recv_buf[3],
                    ]) as usize;
                    if len == 0 || len > MAX_RELIABLE_PAYLOAD {
                        return Err(ChannelError::Framing(len));
                    }
                    if self.recv_buf.len() < LENGTH_PREFIX_BYTES + len {
                        break;
                    }
                    let payload: Vec<u8> = self
                        .recv_buf
                        .drain(..LENGTH_PREFIX_BYTES + len)
                        .skip(LENGTH_PREFIX_BYTES)
                        .collect();
                    payloads.push(payload);
                }
                Ok(payloads)
            }
        }
    }
}

/// Non-blocking accept loop around a TCP listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn accept_pending(&mut self) -> Vec<(ReliableChannel, SocketAddr)> {
        let mut accepted = Vec::new();
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => match ReliableChannel::from_stream(stream) {
                    Ok(channel) => accepted.push((channel, addr)),
                    Err(e) => log::warn!("failed to adopt connection from {addr}: {e}"),
                },
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("accept failed: {e}");
                    break;
                }
            }
        }
        accepted
    }
}

enum DatagramTransport {
    Udp(UdpSocket),
    Loopback {
        incoming: LoopbackQueue,
        outgoing: LoopbackQueue,
    },
}

/// One end of the unreliable datagram channel.
pub struct DatagramChannel {
    transport: DatagramTransport,
    remote: Option<SocketAddr>,
}

impl DatagramChannel {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            transport: DatagramTransport::Udp(socket),
            remote: None,
        })
    }

    pub fn loopback_pair() -> (Self, Self) {
        let a_to_b: LoopbackQueue = Rc::new(RefCell::new(VecDeque::new()));
        let b_to_a: LoopbackQueue = Rc::new(RefCell::new(VecDeque::new()));
        let a = Self {
            transport: DatagramTransport::Loopback {
                incoming: Rc::clone(&b_to_a),
                outgoing: Rc::clone(&a_to_b),
            },
            remote: Some(loopback_addr()),
        };
        let b = Self {
            transport: DatagramTransport::Loopback {
                incoming: a_to_b,
                outgoing: b_to_a,
            },
            remote: Some(loopback_addr()),
        };
        (a, b)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.transport {
            DatagramTransport::Udp(socket) => socket.local_addr().ok(),
            DatagramTransport::Loopback { .. } => Some(loopback_addr()),
        }
    }

    pub fn set_remote(&mut self, addr: SocketAddr) {
        self.remote = Some(addr);
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn send_to(&mut self, payload: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if payload.len() > MAX_DATAGRAM {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "datagram exceeds the 1400-byte cap",
            ));
        }
        match &mut self.transport {
            DatagramTransport::Udp(socket) => socket.send_to(payload, addr),
            DatagramTransport::Loopback { outgoing, .. } => {
                outgoing.borrow_mut().push_back(payload.to_vec());
                Ok(payload.len())
            }
        }
    }

    pub fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
        let addr = self
            .remote
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no remote address set"))?;
        self.send_to(payload, addr)
    }

    /// Drains every queued datagram. Transient socket errors (e.g. refused
    /// ICMP responses surfacing on the next read) are logged and skipped so
    /// one bad peer cannot stall the poll loop.
    pub fn poll(&mut self) -> Vec<(Vec<u8>, SocketAddr)> {
        match &mut self.transport {
            DatagramTransport::Loopback { incoming, .. } => {
                let addr = loopback_addr();
                incoming.borrow_mut().drain(..).map(|p| (p, addr)).collect()
            }
            DatagramTransport::Udp(socket) => {
                let mut packets = Vec::new();
                let mut buf = [0u8; 2048];
                loop {
                    match socket.recv_from(&mut buf) {
                        Ok((size, addr)) => {
                            if size > MAX_DATAGRAM {
                                continue;
                            }
                            packets.push((buf[..size].to_vec(), addr));
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            log::debug!("datagram recv error: {e}");
                            break;
                        }
                    }
                }
                packets
            }
        }
    }

    /// Throws away everything currently queued, returning how many
    /// datagrams were lost. Tests use this to simulate packet loss
    /// deterministically.
    pub fn discard_incoming(&mut self) -> usize {
        self.poll().len()
    }
}
