//! Blocking socket wrappers and length-framed packet I/O.
//!
//! Both transports hand their bytes through a small staging ring so the
//! framing layer can scan for the sentinel and read exact lengths without
//! caring how the OS chunked the stream. A zero-length read (or an
//! aborted connection) surfaces as a synthetic [`Packet::disconnect`];
//! that is the sole in-band signal for peer close.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::time::{Duration, Instant};

use crate::buffer::Circular;
use crate::codec;
use crate::packet::{Packet, PacketType, HEADER_REST, MAGIC};

/// Server TCP listen port, doubling as the client's UDP receive port.
pub const DEFAULT_CLIENT_PORT: u16 = 29015;
/// Server UDP receive port.
pub const DEFAULT_SERVER_PORT: u16 = 29016;
/// Minimum interval between UDP sends on one socket.
pub const ANTI_CONGESTION: Duration = Duration::from_millis(35);

const RECV_CHUNK: usize = 1024;
const STAGING_CAPACITY: usize = 2 * RECV_CHUNK;

#[derive(Debug)]
enum Transport {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

/// An owned TCP or UDP socket with a buffered receive staging area.
#[derive(Debug)]
pub struct Socket {
    transport: Transport,
    staging: Circular,
    last_send: Instant,
}

impl Socket {
    fn wrap(transport: Transport) -> Self {
        Self {
            transport,
            staging: Circular::new(STAGING_CAPACITY),
            last_send: Instant::now(),
        }
    }

    pub fn connect_tcp(host: &str, port: u16) -> io::Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_nodelay(true)?;
        Ok(Self::wrap(Transport::Tcp(stream)))
    }

    pub fn from_tcp(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self::wrap(Transport::Tcp(stream)))
    }

    pub fn bind_udp(port: u16) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        Ok(Self::wrap(Transport::Udp(socket)))
    }

    pub fn connect_udp(host: &str, port: u16) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect((host, port))?;
        Ok(Self::wrap(Transport::Udp(socket)))
    }

    pub fn connect_udp_addr(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect(addr)?;
        Ok(Self::wrap(Transport::Udp(socket)))
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self.transport, Transport::Tcp(_))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.transport {
            Transport::Tcp(stream) => stream.local_addr(),
            Transport::Udp(socket) => socket.local_addr(),
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match &self.transport {
            Transport::Tcp(stream) => stream.peer_addr(),
            Transport::Udp(socket) => socket.peer_addr(),
        }
    }

    /// Shares the underlying socket; the clone gets its own staging area.
    /// Use one handle per thread.
    pub fn try_clone(&self) -> io::Result<Self> {
        let transport = match &self.transport {
            Transport::Tcp(stream) => Transport::Tcp(stream.try_clone()?),
            Transport::Udp(socket) => Transport::Udp(socket.try_clone()?),
        };
        Ok(Self::wrap(transport))
    }

    /// A timeout lets a receive loop blocked in `recv` notice that its
    /// link has been torn down. `WouldBlock`/`TimedOut` errors then mean
    /// "nothing yet", not failure.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match &self.transport {
            Transport::Tcp(stream) => stream.set_read_timeout(timeout),
            Transport::Udp(socket) => socket.set_read_timeout(timeout),
        }
    }

    pub fn shutdown_send(&self) {
        if let Transport::Tcp(stream) = &self.transport {
            let _ = stream.shutdown(Shutdown::Write);
        }
    }

    pub fn shutdown_both(&self) {
        if let Transport::Tcp(stream) = &self.transport {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// True when the anti-congestion interval has elapsed since the last
    /// attempt. The timestamp updates on every call, so a burst after
    /// idle still skips its first datagram.
    fn ready_to_send(&mut self) -> bool {
        let now = Instant::now();
        let ready = self.last_send + ANTI_CONGESTION <= now;
        self.last_send = now;
        ready
    }

    /// Writes the whole buffer. TCP retries until every byte is sent;
    /// UDP sends one datagram, or silently drops it inside the
    /// anti-congestion window.
    pub fn send(&mut self, data: &[u8]) -> io::Result<()> {
        let gate_open = !self.is_tcp() && self.ready_to_send();
        match &mut self.transport {
            Transport::Tcp(stream) => stream.write_all(data),
            Transport::Udp(socket) => {
                if gate_open {
                    socket.send(data)?;
                }
                Ok(())
            }
        }
    }

    /// Receives exactly `n` bytes, or `None` when the peer closed.
    pub fn receive_exact(&mut self, n: usize) -> io::Result<Option<Vec<u8>>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            if self.staging.is_empty() && self.fill_staging()?.is_none() {
                return Ok(None);
            }
            let chunk = self.staging.pop(n - out.len());
            out.extend_from_slice(&chunk);
        }
        Ok(Some(out))
    }

    /// Discards incoming bytes until `code` has been consumed. Returns
    /// false when the peer closed first.
    pub fn receive_until(&mut self, code: &[u8]) -> io::Result<bool> {
        let mut matched = 0;
        while matched < code.len() {
            let byte = match self.receive_exact(1)? {
                Some(bytes) => bytes[0],
                None => return Ok(false),
            };
            if byte == code[matched] {
                matched += 1;
            } else if byte == code[0] {
                matched = 1;
            } else {
                matched = 0;
            }
        }
        Ok(true)
    }

    fn fill_staging(&mut self) -> io::Result<Option<usize>> {
        let mut chunk = [0u8; RECV_CHUNK];
        let n = match &mut self.transport {
            Transport::Tcp(stream) => match stream.read(&mut chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => return Ok(None),
                Err(e) => return Err(e),
            },
            Transport::Udp(socket) => socket.recv(&mut chunk)?,
        };
        self.staging
            .push(&chunk[..n])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        Ok(Some(n))
    }
}

/// Serialises and writes one packet as a single buffer.
pub fn send_packet(socket: &mut Socket, packet: &Packet) -> io::Result<()> {
    socket.send(&packet.to_bytes())
}

/// Reads one framed packet: scan to the sentinel, read the remaining six
/// header bytes, then exactly `data_size` payload bytes. Peer close at
/// any point yields the synthetic disconnect packet.
pub fn receive_packet(socket: &mut Socket) -> io::Result<Packet> {
    if !socket.receive_until(&codec::pack_u16(MAGIC))? {
        return Ok(Packet::disconnect());
    }
    let header = match socket.receive_exact(HEADER_REST)? {
        Some(bytes) => bytes,
        None => return Ok(Packet::disconnect()),
    };
    let data_size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let packet_type = PacketType::from_byte(header[4]);
    let client = header[5];

    let data = if data_size == 0 {
        Vec::new()
    } else {
        match socket.receive_exact(data_size)? {
            Some(bytes) => bytes,
            None => return Ok(Packet::disconnect()),
        }
    };
    Ok(Packet::new(packet_type, client, data))
}

/// A bound, non-blocking TCP listen socket.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    pub fn bind(port: u16) -> io::Result<Self> {
        let inner = TcpListener::bind(("0.0.0.0", port))?;
        inner.set_nonblocking(true)?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Accepts one pending connection, or `None` when nothing is queued.
    pub fn accept(&self) -> io::Result<Option<(Socket, SocketAddr)>> {
        match self.inner.accept() {
            Ok((stream, addr)) => Ok(Some((Socket::from_tcp(stream)?, addr))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_gate_skips_first_send_after_construction() {
        let mut socket = Socket::connect_udp("127.0.0.1", 9).unwrap();
        assert!(!socket.ready_to_send());
    }

    #[test]
    fn udp_gate_opens_after_interval() {
        let mut socket = Socket::connect_udp("127.0.0.1", 9).unwrap();
        socket.last_send = Instant::now() - Duration::from_millis(40);
        assert!(socket.ready_to_send());
        // The timestamp was just refreshed, so the gate closes again.
        assert!(!socket.ready_to_send());
    }
}
