//! Framed TCP Transport
//!
//! Blocking, length-preserving I/O over a `TcpStream`: exact-length reads
//! and writes, header+payload framing, and the connect/bind helpers both
//! roles use. Socket errors are classified so callers can tell a retryable
//! timeout from a dead connection.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{FtError, Result};
use crate::protocol::{MessageHeader, MsgType, HEADER_SIZE};

/// Send/receive timeout applied to every transfer socket.
pub const IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for the initial TCP connect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// First connect-retry delay; doubles per attempt up to the cap.
const BACKOFF_START_MS: u64 = 1000;
const BACKOFF_MAX_MS: u64 = 16_000;

const LISTEN_BACKLOG: i32 = 5;

fn classify_send(err: io::Error) -> FtError {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => FtError::Timeout,
        _ => FtError::Send(err.to_string()),
    }
}

fn classify_recv(err: io::Error) -> FtError {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => FtError::Timeout,
        _ => FtError::Recv(err.to_string()),
    }
}

/// A message-framed view of a TCP stream.
pub struct FrameStream {
    stream: TcpStream,
}

impl FrameStream {
    /// Wrap a connected stream, applying the standard I/O timeouts.
    pub fn new(stream: TcpStream) -> Result<Self> {
        stream
            .set_read_timeout(Some(IO_TIMEOUT))
            .and_then(|_| stream.set_write_timeout(Some(IO_TIMEOUT)))
            .map_err(|e| FtError::Socket(e.to_string()))?;
        Ok(FrameStream { stream })
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    /// Disable Nagle's algorithm. Chunk/ACK round-trips are latency-bound.
    pub fn set_nodelay(&self) {
        if let Err(e) = self.stream.set_nodelay(true) {
            tracing::warn!("Failed to set TCP_NODELAY: {}", e);
        }
    }

    /// Write the whole buffer, looping over partial writes.
    pub fn send_all(&mut self, data: &[u8]) -> Result<()> {
        let mut sent = 0;
        while sent < data.len() {
            match self.stream.write(&data[sent..]) {
                Ok(0) => return Err(FtError::Send("connection closed".into())),
                Ok(n) => sent += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(classify_send(e)),
            }
        }
        Ok(())
    }

    /// Fill the whole buffer, looping over partial reads. A clean EOF from
    /// the peer is reported as a receive failure.
    pub fn recv_all(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut received = 0;
        while received < buf.len() {
            match self.stream.read(&mut buf[received..]) {
                Ok(0) => return Err(FtError::Recv("connection closed by peer".into())),
                Ok(n) => received += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(classify_recv(e)),
            }
        }
        Ok(())
    }

    /// Frame and send one message: 32-byte header, then the payload.
    pub fn send_message(&mut self, msg_type: MsgType, sequence_num: u64, payload: &[u8]) -> Result<()> {
        let header = MessageHeader::new(msg_type, sequence_num, payload.len() as u64);
        self.send_all(&header.encode())?;
        if !payload.is_empty() {
            self.send_all(payload)?;
        }
        tracing::trace!(
            "sent {:?} seq={} payload={}B",
            msg_type,
            sequence_num,
            payload.len()
        );
        Ok(())
    }

    /// Receive one message. The header is validated before the payload is
    /// read; a payload larger than `max_payload` is a protocol violation.
    pub fn recv_message(&mut self, max_payload: u64) -> Result<(MessageHeader, Vec<u8>)> {
        let mut header_buf = [0u8; HEADER_SIZE];
        self.recv_all(&mut header_buf)?;

        let header = MessageHeader::decode(&header_buf);
        header.validate()?;

        if header.payload_size > max_payload {
            return Err(FtError::Protocol(format!(
                "payload size {} exceeds maximum {}",
                header.payload_size, max_payload
            )));
        }

        let mut payload = vec![0u8; header.payload_size as usize];
        if !payload.is_empty() {
            self.recv_all(&mut payload)?;
        }

        tracing::trace!(
            "received type {:#04x} seq={} payload={}B",
            header.msg_type,
            header.sequence_num,
            header.payload_size
        );
        Ok((header, payload))
    }
}

/// Connect with exponential backoff between attempts (1 s doubling to 16 s).
pub fn connect_with_retry(host: &str, port: u16, max_attempts: u32) -> Result<TcpStream> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| FtError::Connect(format!("cannot resolve {}: {}", host, e)))?
        .next()
        .ok_or_else(|| FtError::Connect(format!("no addresses for {}", host)))?;

    let mut delay_ms = BACKOFF_START_MS;
    let mut last_err = String::new();

    for attempt in 1..=max_attempts {
        tracing::info!("Connecting to {} (attempt {}/{})", addr, attempt, max_attempts);
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => {
                tracing::info!("Connected to {}", addr);
                return Ok(stream);
            }
            Err(e) => {
                tracing::warn!("Connection attempt {} failed: {}", attempt, e);
                last_err = e.to_string();
            }
        }

        if attempt < max_attempts {
            tracing::info!("Retrying in {} ms", delay_ms);
            thread::sleep(Duration::from_millis(delay_ms));
            delay_ms = (delay_ms * 2).min(BACKOFF_MAX_MS);
        }
    }

    Err(FtError::Connect(format!(
        "failed after {} attempts: {}",
        max_attempts, last_err
    )))
}

/// Bind the listening socket with SO_REUSEADDR set before bind.
pub fn bind_listener(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| FtError::Socket(e.to_string()))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| FtError::Socket(e.to_string()))?;
    socket
        .bind(&addr.into())
        .map_err(|e| FtError::Bind(format!("port {}: {}", port, e)))?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|e| FtError::Listen(e.to_string()))?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{HandshakePayload, HANDSHAKE_SIZE};
    use std::net::TcpStream;

    #[test]
    fn test_message_round_trip_over_loopback() {
        let listener = bind_listener(0).unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut fs = FrameStream::new(stream).unwrap();
            fs.recv_message(64).unwrap()
        });

        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut fs = FrameStream::new(stream).unwrap();
        let payload = HandshakePayload::new().encode();
        fs.send_message(MsgType::HandshakeReq, 0, &payload).unwrap();

        let (header, received) = handle.join().unwrap();
        assert_eq!(header.msg_type, MsgType::HandshakeReq as u8);
        assert_eq!(header.sequence_num, 0);
        assert_eq!(header.payload_size, HANDSHAKE_SIZE as u64);
        assert_eq!(received, payload);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let listener = bind_listener(0).unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut fs = FrameStream::new(stream).unwrap();
            fs.recv_message(8)
        });

        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut fs = FrameStream::new(stream).unwrap();
        fs.send_message(MsgType::Error, 1, &[0u8; 64]).unwrap();

        let err = handle.join().unwrap().unwrap_err();
        assert!(matches!(err, FtError::Protocol(_)));
    }

    #[test]
    fn test_peer_close_reported_as_recv() {
        let listener = bind_listener(0).unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });

        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut fs = FrameStream::new(stream).unwrap();
        handle.join().unwrap();

        let err = fs.recv_message(64).unwrap_err();
        assert!(matches!(err, FtError::Recv(_)));
    }
}
