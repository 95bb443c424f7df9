//! File Sender Module
//!
//! Drives the sending half of a transfer: handshake, FILE_INFO exchange,
//! then the lock-step chunk pipeline with a bounded per-chunk retry budget.

use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::checksum::crc32;
use crate::error::{FtError, Result};
use crate::fileio::{self, FileMetadata};
use crate::protocol::{
    ChecksumType, ChunkAck, ChunkHeader, ErrorMessage, FileAck, FileInfo, HandshakePayload,
    MsgType, CHUNK_HEADER_SIZE, DEFAULT_CHUNK_SIZE, ERROR_MSG_SIZE, FILE_CHECKSUM_SIZE,
    PROTOCOL_VERSION,
};
use crate::transport::{connect_with_retry, FrameStream};

/// Max retransmit attempts per chunk.
pub const MAX_RETRIES: u32 = 3;

/// Connect attempts before giving up on the peer.
pub const CONNECT_ATTEMPTS: u32 = 5;

/// Summary of a completed transfer.
#[derive(Debug, Clone)]
pub struct TransferStats {
    pub bytes_sent: u64,
    pub chunks_sent: u64,
    pub elapsed: Duration,
}

impl TransferStats {
    pub fn throughput_mbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes_sent as f64 / secs / 1_000_000.0
        } else {
            0.0
        }
    }
}

/// File sender: owns the source file metadata and the outbound sequence
/// counter for one connection.
pub struct FileSender {
    path: PathBuf,
    metadata: FileMetadata,
    chunk_size: u32,
    sequence_num: u64,
}

impl FileSender {
    pub fn new(path: &Path) -> Result<Self> {
        let metadata = FileMetadata::probe(path)?;
        tracing::info!(
            "File: {}, Size: {} bytes",
            metadata.filename,
            metadata.file_size
        );
        Ok(FileSender {
            path: path.to_path_buf(),
            metadata,
            chunk_size: DEFAULT_CHUNK_SIZE,
            // Handshake uses literal sequence 0; the server's ack takes 1.
            sequence_num: 2,
        })
    }

    pub fn set_chunk_size(&mut self, chunk_size: u32) {
        self.chunk_size = chunk_size;
    }

    pub fn file_size(&self) -> u64 {
        self.metadata.file_size
    }

    pub fn total_chunks(&self) -> u64 {
        self.metadata.file_size.div_ceil(self.chunk_size as u64)
    }

    /// Connect to the receiver and run the full transfer.
    pub fn send_to(&mut self, host: &str, port: u16) -> Result<TransferStats> {
        let stream = connect_with_retry(host, port, CONNECT_ATTEMPTS)?;
        self.send_over(stream)
    }

    /// Run the full transfer over an established stream.
    pub fn send_over(&mut self, stream: TcpStream) -> Result<TransferStats> {
        let mut fs = FrameStream::new(stream)?;
        fs.set_nodelay();

        tracing::info!("Performing handshake...");
        self.handshake(&mut fs)?;

        tracing::info!("Sending file info...");
        let info = self.build_file_info();
        self.send_file_info(&mut fs, &info)?;
        self.await_file_ack(&mut fs)?;

        tracing::info!(
            "Sending {} chunks (chunk size: {} bytes)",
            info.total_chunks,
            info.chunk_size
        );
        let stats = self.stream_chunks(&mut fs, &info)?;

        tracing::info!(
            "Transfer complete: {} bytes in {:.2} s ({:.2} MB/s)",
            stats.bytes_sent,
            stats.elapsed.as_secs_f64(),
            stats.throughput_mbps()
        );
        Ok(stats)
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.sequence_num;
        self.sequence_num += 1;
        seq
    }

    fn handshake(&mut self, fs: &mut FrameStream) -> Result<()> {
        let payload = HandshakePayload::new();
        fs.send_message(MsgType::HandshakeReq, 0, &payload.encode())?;

        let (header, payload) = fs.recv_message(ERROR_MSG_SIZE as u64)?;
        match MsgType::from_u8(header.msg_type) {
            Some(MsgType::HandshakeAck) => {
                let ack = HandshakePayload::decode(&payload)?;
                if ack.version != PROTOCOL_VERSION {
                    return Err(FtError::Version {
                        expected: PROTOCOL_VERSION,
                        got: ack.version,
                    });
                }
                tracing::info!("Handshake successful");
                Ok(())
            }
            Some(MsgType::Error) => Err(Self::surface_peer_error(&payload)),
            _ => Err(FtError::Protocol(format!(
                "expected HANDSHAKE_ACK, got type {:#04x}",
                header.msg_type
            ))),
        }
    }

    fn build_file_info(&self) -> FileInfo {
        FileInfo {
            filename: self.metadata.filename.clone(),
            file_size: self.metadata.file_size,
            total_chunks: self.total_chunks(),
            chunk_size: self.chunk_size,
            // Whole-file digest is reserved; transmitted as zeroes.
            checksum_type: ChecksumType::Sha256 as u8,
            file_checksum: [0u8; FILE_CHECKSUM_SIZE],
            file_mode: self.metadata.file_mode,
            timestamp: self.metadata.timestamp,
        }
    }

    fn send_file_info(&mut self, fs: &mut FrameStream, info: &FileInfo) -> Result<()> {
        let payload = info.encode()?;
        let seq = self.next_seq();
        fs.send_message(MsgType::FileInfo, seq, &payload)
    }

    fn await_file_ack(&mut self, fs: &mut FrameStream) -> Result<()> {
        let (header, payload) = fs.recv_message(ERROR_MSG_SIZE as u64)?;
        match MsgType::from_u8(header.msg_type) {
            Some(MsgType::FileAck) => {
                let ack = FileAck::decode(&payload)?;
                if ack.status != 0 {
                    return Err(FtError::from_wire(ack.error_code, "receiver not ready"));
                }
                Ok(())
            }
            Some(MsgType::Error) => Err(Self::surface_peer_error(&payload)),
            _ => Err(FtError::Protocol(format!(
                "expected FILE_ACK, got type {:#04x}",
                header.msg_type
            ))),
        }
    }

    fn stream_chunks(&mut self, fs: &mut FrameStream, info: &FileInfo) -> Result<TransferStats> {
        let mut file = fileio::open_read(&self.path)?;
        let mut buffer = vec![0u8; self.chunk_size as usize];
        let start = Instant::now();
        let mut bytes_sent: u64 = 0;

        for chunk_id in 0..info.total_chunks {
            let offset = chunk_id * self.chunk_size as u64;
            let want = (info.file_size - offset).min(self.chunk_size as u64) as usize;
            fileio::read_chunk_at(&mut file, offset, &mut buffer[..want])?;

            self.deliver_chunk(fs, chunk_id, offset, &buffer[..want])?;
            bytes_sent += want as u64;

            if (chunk_id + 1) % 100 == 0 {
                let pct = (chunk_id + 1) as f64 / info.total_chunks as f64 * 100.0;
                let secs = start.elapsed().as_secs_f64();
                let mbps = if secs > 0.0 {
                    bytes_sent as f64 / secs / 1_000_000.0
                } else {
                    0.0
                };
                tracing::info!(
                    "Progress: {:.1}% ({}/{} chunks) - {:.2} MB/s",
                    pct,
                    chunk_id + 1,
                    info.total_chunks,
                    mbps
                );
            }
        }

        Ok(TransferStats {
            bytes_sent,
            chunks_sent: info.total_chunks,
            elapsed: start.elapsed(),
        })
    }

    /// Send one chunk and wait for its ACK, retrying up to [`MAX_RETRIES`]
    /// times. Retransmits carry fresh sequence numbers.
    fn deliver_chunk(
        &mut self,
        fs: &mut FrameStream,
        chunk_id: u64,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        let chunk_header = ChunkHeader {
            chunk_id,
            chunk_offset: offset,
            chunk_size: data.len() as u32,
            chunk_crc32: crc32(data),
        };

        let mut payload = Vec::with_capacity(CHUNK_HEADER_SIZE + data.len());
        payload.extend_from_slice(&chunk_header.encode());
        payload.extend_from_slice(data);

        let mut retries = 0;
        loop {
            let seq = self.next_seq();
            let attempt = match fs.send_message(MsgType::ChunkData, seq, &payload) {
                Ok(()) => Self::await_chunk_ack(fs, chunk_id),
                Err(e) => Err(e),
            };

            match attempt {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    // Receiver requested a retransmit (CRC failure).
                    retries += 1;
                    if retries >= MAX_RETRIES {
                        tracing::error!("Max retries exceeded for chunk {}", chunk_id);
                        return Err(FtError::Checksum);
                    }
                    tracing::warn!(
                        "Chunk {} rejected by receiver, retransmitting ({}/{})",
                        chunk_id,
                        retries,
                        MAX_RETRIES
                    );
                }
                Err(e) if e.is_transient() => {
                    retries += 1;
                    if retries >= MAX_RETRIES {
                        tracing::error!("Max retries exceeded for chunk {}: {}", chunk_id, e);
                        return Err(e);
                    }
                    tracing::warn!(
                        "Chunk {} round-trip failed ({}), retrying ({}/{})",
                        chunk_id,
                        e,
                        retries,
                        MAX_RETRIES
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Returns `Ok(true)` when the chunk was accepted, `Ok(false)` when the
    /// receiver asked for a retransmit.
    fn await_chunk_ack(fs: &mut FrameStream, chunk_id: u64) -> Result<bool> {
        let (header, payload) = fs.recv_message(ERROR_MSG_SIZE as u64)?;
        match MsgType::from_u8(header.msg_type) {
            Some(MsgType::ChunkAck) => {
                let ack = ChunkAck::decode(&payload)?;
                if ack.chunk_id != chunk_id {
                    // The protocol is strictly lock-step, so a mismatch can
                    // only be a peer bug; the ACK still answers our chunk.
                    tracing::warn!(
                        "ACK chunk id mismatch: expected {}, got {}",
                        chunk_id,
                        ack.chunk_id
                    );
                }
                Ok(ack.status == 0)
            }
            Some(MsgType::Error) => Err(Self::surface_peer_error(&payload)),
            _ => Err(FtError::Protocol(format!(
                "expected CHUNK_ACK, got type {:#04x}",
                header.msg_type
            ))),
        }
    }

    fn surface_peer_error(payload: &[u8]) -> FtError {
        match ErrorMessage::decode(payload) {
            Ok(msg) => {
                tracing::error!("Peer reported error: {}", msg.message);
                msg.to_error()
            }
            Err(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_sender_creation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        fs::write(&path, vec![0x5Au8; 1000]).unwrap();

        let sender = FileSender::new(&path).unwrap();
        assert_eq!(sender.file_size(), 1000);
        assert_eq!(sender.total_chunks(), 1);
    }

    #[test]
    fn test_chunk_count_math() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sized.bin");
        fs::write(&path, vec![0u8; 2048]).unwrap();

        let mut sender = FileSender::new(&path).unwrap();
        sender.set_chunk_size(1024);
        assert_eq!(sender.total_chunks(), 2);

        sender.set_chunk_size(1000);
        assert_eq!(sender.total_chunks(), 3);
    }

    #[test]
    fn test_empty_file_has_no_chunks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty");
        fs::write(&path, b"").unwrap();

        let sender = FileSender::new(&path).unwrap();
        assert_eq!(sender.total_chunks(), 0);
    }

    #[test]
    fn test_rejects_missing_file() {
        let dir = tempdir().unwrap();
        assert!(FileSender::new(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn test_file_info_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.bin");
        fs::write(&path, vec![1u8; 600_000]).unwrap();

        let sender = FileSender::new(&path).unwrap();
        let info = sender.build_file_info();
        assert_eq!(info.filename, "meta.bin");
        assert_eq!(info.file_size, 600_000);
        assert_eq!(info.total_chunks, 2);
        assert_eq!(info.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(info.file_checksum, [0u8; FILE_CHECKSUM_SIZE]);
    }
}
