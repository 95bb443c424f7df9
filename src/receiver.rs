//! File Receiver Module
//!
//! Accepts a single sender, validates its FILE_INFO, and writes chunks into
//! a hidden temp file that is atomically renamed once every expected chunk
//! has landed. CRC failures request a retransmit; everything else that goes
//! wrong is reported to the sender as an ERROR message before closing.

use std::fs;
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::checksum::crc32;
use crate::error::{FtError, Result};
use crate::fileio::{self, TempFileWriter};
use crate::protocol::{
    ChunkAck, ChunkHeader, ErrorMessage, FileAck, FileInfo, HandshakePayload, MsgType,
    CHUNK_HEADER_SIZE, ERROR_MSG_SIZE, FILE_INFO_SIZE, PROTOCOL_VERSION,
};
use crate::transport::{bind_listener, FrameStream};

/// One-shot file receiver: binds a listening socket, serves exactly one
/// transfer, and reports the final path of the received file.
pub struct FileReceiver {
    listener: TcpListener,
    output_dir: PathBuf,
}

impl FileReceiver {
    /// Bind the listening socket and prepare the output directory,
    /// creating it if it does not exist.
    pub fn bind(output_dir: &Path, port: u16) -> Result<Self> {
        if !output_dir.exists() {
            fs::create_dir_all(output_dir)
                .map_err(|e| FtError::FileOpen(format!("{}: {}", output_dir.display(), e)))?;
            tracing::info!("Created output directory {}", output_dir.display());
        }

        let listener = bind_listener(port)?;
        tracing::info!(
            "Listening on port {}",
            listener.local_addr().map(|a| a.port()).unwrap_or(port)
        );

        Ok(FileReceiver {
            listener,
            output_dir: output_dir.to_path_buf(),
        })
    }

    /// The port actually bound (useful when binding port 0).
    pub fn local_port(&self) -> u16 {
        self.listener.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// Accept one connection and run a transfer to completion. Returns the
    /// final path of the received file.
    pub fn serve_one(&mut self) -> Result<PathBuf> {
        let (stream, peer) = self
            .listener
            .accept()
            .map_err(|e| FtError::Accept(e.to_string()))?;
        tracing::info!("Client connected: {}", peer);

        let result = self.receive_file(stream);
        match &result {
            Ok(path) => tracing::info!("File received successfully: {}", path.display()),
            Err(e) => tracing::error!("Transfer failed: {}", e),
        }
        result
    }

    fn receive_file(&mut self, stream: TcpStream) -> Result<PathBuf> {
        let mut fs = FrameStream::new(stream)?;
        let mut session = Session { seq: 2 };

        tracing::info!("Performing handshake...");
        session.handshake(&mut fs)?;

        tracing::info!("Receiving file info...");
        let info = session.receive_file_info(&mut fs)?;
        tracing::info!(
            "File: {}, Size: {} bytes, Chunks: {}",
            info.filename,
            info.file_size,
            info.total_chunks
        );

        let name = match fileio::sanitize_filename(&info.filename) {
            Ok(name) => name,
            Err(e) => {
                session.send_error(&mut fs, &e, 0);
                return Err(e);
            }
        };

        if let Err(e) = validate_geometry(&info) {
            session.send_error(&mut fs, &e, 0);
            return Err(e);
        }

        if let Err(e) = fileio::check_disk_space(&self.output_dir, info.file_size) {
            session.send_error(&mut fs, &e, 0);
            return Err(e);
        }

        let mut writer = match TempFileWriter::create(&self.output_dir, &name) {
            Ok(writer) => writer,
            Err(e) => {
                session.send_error(&mut fs, &e, 0);
                return Err(e);
            }
        };

        let seq = session.next_seq();
        fs.send_message(MsgType::FileAck, seq, &FileAck::ready().encode())?;

        session.receive_chunks(&mut fs, &info, &mut writer)?;

        // All chunks are on disk; make the file visible under its final name.
        writer.finalize()
    }
}

/// Per-connection receive state: the outbound sequence counter.
struct Session {
    seq: u64,
}

impl Session {
    fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    fn handshake(&mut self, fs: &mut FrameStream) -> Result<()> {
        let (header, payload) = fs.recv_message(ERROR_MSG_SIZE as u64)?;
        if MsgType::from_u8(header.msg_type) != Some(MsgType::HandshakeReq) {
            return Err(FtError::Protocol(format!(
                "expected HANDSHAKE_REQ, got type {:#04x}",
                header.msg_type
            )));
        }

        let req = HandshakePayload::decode(&payload)?;
        if req.version != PROTOCOL_VERSION {
            let err = FtError::Version {
                expected: PROTOCOL_VERSION,
                got: req.version,
            };
            self.send_error(fs, &err, 0);
            return Err(err);
        }

        let ack = HandshakePayload::new();
        fs.send_message(MsgType::HandshakeAck, header.sequence_num + 1, &ack.encode())?;
        tracing::info!("Handshake successful");
        Ok(())
    }

    fn receive_file_info(&mut self, fs: &mut FrameStream) -> Result<FileInfo> {
        let (header, payload) = fs.recv_message(FILE_INFO_SIZE as u64)?;
        if MsgType::from_u8(header.msg_type) != Some(MsgType::FileInfo) {
            return Err(FtError::Protocol(format!(
                "expected FILE_INFO, got type {:#04x}",
                header.msg_type
            )));
        }

        match FileInfo::decode(&payload) {
            Ok(info) => Ok(info),
            Err(e) => {
                self.send_error(fs, &e, 0);
                Err(e)
            }
        }
    }

    fn receive_chunks(
        &mut self,
        fs: &mut FrameStream,
        info: &FileInfo,
        writer: &mut TempFileWriter,
    ) -> Result<()> {
        let max_payload = (CHUNK_HEADER_SIZE as u64 + info.chunk_size as u64).max(ERROR_MSG_SIZE as u64);
        let progress_step = info.total_chunks / 10 + 1;
        let start = Instant::now();
        let mut received_chunks: u64 = 0;
        let mut received_bytes: u64 = 0;

        while received_chunks < info.total_chunks {
            let (header, payload) = fs.recv_message(max_payload)?;
            if MsgType::from_u8(header.msg_type) != Some(MsgType::ChunkData) {
                let err = FtError::Protocol(format!(
                    "expected CHUNK_DATA, got type {:#04x}",
                    header.msg_type
                ));
                self.send_error(fs, &err, received_chunks);
                return Err(err);
            }

            let chunk_header = ChunkHeader::decode(&payload)?;
            let data = &payload[CHUNK_HEADER_SIZE..];

            if let Err(e) = validate_chunk(info, &chunk_header, data.len()) {
                self.send_error(fs, &e, chunk_header.chunk_id);
                return Err(e);
            }

            // Corrupt chunk: ask for a retransmit and stay on this chunk.
            if crc32(data) != chunk_header.chunk_crc32 {
                tracing::warn!(
                    "Chunk {} CRC mismatch, requesting retransmit",
                    chunk_header.chunk_id
                );
                self.send_chunk_ack(fs, chunk_header.chunk_id, 1)?;
                continue;
            }

            if let Err(e) = writer.write_chunk_at(chunk_header.chunk_offset, data) {
                self.send_error(fs, &e, chunk_header.chunk_id);
                return Err(e);
            }

            self.send_chunk_ack(fs, chunk_header.chunk_id, 0)?;
            received_chunks += 1;
            received_bytes += data.len() as u64;

            if received_chunks % progress_step == 0 {
                let pct = received_chunks as f64 / info.total_chunks as f64 * 100.0;
                tracing::info!(
                    "Progress: {:.1}% ({}/{} chunks)",
                    pct,
                    received_chunks,
                    info.total_chunks
                );
            }
        }

        let secs = start.elapsed().as_secs_f64();
        tracing::info!(
            "All {} chunks received ({} bytes in {:.2} s)",
            received_chunks,
            received_bytes,
            secs
        );
        Ok(())
    }

    fn send_chunk_ack(&mut self, fs: &mut FrameStream, chunk_id: u64, status: u8) -> Result<()> {
        let ack = ChunkAck { chunk_id, status };
        let seq = self.next_seq();
        fs.send_message(MsgType::ChunkAck, seq, &ack.encode())
    }

    /// Best-effort error report; the connection is about to close anyway.
    fn send_error(&mut self, fs: &mut FrameStream, error: &FtError, chunk_id: u64) {
        let msg = ErrorMessage::new(error, chunk_id);
        let seq = self.next_seq();
        if let Err(e) = fs.send_message(MsgType::Error, seq, &msg.encode()) {
            tracing::warn!("Failed to send error to peer: {}", e);
        }
    }
}

/// Cross-check the announced chunk geometry before accepting the transfer.
fn validate_geometry(info: &FileInfo) -> Result<()> {
    if info.file_size > 0 && info.chunk_size == 0 {
        return Err(FtError::Protocol("zero chunk size".into()));
    }
    let expected = if info.chunk_size == 0 {
        0
    } else {
        info.file_size.div_ceil(info.chunk_size as u64)
    };
    if info.total_chunks != expected {
        return Err(FtError::Protocol(format!(
            "total_chunks {} does not match file size (expected {})",
            info.total_chunks, expected
        )));
    }
    Ok(())
}

/// Validate one CHUNK_DATA against the announced file geometry. The chunk
/// header's offset is authoritative for placement, so it must be consistent
/// with its id and stay inside the file.
fn validate_chunk(info: &FileInfo, header: &ChunkHeader, data_len: usize) -> Result<()> {
    if data_len != header.chunk_size as usize {
        return Err(FtError::Protocol(format!(
            "chunk {} payload is {} bytes, header says {}",
            header.chunk_id, data_len, header.chunk_size
        )));
    }
    if header.chunk_size > info.chunk_size {
        return Err(FtError::Protocol(format!(
            "chunk {} larger than negotiated chunk size",
            header.chunk_id
        )));
    }
    if header.chunk_offset != header.chunk_id * info.chunk_size as u64 {
        return Err(FtError::Protocol(format!(
            "chunk {} offset {} inconsistent with id",
            header.chunk_id, header.chunk_offset
        )));
    }
    if header.chunk_offset + header.chunk_size as u64 > info.file_size {
        return Err(FtError::Protocol(format!(
            "chunk {} extends past end of file",
            header.chunk_id
        )));
    }
    Ok(())
}
