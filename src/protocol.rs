//! Wire Protocol Definitions
//!
//! This module defines the exact byte layout of every message: the fixed
//! 32-byte header and the payloads that follow it. All multi-byte integers
//! are big-endian. Nothing here touches a socket; framing lives in
//! [`crate::transport`].

use bytes::{Buf, BufMut};

use crate::checksum::crc32;
use crate::error::{FtError, Result};

/// Protocol magic number ("FTCP").
pub const MAGIC: u32 = 0x4654_4350;

/// Protocol version (increment when changing any wire layout).
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default chunk size (512 KB).
pub const DEFAULT_CHUNK_SIZE: u32 = 524_288;

/// Fixed message header size.
pub const HEADER_SIZE: usize = 32;

/// Fixed FILE_INFO payload size.
pub const FILE_INFO_SIZE: usize = 1024;

/// Chunk header size (prefix of every CHUNK_DATA payload).
pub const CHUNK_HEADER_SIZE: usize = 24;

/// CHUNK_ACK payload size.
pub const CHUNK_ACK_SIZE: usize = 12;

/// FILE_ACK payload size.
pub const FILE_ACK_SIZE: usize = 4;

/// Handshake payload size.
pub const HANDSHAKE_SIZE: usize = 4;

/// ERROR payload size.
pub const ERROR_MSG_SIZE: usize = 256;

/// Bytes available for the NUL-terminated text inside an ERROR payload.
pub const ERROR_TEXT_SIZE: usize = 247;

/// Filename field width inside FILE_INFO.
pub const MAX_FILENAME_LEN: usize = 256;

/// Width of the (reserved) whole-file checksum field.
pub const FILE_CHECKSUM_SIZE: usize = 32;

/// Message Types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    HandshakeReq = 0x01,
    HandshakeAck = 0x02,
    FileInfo = 0x03,
    FileAck = 0x04,
    ChunkData = 0x05,
    ChunkAck = 0x06,
    /// Reserved, never emitted.
    TransferComplete = 0x07,
    /// Reserved, never emitted.
    VerifyRequest = 0x08,
    /// Reserved, never emitted.
    VerifyResponse = 0x09,
    Error = 0xFF,
}

impl MsgType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(MsgType::HandshakeReq),
            0x02 => Some(MsgType::HandshakeAck),
            0x03 => Some(MsgType::FileInfo),
            0x04 => Some(MsgType::FileAck),
            0x05 => Some(MsgType::ChunkData),
            0x06 => Some(MsgType::ChunkAck),
            0x07 => Some(MsgType::TransferComplete),
            0x08 => Some(MsgType::VerifyRequest),
            0x09 => Some(MsgType::VerifyResponse),
            0xFF => Some(MsgType::Error),
            _ => None,
        }
    }
}

/// Checksum algorithm identifiers carried in FILE_INFO.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumType {
    Crc32 = 0,
    Md5 = 1,
    Sha256 = 2,
}

/// Fixed 32-byte message header.
///
/// Layout: magic(4) version(1) msg_type(1) flags(2) sequence_num(8)
/// payload_size(8) checksum(4) reserved(4). The checksum is CRC-32 over the
/// first 24 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub magic: u32,
    pub version: u8,
    pub msg_type: u8,
    pub flags: u16,
    pub sequence_num: u64,
    pub payload_size: u64,
    pub checksum: u32,
    pub reserved: u32,
}

impl MessageHeader {
    pub fn new(msg_type: MsgType, sequence_num: u64, payload_size: u64) -> Self {
        let mut header = MessageHeader {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            msg_type: msg_type as u8,
            flags: 0,
            sequence_num,
            payload_size,
            checksum: 0,
            reserved: 0,
        };
        header.checksum = header.prefix_crc();
        header
    }

    /// CRC-32 over the serialized form of the first 24 bytes (everything up
    /// to the checksum slot).
    fn prefix_crc(&self) -> u32 {
        let mut prefix = [0u8; HEADER_SIZE - 8];
        let mut buf = &mut prefix[..];
        buf.put_u32(self.magic);
        buf.put_u8(self.version);
        buf.put_u8(self.msg_type);
        buf.put_u16(self.flags);
        buf.put_u64(self.sequence_num);
        buf.put_u64(self.payload_size);
        crc32(&prefix)
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        {
            let mut buf = &mut out[..];
            buf.put_u32(self.magic);
            buf.put_u8(self.version);
            buf.put_u8(self.msg_type);
            buf.put_u16(self.flags);
            buf.put_u64(self.sequence_num);
            buf.put_u64(self.payload_size);
        }
        let crc = crc32(&out[..24]);
        let mut tail = &mut out[24..];
        tail.put_u32(crc);
        tail.put_u32(self.reserved);
        out
    }

    /// Parse a header without validating it. Use [`MessageHeader::validate`]
    /// before trusting any field.
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut buf = &bytes[..];
        MessageHeader {
            magic: buf.get_u32(),
            version: buf.get_u8(),
            msg_type: buf.get_u8(),
            flags: buf.get_u16(),
            sequence_num: buf.get_u64(),
            payload_size: buf.get_u64(),
            checksum: buf.get_u32(),
            reserved: buf.get_u32(),
        }
    }

    /// Check magic, version, message type and the stored header checksum.
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(FtError::Protocol(format!(
                "bad magic {:#010x}",
                self.magic
            )));
        }
        if self.version != PROTOCOL_VERSION {
            return Err(FtError::Version {
                expected: PROTOCOL_VERSION,
                got: self.version,
            });
        }
        if MsgType::from_u8(self.msg_type).is_none() {
            return Err(FtError::InvalidMsg(self.msg_type));
        }
        if self.checksum != self.prefix_crc() {
            return Err(FtError::Protocol("header checksum mismatch".into()));
        }
        Ok(())
    }
}

/// Handshake payload: `{version, capabilities, reserved}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakePayload {
    pub version: u8,
    pub capabilities: u8,
}

impl HandshakePayload {
    pub fn new() -> Self {
        HandshakePayload {
            version: PROTOCOL_VERSION,
            capabilities: 0,
        }
    }

    pub fn encode(&self) -> [u8; HANDSHAKE_SIZE] {
        let mut out = [0u8; HANDSHAKE_SIZE];
        out[0] = self.version;
        out[1] = self.capabilities;
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HANDSHAKE_SIZE {
            return Err(FtError::Protocol("handshake payload too short".into()));
        }
        Ok(HandshakePayload {
            version: bytes[0],
            capabilities: bytes[1],
        })
    }
}

impl Default for HandshakePayload {
    fn default() -> Self {
        Self::new()
    }
}

/// FILE_INFO payload: file metadata announced before streaming starts.
///
/// `file_checksum` is reserved for a future whole-file digest; the current
/// protocol always transmits zeroes and never verifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub filename: String,
    pub file_size: u64,
    pub total_chunks: u64,
    pub chunk_size: u32,
    pub checksum_type: u8,
    pub file_checksum: [u8; FILE_CHECKSUM_SIZE],
    pub file_mode: u32,
    pub timestamp: u64,
}

impl FileInfo {
    pub fn encode(&self) -> Result<[u8; FILE_INFO_SIZE]> {
        let name = self.filename.as_bytes();
        // The filename field is NUL-terminated on the wire, so the name
        // itself can use at most 255 of the 256 bytes.
        if name.len() >= MAX_FILENAME_LEN {
            return Err(FtError::FilenameTooLong);
        }

        let mut out = [0u8; FILE_INFO_SIZE];
        let mut buf = &mut out[..];
        buf.put_u16(name.len() as u16);
        buf.put_slice(name);
        buf.put_bytes(0, MAX_FILENAME_LEN - name.len());
        buf.put_u64(self.file_size);
        buf.put_u64(self.total_chunks);
        buf.put_u32(self.chunk_size);
        buf.put_u8(self.checksum_type);
        buf.put_slice(&self.file_checksum);
        buf.put_u32(self.file_mode);
        buf.put_u64(self.timestamp);
        // Reserved tail stays zero.
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FILE_INFO_SIZE {
            return Err(FtError::Protocol("file info payload too short".into()));
        }

        let mut buf = &bytes[..];
        let filename_len = buf.get_u16() as usize;
        // The terminator must fit inside the 256-byte field, so a declared
        // length of 256 is rejected rather than read unterminated.
        if filename_len >= MAX_FILENAME_LEN {
            return Err(FtError::FilenameTooLong);
        }
        let name_field = &bytes[2..2 + MAX_FILENAME_LEN];
        if name_field[filename_len] != 0 {
            return Err(FtError::Protocol("filename not NUL-terminated".into()));
        }
        let filename = std::str::from_utf8(&name_field[..filename_len])
            .map_err(|_| FtError::Protocol("filename not valid UTF-8".into()))?
            .to_string();
        buf.advance(MAX_FILENAME_LEN);

        let file_size = buf.get_u64();
        let total_chunks = buf.get_u64();
        let chunk_size = buf.get_u32();
        let checksum_type = buf.get_u8();
        let mut file_checksum = [0u8; FILE_CHECKSUM_SIZE];
        buf.copy_to_slice(&mut file_checksum);
        let file_mode = buf.get_u32();
        let timestamp = buf.get_u64();

        Ok(FileInfo {
            filename,
            file_size,
            total_chunks,
            chunk_size,
            checksum_type,
            file_checksum,
            file_mode,
            timestamp,
        })
    }
}

/// FILE_ACK payload: receiver's go/no-go after FILE_INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAck {
    pub status: u8,
    pub error_code: u8,
}

impl FileAck {
    pub fn ready() -> Self {
        FileAck {
            status: 0,
            error_code: 0,
        }
    }

    pub fn encode(&self) -> [u8; FILE_ACK_SIZE] {
        let mut out = [0u8; FILE_ACK_SIZE];
        out[0] = self.status;
        out[1] = self.error_code;
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FILE_ACK_SIZE {
            return Err(FtError::Protocol("file ack payload too short".into()));
        }
        Ok(FileAck {
            status: bytes[0],
            error_code: bytes[1],
        })
    }
}

/// Chunk header: 24-byte prefix of every CHUNK_DATA payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub chunk_id: u64,
    pub chunk_offset: u64,
    pub chunk_size: u32,
    pub chunk_crc32: u32,
}

impl ChunkHeader {
    pub fn encode(&self) -> [u8; CHUNK_HEADER_SIZE] {
        let mut out = [0u8; CHUNK_HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_u64(self.chunk_id);
        buf.put_u64(self.chunk_offset);
        buf.put_u32(self.chunk_size);
        buf.put_u32(self.chunk_crc32);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CHUNK_HEADER_SIZE {
            return Err(FtError::Protocol("chunk header too short".into()));
        }
        let mut buf = &bytes[..];
        Ok(ChunkHeader {
            chunk_id: buf.get_u64(),
            chunk_offset: buf.get_u64(),
            chunk_size: buf.get_u32(),
            chunk_crc32: buf.get_u32(),
        })
    }
}

/// CHUNK_ACK payload. `status` 0 confirms the chunk, 1 requests retransmit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkAck {
    pub chunk_id: u64,
    pub status: u8,
}

impl ChunkAck {
    pub fn encode(&self) -> [u8; CHUNK_ACK_SIZE] {
        let mut out = [0u8; CHUNK_ACK_SIZE];
        let mut buf = &mut out[..];
        buf.put_u64(self.chunk_id);
        buf.put_u8(self.status);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CHUNK_ACK_SIZE {
            return Err(FtError::Protocol("chunk ack payload too short".into()));
        }
        let mut buf = &bytes[..];
        Ok(ChunkAck {
            chunk_id: buf.get_u64(),
            status: buf.get_u8(),
        })
    }
}

/// ERROR payload: wire code, the chunk it concerns (when applicable) and a
/// short NUL-terminated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub error_code: u8,
    pub chunk_id: u64,
    pub message: String,
}

impl ErrorMessage {
    pub fn new(error: &FtError, chunk_id: u64) -> Self {
        ErrorMessage {
            error_code: error.wire_code(),
            chunk_id,
            message: error.to_string(),
        }
    }

    pub fn encode(&self) -> [u8; ERROR_MSG_SIZE] {
        let mut out = [0u8; ERROR_MSG_SIZE];
        out[0] = self.error_code;
        let mut buf = &mut out[1..9];
        buf.put_u64(self.chunk_id);

        let text = self.message.as_bytes();
        let len = text.len().min(ERROR_TEXT_SIZE - 1);
        out[9..9 + len].copy_from_slice(&text[..len]);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ERROR_MSG_SIZE {
            return Err(FtError::Protocol("error payload too short".into()));
        }
        let error_code = bytes[0];
        let mut buf = &bytes[1..9];
        let chunk_id = buf.get_u64();

        let text = &bytes[9..ERROR_MSG_SIZE];
        let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
        let message = String::from_utf8_lossy(&text[..end]).to_string();

        Ok(ErrorMessage {
            error_code,
            chunk_id,
            message,
        })
    }

    /// The error this payload reports, reconstructed from its wire code.
    pub fn to_error(&self) -> FtError {
        FtError::from_wire(self.error_code, &self.message)
    }
}
