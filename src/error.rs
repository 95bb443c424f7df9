//! Error Types
//!
//! Flat error enumeration shared by both transfer roles. Every variant maps
//! to a signed wire code so peer-reported failures survive the trip through
//! an ERROR message intact.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FtError>;

/// Transfer error. The numeric codes travel inside ERROR payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FtError {
    #[error("socket error: {0}")]
    Socket(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("bind failed: {0}")]
    Bind(String),

    #[error("listen failed: {0}")]
    Listen(String),

    #[error("accept failed: {0}")]
    Accept(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Recv(String),

    #[error("operation timed out")]
    Timeout,

    #[error("file open failed: {0}")]
    FileOpen(String),

    #[error("file read failed: {0}")]
    FileRead(String),

    #[error("file write failed: {0}")]
    FileWrite(String),

    #[error("file seek failed: {0}")]
    FileSeek(String),

    #[error("disk full")]
    DiskFull,

    #[error("permission denied")]
    Permission,

    #[error("checksum mismatch")]
    Checksum,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("version mismatch: expected {expected}, got {got}")]
    Version { expected: u8, got: u8 },

    #[error("invalid message type: {0:#04x}")]
    InvalidMsg(u8),

    #[error("out of memory")]
    OutOfMemory,

    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("filename too long")]
    FilenameTooLong,
}

impl FtError {
    /// Signed wire code for this error, matching the protocol's error table.
    pub fn code(&self) -> i32 {
        match self {
            FtError::Socket(_) => -1,
            FtError::Connect(_) => -2,
            FtError::Bind(_) => -3,
            FtError::Listen(_) => -4,
            FtError::Accept(_) => -5,
            FtError::Send(_) => -6,
            FtError::Recv(_) => -7,
            FtError::Timeout => -8,
            FtError::FileOpen(_) => -10,
            FtError::FileRead(_) => -11,
            FtError::FileWrite(_) => -12,
            FtError::FileSeek(_) => -13,
            FtError::DiskFull => -14,
            FtError::Permission => -15,
            FtError::Checksum => -20,
            FtError::Protocol(_) => -21,
            FtError::Version { .. } => -22,
            FtError::InvalidMsg(_) => -23,
            FtError::OutOfMemory => -30,
            FtError::InvalidArg(_) => -31,
            FtError::FileNotFound(_) => -32,
            FtError::FilenameTooLong => -33,
        }
    }

    /// Single-byte form carried in ERROR payloads (two's complement).
    pub fn wire_code(&self) -> u8 {
        self.code() as u8
    }

    /// Rebuild an error from a peer-reported wire code. The peer's free-form
    /// message is kept where the variant has room for it.
    pub fn from_wire(code: u8, message: &str) -> FtError {
        let detail = || message.to_string();
        match code as i8 as i32 {
            -1 => FtError::Socket(detail()),
            -2 => FtError::Connect(detail()),
            -3 => FtError::Bind(detail()),
            -4 => FtError::Listen(detail()),
            -5 => FtError::Accept(detail()),
            -6 => FtError::Send(detail()),
            -7 => FtError::Recv(detail()),
            -8 => FtError::Timeout,
            -10 => FtError::FileOpen(detail()),
            -11 => FtError::FileRead(detail()),
            -12 => FtError::FileWrite(detail()),
            -13 => FtError::FileSeek(detail()),
            -14 => FtError::DiskFull,
            -15 => FtError::Permission,
            -20 => FtError::Checksum,
            -22 => FtError::Version { expected: crate::protocol::PROTOCOL_VERSION, got: 0 },
            -23 => FtError::InvalidMsg(0),
            -30 => FtError::OutOfMemory,
            -31 => FtError::InvalidArg(detail()),
            -32 => FtError::FileNotFound(detail()),
            -33 => FtError::FilenameTooLong,
            _ => FtError::Protocol(detail()),
        }
    }

    /// Whether this error may be retried within the same chunk attempt.
    /// Only timeouts (would-block included) qualify; everything else is
    /// either fatal to the connection or a protocol-level failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, FtError::Timeout)
    }
}
