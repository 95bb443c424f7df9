//! FTCP Core Library
//!
//! Single-file transfer over TCP: self-describing framed messages, 512 KB
//! chunks with per-chunk CRC-32, lock-step acknowledgements with bounded
//! retransmit, and atomic finalization on the receiving side.

pub mod checksum;
pub mod error;
pub mod fileio;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod transport;

pub use error::{FtError, Result};

use std::path::Path;

/// Initialize the process-wide logger. Called once from each binary's main;
/// "already set" is treated as a no-op so tests can call it freely.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> std::io::Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let subscriber = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(std::io::stderr.and(std::sync::Mutex::new(file)))
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        None => {
            let subscriber = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    }
    Ok(())
}
