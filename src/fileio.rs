//! File I/O Module
//!
//! Local-filesystem plumbing for both roles: metadata probing for the
//! sender, and the sanitized-name + hidden-temp-file write path that makes
//! receiver output atomic.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::error::{FtError, Result};

/// Reduce an announced filename to a safe basename.
///
/// Rejected outright: any `..` occurrence, a leading `/` or `\`, and
/// `X:`-style drive prefixes. Path separators become `_`; characters outside
/// `[A-Za-z0-9._-]` are dropped. An empty result is an error.
pub fn sanitize_filename(name: &str) -> Result<String> {
    if name.contains("..") {
        return Err(FtError::InvalidArg(format!(
            "path traversal in filename: {}",
            name
        )));
    }

    let bytes = name.as_bytes();
    if matches!(bytes.first(), Some(b'/') | Some(b'\\')) {
        return Err(FtError::InvalidArg(format!(
            "absolute path not allowed: {}",
            name
        )));
    }
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_uppercase() {
        return Err(FtError::InvalidArg(format!(
            "drive-letter path not allowed: {}",
            name
        )));
    }

    let sanitized: String = name
        .chars()
        .filter_map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => Some(c),
            '/' | '\\' => Some('_'),
            _ => None,
        })
        .collect();

    if sanitized.is_empty() {
        return Err(FtError::InvalidArg(
            "filename empty after sanitization".into(),
        ));
    }
    Ok(sanitized)
}

/// Metadata of a local file about to be sent.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub filename: String,
    pub file_size: u64,
    pub file_mode: u32,
    pub timestamp: u64,
}

impl FileMetadata {
    /// Stat a path and extract what FILE_INFO needs. Only regular files are
    /// transferable.
    pub fn probe(path: &Path) -> Result<Self> {
        let meta = fs::metadata(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => FtError::FileNotFound(path.display().to_string()),
            io::ErrorKind::PermissionDenied => FtError::Permission,
            _ => FtError::FileOpen(e.to_string()),
        })?;

        if !meta.is_file() {
            return Err(FtError::InvalidArg(format!(
                "not a regular file: {}",
                path.display()
            )));
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| FtError::InvalidArg(format!("no filename in {}", path.display())))?;

        let timestamp = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Ok(FileMetadata {
            filename,
            file_size: meta.len(),
            file_mode: file_mode(&meta),
            timestamp,
        })
    }
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn file_mode(_meta: &fs::Metadata) -> u32 {
    0o644
}

/// Open a file for chunked reading.
pub fn open_read(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => FtError::FileNotFound(path.display().to_string()),
        io::ErrorKind::PermissionDenied => FtError::Permission,
        _ => FtError::FileOpen(e.to_string()),
    })
}

/// Read exactly `buf.len()` bytes at an absolute offset. The caller sizes
/// the buffer from FILE_INFO, so a short read means the file shrank.
pub fn read_chunk_at(file: &mut File, offset: u64, buf: &mut [u8]) -> Result<()> {
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| FtError::FileSeek(e.to_string()))?;

    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(FtError::FileRead(format!(
                    "file truncated at offset {}",
                    offset + filled as u64
                )))
            }
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FtError::FileRead(e.to_string())),
        }
    }
    Ok(())
}

fn classify_write(err: io::Error) -> FtError {
    if err.kind() == io::ErrorKind::PermissionDenied {
        return FtError::Permission;
    }
    #[cfg(unix)]
    if err.raw_os_error() == Some(libc::ENOSPC) {
        return FtError::DiskFull;
    }
    FtError::FileWrite(err.to_string())
}

/// Writes a hidden `.<name>.tmp` sibling and renames it into place once the
/// transfer completes. Dropping the writer before `finalize` unlinks the
/// temporary.
pub struct TempFileWriter {
    file: Option<File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    finalized: bool,
}

impl TempFileWriter {
    pub fn create(output_dir: &Path, name: &str) -> Result<Self> {
        let temp_path = output_dir.join(format!(".{}.tmp", name));
        let final_path = output_dir.join(name);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::PermissionDenied => FtError::Permission,
                _ => FtError::FileOpen(format!("{}: {}", temp_path.display(), e)),
            })?;

        tracing::debug!("Writing to temp file {}", temp_path.display());
        Ok(TempFileWriter {
            file: Some(file),
            temp_path,
            final_path,
            finalized: false,
        })
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Seek to an absolute offset, write the chunk and flush it.
    pub fn write_chunk_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let file = self.file.as_mut().expect("writer already finalized");
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| FtError::FileSeek(e.to_string()))?;
        file.write_all(data).map_err(classify_write)?;
        file.flush().map_err(classify_write)?;
        Ok(())
    }

    /// Close the temp file and rename it over the final path. On platforms
    /// where rename cannot replace an existing file, the target is removed
    /// first. Any failure unlinks the temporary.
    pub fn finalize(mut self) -> Result<PathBuf> {
        drop(self.file.take());

        #[cfg(windows)]
        if self.final_path.exists() {
            if let Err(e) = fs::remove_file(&self.final_path) {
                tracing::warn!(
                    "Failed to remove existing {}: {}",
                    self.final_path.display(),
                    e
                );
            }
        }

        match fs::rename(&self.temp_path, &self.final_path) {
            Ok(()) => {
                self.finalized = true;
                Ok(self.final_path.clone())
            }
            Err(e) => Err(FtError::FileWrite(format!(
                "rename {} -> {}: {}",
                self.temp_path.display(),
                self.final_path.display(),
                e
            ))),
        }
    }
}

impl Drop for TempFileWriter {
    fn drop(&mut self) {
        if !self.finalized {
            drop(self.file.take());
            if let Err(e) = fs::remove_file(&self.temp_path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove temp file {}: {}", self.temp_path.display(), e);
                }
            }
        }
    }
}

/// Verify the filesystem holding `dir` has room for `required` bytes.
#[cfg(unix)]
pub fn check_disk_space(dir: &Path, required: u64) -> Result<()> {
    use std::os::unix::ffi::OsStrExt;

    let cpath = std::ffi::CString::new(dir.as_os_str().as_bytes())
        .map_err(|_| FtError::InvalidArg("output directory path contains NUL".into()))?;

    let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(cpath.as_ptr(), &mut stats) };
    if rc != 0 {
        tracing::error!("statvfs failed for {}", dir.display());
        return Err(FtError::DiskFull);
    }

    let available = stats.f_bavail as u64 * stats.f_frsize as u64;
    if available < required {
        tracing::error!(
            "Insufficient disk space: need {} bytes, have {}",
            required,
            available
        );
        return Err(FtError::DiskFull);
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn check_disk_space(_dir: &Path, _required: u64) -> Result<()> {
    Ok(())
}
