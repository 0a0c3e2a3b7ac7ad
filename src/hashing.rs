//! Hash & atomic I/O primitives (C1).
//!
//! SHA-256 of bytes/text, symlink refusal, and write-temp-then-rename atomic
//! writes with an explicit fsync, matching the original guardian's
//! `atomic_write_bytes` (`os.fsync` before `os.replace`).

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{GuardianError, Result};

/// SHA-256 hex digest of raw bytes.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex_lower(&hasher.finalize())
}

/// SHA-256 hex digest of a UTF-8 string (encode then hash).
pub fn sha256_text(s: &str) -> String {
    sha256_bytes(s.as_bytes())
}

fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// `true` if `path` exists and is a symlink, checked with lstat semantics
/// (the link itself, not its target).
pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Fail the current operation if `path` is a symlink.
pub fn refuse_symlink(path: &Path) -> Result<()> {
    if is_symlink(path) {
        return Err(GuardianError::Symlink(path.to_path_buf()));
    }
    Ok(())
}

/// Read a protected path's raw bytes, refusing symlinks first.
pub fn read_bytes_checked(path: &Path) -> Result<Vec<u8>> {
    refuse_symlink(path)?;
    fs::read(path).map_err(|e| GuardianError::io(path, e))
}

/// Atomically write `data` to `path`: write to `path.tmp` in the same
/// directory, flush, fsync, then rename over `path`. Parent directories are
/// created first.
pub fn atomic_write_bytes(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| GuardianError::io(parent, e))?;
    }

    let tmp = tmp_path(path);
    {
        let mut f: File = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|e| GuardianError::io(&tmp, e))?;
        f.write_all(data).map_err(|e| GuardianError::io(&tmp, e))?;
        f.flush().map_err(|e| GuardianError::io(&tmp, e))?;
        f.sync_all().map_err(|e| GuardianError::io(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| GuardianError::io(path, e))?;
    Ok(())
}

/// Atomic text write: UTF-8 encode then [`atomic_write_bytes`].
pub fn atomic_write_text(path: &Path, text: &str) -> Result<()> {
    atomic_write_bytes(path, text.as_bytes())
}

fn tmp_path(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Decode bytes as UTF-8, substituting the replacement character for
/// invalid sequences. Used only for diff generation, never for integrity
/// comparison (which always hashes raw bytes).
pub fn lossy_text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}
