//! Restorer (C6).
//!
//! Quarantines the live file's current bytes, then atomically replaces it
//! with the approved snapshot. Invoked by `check` (for `restore`-mode
//! targets when auto-restore is enabled) and by the explicit `restore`
//! command.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::baseline::approved_snapshot_path;
use crate::error::{GuardianError, Result};
use crate::hashing::{atomic_write_bytes, read_bytes_checked, refuse_symlink};

/// Outcome of a successful restore: where the pre-restore bytes were
/// quarantined.
pub struct RestoreOutcome {
    pub quarantine_path: PathBuf,
}

/// Restore `rel_path` to its approved snapshot, quarantining the current
/// live bytes first.
pub fn restore(workspace_root: &Path, state_dir: &Path, rel_path: &str) -> Result<RestoreOutcome> {
    let abs_path = workspace_root.join(rel_path);
    refuse_symlink(&abs_path)?;

    let approved_snap = approved_snapshot_path(state_dir, rel_path);
    if !approved_snap.exists() {
        return Err(GuardianError::MissingBaseline(
            rel_path.to_string(),
            "missing approved snapshot".to_string(),
        ));
    }

    let quarantine_dir = state_dir.join("quarantine");
    std::fs::create_dir_all(&quarantine_dir).map_err(|e| GuardianError::io(&quarantine_dir, e))?;

    let ts = Utc::now().format("%Y%m%dT%H%M%SZ");
    let sanitized = sanitize(&rel_path.replace('/', "_"));
    let quarantine_path = quarantine_dir.join(format!("{sanitized}.{ts}.quarantine"));

    let current_bytes = read_bytes_checked(&abs_path)?;
    atomic_write_bytes(&quarantine_path, &current_bytes)?;

    let approved_bytes =
        std::fs::read(&approved_snap).map_err(|e| GuardianError::io(&approved_snap, e))?;
    atomic_write_bytes(&abs_path, &approved_bytes)?;

    Ok(RestoreOutcome { quarantine_path })
}

fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(40)
        .collect();
    if cleaned.is_empty() {
        "patch".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::{is_symlink, sha256_bytes};
    use tempfile::tempdir;

    #[test]
    fn restore_replaces_live_file_and_quarantines_previous() {
        let ws = tempdir().unwrap();
        let state = tempdir().unwrap();
        std::fs::write(ws.path().join("SOUL.md"), "MALICIOUS\n").unwrap();
        atomic_write_bytes(&approved_snapshot_path(state.path(), "SOUL.md"), b"hello soul\n").unwrap();

        let outcome = restore(ws.path(), state.path(), "SOUL.md").unwrap();

        let restored = std::fs::read(ws.path().join("SOUL.md")).unwrap();
        assert_eq!(sha256_bytes(&restored), sha256_bytes(b"hello soul\n"));

        let quarantined = std::fs::read(&outcome.quarantine_path).unwrap();
        assert_eq!(quarantined, b"MALICIOUS\n");
    }

    #[test]
    fn restore_refuses_symlink() {
        let ws = tempdir().unwrap();
        let state = tempdir().unwrap();
        let target = ws.path().join("real.md");
        std::fs::write(&target, "content\n").unwrap();
        let link = ws.path().join("SOUL.md");
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(&target, &link).unwrap();
            assert!(is_symlink(&link));
            assert!(restore(ws.path(), state.path(), "SOUL.md").is_err());
        }
    }
}
