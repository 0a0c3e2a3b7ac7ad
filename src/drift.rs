//! Drift detector (C5).
//!
//! Compares a live file against its baseline and, on mismatch, persists a
//! unified-diff patch artifact.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::baseline::{approved_snapshot_path, BaselineIndex};
use crate::error::Result;
use crate::hashing::{atomic_write_text, is_symlink, lossy_text, read_bytes_checked, sha256_bytes};

/// Result of checking one target for drift.
pub enum DriftOutcome {
    /// Live file matches its baseline.
    Clean { current_sha: String },
    /// An integrity anomaly the operator must see: missing file, symlink,
    /// or missing baseline/snapshot.
    Anomaly { error: String },
    /// Content differs from the baseline; a patch artifact was written.
    Drifted {
        approved_sha: String,
        current_sha: String,
        patch_path: PathBuf,
    },
}

/// Tag distinguishing why a patch was generated, used in the patch
/// filename.
#[derive(Clone, Copy)]
pub enum PatchTag {
    Drift,
    Approve,
}

impl PatchTag {
    fn as_str(self) -> &'static str {
        match self {
            Self::Drift => "drift",
            Self::Approve => "approve",
        }
    }
}

/// Check `rel_path` for drift against `baselines`. Symlinks and missing
/// files/baselines are reported as [`DriftOutcome::Anomaly`], never by
/// reading through them.
pub fn detect(
    workspace_root: &Path,
    state_dir: &Path,
    baselines: &BaselineIndex,
    rel_path: &str,
) -> Result<DriftOutcome> {
    let abs_path = workspace_root.join(rel_path);

    if !abs_path.exists() {
        return Ok(DriftOutcome::Anomaly {
            error: format!("Missing {rel_path}"),
        });
    }
    if is_symlink(&abs_path) {
        return Ok(DriftOutcome::Anomaly {
            error: format!("Refusing to operate on symlink: {}", abs_path.display()),
        });
    }

    let Some(baseline) = baselines.get(rel_path) else {
        return Ok(DriftOutcome::Anomaly {
            error: format!("Not initialized for {rel_path} (missing baseline). Run init/approve."),
        });
    };

    let approved_snap = approved_snapshot_path(state_dir, rel_path);
    if !approved_snap.exists() {
        return Ok(DriftOutcome::Anomaly {
            error: format!("Not initialized for {rel_path} (missing approved snapshot)."),
        });
    }

    let current_bytes = read_bytes_checked(&abs_path)?;
    let current_sha = sha256_bytes(&current_bytes);

    if current_sha == baseline.sha256 {
        return Ok(DriftOutcome::Clean { current_sha });
    }

    let old_text = lossy_text(&std::fs::read(&approved_snap).map_err(|e| crate::error::GuardianError::io(&approved_snap, e))?);
    let new_text = lossy_text(&current_bytes);
    let patch_text = unified_diff(&old_text, &new_text, &format!("approved/{rel_path}"), rel_path);
    let patch_path = write_patch(state_dir, &patch_text, PatchTag::Drift, rel_path)?;

    Ok(DriftOutcome::Drifted {
        approved_sha: baseline.sha256.clone(),
        current_sha,
        patch_path,
    })
}

/// Generate a unified diff of `old` -> `new` with the given file headers.
pub fn unified_diff(old: &str, new: &str, from_label: &str, to_label: &str) -> String {
    let patch = diffy::create_patch(old, new);
    let mut text = format!("--- {from_label}\n+++ {to_label}\n");
    let rendered = patch.to_string();
    // diffy includes its own `---`/`+++` header derived from empty labels;
    // strip the first two lines and keep the hunk bodies.
    let body: String = rendered
        .lines()
        .skip(2)
        .map(|l| format!("{l}\n"))
        .collect();
    text.push_str(&body);
    text
}

/// Persist a patch artifact to `S/patches/<ts>-<sanitized-rel>-<tag>.patch`.
pub fn write_patch(state_dir: &Path, patch_text: &str, tag: PatchTag, rel_path: &str) -> Result<PathBuf> {
    let patches_dir = state_dir.join("patches");
    std::fs::create_dir_all(&patches_dir).map_err(|e| crate::error::GuardianError::io(&patches_dir, e))?;

    let ts = Utc::now().format("%Y%m%dT%H%M%SZ");
    let file_tag = sanitize_patch_component(&rel_path.replace('/', "_"));
    let path_tag = sanitize_patch_component(tag.as_str());
    let path = patches_dir.join(format!("{ts}-{file_tag}-{path_tag}.patch"));
    atomic_write_text(&path, patch_text)?;
    Ok(path)
}

/// Replace path separators with `_`, retain only `[A-Za-z0-9_-]`, truncate
/// to 40 characters; substitute `"patch"` if the result is empty.
fn sanitize_patch_component(raw: &str) -> String {
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
    use crate::baseline::BaselineIndex;
    use crate::hashing::atomic_write_bytes;
    use tempfile::tempdir;

    fn seeded(ws: &Path, state: &Path, rel: &str, approved: &[u8]) -> BaselineIndex {
        atomic_write_bytes(&approved_snapshot_path(state, rel), approved).unwrap();
        let mut idx = BaselineIndex::load(state).unwrap();
        idx.set(rel, sha256_bytes(approved));
        idx
    }

    #[test]
    fn clean_when_hashes_match() {
        let ws = tempdir().unwrap();
        let state = tempdir().unwrap();
        std::fs::write(ws.path().join("SOUL.md"), "hello soul\n").unwrap();
        let idx = seeded(ws.path(), state.path(), "SOUL.md", b"hello soul\n");

        let outcome = detect(ws.path(), state.path(), &idx, "SOUL.md").unwrap();
        assert!(matches!(outcome, DriftOutcome::Clean { .. }));
    }

    #[test]
    fn drift_writes_patch() {
        let ws = tempdir().unwrap();
        let state = tempdir().unwrap();
        std::fs::write(ws.path().join("SOUL.md"), "MALICIOUS\n").unwrap();
        let idx = seeded(ws.path(), state.path(), "SOUL.md", b"hello soul\n");

        let outcome = detect(ws.path(), state.path(), &idx, "SOUL.md").unwrap();
        match outcome {
            DriftOutcome::Drifted { patch_path, .. } => {
                assert!(patch_path.exists());
                let patch_text = std::fs::read_to_string(&patch_path).unwrap();
                assert!(patch_text.contains("-hello soul"));
                assert!(patch_text.contains("+MALICIOUS"));
            }
            _ => panic!("expected drift"),
        }
    }

    #[test]
    fn missing_file_is_anomaly() {
        let ws = tempdir().unwrap();
        let state = tempdir().unwrap();
        let idx = BaselineIndex::load(state.path()).unwrap();
        let outcome = detect(ws.path(), state.path(), &idx, "SOUL.md").unwrap();
        assert!(matches!(outcome, DriftOutcome::Anomaly { .. }));
    }

    #[test]
    fn sanitize_patch_component_strips_unsafe_chars() {
        assert_eq!(sanitize_patch_component("memory/2026-01-01.md"), "memory2026-01-01md");
        assert_eq!(sanitize_patch_component(""), "patch");
        assert_eq!(sanitize_patch_component("!!!"), "patch");
    }
}
