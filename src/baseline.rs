//! Baseline store (C3).
//!
//! Per-file approved SHA-256 plus on-disk approved snapshot, with legacy
//! single-file baseline import from `approved.sha256` + `approved/SOUL.md`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{GuardianError, Result};
use crate::hashing::atomic_write_text;

/// One baseline entry: the approved SHA-256 and when it was approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineEntry {
    pub sha256: String,
    #[serde(rename = "approvedAt")]
    pub approved_at: String,
}

/// The baseline index (`baselines.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineIndex {
    pub version: u32,
    pub files: BTreeMap<String, BaselineEntry>,
}

impl BaselineIndex {
    fn empty() -> Self {
        Self {
            version: 1,
            files: BTreeMap::new(),
        }
    }

    /// Load `baselines.json`, falling back to legacy import
    /// (`approved.sha256` + `approved/SOUL.md`) and finally an empty index.
    pub fn load(state_dir: &Path) -> Result<Self> {
        let baselines_path = state_dir.join("baselines.json");
        if baselines_path.exists() {
            let raw = std::fs::read_to_string(&baselines_path)
                .map_err(|e| GuardianError::io(&baselines_path, e))?;
            return serde_json::from_str(&raw)
                .map_err(|e| GuardianError::InvalidBaselines(e.to_string()));
        }

        let legacy_sha = state_dir.join("approved.sha256");
        let legacy_snap = state_dir.join("approved").join("SOUL.md");
        if legacy_sha.exists() && legacy_snap.exists() {
            let sha = std::fs::read_to_string(&legacy_sha)
                .map_err(|e| GuardianError::io(&legacy_sha, e))?
                .trim()
                .to_string();
            if !sha.is_empty() {
                let mut files = BTreeMap::new();
                files.insert(
                    "SOUL.md".to_string(),
                    BaselineEntry {
                        sha256: sha,
                        approved_at: "legacy".to_string(),
                    },
                );
                return Ok(Self { version: 1, files });
            }
        }

        Ok(Self::empty())
    }

    /// Atomic JSON write: sorted keys (guaranteed by `BTreeMap`), 2-space
    /// indent, trailing newline.
    pub fn save(&self, state_dir: &Path) -> Result<()> {
        let path = state_dir.join("baselines.json");
        let mut text = serde_json::to_string_pretty(self)
            .map_err(|e| GuardianError::InvalidBaselines(e.to_string()))?;
        text.push('\n');
        atomic_write_text(&path, &text)
    }

    pub fn get(&self, rel_path: &str) -> Option<&BaselineEntry> {
        self.files.get(rel_path)
    }

    pub fn set(&mut self, rel_path: &str, sha256: String) {
        self.files.insert(
            rel_path.to_string(),
            BaselineEntry {
                sha256,
                approved_at: Utc::now().to_rfc3339(),
            },
        );
    }
}

/// Path of a protected file's approved snapshot under `S/approved/`.
pub fn approved_snapshot_path(state_dir: &Path, rel_path: &str) -> PathBuf {
    state_dir.join("approved").join(rel_path)
}
