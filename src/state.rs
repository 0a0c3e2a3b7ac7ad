//! State directory layout.
//!
//! `W` (workspace root) and `S` (state directory) are always passed
//! explicitly; no process-wide workspace-root singleton.

use std::path::{Path, PathBuf};

use crate::error::{GuardianError, Result};
use crate::policy::Policy;

/// Resolved paths for one guardian invocation.
pub struct GuardianPaths {
    pub workspace_root: PathBuf,
    pub state_dir: PathBuf,
}

impl GuardianPaths {
    pub fn new(workspace_root: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            state_dir: state_dir.into(),
        }
    }

    pub fn policy_path(&self) -> PathBuf {
        self.state_dir.join("policy.json")
    }

    pub fn baselines_path(&self) -> PathBuf {
        self.state_dir.join("baselines.json")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.state_dir.join("audit.jsonl")
    }

    /// Ensure the state directory and its fixed subtree exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.state_dir.clone(),
            self.state_dir.join("approved"),
            self.state_dir.join("patches"),
            self.state_dir.join("quarantine"),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| GuardianError::io(&dir, e))?;
        }
        Ok(())
    }

    /// Default state directory used by the CLI when `--state-dir` is not
    /// given: `<workspace>/memory/soul-guardian`, matching the original
    /// implementation's backward-compatible default.
    pub fn default_state_dir(workspace_root: &Path) -> PathBuf {
        workspace_root.join("memory").join("soul-guardian")
    }

    /// Load `policy.json`, or the default policy if it does not exist.
    pub fn load_policy(&self) -> Result<Policy> {
        if self.policy_path().exists() {
            let raw = std::fs::read_to_string(self.policy_path())
                .map_err(|e| GuardianError::io(self.policy_path(), e))?;
            Policy::from_json(&raw)
        } else {
            Ok(Policy::default_for(&self.workspace_root))
        }
    }

    /// Overwrite `policy.json` with `policy`.
    pub fn save_policy(&self, policy: &Policy) -> Result<()> {
        self.ensure_dirs()?;
        crate::hashing::atomic_write_text(&self.policy_path(), &policy.to_json()?)
    }
}
