//! Policy resolver (C2).
//!
//! Parses the policy document, expands glob patterns bounded to the
//! workspace root, deduplicates by relative path (last write wins for set
//! resolution, first match wins for single-path lookup), and assigns an
//! effective [`Mode`] per path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GuardianError, Result};

/// Per-file protection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Auto-restore from the approved baseline on drift.
    Restore,
    /// Alert on drift; never auto-restore.
    Alert,
    /// Never inspected for drift.
    Ignore,
}

impl Mode {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "restore" => Some(Self::Restore),
            "alert" => Some(Self::Alert),
            "ignore" => Some(Self::Ignore),
            _ => None,
        }
    }
}

/// A single entry in [`Policy::targets`]: either a direct file or a glob
/// pattern, each carrying a protection mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetEntry {
    Direct { path: String, mode: String },
    Pattern { pattern: String, mode: String },
}

/// The policy document (`policy.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub version: u32,
    #[serde(rename = "workspaceRoot")]
    pub workspace_root: String,
    pub targets: Vec<TargetEntry>,
}

impl Policy {
    /// Parse a policy document from its on-disk JSON representation.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| GuardianError::InvalidPolicy(e.to_string()))
    }

    /// Serialize for persistence: 2-space indent, trailing newline.
    pub fn to_json(&self) -> Result<String> {
        let mut s =
            serde_json::to_string_pretty(self).map_err(|e| GuardianError::InvalidPolicy(e.to_string()))?;
        s.push('\n');
        Ok(s)
    }

    /// The seven-entry default policy used by `init` when no policy exists
    /// or `--force-policy` is given.
    pub fn default_for(workspace_root: &Path) -> Self {
        let direct = |path: &str, mode: &str| TargetEntry::Direct {
            path: path.to_string(),
            mode: mode.to_string(),
        };
        Self {
            version: 1,
            workspace_root: workspace_root.display().to_string(),
            targets: vec![
                direct("SOUL.md", "restore"),
                direct("AGENTS.md", "restore"),
                direct("USER.md", "alert"),
                direct("TOOLS.md", "alert"),
                direct("IDENTITY.md", "alert"),
                direct("HEARTBEAT.md", "alert"),
                direct("MEMORY.md", "alert"),
                TargetEntry::Pattern {
                    pattern: "memory/*.md".to_string(),
                    mode: "ignore".to_string(),
                },
            ],
        }
    }

    /// Resolve the effective target set: sorted, deduplicated `(relPath,
    /// mode)` pairs. Pattern entries are expanded via glob relative to
    /// `workspace_root`; directories are skipped. Duplicate relPaths keep
    /// the last-resolved mode (policy order).
    pub fn resolve_targets(&self, workspace_root: &Path) -> Vec<(String, Mode)> {
        let mut resolved: Vec<(String, Mode)> = Vec::new();

        for entry in &self.targets {
            match entry {
                TargetEntry::Direct { path, mode } => {
                    if let Some(mode) = Mode::parse(mode) {
                        let rel = normalize_rel(path);
                        resolved.push((rel, mode));
                    }
                }
                TargetEntry::Pattern { pattern, mode } => {
                    let Some(mode) = Mode::parse(mode) else {
                        continue;
                    };
                    for rel in expand_pattern(workspace_root, pattern) {
                        resolved.push((rel, mode));
                    }
                }
            }
        }

        let mut dedup: BTreeMap<String, Mode> = BTreeMap::new();
        for (path, mode) in resolved {
            dedup.insert(path, mode);
        }
        dedup.into_iter().collect()
    }

    /// Single-path lookup used by `approve`/`restore` input validation.
    /// Direct-path entries are checked first, in policy order; then
    /// patterns via shell-style glob matching. First match wins.
    pub fn mode_for_path(&self, rel_path: &str) -> Option<Mode> {
        for entry in &self.targets {
            if let TargetEntry::Direct { path, mode } = entry {
                if normalize_rel(path) == rel_path {
                    return Mode::parse(mode);
                }
            }
        }
        for entry in &self.targets {
            if let TargetEntry::Pattern { pattern, mode } = entry {
                if glob::Pattern::new(pattern)
                    .map(|p| p.matches(rel_path))
                    .unwrap_or(false)
                {
                    return Mode::parse(mode);
                }
            }
        }
        None
    }
}

/// Normalize a policy-declared path to a forward-slash relative string.
fn normalize_rel(path: &str) -> String {
    PathBuf::from(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Expand a glob pattern relative to `root`, bounded to `root` (no
/// traversal above it), returning normalized relative paths to files only.
fn expand_pattern(root: &Path, pattern: &str) -> Vec<String> {
    let full_pattern = root.join(pattern);
    let Some(full_pattern) = full_pattern.to_str() else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let Ok(paths) = glob::glob(full_pattern) else {
        return out;
    };
    for entry in paths.flatten() {
        if entry.is_dir() {
            continue;
        }
        if let Ok(rel) = entry.strip_prefix(root) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn default_policy_matches_original_targets() {
        let policy = Policy::default_for(Path::new("/ws"));
        assert_eq!(policy.targets.len(), 8);
        let resolved = policy.resolve_targets(Path::new("/ws"));
        // SOUL.md and AGENTS.md are restore; everything else alert; no
        // files actually exist so the glob entry contributes nothing.
        let modes: BTreeMap<_, _> = resolved.into_iter().collect();
        assert_eq!(modes.get("SOUL.md"), Some(&Mode::Restore));
        assert_eq!(modes.get("AGENTS.md"), Some(&Mode::Restore));
        assert_eq!(modes.get("USER.md"), Some(&Mode::Alert));
    }

    #[test]
    fn last_write_wins_on_duplicate_paths() {
        let policy = Policy {
            version: 1,
            workspace_root: "/ws".into(),
            targets: vec![
                TargetEntry::Direct {
                    path: "A.md".into(),
                    mode: "alert".into(),
                },
                TargetEntry::Direct {
                    path: "A.md".into(),
                    mode: "restore".into(),
                },
            ],
        };
        let resolved = policy.resolve_targets(Path::new("/ws"));
        assert_eq!(resolved, vec![("A.md".to_string(), Mode::Restore)]);
    }

    #[test]
    fn invalid_mode_entries_are_skipped() {
        let policy = Policy {
            version: 1,
            workspace_root: "/ws".into(),
            targets: vec![TargetEntry::Direct {
                path: "A.md".into(),
                mode: "delete".into(),
            }],
        };
        assert!(policy.resolve_targets(Path::new("/ws")).is_empty());
    }

    #[test]
    fn pattern_expansion_is_bounded_to_root_and_skips_dirs() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("memory")).unwrap();
        fs::write(dir.path().join("memory/2026-01-01.md"), "daily").unwrap();
        fs::create_dir_all(dir.path().join("memory/sub.md")).unwrap();

        let policy = Policy {
            version: 1,
            workspace_root: dir.path().display().to_string(),
            targets: vec![TargetEntry::Pattern {
                pattern: "memory/*.md".into(),
                mode: "ignore".into(),
            }],
        };
        let resolved = policy.resolve_targets(dir.path());
        assert_eq!(resolved, vec![("memory/2026-01-01.md".to_string(), Mode::Ignore)]);
    }

    #[test]
    fn direct_path_lookup_beats_pattern_lookup() {
        let policy = Policy {
            version: 1,
            workspace_root: "/ws".into(),
            targets: vec![
                TargetEntry::Pattern {
                    pattern: "memory/*.md".into(),
                    mode: "ignore".into(),
                },
                TargetEntry::Direct {
                    path: "memory/important.md".into(),
                    mode: "alert".into(),
                },
            ],
        };
        assert_eq!(policy.mode_for_path("memory/important.md"), Some(Mode::Alert));
        assert_eq!(policy.mode_for_path("memory/other.md"), Some(Mode::Ignore));
        assert_eq!(policy.mode_for_path("unrelated.md"), None);
    }
}
