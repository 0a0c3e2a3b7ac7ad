//! Command orchestration (C7).
//!
//! Five core operations plus `watch`/`enable-monitoring` — composing C2–C6
//! (policy, baselines, audit, drift, restore) per invocation. `W` and `S`
//! are passed explicitly throughout; there is no process-wide singleton.

use std::path::Path;

use serde::Serialize;

use crate::audit;
use crate::baseline::{approved_snapshot_path, BaselineIndex};
use crate::drift::{self, DriftOutcome, PatchTag};
use crate::error::{GuardianError, Result};
use crate::hashing::{atomic_write_bytes, is_symlink, lossy_text, read_bytes_checked, refuse_symlink, sha256_bytes};
use crate::output::DriftFileReport;
use crate::policy::Mode;
use crate::restore as restorer;
use crate::state::GuardianPaths;

fn mode_str(mode: Mode) -> &'static str {
    match mode {
        Mode::Restore => "restore",
        Mode::Alert => "alert",
        Mode::Ignore => "ignore",
    }
}

/// `init` — ensure state directories exist; seed the default policy if
/// missing or `force_policy`; snapshot any non-ignore target that has no
/// baseline yet.
pub fn init(paths: &GuardianPaths, actor: &str, note: &str, force_policy: bool) -> Result<usize> {
    paths.ensure_dirs()?;

    if force_policy || !paths.policy_path().exists() {
        paths.save_policy(&crate::policy::Policy::default_for(&paths.workspace_root))?;
    }

    let policy = paths.load_policy()?;
    let mut baselines = BaselineIndex::load(&paths.state_dir)?;
    let targets = policy.resolve_targets(&paths.workspace_root);

    let mut initialized = 0usize;
    for (rel_path, mode) in &targets {
        if *mode == Mode::Ignore {
            continue;
        }

        let abs_path = paths.workspace_root.join(rel_path);
        if !abs_path.exists() {
            continue;
        }
        refuse_symlink(&abs_path)?;

        let snap_path = approved_snapshot_path(&paths.state_dir, rel_path);
        if baselines.get(rel_path).is_some() && snap_path.exists() {
            continue;
        }

        let bytes = read_bytes_checked(&abs_path)?;
        let sha = sha256_bytes(&bytes);
        atomic_write_bytes(&snap_path, &bytes)?;
        baselines.set(rel_path, sha.clone());
        initialized += 1;
        tracing::debug!("baseline set for {rel_path} ({})", mode_str(*mode));

        audit::append(
            &paths.state_dir,
            merge(
                audit::base_record("init", actor, note),
                serde_json::json!({
                    "path": rel_path,
                    "mode": mode_str(*mode),
                    "approvedSha": sha,
                    "workspace": paths.workspace_root.display().to_string(),
                    "stateDir": paths.state_dir.display().to_string(),
                }),
            ),
        )?;
    }

    baselines.save(&paths.state_dir)?;
    tracing::info!("guardian initialized with {initialized} new baseline(s)");
    Ok(initialized)
}

/// Per-file status entry for `status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusFile {
    pub path: String,
    pub mode: String,
    pub exists: bool,
    #[serde(rename = "isSymlink")]
    pub is_symlink: bool,
    #[serde(rename = "approvedSha")]
    pub approved_sha: Option<String>,
    #[serde(rename = "currentSha")]
    pub current_sha: Option<String>,
    #[serde(rename = "approvedSnapshot")]
    pub approved_snapshot: Option<String>,
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub workspace: String,
    #[serde(rename = "stateDir")]
    pub state_dir: String,
    #[serde(rename = "policyPath")]
    pub policy_path: String,
    #[serde(rename = "baselinesPath")]
    pub baselines_path: String,
    #[serde(rename = "auditLog")]
    pub audit_log: String,
    pub files: Vec<StatusFile>,
}

/// `status` — resolve targets, compute current SHA per target, report
/// `ok = (mode == ignore) || (approvedSha != null && currentSha ==
/// approvedSha)`.
pub fn status(paths: &GuardianPaths) -> Result<StatusReport> {
    paths.ensure_dirs()?;
    let policy = paths.load_policy()?;
    let baselines = BaselineIndex::load(&paths.state_dir)?;
    let targets = policy.resolve_targets(&paths.workspace_root);

    let mut files = Vec::new();
    for (rel_path, mode) in targets {
        let abs_path = paths.workspace_root.join(&rel_path);
        let baseline = baselines.get(&rel_path);
        let approved_sha = baseline.map(|b| b.sha256.clone());
        let approved_snap = approved_snapshot_path(&paths.state_dir, &rel_path);

        let exists = abs_path.exists();
        let symlink = exists && is_symlink(&abs_path);
        let current_sha = if exists && !symlink {
            std::fs::read(&abs_path).ok().map(|b| sha256_bytes(&b))
        } else {
            None
        };

        let ok = mode == Mode::Ignore || (approved_sha.is_some() && current_sha == approved_sha);

        files.push(StatusFile {
            path: rel_path,
            mode: mode_str(mode).to_string(),
            exists,
            is_symlink: symlink,
            approved_sha,
            current_sha,
            approved_snapshot: approved_snap.exists().then(|| approved_snap.display().to_string()),
            ok,
        });
    }

    Ok(StatusReport {
        workspace: paths.workspace_root.display().to_string(),
        state_dir: paths.state_dir.display().to_string(),
        policy_path: paths.policy_path().display().to_string(),
        baselines_path: paths.baselines_path().display().to_string(),
        audit_log: paths.audit_path().display().to_string(),
        files,
    })
}

/// Result of `check`: whether any drift occurred (exit code 2) and the
/// per-file reports for output formatting.
pub struct CheckOutcome {
    pub drifted: bool,
    pub files: Vec<DriftFileReport>,
}

/// `check` — for each non-ignore target, detect drift; auto-restore
/// `restore`-mode targets unless `no_restore`.
pub fn check(paths: &GuardianPaths, actor: &str, note: &str, no_restore: bool) -> Result<CheckOutcome> {
    paths.ensure_dirs()?;
    let policy = paths.load_policy()?;
    let baselines = BaselineIndex::load(&paths.state_dir)?;
    let targets = policy.resolve_targets(&paths.workspace_root);

    let mut reports = Vec::new();

    for (rel_path, mode) in targets {
        if mode == Mode::Ignore {
            continue;
        }

        let outcome = drift::detect(&paths.workspace_root, &paths.state_dir, &baselines, &rel_path)?;

        match outcome {
            DriftOutcome::Clean { .. } => continue,
            DriftOutcome::Anomaly { error } => {
                tracing::warn!("integrity anomaly for {rel_path}: {error}");
                audit::append(
                    &paths.state_dir,
                    merge(
                        audit::base_record("error", actor, note),
                        serde_json::json!({ "path": rel_path, "mode": mode_str(mode), "error": error }),
                    ),
                )?;
                reports.push(DriftFileReport {
                    path: rel_path,
                    mode: mode_str(mode).to_string(),
                    restored: false,
                    approved_sha: None,
                    current_sha: None,
                    patch: None,
                    quarantine_path: None,
                    error: Some(error),
                });
            }
            DriftOutcome::Drifted {
                approved_sha,
                current_sha,
                patch_path,
            } => {
                tracing::warn!(
                    "drift detected for {rel_path}: expected {} got {}",
                    &approved_sha[..approved_sha.len().min(12)],
                    &current_sha[..current_sha.len().min(12)]
                );
                audit::append(
                    &paths.state_dir,
                    merge(
                        audit::base_record("drift", actor, note),
                        serde_json::json!({
                            "path": rel_path,
                            "mode": mode_str(mode),
                            "approvedSha": approved_sha,
                            "currentSha": current_sha,
                            "patchPath": patch_path.display().to_string(),
                        }),
                    ),
                )?;

                let mut restored = false;
                let mut quarantine_path = None;

                if mode == Mode::Restore && !no_restore {
                    let outcome = restorer::restore(&paths.workspace_root, &paths.state_dir, &rel_path)?;
                    audit::append(
                        &paths.state_dir,
                        merge(
                            audit::base_record("restore", actor, note),
                            serde_json::json!({
                                "path": rel_path,
                                "mode": mode_str(mode),
                                "quarantinePath": outcome.quarantine_path.display().to_string(),
                            }),
                        ),
                    )?;
                    restored = true;
                    quarantine_path = Some(outcome.quarantine_path.display().to_string());
                    tracing::info!("auto-restored {rel_path}");
                }

                reports.push(DriftFileReport {
                    path: rel_path,
                    mode: mode_str(mode).to_string(),
                    restored,
                    approved_sha: Some(approved_sha),
                    current_sha: Some(current_sha),
                    patch: Some(patch_path.display().to_string()),
                    quarantine_path,
                    error: None,
                });
            }
        }
    }

    Ok(CheckOutcome {
        drifted: !reports.is_empty(),
        files: reports,
    })
}

/// `approve` — select targets (`files`, `--all`, or default `SOUL.md`),
/// overwrite their snapshot and baseline entry, recording a diff against
/// the prior snapshot.
pub fn approve(
    paths: &GuardianPaths,
    actor: &str,
    note: &str,
    files: &[String],
    all: bool,
) -> Result<Vec<String>> {
    paths.ensure_dirs()?;
    let policy = paths.load_policy()?;
    let mut baselines = BaselineIndex::load(&paths.state_dir)?;
    let targets = policy.resolve_targets(&paths.workspace_root);
    let selectable: Vec<_> = targets.into_iter().filter(|(_, m)| *m != Mode::Ignore).collect();

    let chosen = select(&selectable, files, all, "SOUL.md", "Unknown or ignored file(s)")?;

    let mut approved_paths = Vec::new();
    for (rel_path, mode) in &chosen {
        let abs_path = paths.workspace_root.join(rel_path);
        if !abs_path.exists() {
            return Err(GuardianError::MissingFile(rel_path.clone()));
        }
        refuse_symlink(&abs_path)?;

        let prev_sha = baselines.get(rel_path).map(|b| b.sha256.clone());
        let snap_path = approved_snapshot_path(&paths.state_dir, rel_path);
        let prev_text = if snap_path.exists() {
            lossy_text(&std::fs::read(&snap_path).map_err(|e| GuardianError::io(&snap_path, e))?)
        } else {
            String::new()
        };

        let cur_bytes = read_bytes_checked(&abs_path)?;
        let cur_sha = sha256_bytes(&cur_bytes);
        let cur_text = lossy_text(&cur_bytes);

        let patch_text = drift::unified_diff(&prev_text, &cur_text, &format!("approved/{rel_path}"), rel_path);
        let patch_path = drift::write_patch(&paths.state_dir, &patch_text, PatchTag::Approve, rel_path)?;

        atomic_write_bytes(&snap_path, &cur_bytes)?;
        baselines.set(rel_path, cur_sha.clone());

        audit::append(
            &paths.state_dir,
            merge(
                audit::base_record("approve", actor, note),
                serde_json::json!({
                    "path": rel_path,
                    "mode": mode_str(*mode),
                    "prevApprovedSha": prev_sha,
                    "approvedSha": cur_sha,
                    "patchPath": patch_path.display().to_string(),
                }),
            ),
        )?;

        approved_paths.push(rel_path.clone());
        tracing::info!("approved {rel_path} (sha {})", &cur_sha[..cur_sha.len().min(12)]);
    }

    baselines.save(&paths.state_dir)?;
    Ok(approved_paths)
}

/// Outcome of restoring one file via the `restore` command.
pub struct RestoredFile {
    pub path: String,
    pub restored: bool,
}

/// `restore` — select `restore`-mode targets (`files`, `--all`, or default
/// `SOUL.md`); restore those with drift.
pub fn restore_cmd(
    paths: &GuardianPaths,
    actor: &str,
    note: &str,
    files: &[String],
    all: bool,
) -> Result<Vec<RestoredFile>> {
    paths.ensure_dirs()?;
    let policy = paths.load_policy()?;
    let baselines = BaselineIndex::load(&paths.state_dir)?;
    let targets = policy.resolve_targets(&paths.workspace_root);
    let restorable: Vec<_> = targets.into_iter().filter(|(_, m)| *m == Mode::Restore).collect();

    let chosen = select(&restorable, files, all, "SOUL.md", "Not restorable or unknown file(s)")?;

    let mut results = Vec::new();
    for (rel_path, mode) in &chosen {
        let outcome = drift::detect(&paths.workspace_root, &paths.state_dir, &baselines, rel_path)?;
        match outcome {
            DriftOutcome::Anomaly { error } => return Err(GuardianError::Anomaly(error)),
            DriftOutcome::Clean { .. } => {
                results.push(RestoredFile {
                    path: rel_path.clone(),
                    restored: false,
                });
            }
            DriftOutcome::Drifted { .. } => {
                let outcome = restorer::restore(&paths.workspace_root, &paths.state_dir, rel_path)?;
                audit::append(
                    &paths.state_dir,
                    merge(
                        audit::base_record("restore", actor, note),
                        serde_json::json!({
                            "path": rel_path,
                            "mode": mode_str(*mode),
                            "quarantinePath": outcome.quarantine_path.display().to_string(),
                        }),
                    ),
                )?;
                results.push(RestoredFile {
                    path: rel_path.clone(),
                    restored: true,
                });
                tracing::info!("restored {rel_path}");
            }
        }
    }

    Ok(results)
}

/// `verify-audit`.
pub fn verify_audit(paths: &GuardianPaths) -> Result<audit::VerifyReport> {
    paths.ensure_dirs()?;
    audit::verify(&paths.state_dir)
}

/// Select targets by explicit list, `--all`, or a default single path.
fn select(
    pool: &[(String, Mode)],
    files: &[String],
    all: bool,
    default_path: &str,
    missing_label: &str,
) -> Result<Vec<(String, Mode)>> {
    if all {
        return Ok(pool.to_vec());
    }
    if !files.is_empty() {
        let wanted: std::collections::BTreeSet<String> = files.iter().map(|f| normalize(f)).collect();
        let chosen: Vec<_> = pool.iter().filter(|(p, _)| wanted.contains(p)).cloned().collect();
        let found: std::collections::BTreeSet<_> = chosen.iter().map(|(p, _)| p.clone()).collect();
        let missing: Vec<_> = wanted.difference(&found).cloned().collect();
        if !missing.is_empty() {
            return Err(GuardianError::UnknownTarget(format!(
                "{missing_label}: {}",
                missing.join(", ")
            )));
        }
        return Ok(chosen);
    }
    let chosen: Vec<_> = pool.iter().filter(|(p, _)| p == default_path).cloned().collect();
    if chosen.is_empty() {
        return Err(GuardianError::NoSelection("no files selected".to_string()));
    }
    Ok(chosen)
}

fn normalize(path: &str) -> String {
    Path::new(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Merge two JSON objects, `extra`'s keys taking precedence on conflict.
fn merge(mut base: serde_json::Value, extra: serde_json::Value) -> serde_json::Value {
    if let (Some(base_obj), Some(extra_obj)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seed_workspace(ws: &Path) {
        std::fs::write(ws.join("SOUL.md"), "hello soul\n").unwrap();
        std::fs::write(ws.join("AGENTS.md"), "hello agents\n").unwrap();
        std::fs::write(ws.join("USER.md"), "user v1\n").unwrap();
        std::fs::write(ws.join("TOOLS.md"), "tools v1\n").unwrap();
        std::fs::write(ws.join("IDENTITY.md"), "id v1\n").unwrap();
        std::fs::write(ws.join("HEARTBEAT.md"), "hb v1\n").unwrap();
        std::fs::write(ws.join("MEMORY.md"), "mem v1\n").unwrap();
        std::fs::create_dir_all(ws.join("memory")).unwrap();
        std::fs::write(ws.join("memory/2026-01-01.md"), "daily\n").unwrap();
    }

    #[test]
    fn scenario_clean_init_then_check() {
        let ws = tempdir().unwrap();
        let state = tempdir().unwrap();
        seed_workspace(ws.path());
        let paths = GuardianPaths::new(ws.path(), state.path());

        let n = init(&paths, "test", "", false).unwrap();
        assert!(n > 0);

        let outcome = check(&paths, "test", "", false).unwrap();
        assert!(!outcome.drifted);
    }

    #[test]
    fn scenario_restore_mode_auto_heals() {
        let ws = tempdir().unwrap();
        let state = tempdir().unwrap();
        seed_workspace(ws.path());
        let paths = GuardianPaths::new(ws.path(), state.path());
        init(&paths, "test", "", false).unwrap();

        std::fs::write(ws.path().join("SOUL.md"), "MALICIOUS\n").unwrap();
        let outcome = check(&paths, "cron", "", false).unwrap();
        assert!(outcome.drifted);

        let content = std::fs::read_to_string(ws.path().join("SOUL.md")).unwrap();
        assert_eq!(content, "hello soul\n");

        let quarantine_dir = state.path().join("quarantine");
        let has_quarantine = std::fs::read_dir(&quarantine_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().starts_with("SOULmd"));
        assert!(has_quarantine);
    }

    #[test]
    fn scenario_alert_mode_persists_and_approve_clears() {
        let ws = tempdir().unwrap();
        let state = tempdir().unwrap();
        seed_workspace(ws.path());
        let paths = GuardianPaths::new(ws.path(), state.path());
        init(&paths, "test", "", false).unwrap();

        std::fs::write(ws.path().join("USER.md"), "user v2\n").unwrap();
        let outcome = check(&paths, "test", "", false).unwrap();
        assert!(outcome.drifted);
        let content = std::fs::read_to_string(ws.path().join("USER.md")).unwrap();
        assert_eq!(content, "user v2\n");

        approve(&paths, "test", "", &["USER.md".to_string()], false).unwrap();

        let outcome = check(&paths, "test", "", false).unwrap();
        assert!(!outcome.drifted);

        let baselines = BaselineIndex::load(state.path()).unwrap();
        assert_eq!(
            baselines.get("USER.md").unwrap().sha256,
            sha256_bytes(b"user v2\n")
        );
    }

    #[test]
    fn ignored_targets_never_drift() {
        let ws = tempdir().unwrap();
        let state = tempdir().unwrap();
        seed_workspace(ws.path());
        let paths = GuardianPaths::new(ws.path(), state.path());
        init(&paths, "test", "", false).unwrap();

        std::fs::write(ws.path().join("memory/2026-01-01.md"), "tampered\n").unwrap();
        let outcome = check(&paths, "test", "", false).unwrap();
        assert!(!outcome.files.iter().any(|f| f.path.contains("2026-01-01")));
    }

    #[test]
    fn second_clean_check_adds_no_audit_records() {
        let ws = tempdir().unwrap();
        let state = tempdir().unwrap();
        seed_workspace(ws.path());
        let paths = GuardianPaths::new(ws.path(), state.path());
        init(&paths, "test", "", false).unwrap();
        check(&paths, "test", "", false).unwrap();

        let audit_path = state.path().join("audit.jsonl");
        let before = std::fs::read_to_string(&audit_path).unwrap();
        check(&paths, "test", "", false).unwrap();
        let after = std::fs::read_to_string(&audit_path).unwrap();
        assert_eq!(before, after);
    }
}
