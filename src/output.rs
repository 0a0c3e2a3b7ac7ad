//! Output formatter (C8).
//!
//! JSON status, the single-line `SOUL_GUARDIAN_DRIFT` summary used for cron
//! parsing, and the human-readable alert block for direct relay.

use serde::Serialize;

/// Per-file record in a drift/restore summary.
#[derive(Debug, Clone, Serialize)]
pub struct DriftFileReport {
    pub path: String,
    pub mode: String,
    pub restored: bool,
    pub approved_sha: Option<String>,
    pub current_sha: Option<String>,
    pub patch: Option<String>,
    pub quarantine_path: Option<String>,
    pub error: Option<String>,
}

/// Render the machine-readable drift line: `SOUL_GUARDIAN_DRIFT <json>`.
pub fn drift_summary_line(files: &[DriftFileReport]) -> String {
    #[derive(Serialize)]
    struct FileSummary<'a> {
        path: &'a str,
        mode: &'a str,
        restored: bool,
        patch: &'a Option<String>,
        error: &'a Option<String>,
    }
    #[derive(Serialize)]
    struct Summary<'a> {
        event: &'static str,
        count: usize,
        files: Vec<FileSummary<'a>>,
    }

    let summary = Summary {
        event: "SOUL_GUARDIAN_DRIFT",
        count: files.len(),
        files: files
            .iter()
            .map(|f| FileSummary {
                path: &f.path,
                mode: &f.mode,
                restored: f.restored,
                patch: &f.patch,
                error: &f.error,
            })
            .collect(),
    };

    format!(
        "SOUL_GUARDIAN_DRIFT {}",
        serde_json::to_string(&summary).unwrap_or_default()
    )
}

/// Render the human-readable alert block.
pub fn alert_block(files: &[DriftFileReport]) -> String {
    let mut lines = Vec::new();
    lines.push(String::new());
    lines.push("=".repeat(50));
    lines.push("SOUL GUARDIAN SECURITY ALERT".to_string());
    lines.push("=".repeat(50));
    lines.push(String::new());

    for f in files {
        if let Some(err) = &f.error {
            lines.push(format!("ERROR: {}", f.path));
            lines.push(format!("   {err}"));
        } else {
            lines.push(format!("FILE: {}", f.path));
            lines.push(format!("   Mode: {}", f.mode));
            if f.restored {
                lines.push("   Status: RESTORED to approved baseline".to_string());
                if let Some(q) = &f.quarantine_path {
                    lines.push(format!("   Quarantined: {q}"));
                }
            } else {
                lines.push("   Status: DRIFT DETECTED (not auto-restored)".to_string());
            }
            if let Some(sha) = &f.approved_sha {
                lines.push(format!("   Expected hash: {}...", &sha[..sha.len().min(16)]));
            }
            if let Some(sha) = &f.current_sha {
                lines.push(format!("   Found hash:    {}...", &sha[..sha.len().min(16)]));
            }
            if let Some(patch) = &f.patch {
                lines.push(format!("   Diff saved: {patch}"));
            }
        }
        lines.push(String::new());
    }

    lines.push("=".repeat(50));
    lines.push("Review changes and investigate the source of drift.".to_string());
    lines.push("If intentional, run: soul-guardian approve --file <path>".to_string());
    lines.push("=".repeat(50));
    lines.push(String::new());

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DriftFileReport {
        DriftFileReport {
            path: "SOUL.md".to_string(),
            mode: "restore".to_string(),
            restored: true,
            approved_sha: Some("a".repeat(64)),
            current_sha: Some("b".repeat(64)),
            patch: Some("patches/x.patch".to_string()),
            quarantine_path: Some("quarantine/x.quarantine".to_string()),
            error: None,
        }
    }

    #[test]
    fn drift_summary_line_has_expected_prefix() {
        let line = drift_summary_line(&[sample()]);
        assert!(line.starts_with("SOUL_GUARDIAN_DRIFT "));
        let json_part = line.strip_prefix("SOUL_GUARDIAN_DRIFT ").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(json_part).unwrap();
        assert_eq!(parsed["count"], 1);
    }

    #[test]
    fn alert_block_mentions_restoration() {
        let block = alert_block(&[sample()]);
        assert!(block.contains("RESTORED to approved baseline"));
        assert!(block.contains("SOUL.md"));
    }
}
