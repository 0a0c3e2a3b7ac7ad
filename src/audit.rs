//! Hash-chained audit log (C4).
//!
//! Append-only JSON-lines log. Each record's `chain.hash` covers the
//! previous record's hash plus the record's own canonical JSON, giving
//! tamper evidence. Legacy (un-chained) logs are detected and rotated aside
//! on the first append after an upgrade.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use chrono::Utc;
use serde_json::Value;

use crate::error::{GuardianError, Result};

/// Genesis hash: the virtual predecessor of the first audit record.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

const TAIL_READ_BYTES: u64 = 64 * 1024;

/// Append `fields` (event-specific data, no `chain` key) to `audit.jsonl`,
/// computing and attaching the next link in the hash chain. Rotates a
/// legacy log aside first if needed (at most once per process).
pub fn append(state_dir: &Path, mut fields: Value) -> Result<()> {
    std::fs::create_dir_all(state_dir).map_err(|e| GuardianError::io(state_dir, e))?;
    let audit_path = state_dir.join("audit.jsonl");

    if needs_legacy_rotation(&audit_path)? {
        rotate_legacy(&audit_path)?;
    }

    if let Some(obj) = fields.as_object_mut() {
        obj.remove("chain");
    }

    let prev = last_chain_hash(&audit_path)?;
    let canonical = canonical_json(&fields);
    let payload = format!("{prev}\n{canonical}");
    let hash = crate::hashing::sha256_text(&payload);

    let mut record = fields;
    if let Some(obj) = record.as_object_mut() {
        obj.insert(
            "chain".to_string(),
            serde_json::json!({ "prev": prev, "hash": hash }),
        );
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&audit_path)
        .map_err(|e| GuardianError::io(&audit_path, e))?;
    writeln!(file, "{record}").map_err(|e| GuardianError::io(&audit_path, e))?;
    Ok(())
}

/// Build the canonical, pre-chain fields common to every audit record.
pub fn base_record(event: &str, actor: &str, note: &str) -> Value {
    serde_json::json!({
        "ts": Utc::now().to_rfc3339(),
        "event": event,
        "actor": actor,
        "note": note,
    })
}

/// Canonical JSON: keys sorted, no insignificant whitespace, UTF-8.
/// Implemented by re-keying through a `BTreeMap<String, Value>` so ordering
/// is deterministic without a `preserve_order`-style dependency, then
/// serializing with `serde_json`'s compact (whitespace-free) writer.
fn canonical_json(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> =
                    map.iter().map(|(k, v)| (k.clone(), sort(v))).collect();
                serde_json::to_value(sorted).unwrap_or(Value::Null)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    serde_json::to_string(&sort(value)).unwrap_or_default()
}

/// Sample the first non-empty line; a legacy log either fails to parse or
/// parses but lacks a `chain` field.
fn needs_legacy_rotation(audit_path: &Path) -> Result<bool> {
    if !audit_path.exists() {
        return Ok(false);
    }
    let content = std::fs::read_to_string(audit_path).map_err(|e| GuardianError::io(audit_path, e))?;
    let Some(first_line) = content.lines().find(|l| !l.trim().is_empty()) else {
        return Ok(false);
    };
    match serde_json::from_str::<Value>(first_line) {
        Ok(v) => Ok(v.get("chain").is_none()),
        Err(_) => Ok(true),
    }
}

fn rotate_legacy(audit_path: &Path) -> Result<()> {
    if !audit_path.exists() {
        return Ok(());
    }
    let ts = Utc::now().format("%Y%m%dT%H%M%SZ");
    let legacy_path = audit_path.with_file_name(format!("audit.legacy.{ts}.jsonl"));
    std::fs::rename(audit_path, &legacy_path).map_err(|e| GuardianError::io(audit_path, e))
}

/// Seek to the end, read the trailing 64 KiB (or the whole file if
/// shorter), and return the last non-empty line's `chain.hash`, or the
/// genesis hash if the log is empty or absent.
fn last_chain_hash(audit_path: &Path) -> Result<String> {
    if !audit_path.exists() {
        return Ok(GENESIS_HASH.to_string());
    }

    let mut file = std::fs::File::open(audit_path).map_err(|e| GuardianError::io(audit_path, e))?;
    let size = file
        .seek(SeekFrom::End(0))
        .map_err(|e| GuardianError::io(audit_path, e))?;
    if size == 0 {
        return Ok(GENESIS_HASH.to_string());
    }

    let start = size.saturating_sub(TAIL_READ_BYTES);
    file.seek(SeekFrom::Start(start))
        .map_err(|e| GuardianError::io(audit_path, e))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .map_err(|e| GuardianError::io(audit_path, e))?;

    let text = String::from_utf8_lossy(&buf);
    let Some(last_line) = text.lines().rev().find(|l| !l.trim().is_empty()) else {
        return Ok(GENESIS_HASH.to_string());
    };

    match serde_json::from_str::<Value>(last_line) {
        Ok(v) => Ok(v
            .get("chain")
            .and_then(|c| c.get("hash"))
            .and_then(|h| h.as_str())
            .unwrap_or(GENESIS_HASH)
            .to_string()),
        Err(_) => Ok(GENESIS_HASH.to_string()),
    }
}

/// Outcome of [`verify`]: success with the number of lines verified, or the
/// offending line number and a detail message.
pub struct VerifyReport {
    pub lines_verified: usize,
}

/// Validate the audit log's hash chain end to end. Fails on the first
/// `chain.prev`/`chain.hash` mismatch, naming the offending line. A legacy
/// (un-chained) log that has not been rotated refuses with a remediation
/// hint. An empty or absent log trivially passes.
pub fn verify(state_dir: &Path) -> Result<VerifyReport> {
    let audit_path = state_dir.join("audit.jsonl");
    if !audit_path.exists() {
        return Ok(VerifyReport { lines_verified: 0 });
    }

    if needs_legacy_rotation(&audit_path)? {
        return Err(GuardianError::LegacyAudit(
            "run any chain-producing command first (e.g. `check`), then re-run verify-audit".to_string(),
        ));
    }

    let content = std::fs::read_to_string(&audit_path).map_err(|e| GuardianError::io(&audit_path, e))?;
    let mut prev = GENESIS_HASH.to_string();
    let mut line_no = 0usize;

    for line in content.lines() {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut record: Value = serde_json::from_str(line).map_err(|e| GuardianError::ChainMismatch {
            line: line_no,
            detail: format!("invalid JSON: {e}"),
        })?;

        let chain = record
            .get("chain")
            .cloned()
            .unwrap_or(Value::Null);
        let got_prev = chain.get("prev").and_then(|v| v.as_str()).unwrap_or("");
        let got_hash = chain.get("hash").and_then(|v| v.as_str()).unwrap_or("");

        if got_prev != prev {
            return Err(GuardianError::ChainMismatch {
                line: line_no,
                detail: format!("prev mismatch (expected {prev}, got {got_prev})"),
            });
        }

        if let Some(obj) = record.as_object_mut() {
            obj.remove("chain");
        }
        let payload = format!("{prev}\n{}", canonical_json(&record));
        let expected_hash = crate::hashing::sha256_text(&payload);

        if got_hash != expected_hash {
            return Err(GuardianError::ChainMismatch {
                line: line_no,
                detail: "hash mismatch".to_string(),
            });
        }

        prev = got_hash.to_string();
    }

    Ok(VerifyReport {
        lines_verified: line_no,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_log_starts_from_genesis_and_verifies() {
        let dir = tempdir().unwrap();
        append(dir.path(), base_record("init", "test", "")).unwrap();
        let report = verify(dir.path()).unwrap();
        assert_eq!(report.lines_verified, 1);
    }

    #[test]
    fn chain_extends_across_appends() {
        let dir = tempdir().unwrap();
        append(dir.path(), base_record("init", "test", "")).unwrap();
        append(dir.path(), base_record("approve", "test", "")).unwrap();
        let report = verify(dir.path()).unwrap();
        assert_eq!(report.lines_verified, 2);
    }

    #[test]
    fn empty_log_verifies_trivially() {
        let dir = tempdir().unwrap();
        let report = verify(dir.path()).unwrap();
        assert_eq!(report.lines_verified, 0);
    }

    #[test]
    fn tamper_breaks_verification() {
        let dir = tempdir().unwrap();
        append(dir.path(), base_record("init", "test", "")).unwrap();

        let audit_path = dir.path().join("audit.jsonl");
        let content = std::fs::read_to_string(&audit_path).unwrap();
        let mut rec: Value = serde_json::from_str(content.trim()).unwrap();
        rec["note"] = Value::String("tampered".into());
        std::fs::write(&audit_path, format!("{rec}\n")).unwrap();

        let err = verify(dir.path()).unwrap_err();
        assert!(matches!(err, GuardianError::ChainMismatch { line: 1, .. }));
    }

    #[test]
    fn legacy_log_is_rotated_on_append_and_refused_by_verify_before_that() {
        let dir = tempdir().unwrap();
        let audit_path = dir.path().join("audit.jsonl");
        std::fs::write(&audit_path, "{\"event\":\"old\"}\n").unwrap();

        assert!(verify(dir.path()).is_err());

        append(dir.path(), base_record("check", "test", "")).unwrap();
        assert!(!audit_path_has_legacy_marker(&audit_path));

        let legacy_count = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("audit.legacy."))
            .count();
        assert_eq!(legacy_count, 1);

        let report = verify(dir.path()).unwrap();
        assert_eq!(report.lines_verified, 1);
    }

    fn audit_path_has_legacy_marker(path: &Path) -> bool {
        std::fs::read_to_string(path)
            .map(|c| c.contains("\"old\""))
            .unwrap_or(false)
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let value = serde_json::json!({"b": 1, "a": 2});
        assert_eq!(canonical_json(&value), r#"{"a":2,"b":1}"#);
    }
}
