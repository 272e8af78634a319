//! Versioned processing-record schema inside frontmatter.
//!
//! Three shapes have been written to notes over time. Readers reconcile all
//! of them into one [`ProcessingRecord`], highest priority first:
//!
//! ```yaml
//! obsidian-postprocessor:          # current: per attachment, per operation
//!   version: "1.0"
//!   voice-memos:
//!     rec.m4a:
//!       transcribe: {status: completed, updated_at: ..., retry_count: 1}
//! obsidian-postprocessor:          # earlier: per attachment, any operation
//!   voice-memos:
//!     rec.m4a: {status: completed, updated_at: ..., retries: 0}
//! processor_state:                 # earlier: per note, per operation
//!   transcribe: {status: completed, timestamp: ...}
//! broken_recordings: [rec.m4a]     # earliest: flat lists
//! broken_recordings_info: {rec.m4a: {error: ..., timestamp: ...}}
//! processed_recordings: [rec.m4a]
//! ```
//!
//! Writers only write the current shape. The legacy lists are a
//! compatibility shim: entries are removed when they would contradict a new
//! record, and `processed_recordings` is appended to only when it already
//! exists. No legacy field is ever created.

use chrono::{Duration, Utc};
use notescribe_core::{defaults, ProcessingRecord, ProcessingStatus, Result};
use serde_yaml::{Mapping, Value};
use tracing::debug;

/// Current record for (operation, attachment), reconciled across schemas.
pub fn read_record(
    meta: &Mapping,
    namespace: &str,
    operation: &str,
    filename: &str,
) -> Option<ProcessingRecord> {
    if let Some(entry) = attachment_entry(meta, namespace, filename) {
        if is_flat_record(entry) {
            if let Some(record) = decode(entry) {
                return Some(record);
            }
        } else if let Some(record) = entry.get(operation).and_then(decode) {
            return Some(record);
        }
    }

    if let Some(state) = meta
        .get(defaults::LEGACY_PROCESSOR_STATE)
        .and_then(|s| s.get(operation))
    {
        let record = match state {
            Value::String(status) => status
                .parse::<ProcessingStatus>()
                .ok()
                .map(|s| ProcessingRecord::new(s, "Recorded in processor_state")),
            other => decode(other),
        };
        if record.is_some() {
            return record;
        }
    }

    if list_contains(meta, defaults::LEGACY_BROKEN, filename) {
        let info = meta
            .get(defaults::LEGACY_BROKEN_INFO)
            .and_then(|i| i.get(filename));
        let error = info
            .and_then(|i| i.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("Listed in broken_recordings");
        let mut record =
            ProcessingRecord::new(ProcessingStatus::Broken, "Listed in broken_recordings")
                .with_error(error);
        if let Some(ts) = info.and_then(|i| i.get("timestamp")).and_then(Value::as_str) {
            record.updated_at = ts.to_string();
        }
        return Some(record);
    }

    if list_contains(meta, defaults::LEGACY_PROCESSED, filename) {
        return Some(ProcessingRecord::new(
            ProcessingStatus::Completed,
            "Listed in processed_recordings",
        ));
    }

    None
}

/// Store `record` in the current schema and reconcile the legacy lists.
pub fn write_record(
    meta: &mut Mapping,
    namespace: &str,
    operation: &str,
    filename: &str,
    record: &ProcessingRecord,
) -> Result<()> {
    let value = serde_yaml::to_value(record)?;
    let memos = memo_section_mut(meta, namespace);

    let entry = memos
        .entry(Value::String(filename.to_string()))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if is_flat_record(entry) || !entry.is_mapping() {
        debug!(
            attachment = filename,
            "Replacing per-attachment record with per-operation records"
        );
        *entry = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(ops) = entry {
        ops.insert(Value::String(operation.to_string()), value);
    }

    sync_legacy(meta, filename, record.status);
    Ok(())
}

/// Remove every `failed`/`broken` record and the legacy broken lists.
///
/// Returns the number of records removed.
pub fn clear_errors(meta: &mut Mapping, namespace: &str) -> usize {
    let mut cleared = 0;

    if let Some(memos) = memo_section_existing_mut(meta, namespace) {
        cleared += retain_records(memos, |_, record| !record.status.is_error());
    }

    if let Some(Value::Mapping(state)) = meta.get_mut(defaults::LEGACY_PROCESSOR_STATE) {
        let before = state.len();
        state.retain(|_, v| !decode_any(v).map(|r| r.status.is_error()).unwrap_or(false));
        cleared += before - state.len();
    }

    if let Some(Value::Sequence(list)) = meta.remove(defaults::LEGACY_BROKEN) {
        cleared += list.len();
    }
    meta.remove(defaults::LEGACY_BROKEN_INFO);

    cleared
}

/// Drop stale records.
///
/// `failed` records older than the cutoff are removed everywhere; records of
/// any status older than the cutoff are removed when `still_referenced`
/// reports the attachment is no longer embedded in the note.
pub fn prune(
    meta: &mut Mapping,
    namespace: &str,
    max_age_days: i64,
    still_referenced: impl Fn(&str) -> bool,
) -> usize {
    let cutoff = Utc::now() - Duration::days(max_age_days);
    let Some(memos) = memo_section_existing_mut(meta, namespace) else {
        return 0;
    };
    retain_records(memos, |filename, record| {
        let stale = record
            .updated_at_utc()
            .map(|ts| ts < cutoff)
            .unwrap_or(false);
        !(stale && (record.status == ProcessingStatus::Failed || !still_referenced(filename)))
    })
}

/// Every current-schema record as (attachment, operation, record).
///
/// Per-attachment records from the earlier writer are reported with an
/// empty operation name.
pub fn all_records(meta: &Mapping, namespace: &str) -> Vec<(String, String, ProcessingRecord)> {
    let mut out = Vec::new();
    let Some(Value::Mapping(memos)) = meta
        .get(namespace)
        .and_then(|ns| ns.get(defaults::ATTACHMENT_SECTION))
    else {
        return out;
    };
    for (file, entry) in memos {
        let Some(file) = file.as_str() else { continue };
        if is_flat_record(entry) {
            if let Some(record) = decode(entry) {
                out.push((file.to_string(), String::new(), record));
            }
        } else if let Value::Mapping(ops) = entry {
            for (op, value) in ops {
                if let (Some(op), Some(record)) = (op.as_str(), decode(value)) {
                    out.push((file.to_string(), op.to_string(), record));
                }
            }
        }
    }
    out
}

fn retain_records(
    memos: &mut Mapping,
    keep: impl Fn(&str, &ProcessingRecord) -> bool,
) -> usize {
    let mut removed = 0;
    for (file, entry) in memos.iter_mut() {
        let file = file.as_str().unwrap_or_default().to_string();
        if is_flat_record(entry) {
            if let Some(record) = decode(entry) {
                if !keep(&file, &record) {
                    *entry = Value::Null;
                    removed += 1;
                }
            }
        } else if let Value::Mapping(ops) = entry {
            let before = ops.len();
            ops.retain(|_, v| decode(v).map(|r| keep(&file, &r)).unwrap_or(true));
            removed += before - ops.len();
            if ops.is_empty() {
                *entry = Value::Null;
            }
        }
    }
    memos.retain(|_, v| !v.is_null());
    removed
}

fn attachment_entry<'a>(meta: &'a Mapping, namespace: &str, filename: &str) -> Option<&'a Value> {
    meta.get(namespace)?
        .get(defaults::ATTACHMENT_SECTION)?
        .get(filename)
}

fn memo_section_mut<'a>(meta: &'a mut Mapping, namespace: &str) -> &'a mut Mapping {
    let ns = as_mapping_mut(
        meta.entry(Value::String(namespace.to_string()))
            .or_insert_with(|| Value::Mapping(Mapping::new())),
    );
    ns.insert(
        Value::String("version".to_string()),
        Value::String(defaults::SCHEMA_VERSION.to_string()),
    );
    as_mapping_mut(
        ns.entry(Value::String(defaults::ATTACHMENT_SECTION.to_string()))
            .or_insert_with(|| Value::Mapping(Mapping::new())),
    )
}

/// Borrow `value` as a mapping, replacing anything else with an empty one.
fn as_mapping_mut(value: &mut Value) -> &mut Mapping {
    match value {
        Value::Mapping(mapping) => mapping,
        other => {
            *other = Value::Mapping(Mapping::new());
            as_mapping_mut(other)
        }
    }
}

fn memo_section_existing_mut<'a>(meta: &'a mut Mapping, namespace: &str) -> Option<&'a mut Mapping> {
    match meta.get_mut(namespace)?.get_mut(defaults::ATTACHMENT_SECTION)? {
        Value::Mapping(memos) => Some(memos),
        _ => None,
    }
}

fn is_flat_record(value: &Value) -> bool {
    matches!(value.get("status"), Some(Value::String(_)))
}

fn decode(value: &Value) -> Option<ProcessingRecord> {
    match serde_yaml::from_value::<ProcessingRecord>(value.clone()) {
        Ok(record) => Some(record),
        Err(e) => {
            debug!(error = %e, "Ignoring unreadable processing record");
            None
        }
    }
}

fn decode_any(value: &Value) -> Option<ProcessingRecord> {
    match value {
        Value::String(status) => status
            .parse::<ProcessingStatus>()
            .ok()
            .map(|s| ProcessingRecord::new(s, "")),
        other => decode(other),
    }
}

fn list_contains(meta: &Mapping, key: &str, filename: &str) -> bool {
    match meta.get(key) {
        Some(Value::Sequence(items)) => items.iter().any(|v| v.as_str() == Some(filename)),
        _ => false,
    }
}

fn remove_from_list(meta: &mut Mapping, key: &str, filename: &str) {
    if let Some(Value::Sequence(items)) = meta.get_mut(key) {
        items.retain(|v| v.as_str() != Some(filename));
    }
}

fn remove_info(meta: &mut Mapping, filename: &str) {
    if let Some(Value::Mapping(info)) = meta.get_mut(defaults::LEGACY_BROKEN_INFO) {
        info.remove(filename);
    }
}

fn sync_legacy(meta: &mut Mapping, filename: &str, status: ProcessingStatus) {
    match status {
        ProcessingStatus::Completed => {
            remove_from_list(meta, defaults::LEGACY_BROKEN, filename);
            remove_info(meta, filename);
            if let Some(Value::Sequence(items)) = meta.get_mut(defaults::LEGACY_PROCESSED) {
                if !items.iter().any(|v| v.as_str() == Some(filename)) {
                    items.push(Value::String(filename.to_string()));
                    items.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
                }
            }
        }
        ProcessingStatus::Pending => {
            remove_from_list(meta, defaults::LEGACY_BROKEN, filename);
            remove_info(meta, filename);
            remove_from_list(meta, defaults::LEGACY_PROCESSED, filename);
        }
        ProcessingStatus::Failed | ProcessingStatus::Broken => {
            remove_from_list(meta, defaults::LEGACY_PROCESSED, filename);
        }
        ProcessingStatus::Processing | ProcessingStatus::Skipped => {}
    }
}
