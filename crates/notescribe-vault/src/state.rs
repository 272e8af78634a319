//! Frontmatter-backed processing state.
//!
//! Every mutation of a note goes through [`StateStore`]: it takes the note's
//! lock, reads the current bytes, applies the change, validates the result,
//! and replaces the file atomically. Locks are per note, so notes are updated
//! in parallel while two updates of the same note never interleave.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use notescribe_core::{
    Error, EventBus, ProcessResult, ProcessingRecord, ProcessingStatus, ProcessorEvent, Result,
};
use serde_yaml::Mapping;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::atomic::StagedWrite;
use crate::context::VaultContext;
use crate::frontmatter::{self, Frontmatter};
use crate::schema;

/// Extra fields recorded on completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordDetails {
    pub transcript_length: Option<usize>,
    pub model: Option<String>,
    pub language: Option<String>,
}

type LockMap = Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>;

/// Exclusive access to one note. Dropping it evicts the note's lock entry
/// once no other task holds or waits for it.
struct NoteGuard<'a> {
    locks: &'a LockMap,
    note: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for NoteGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks
            .get(&self.note)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.note);
        }
    }
}

pub struct StateStore {
    ctx: Arc<VaultContext>,
    locks: LockMap,
    events: Option<EventBus>,
}

impl StateStore {
    pub fn new(ctx: Arc<VaultContext>) -> Self {
        Self {
            ctx,
            locks: Mutex::new(HashMap::new()),
            events: None,
        }
    }

    /// Report frontmatter problems on `bus`.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn context(&self) -> &Arc<VaultContext> {
        &self.ctx
    }

    async fn lock_note(&self, note: &Path) -> NoteGuard<'_> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(note.to_path_buf())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        NoteGuard {
            locks: &self.locks,
            note: note.to_path_buf(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Read and parse a note.
    pub async fn read_note(&self, note: &Path) -> Result<Frontmatter> {
        let text = tokio::fs::read_to_string(note).await?;
        let parsed = frontmatter::parse_document(&text, self.ctx.frontmatter_error_level());
        if parsed.strategy.is_lossy() {
            if let Some(bus) = &self.events {
                bus.emit(ProcessorEvent::FrontmatterError {
                    note: self.ctx.display_path(note),
                    error: parsed.issues.join("; "),
                });
            }
        }
        Ok(parsed)
    }

    /// Current record for (note, operation, attachment).
    pub async fn get_record(
        &self,
        note: &Path,
        operation: &str,
        filename: &str,
    ) -> Result<Option<ProcessingRecord>> {
        let fm = self.read_note(note).await?;
        Ok(schema::read_record(
            &fm.metadata,
            self.ctx.namespace(),
            operation,
            filename,
        ))
    }

    /// True when no record exists or the record is `pending` or `failed`.
    pub async fn should_process(&self, note: &Path, operation: &str, filename: &str) -> Result<bool> {
        let record = self.get_record(note, operation, filename).await?;
        Ok(record.map(|r| r.status.allows_processing()).unwrap_or(true))
    }

    /// [`should_process`](Self::should_process), or a `processing` record
    /// holding a remote task id that can be resumed.
    pub fn is_eligible(record: Option<&ProcessingRecord>) -> bool {
        match record {
            None => true,
            Some(r) => r.status.allows_processing() || r.is_resumable(),
        }
    }

    /// Replace the record for (note, operation, attachment).
    pub async fn update_record(
        &self,
        note: &Path,
        operation: &str,
        filename: &str,
        record: &ProcessingRecord,
    ) -> Result<()> {
        self.modify(note, |meta| {
            schema::write_record(meta, self.ctx.namespace(), operation, filename, record)?;
            Ok(true)
        })
        .await?;
        debug!(
            note = %self.ctx.display_path(note),
            operation,
            attachment = filename,
            status = %record.status,
            "Processing record updated"
        );
        Ok(())
    }

    /// `pending → processing`. Keeps a task id from an earlier attempt.
    pub async fn mark_start(
        &self,
        note: &Path,
        operation: &str,
        filename: &str,
        attempt: u32,
    ) -> Result<ProcessingRecord> {
        let mut started = None;
        self.modify(note, |meta| {
            let ns = self.ctx.namespace();
            let previous = schema::read_record(meta, ns, operation, filename);
            let mut record = ProcessingRecord::new(
                ProcessingStatus::Processing,
                format!("Processing {} (attempt {})", filename, attempt),
            )
            .with_retry_count(attempt);
            record.task_id = previous.and_then(|p| p.task_id);
            schema::write_record(meta, ns, operation, filename, &record)?;
            started = Some(record);
            Ok(true)
        })
        .await?;
        started.ok_or_else(|| Error::Internal("mark_start produced no record".to_string()))
    }

    /// Persist a remote task id as soon as the task is accepted.
    pub async fn mark_task_submitted(
        &self,
        note: &Path,
        operation: &str,
        filename: &str,
        task_id: &str,
    ) -> Result<()> {
        self.set_task_id(note, operation, filename, Some(task_id)).await
    }

    /// Forget a remote task id so the next attempt submits again.
    pub async fn clear_task_id(&self, note: &Path, operation: &str, filename: &str) -> Result<()> {
        self.set_task_id(note, operation, filename, None).await
    }

    async fn set_task_id(
        &self,
        note: &Path,
        operation: &str,
        filename: &str,
        task_id: Option<&str>,
    ) -> Result<()> {
        self.modify(note, |meta| {
            let ns = self.ctx.namespace();
            let mut record = schema::read_record(meta, ns, operation, filename).unwrap_or_else(|| {
                ProcessingRecord::new(ProcessingStatus::Processing, "Remote task submitted")
            });
            if record.task_id.as_deref() == task_id {
                return Ok(false);
            }
            record.task_id = task_id.map(str::to_string);
            record.updated_at = notescribe_core::now_timestamp();
            schema::write_record(meta, ns, operation, filename, &record)?;
            Ok(true)
        })
        .await?;
        Ok(())
    }

    /// `processing → completed | failed` depending on `result.success`.
    pub async fn mark_complete(
        &self,
        note: &Path,
        operation: &str,
        filename: &str,
        result: &ProcessResult,
        details: RecordDetails,
    ) -> Result<()> {
        let status = if result.success {
            ProcessingStatus::Completed
        } else {
            ProcessingStatus::Failed
        };
        let mut record = ProcessingRecord::new(status, result.message.clone())
            .with_retry_count(result.retry_count);
        record.processing_time = result.duration_ms as f64 / 1000.0;
        record.error = result.error.clone();
        record.output = result.output.clone();
        record.transcript_length = details.transcript_length;
        record.model = details.model;
        record.language = details.language;
        self.update_record(note, operation, filename, &record).await
    }

    /// Terminal state after the retry budget is spent.
    pub async fn mark_broken(
        &self,
        note: &Path,
        operation: &str,
        filename: &str,
        reason: &str,
        retry_count: u32,
        duration_ms: u64,
    ) -> Result<()> {
        let mut record = ProcessingRecord::new(ProcessingStatus::Broken, reason)
            .with_error(reason)
            .with_retry_count(retry_count);
        record.processing_time = duration_ms as f64 / 1000.0;
        self.update_record(note, operation, filename, &record).await
    }

    /// Administrative reset to `pending`. Returns whether the note changed.
    pub async fn reset(&self, note: &Path, operation: &str, filename: &str) -> Result<bool> {
        let changed = self
            .modify(note, |meta| {
                let ns = self.ctx.namespace();
                let current = schema::read_record(meta, ns, operation, filename);
                if current.map(|r| r.status) == Some(ProcessingStatus::Pending) {
                    return Ok(false);
                }
                let record = ProcessingRecord::new(ProcessingStatus::Pending, "Reset");
                schema::write_record(meta, ns, operation, filename, &record)?;
                Ok(true)
            })
            .await?;
        if changed {
            info!(
                note = %self.ctx.display_path(note),
                operation,
                attachment = filename,
                "Processing record reset"
            );
        }
        Ok(changed)
    }

    /// Remove every `failed`/`broken` record from a note, legacy lists
    /// included. Returns the number of records removed.
    pub async fn clear_broken(&self, note: &Path) -> Result<usize> {
        let mut cleared = 0;
        self.modify(note, |meta| {
            cleared = schema::clear_errors(meta, self.ctx.namespace());
            Ok(cleared > 0)
        })
        .await?;
        Ok(cleared)
    }

    /// Prune stale records; see [`schema::prune`].
    pub async fn cleanup_old_states(
        &self,
        note: &Path,
        max_age_days: i64,
        referenced: &[String],
    ) -> Result<usize> {
        let mut removed = 0;
        self.modify(note, |meta| {
            removed = schema::prune(meta, self.ctx.namespace(), max_age_days, |f| {
                referenced.iter().any(|r| r == f)
            });
            Ok(removed > 0)
        })
        .await?;
        Ok(removed)
    }

    /// All current-schema records of a note.
    pub async fn note_records(&self, note: &Path) -> Result<Vec<(String, String, ProcessingRecord)>> {
        let fm = self.read_note(note).await?;
        Ok(schema::all_records(&fm.metadata, self.ctx.namespace()))
    }

    /// Rewrite the body of a note, leaving the frontmatter bytes untouched.
    ///
    /// `edit` returns `None` when no change is needed. Failures surface as
    /// [`Error::StateWrite`].
    pub async fn edit_body<F>(&self, note: &Path, edit: F) -> Result<bool>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        self.edit_body_locked(note, edit)
            .await
            .map_err(Error::into_state_write)
    }

    async fn edit_body_locked<F>(&self, note: &Path, edit: F) -> Result<bool>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        let _guard = self.lock_note(note).await;

        let text = tokio::fs::read_to_string(note).await?;
        let parts = frontmatter::split(&text);
        let Some(body) = edit(parts.body) else {
            return Ok(false);
        };
        let updated = format!("{}{}", parts.head, body);
        self.commit(note, &updated).await?;
        Ok(true)
    }

    /// Locked read-modify-write of a note's metadata.
    ///
    /// `change` returns whether it modified the mapping; nothing is written
    /// otherwise. Failures surface as [`Error::StateWrite`].
    async fn modify<F>(&self, note: &Path, change: F) -> Result<bool>
    where
        F: FnOnce(&mut Mapping) -> Result<bool>,
    {
        self.modify_locked(note, change)
            .await
            .map_err(Error::into_state_write)
    }

    async fn modify_locked<F>(&self, note: &Path, change: F) -> Result<bool>
    where
        F: FnOnce(&mut Mapping) -> Result<bool>,
    {
        let _guard = self.lock_note(note).await;
        let start = Instant::now();

        let mut fm = self.read_note(note).await?;
        if !change(&mut fm.metadata)? {
            return Ok(false);
        }
        let text = fm.to_text()?;
        self.commit(note, &text).await?;
        debug!(
            note = %self.ctx.display_path(note),
            duration_ms = start.elapsed().as_millis() as u64,
            "Frontmatter written"
        );
        Ok(true)
    }

    async fn commit(&self, note: &Path, text: &str) -> Result<()> {
        let staged = StagedWrite::stage(note, text.as_bytes()).await?;
        staged.commit().await.map_err(|e| {
            warn!(note = %self.ctx.display_path(note), error = %e, "Note write failed");
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notescribe_core::FrontmatterErrorLevel;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> StateStore {
        let ctx = VaultContext::new(dir.path())
            .unwrap()
            .with_frontmatter_error_level(FrontmatterErrorLevel::Silent);
        StateStore::new(Arc::new(ctx))
    }

    fn note(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("note.md");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_should_process_without_record() {
        let dir = TempDir::new().unwrap();
        let path = note(&dir, "![[rec.m4a]]\n");
        let store = store(&dir);
        assert!(store.should_process(&path, "transcribe", "rec.m4a").await.unwrap());
    }

    #[tokio::test]
    async fn test_should_process_by_status() {
        let dir = TempDir::new().unwrap();
        let path = note(&dir, "![[rec.m4a]]\n");
        let store = store(&dir);

        for (status, expected) in [
            (ProcessingStatus::Pending, true),
            (ProcessingStatus::Failed, true),
            (ProcessingStatus::Completed, false),
            (ProcessingStatus::Processing, false),
            (ProcessingStatus::Skipped, false),
            (ProcessingStatus::Broken, false),
        ] {
            let record = ProcessingRecord::new(status, "");
            store.update_record(&path, "transcribe", "rec.m4a", &record).await.unwrap();
            assert_eq!(
                store.should_process(&path, "transcribe", "rec.m4a").await.unwrap(),
                expected,
                "status {}",
                status
            );
        }
    }

    #[tokio::test]
    async fn test_update_preserves_body_and_other_keys() {
        let dir = TempDir::new().unwrap();
        let path = note(&dir, "---\ntitle: Daily\n---\nBody ![[rec.m4a]]\n");
        let store = store(&dir);

        store
            .update_record(
                &path,
                "transcribe",
                "rec.m4a",
                &ProcessingRecord::new(ProcessingStatus::Completed, "done"),
            )
            .await
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let (meta, body) = frontmatter::parse(&text);
        assert_eq!(body, "Body ![[rec.m4a]]\n");
        assert_eq!(meta.get("title").and_then(|v| v.as_str()), Some("Daily"));
        let record = store.get_record(&path, "transcribe", "rec.m4a").await.unwrap().unwrap();
        assert_eq!(record.status, ProcessingStatus::Completed);
        assert_eq!(record.message, "done");
    }

    #[tokio::test]
    async fn test_mark_start_keeps_task_id() {
        let dir = TempDir::new().unwrap();
        let path = note(&dir, "![[rec.m4a]]\n");
        let store = store(&dir);

        store.mark_start(&path, "t", "rec.m4a", 1).await.unwrap();
        store.mark_task_submitted(&path, "t", "rec.m4a", "task-9").await.unwrap();
        let restarted = store.mark_start(&path, "t", "rec.m4a", 2).await.unwrap();
        assert_eq!(restarted.task_id.as_deref(), Some("task-9"));
        assert_eq!(restarted.retry_count, 2);
        assert!(StateStore::is_eligible(Some(&restarted)));

        store.clear_task_id(&path, "t", "rec.m4a").await.unwrap();
        let record = store.get_record(&path, "t", "rec.m4a").await.unwrap().unwrap();
        assert!(record.task_id.is_none());
        assert!(!StateStore::is_eligible(Some(&record)));
    }

    #[tokio::test]
    async fn test_mark_complete_failure_and_broken() {
        let dir = TempDir::new().unwrap();
        let path = note(&dir, "![[rec.m4a]]\n");
        let store = store(&dir);

        let mut failed = ProcessResult::failed(ProcessingStatus::Failed, "exit 1");
        failed.retry_count = 1;
        store
            .mark_complete(&path, "t", "rec.m4a", &failed, RecordDetails::default())
            .await
            .unwrap();
        let record = store.get_record(&path, "t", "rec.m4a").await.unwrap().unwrap();
        assert_eq!(record.status, ProcessingStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("exit 1"));

        store
            .mark_broken(&path, "t", "rec.m4a", "Processing failed after 3 attempts", 3, 10)
            .await
            .unwrap();
        assert!(!store.should_process(&path, "t", "rec.m4a").await.unwrap());

        assert!(store.reset(&path, "t", "rec.m4a").await.unwrap());
        assert!(!store.reset(&path, "t", "rec.m4a").await.unwrap());
        assert!(store.should_process(&path, "t", "rec.m4a").await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_complete_records_details() {
        let dir = TempDir::new().unwrap();
        let path = note(&dir, "![[rec.m4a]]\n");
        let store = store(&dir);

        let mut result = ProcessResult::succeeded("Transcribed rec.m4a", None);
        result.duration_ms = 2500;
        result.retry_count = 1;
        let details = RecordDetails {
            transcript_length: Some(42),
            model: Some("whisper-1".into()),
            language: Some("en".into()),
        };
        store.mark_complete(&path, "t", "rec.m4a", &result, details).await.unwrap();

        let record = store.get_record(&path, "t", "rec.m4a").await.unwrap().unwrap();
        assert_eq!(record.processing_time, 2.5);
        assert_eq!(record.transcript_length, Some(42));
        assert_eq!(record.language.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn test_concurrent_updates_same_note_are_serialized() {
        let dir = TempDir::new().unwrap();
        let path = note(&dir, "body\n");
        let store = Arc::new(store(&dir));

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                let record = ProcessingRecord::new(ProcessingStatus::Completed, "");
                store
                    .update_record(&path, "t", &format!("a{}.m4a", i), &record)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.note_records(&path).await.unwrap().len(), 16);
        assert!(store.locks.lock().unwrap().is_empty());
        assert_eq!(frontmatter::parse(&std::fs::read_to_string(&path).unwrap()).1, "body\n");
    }

    #[tokio::test]
    async fn test_malformed_frontmatter_write_keeps_original_lines() {
        let dir = TempDir::new().unwrap();
        let path = note(&dir, "---\ntags: [unclosed\n---\n![[rec.m4a]]\n");
        let store = store(&dir);

        assert!(store.should_process(&path, "t", "rec.m4a").await.unwrap());
        store
            .update_record(&path, "t", "rec.m4a", &ProcessingRecord::new(ProcessingStatus::Completed, ""))
            .await
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("# tags: [unclosed"));
        assert!(text.ends_with("---\n![[rec.m4a]]\n"));
        assert!(!store.should_process(&path, "t", "rec.m4a").await.unwrap());
    }

    #[tokio::test]
    async fn test_edit_body_keeps_header_bytes() {
        let dir = TempDir::new().unwrap();
        let header = "---\ntitle:   spaced   \n# comment\n---\n";
        let path = note(&dir, &format!("{}old body", header));
        let store = store(&dir);

        assert!(store
            .edit_body(&path, |body| Some(body.replace("old", "new")))
            .await
            .unwrap());
        assert!(!store.edit_body(&path, |_| None).await.unwrap());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            format!("{}new body", header)
        );
    }

    #[tokio::test]
    async fn test_clear_broken_and_cleanup() {
        let dir = TempDir::new().unwrap();
        let path = note(&dir, "---\nbroken_recordings: [old.m4a]\n---\n![[a.m4a]]\n");
        let store = store(&dir);
        store
            .mark_broken(&path, "t", "a.m4a", "bad", 3, 0)
            .await
            .unwrap();

        assert_eq!(store.clear_broken(&path).await.unwrap(), 2);
        assert!(store.should_process(&path, "t", "a.m4a").await.unwrap());
        assert!(store.should_process(&path, "t", "old.m4a").await.unwrap());
        assert_eq!(store.clear_broken(&path).await.unwrap(), 0);

        let mut stale = ProcessingRecord::new(ProcessingStatus::Completed, "");
        stale.updated_at = "2020-01-01T00:00:00Z".into();
        store.update_record(&path, "t", "gone.m4a", &stale).await.unwrap();
        let removed = store
            .cleanup_old_states(&path, 30, &["a.m4a".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_write_to_missing_note_is_state_write_error() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let missing = dir.path().join("missing.md");

        let err = store.mark_start(&missing, "t", "a.m4a", 1).await.unwrap_err();
        assert!(matches!(err, Error::StateWrite(_)));
        assert!(!err.is_retryable());
        let err = store.edit_body(&missing, |b| Some(b.to_string())).await.unwrap_err();
        assert!(matches!(err, Error::StateWrite(_)));
        assert!(store.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_note_is_error() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let result = store
            .should_process(&dir.path().join("missing.md"), "t", "a.m4a")
            .await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
