//! Crash-safe file replacement.
//!
//! Content is written to a sibling temporary file, flushed to disk, and then
//! renamed over the target. The rename is the only commit point: a reader
//! sees either the old bytes or the new bytes, never a mix.

use std::path::{Path, PathBuf};

use notescribe_core::Result;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// A fully written temporary file waiting to replace `target`.
///
/// Dropping it without [`commit`](StagedWrite::commit) removes the
/// temporary file and leaves the target untouched.
#[derive(Debug)]
pub struct StagedWrite {
    target: PathBuf,
    temp: PathBuf,
    done: bool,
}

impl StagedWrite {
    /// Write `content` to a temporary file next to `target` and sync it.
    pub async fn stage(target: &Path, content: &[u8]) -> Result<Self> {
        let temp = temp_path(target);
        let mut staged = Self {
            target: target.to_path_buf(),
            temp,
            done: false,
        };

        let mut file = fs::File::create(&staged.temp).await.map_err(|e| {
            warn!(temp_path = %staged.temp.display(), error = %e, "atomic: File::create failed");
            e
        })?;
        file.write_all(content).await.map_err(|e| {
            warn!(temp_path = %staged.temp.display(), error = %e, "atomic: write_all failed");
            e
        })?;
        file.sync_all().await?;
        drop(file);

        if let Ok(meta) = fs::metadata(target).await {
            fs::set_permissions(&staged.temp, meta.permissions()).await?;
        }

        Ok(staged)
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Rename the temporary file over the target.
    pub async fn commit(mut self) -> Result<()> {
        fs::rename(&self.temp, &self.target).await.map_err(|e| {
            warn!(
                from = %self.temp.display(),
                to = %self.target.display(),
                error = %e,
                "atomic: rename failed"
            );
            e
        })?;
        self.done = true;
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.done {
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}

/// Replace `target` with `content` atomically.
pub async fn write_atomic(target: &Path, content: &[u8]) -> Result<()> {
    StagedWrite::stage(target, content).await?.commit().await
}

fn temp_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn leftovers(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".tmp"))
            .collect()
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_content() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("note.md");
        std::fs::write(&target, "old").unwrap();

        write_atomic(&target, b"new").await.unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "new");
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_crash_before_rename_leaves_original() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("note.md");
        std::fs::write(&target, "original bytes").unwrap();

        let staged = StagedWrite::stage(&target, b"replacement").await.unwrap();
        let temp = staged.temp_path().to_path_buf();
        // Simulate the process dying: no commit, no cleanup.
        std::mem::forget(staged);

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "original bytes");
        assert_eq!(std::fs::read_to_string(&temp).unwrap(), "replacement");
    }

    #[tokio::test]
    async fn test_abandoned_stage_cleans_up() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("note.md");
        std::fs::write(&target, "original").unwrap();

        let staged = StagedWrite::stage(&target, b"replacement").await.unwrap();
        drop(staged);

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "original");
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_commit_after_stage_is_complete() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("note.md");
        std::fs::write(&target, "original").unwrap();

        let staged = StagedWrite::stage(&target, b"complete new content").await.unwrap();
        staged.commit().await.unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "complete new content");
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_stage_failure_in_missing_directory() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("missing/note.md");
        assert!(write_atomic(&target, b"x").await.is_err());
    }

    #[test]
    fn test_temp_path_is_hidden_sibling() {
        let temp = temp_path(Path::new("/vault/daily/note.md"));
        assert_eq!(temp.parent(), Some(Path::new("/vault/daily")));
        let name = temp.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".note.md."));
        assert!(name.ends_with(".tmp"));
    }
}
