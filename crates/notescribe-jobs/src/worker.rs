//! Vault run orchestration.
//!
//! A run has three parts connected by channels:
//!
//! 1. The scanner walks the vault on a blocking thread and sends each
//!    [`NoteScan`] into a bounded channel.
//! 2. The orchestrator loop takes scans and spawns one task per note with
//!    attachments, gated by a semaphore sized to `concurrency_limit`.
//!    Attachments of one note are handled sequentially inside its task.
//! 3. Each note task sends a [`NoteReport`] back over a result channel; the
//!    loop folds reports into the [`RunSummary`].
//!
//! One note failing never aborts the run.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use notescribe_core::{
    Config, Error, EventBus, ProcessingConfig, ProcessorEvent, Result, RunSummary, VaultStatus,
};
use notescribe_vault::{schema, NoteScan, StateStore, VaultContext, VaultScanner};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::engine::ExecutionEngine;
use crate::registry::ProcessorRegistry;

/// Per-note outcome sent back to the orchestrator.
#[derive(Debug, Default)]
struct NoteReport {
    eligible: usize,
    processed: usize,
    failed: usize,
    errors: Vec<String>,
}

impl NoteReport {
    fn fold_into(self, summary: &mut RunSummary) {
        summary.eligible += self.eligible;
        summary.newly_processed += self.processed;
        summary.failed += self.failed;
        summary.errors.extend(self.errors);
    }
}

fn count_scan(summary: &mut RunSummary, scan: &NoteScan) {
    summary.notes_scanned += 1;
    if scan.has_attachments() {
        summary.notes_with_attachments += 1;
    }
    summary.attachments_found += scan.attachments.len();
    summary.attachments_missing += scan.missing.len();
}

/// Runs every configured operation over a vault.
pub struct VaultProcessor {
    ctx: Arc<VaultContext>,
    scanner: Arc<VaultScanner>,
    state: Arc<StateStore>,
    engine: Arc<ExecutionEngine>,
    registry: Arc<ProcessorRegistry>,
    events: EventBus,
    concurrency: usize,
    dry_run: bool,
}

impl VaultProcessor {
    /// Build everything a run needs from the configuration. Processor
    /// settings are checked first, before the vault is touched.
    pub fn new(config: &Config, events: EventBus) -> Result<Self> {
        let registry = ProcessorRegistry::from_config(config)?;
        let ctx = Arc::new(VaultContext::from_config(config)?);
        Ok(Self::from_parts(ctx, registry, &config.processing, events)?.with_dry_run(config.dry_run))
    }

    /// Assemble from an existing context and registry.
    pub fn from_parts(
        ctx: Arc<VaultContext>,
        registry: ProcessorRegistry,
        processing: &ProcessingConfig,
        events: EventBus,
    ) -> Result<Self> {
        let scanner = Arc::new(VaultScanner::new(ctx.clone())?);
        let state = Arc::new(StateStore::new(ctx.clone()).with_events(events.clone()));
        let engine =
            Arc::new(ExecutionEngine::new(state.clone(), processing).with_events(events.clone()));
        Ok(Self {
            ctx,
            scanner,
            state,
            engine,
            registry: Arc::new(registry),
            events,
            concurrency: processing.concurrency_limit.max(1),
            dry_run: false,
        })
    }

    /// Report what would run without running anything or writing notes.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn context(&self) -> &Arc<VaultContext> {
        &self.ctx
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Process every eligible attachment in the vault.
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let vault = self.ctx.root().display().to_string();
        info!(
            vault = %vault,
            dry_run = self.dry_run,
            operations = ?self.registry.names(),
            concurrency = self.concurrency,
            "Vault run started"
        );
        if self.registry.is_empty() {
            warn!("No processors enabled; scanning only");
        }
        self.events.emit(ProcessorEvent::RunStarted {
            vault,
            dry_run: self.dry_run,
        });

        let mut summary = RunSummary {
            dry_run: self.dry_run,
            ..Default::default()
        };

        let (scan_tx, mut scan_rx) = mpsc::channel::<Result<NoteScan>>(self.concurrency * 2);
        let scanner = self.scanner.clone();
        let producer = tokio::task::spawn_blocking(move || {
            for item in scanner.scan() {
                if scan_tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });

        let (report_tx, mut report_rx) = mpsc::unbounded_channel::<NoteReport>();
        let mut report_tx = Some(report_tx);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                item = scan_rx.recv(), if report_tx.is_some() => match item {
                    Some(Ok(scan)) => {
                        count_scan(&mut summary, &scan);
                        if !scan.has_attachments() || self.registry.is_empty() {
                            continue;
                        }
                        let Some(tx) = report_tx.clone() else { continue };
                        let permit = semaphore
                            .clone()
                            .acquire_owned()
                            .await
                            .map_err(|e| Error::Internal(format!("worker pool closed: {}", e)))?;
                        let engine = self.engine.clone();
                        let registry = self.registry.clone();
                        let dry_run = self.dry_run;
                        tasks.spawn(async move {
                            let report = process_scan(&engine, &registry, &scan, dry_run).await;
                            drop(permit);
                            let _ = tx.send(report);
                        });
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Failed to scan note");
                        summary.errors.push(format!("scan: {}", e));
                    }
                    None => {
                        debug!(notes = summary.notes_scanned, "Vault scan finished");
                        report_tx = None;
                    }
                },
                Some(report) = report_rx.recv() => report.fold_into(&mut summary),
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = ?e, "Note task panicked");
                        summary.errors.push(format!("note task panicked: {}", e));
                    }
                }
                else => break,
            }
        }

        if let Err(e) = producer.await {
            error!(error = ?e, "Vault scanner panicked");
            summary.errors.push(format!("scanner panicked: {}", e));
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        self.events.emit(ProcessorEvent::RunCompleted {
            notes_scanned: summary.notes_scanned,
            newly_processed: summary.newly_processed,
            failed: summary.failed,
            duration_ms: summary.duration_ms,
        });
        info!(
            note_count = summary.notes_scanned,
            attachments = summary.attachments_found,
            missing = summary.attachments_missing,
            eligible = summary.eligible,
            processed = summary.newly_processed,
            failed = summary.failed,
            duration_ms = summary.duration_ms,
            dry_run = self.dry_run,
            "Vault run completed"
        );
        Ok(summary)
    }

    /// Process one note given by its vault-relative path.
    pub async fn process_note(&self, relative: &Path) -> Result<RunSummary> {
        let started = Instant::now();
        let scan = self.scan_one(relative).await?;

        let mut summary = RunSummary {
            dry_run: self.dry_run,
            ..Default::default()
        };
        count_scan(&mut summary, &scan);
        process_scan(&self.engine, &self.registry, &scan, self.dry_run)
            .await
            .fold_into(&mut summary);
        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            note = %scan.relative,
            eligible = summary.eligible,
            processed = summary.newly_processed,
            failed = summary.failed,
            "Note processed"
        );
        Ok(summary)
    }

    /// Count notes, attachments and record statuses without processing.
    pub async fn vault_status(&self) -> Result<VaultStatus> {
        let mut status = VaultStatus::default();
        for item in self.collect_scans().await? {
            let scan = match item {
                Ok(scan) => scan,
                Err(e) => {
                    warn!(error = %e, "Failed to scan note");
                    continue;
                }
            };
            status.notes += 1;
            status.attachments += scan.attachments.len();
            status.attachments_missing += scan.missing.len();
            if !scan.has_attachments() {
                continue;
            }
            status.notes_with_attachments += 1;

            let meta = match self.state.read_note(&scan.path).await {
                Ok(fm) => fm.metadata,
                Err(e) => {
                    warn!(note = %scan.relative, error = %e, "Failed to read note");
                    continue;
                }
            };
            for attachment in &scan.attachments {
                for operation in self.registry.operations() {
                    let record = schema::read_record(
                        &meta,
                        self.ctx.namespace(),
                        &operation.name,
                        &attachment.filename,
                    );
                    if StateStore::is_eligible(record.as_ref()) {
                        status.unprocessed += 1;
                    }
                    if let Some(record) = record {
                        *status.by_status.entry(record.status).or_insert(0) += 1;
                    }
                }
            }
        }
        Ok(status)
    }

    /// Reset records of a note to `pending`.
    ///
    /// `operation` defaults to every registered operation, `attachment` to
    /// every attachment the note embeds. Returns the number of records reset.
    pub async fn reset(
        &self,
        relative: &Path,
        operation: Option<&str>,
        attachment: Option<&str>,
    ) -> Result<usize> {
        let operations: Vec<String> = match operation {
            Some(op) => vec![op.to_string()],
            None => self.registry.names().into_iter().map(String::from).collect(),
        };
        if operations.is_empty() {
            return Err(Error::InvalidInput(
                "no operation given and no processors are enabled".to_string(),
            ));
        }

        let (path, files) = match attachment {
            Some(file) => (self.ctx.note_path(relative)?, vec![file.to_string()]),
            None => {
                let scan = self.scan_one(relative).await?;
                let files = scan.attachments.into_iter().map(|a| a.filename).collect();
                (scan.path, files)
            }
        };

        let mut reset = 0;
        for op in &operations {
            for file in &files {
                if self.state.reset(&path, op, file).await? {
                    reset += 1;
                }
            }
        }
        Ok(reset)
    }

    /// Remove `failed`/`broken` records from one note, or from every note
    /// when `relative` is `None`. Returns the number of records removed.
    pub async fn clear_broken(&self, relative: Option<&Path>) -> Result<usize> {
        if let Some(relative) = relative {
            let path = self.ctx.note_path(relative)?;
            return self.state.clear_broken(&path).await;
        }

        let scanner = self.scanner.clone();
        let notes: Vec<_> = tokio::task::spawn_blocking(move || scanner.notes().collect())
            .await
            .map_err(|e| Error::Internal(format!("vault walk panicked: {}", e)))?;
        let mut cleared = 0;
        for note in notes {
            match self.state.clear_broken(&note).await {
                Ok(n) => cleared += n,
                Err(e) => warn!(note = %self.ctx.display_path(&note), error = %e, "Failed to clear records"),
            }
        }
        info!(cleared, "Cleared failed and broken records");
        Ok(cleared)
    }

    /// Prune stale records across the vault. Returns the number removed.
    pub async fn cleanup_old_states(&self, max_age_days: i64) -> Result<usize> {
        let mut removed = 0;
        for item in self.collect_scans().await? {
            let Ok(scan) = item else { continue };
            let referenced: Vec<String> = scan
                .attachments
                .iter()
                .map(|a| a.filename.clone())
                .chain(scan.missing.iter().filter_map(|r| {
                    Path::new(r)
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                }))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            match self
                .state
                .cleanup_old_states(&scan.path, max_age_days, &referenced)
                .await
            {
                Ok(n) => removed += n,
                Err(e) => warn!(note = %scan.relative, error = %e, "Failed to prune records"),
            }
        }
        info!(removed, max_age_days, "Pruned old processing records");
        Ok(removed)
    }

    async fn scan_one(&self, relative: &Path) -> Result<NoteScan> {
        let path = self.ctx.note_path(relative)?;
        if self.scanner.is_excluded(self.ctx.relative(&path)) {
            return Err(Error::InvalidInput(format!(
                "note is excluded from processing: {}",
                relative.display()
            )));
        }
        let scanner = self.scanner.clone();
        tokio::task::spawn_blocking(move || scanner.scan_note(&path))
            .await
            .map_err(|e| Error::Internal(format!("note scan panicked: {}", e)))?
    }

    async fn collect_scans(&self) -> Result<Vec<Result<NoteScan>>> {
        let scanner = self.scanner.clone();
        tokio::task::spawn_blocking(move || scanner.scan().collect())
            .await
            .map_err(|e| Error::Internal(format!("vault scan panicked: {}", e)))
    }
}

/// Run every operation against every eligible attachment of one note.
async fn process_scan(
    engine: &ExecutionEngine,
    registry: &ProcessorRegistry,
    scan: &NoteScan,
    dry_run: bool,
) -> NoteReport {
    let mut report = NoteReport::default();
    if !scan.has_attachments() {
        return report;
    }

    let state = engine.state();
    let meta = match state.read_note(&scan.path).await {
        Ok(fm) => fm.metadata,
        Err(e) => {
            warn!(note = %scan.relative, error = %e, "Failed to read note");
            report.errors.push(format!("{}: {}", scan.relative, e));
            return report;
        }
    };
    let namespace = state.context().namespace();

    for attachment in &scan.attachments {
        for operation in registry.operations() {
            let record =
                schema::read_record(&meta, namespace, &operation.name, &attachment.filename);
            if !StateStore::is_eligible(record.as_ref()) {
                debug!(
                    note = %scan.relative,
                    operation = %operation.name,
                    attachment = %attachment.filename,
                    status = ?record.map(|r| r.status),
                    "Attachment not eligible"
                );
                continue;
            }
            report.eligible += 1;

            if dry_run {
                info!(
                    note = %scan.relative,
                    operation = %operation.name,
                    attachment = %attachment.filename,
                    "Would process attachment"
                );
                continue;
            }

            let result = engine.run(operation, &scan.path, attachment).await;
            if result.success {
                report.processed += 1;
            } else {
                report.failed += 1;
                report.errors.push(format!(
                    "{}: {}: {}",
                    scan.relative,
                    attachment.filename,
                    result.error.unwrap_or(result.message)
                ));
            }
        }
    }
    report
}
