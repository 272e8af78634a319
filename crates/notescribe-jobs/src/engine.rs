//! Execution engine: runs one operation against one attachment.
//!
//! Each attempt is bracketed by state writes. `mark_start` persists
//! `processing` before the processor runs; success writes the transcript
//! into the body and then `completed`; running out of attempts writes
//! `broken`. A failure to persist state ends the run for that attachment
//! immediately, since it is unclear whether the operation's side effects
//! already happened.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use notescribe_core::{
    defaults, Error, EventBus, ProcessResult, ProcessingConfig, ProcessingStatus, ProcessorEvent,
    ResolvedAttachment,
};
use notescribe_vault::{transcript, RecordDetails, StateStore};
use tracing::{error, info, instrument, warn};

use crate::processor::{Attempt, Operation, Outcome};

// =============================================================================
// RETRY POLICY
// =============================================================================

/// Attempt budget and backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles per attempt.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay before attempt `failed_attempt + 1`.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16) as i32;
        self.base_delay.mul_f64(2f64.powi(exponent)).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            defaults::RETRY_ATTEMPTS,
            Duration::from_secs_f64(defaults::RETRY_BASE_DELAY_SECS),
            Duration::from_secs_f64(defaults::RETRY_MAX_DELAY_SECS),
        )
    }
}

/// Trim command output and cap it at [`defaults::OUTPUT_MAX_CHARS`]
/// characters.
pub fn truncate_output(output: &str) -> String {
    let trimmed = output.trim();
    match trimmed.char_indices().nth(defaults::OUTPUT_MAX_CHARS) {
        Some((cut, _)) => trimmed[..cut].to_string(),
        None => trimmed.to_string(),
    }
}

// =============================================================================
// ENGINE
// =============================================================================

pub struct ExecutionEngine {
    state: Arc<StateStore>,
    events: Option<EventBus>,
    base_delay: Duration,
    max_delay: Duration,
}

impl ExecutionEngine {
    pub fn new(state: Arc<StateStore>, processing: &ProcessingConfig) -> Self {
        Self {
            state,
            events: None,
            base_delay: Duration::from_secs_f64(processing.retry_delay.max(0.0)),
            max_delay: Duration::from_secs_f64(processing.max_retry_delay.max(0.0)),
        }
    }

    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn retry_policy(&self, operation: &Operation) -> RetryPolicy {
        RetryPolicy::new(operation.retry_attempts, self.base_delay, self.max_delay)
    }

    fn emit(&self, event: ProcessorEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event);
        }
    }

    /// Run `operation` against `attachment` of `note` until it succeeds or
    /// the retry budget is spent. Never returns an error: every outcome is a
    /// [`ProcessResult`] whose status matches what was persisted.
    #[instrument(skip_all, fields(operation = %operation.name, attachment = %attachment.filename))]
    pub async fn run(
        &self,
        operation: &Operation,
        note: &Path,
        attachment: &ResolvedAttachment,
    ) -> ProcessResult {
        let job = Job {
            operation,
            note,
            display: self.state.context().display_path(note),
            attachment,
            started: Instant::now(),
        };
        let policy = self.retry_policy(operation);
        let mut last_error = String::new();
        let mut attempts = 0;

        for number in 1..=policy.max_attempts {
            attempts = number;
            let record = match self
                .state
                .mark_start(note, &operation.name, &attachment.filename, number)
                .await
            {
                Ok(record) => record,
                Err(e) => return self.state_write_failed(&job, number, e).await,
            };

            self.emit(ProcessorEvent::OperationStarted {
                operation: operation.name.clone(),
                note: job.display.clone(),
                attachment: attachment.filename.clone(),
                attempt: number,
            });

            let attempt = Attempt {
                operation: &operation.name,
                note,
                note_display: &job.display,
                attachment,
                number,
                task_id: record.task_id,
                timeout: operation.timeout,
                state: &self.state,
                events: self.events.as_ref(),
            };
            let attempt_started = Instant::now();
            let outcome =
                match tokio::time::timeout(operation.timeout, operation.processor.execute(&attempt))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(operation.timeout.as_secs())),
                };
            let attempt_ms = attempt_started.elapsed().as_millis() as u64;

            self.emit(ProcessorEvent::OperationFinished {
                operation: operation.name.clone(),
                note: job.display.clone(),
                attachment: attachment.filename.clone(),
                success: outcome.is_ok(),
                duration_ms: attempt_ms,
            });

            match outcome {
                Ok(outcome) => return self.complete(&job, number, outcome).await,
                // A processor persisting intermediate state (a remote task id)
                // could not write it; another attempt would repeat side effects.
                Err(e @ Error::StateWrite(_)) => {
                    return self.state_write_failed(&job, number, e).await
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        note = %job.display,
                        attempt = number,
                        max_attempts = policy.max_attempts,
                        duration_ms = attempt_ms,
                        error = %e,
                        "Operation attempt failed"
                    );
                    if !e.is_retryable() {
                        break;
                    }
                    if number < policy.max_attempts {
                        let delay = policy.delay_after(number);
                        info!(
                            attempt = number,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.give_up(&job, attempts, last_error).await
    }

    /// Apply a successful outcome: body first, then the `completed` record.
    async fn complete(&self, job: &Job<'_>, attempts: u32, outcome: Outcome) -> ProcessResult {
        let Outcome {
            message,
            output,
            transcript: text,
            details,
        } = outcome;
        let attachment = job.attachment;

        if let Some(text) = &text {
            let edited = self
                .state
                .edit_body(job.note, |body| {
                    let updated = transcript::insert_transcript(
                        body,
                        &attachment.reference,
                        &attachment.filename,
                        text,
                    );
                    (updated != body).then_some(updated)
                })
                .await;
            if let Err(e) = edited {
                return self.state_write_failed(job, attempts, e).await;
            }
        }

        let mut result = ProcessResult::succeeded(message, output.as_deref().map(truncate_output));
        result.retry_count = attempts;
        result.duration_ms = job.elapsed_ms();

        if let Err(e) = self
            .state
            .mark_complete(job.note, &job.operation.name, &attachment.filename, &result, details)
            .await
        {
            return self.state_write_failed(job, attempts, e).await;
        }

        self.emit(ProcessorEvent::FileProcessed {
            operation: job.operation.name.clone(),
            note: job.display.clone(),
            attachment: attachment.filename.clone(),
        });
        info!(
            note = %job.display,
            attempts,
            duration_ms = result.duration_ms,
            "Attachment processed"
        );
        result
    }

    /// Retry budget spent: persist `broken` with the last error.
    async fn give_up(&self, job: &Job<'_>, attempts: u32, last_error: String) -> ProcessResult {
        let duration_ms = job.elapsed_ms();
        let reason = format!(
            "Processing failed after {} attempt{}: {}",
            attempts,
            if attempts == 1 { "" } else { "s" },
            last_error
        );
        if let Err(e) = self
            .state
            .mark_broken(
                job.note,
                &job.operation.name,
                &job.attachment.filename,
                &reason,
                attempts,
                duration_ms,
            )
            .await
        {
            return self.state_write_failed(job, attempts, e).await;
        }

        self.emit(ProcessorEvent::FileFailed {
            operation: job.operation.name.clone(),
            note: job.display.clone(),
            attachment: job.attachment.filename.clone(),
            error: last_error.clone(),
        });
        error!(
            note = %job.display,
            attempts,
            duration_ms,
            error = %last_error,
            "Attachment marked broken"
        );

        let mut result = ProcessResult::failed(ProcessingStatus::Broken, last_error);
        result.message = reason;
        result.retry_count = attempts;
        result.duration_ms = duration_ms;
        result
    }

    /// A state write failed. The attachment counts as failed for this run
    /// and is not retried; one attempt is made to record `failed` so the
    /// next run picks it up again.
    async fn state_write_failed(&self, job: &Job<'_>, attempts: u32, e: Error) -> ProcessResult {
        let e = e.into_state_write();
        error!(
            note = %job.display,
            attempt = attempts,
            error = %e,
            "State write failed"
        );
        let mut result = ProcessResult::failed(ProcessingStatus::Failed, e.to_string());
        result.retry_count = attempts;
        result.duration_ms = job.elapsed_ms();

        if let Err(record_err) = self
            .state
            .mark_complete(
                job.note,
                &job.operation.name,
                &job.attachment.filename,
                &result,
                RecordDetails::default(),
            )
            .await
        {
            warn!(note = %job.display, error = %record_err, "Could not record failure");
        }

        self.emit(ProcessorEvent::FileFailed {
            operation: job.operation.name.clone(),
            note: job.display.clone(),
            attachment: job.attachment.filename.clone(),
            error: e.to_string(),
        });
        result
    }
}

/// The (operation, note, attachment) triple an engine run works on.
struct Job<'a> {
    operation: &'a Operation,
    note: &'a Path,
    display: String,
    attachment: &'a ResolvedAttachment,
    started: Instant,
}

impl Job<'_> {
    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}
