//! Remote task processor (`type: custom_api`).
//!
//! The task id is written to the attachment's record as soon as the server
//! accepts the upload. An attempt that finds a persisted id resumes polling
//! that task instead of uploading again, which is what makes a crash or a
//! timeout mid-transcription cheap to recover from.

use notescribe_core::{defaults, Error, Result};
use notescribe_inference::{resolve_language, PollSchedule, RemoteTaskClient, TaskRequest};
use serde::Deserialize;
use tracing::{info, warn};

use crate::processor::{Attempt, Outcome};

/// `config:` block of a `custom_api` processor.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteTaskSettings {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub prompt: Option<String>,
    /// First delay between status polls, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: f64,
    /// Upper bound of the poll delay, in seconds.
    #[serde(default = "default_max_poll_interval")]
    pub max_poll_interval: f64,
}

fn default_model() -> String {
    defaults::REMOTE_TASK_MODEL.to_string()
}

fn default_language() -> String {
    defaults::LANGUAGE_AUTO.to_string()
}

fn default_poll_interval() -> f64 {
    defaults::POLL_INITIAL_SECS
}

fn default_max_poll_interval() -> f64 {
    defaults::POLL_MAX_SECS
}

pub struct RemoteTaskProcessor {
    client: RemoteTaskClient,
    model: String,
    language: String,
    prompt: Option<String>,
}

impl RemoteTaskProcessor {
    pub fn new(settings: RemoteTaskSettings) -> Result<Self> {
        let api_url = settings
            .api_url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::Config("api_url is required for custom_api processors".to_string()))?;
        let client = RemoteTaskClient::new(&api_url, settings.api_key)?.with_poll_schedule(
            PollSchedule::from_secs(settings.poll_interval, settings.max_poll_interval),
        );
        Ok(Self {
            client,
            model: settings.model,
            language: settings.language,
            prompt: settings.prompt.filter(|p| !p.is_empty()),
        })
    }

    pub fn client(&self) -> &RemoteTaskClient {
        &self.client
    }

    pub async fn execute(&self, attempt: &Attempt<'_>) -> Result<Outcome> {
        let attachment = attempt.attachment;
        let language = resolve_language(Some(&self.language), &attachment.filename);

        let task_id = match &attempt.task_id {
            Some(task_id) => {
                info!(
                    operation = attempt.operation,
                    attachment = %attachment.filename,
                    task_id = %task_id,
                    "Resuming remote task"
                );
                task_id.clone()
            }
            None => {
                let request = TaskRequest {
                    model: Some(self.model.clone()),
                    language: language.clone(),
                    prompt: self.prompt.clone(),
                };
                let task_id = self.client.submit(&attachment.path, &request).await?;
                attempt
                    .state
                    .mark_task_submitted(attempt.note, attempt.operation, &attachment.filename, &task_id)
                    .await?;
                info!(
                    operation = attempt.operation,
                    attachment = %attachment.filename,
                    task_id = %task_id,
                    "Remote task submitted"
                );
                task_id
            }
        };

        match self.client.wait_for_result(&task_id, attempt.timeout).await {
            Ok(text) => Ok(Outcome::transcribed(
                &attachment.filename,
                text,
                Some(self.model.clone()),
                language,
            )),
            Err(e @ (Error::NotFound(_) | Error::Operation(_))) => {
                // The task is gone or dead; the next attempt must upload again.
                if let Err(clear_err) = attempt
                    .state
                    .clear_task_id(attempt.note, attempt.operation, &attachment.filename)
                    .await
                {
                    warn!(
                        task_id = %task_id,
                        error = %clear_err,
                        "Failed to clear remote task id"
                    );
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
