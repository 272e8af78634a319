//! Client for remote asynchronous transcription tasks.
//!
//! The protocol has three endpoints:
//!
//! - `POST {api_url}/async` accepts a multipart upload and answers with a
//!   task id (`task_id` or `id`).
//! - `GET {origin}/tasks/{id}` reports the task status.
//! - `GET {origin}/tasks/{id}/result` returns the finished transcription.
//!
//! Polling is resumable: a caller that persisted the task id after
//! [`RemoteTaskClient::submit`] can call [`RemoteTaskClient::wait_for_result`]
//! again after a restart instead of uploading the file a second time.

use std::path::Path;
use std::time::Duration;

use notescribe_core::{defaults, Error, Result};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::transcription::mime_for_file;

// =============================================================================
// TASK STATE
// =============================================================================

/// Remote task status, normalised from the server's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// `pending`, `running`, `processing` or `queued`.
    InFlight(String),
    /// `completed`, `success` or `done`.
    Completed,
    /// `failed` or `error`, with the server's message.
    Failed(String),
    /// Anything else. Polling continues.
    Unknown(String),
}

impl TaskState {
    /// Interpret a status response body.
    pub fn from_response(body: &Value) -> Self {
        let status = body
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_lowercase();
        match status.as_str() {
            "completed" | "success" | "done" => Self::Completed,
            "failed" | "error" => {
                let message = ["error", "error_message", "message"]
                    .iter()
                    .find_map(|key| body.get(*key).and_then(Value::as_str))
                    .filter(|m| !m.is_empty())
                    .unwrap_or("Task failed");
                Self::Failed(message.to_string())
            }
            "pending" | "running" | "processing" | "queued" => Self::InFlight(status),
            _ => Self::Unknown(status),
        }
    }
}

// =============================================================================
// POLL SCHEDULE
// =============================================================================

/// Delay between status polls: starts at `initial`, multiplied by `factor`
/// after each poll, never above `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSchedule {
    pub initial: Duration,
    pub factor: f64,
    pub max: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs_f64(defaults::POLL_INITIAL_SECS),
            factor: defaults::POLL_BACKOFF_FACTOR,
            max: Duration::from_secs_f64(defaults::POLL_MAX_SECS),
        }
    }
}

impl PollSchedule {
    /// Schedule from seconds, as written in processor settings.
    pub fn from_secs(initial: f64, max: f64) -> Self {
        let initial = Duration::from_secs_f64(initial.max(0.0));
        Self {
            initial,
            factor: defaults::POLL_BACKOFF_FACTOR,
            max: Duration::from_secs_f64(max.max(0.0)).max(initial),
        }
    }

    /// Delay following `current`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.factor.max(1.0)).min(self.max)
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Form fields sent with a task submission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskRequest {
    pub model: Option<String>,
    pub language: Option<String>,
    pub prompt: Option<String>,
}

/// HTTP client for one remote task service.
#[derive(Debug, Clone)]
pub struct RemoteTaskClient {
    submit_url: String,
    origin: String,
    api_key: Option<String>,
    schedule: PollSchedule,
    request_timeout: Duration,
    client: reqwest::Client,
}

impl RemoteTaskClient {
    /// Client for the service at `api_url`. Submissions go to `api_url`
    /// with `/async` appended unless it already ends that way; status and
    /// result endpoints live at the URL's origin.
    pub fn new(api_url: &str, api_key: Option<String>) -> Result<Self> {
        let parsed = reqwest::Url::parse(api_url)
            .map_err(|e| Error::Config(format!("invalid api_url '{}': {}", api_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "api_url '{}' must use http or https",
                api_url
            )));
        }

        let trimmed = api_url.trim_end_matches('/');
        let submit_url = if trimmed.ends_with("/async") {
            trimmed.to_string()
        } else {
            format!("{}/async", trimmed)
        };

        Ok(Self {
            submit_url,
            origin: parsed.origin().ascii_serialization(),
            api_key: api_key.filter(|k| !k.is_empty()),
            schedule: PollSchedule::default(),
            request_timeout: Duration::from_secs(defaults::HTTP_REQUEST_TIMEOUT_SECS),
            client: reqwest::Client::new(),
        })
    }

    pub fn with_poll_schedule(mut self, schedule: PollSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn submit_url(&self) -> &str {
        &self.submit_url
    }

    pub fn status_url(&self, task_id: &str) -> String {
        format!("{}/tasks/{}", self.origin, task_id)
    }

    pub fn result_url(&self, task_id: &str) -> String {
        format!("{}/tasks/{}/result", self.origin, task_id)
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url).timeout(self.request_timeout);
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Upload an audio file and return the task id the server assigned.
    pub async fn submit(&self, audio: &Path, request: &TaskRequest) -> Result<String> {
        let file_name = audio
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidInput(format!("not a file: {}", audio.display())))?
            .to_string();
        let data = tokio::fs::read(audio).await?;

        let file_part = reqwest::multipart::Part::bytes(data)
            .file_name(file_name.clone())
            .mime_str(mime_for_file(&file_name))
            .map_err(|e| Error::Internal(format!("Failed to create multipart: {}", e)))?;

        let mut form = reqwest::multipart::Form::new().part("file", file_part);
        if let Some(model) = &request.model {
            form = form.text("model", model.clone());
        }
        if let Some(language) = &request.language {
            form = form.text("language", language.clone());
        }
        if let Some(prompt) = &request.prompt {
            form = form.text("prompt", prompt.clone());
        }
        form = form.text("output_format", "json");

        let mut builder = self
            .client
            .post(&self.submit_url)
            .multipart(form)
            .timeout(self.request_timeout);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        info!(url = %self.submit_url, file_name = %file_name, "Submitting remote task");
        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Request(format!("HTTP {}: {}", status, body)));
        }

        let body: Value = response.json().await?;
        task_id_from(&body).ok_or_else(|| {
            Error::Operation(format!("submission response carries no task id: {}", body))
        })
    }

    /// Query the status of a task once.
    ///
    /// A 404 means the server no longer knows the task and is reported as
    /// [`Error::NotFound`]. Other non-success codes are request errors.
    pub async fn status(&self, task_id: &str) -> Result<TaskState> {
        let response = self.get(&self.status_url(task_id)).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("remote task {}", task_id)));
        }
        if !status.is_success() {
            return Err(Error::Request(format!(
                "status check for task {} returned HTTP {}",
                task_id, status
            )));
        }
        let body: Value = response.json().await?;
        Ok(TaskState::from_response(&body))
    }

    /// Fetch the transcription of a completed task.
    pub async fn result(&self, task_id: &str) -> Result<String> {
        let response = self.get(&self.result_url(task_id)).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Request(format!(
                "Failed to get result: HTTP {} - {}",
                status, body
            )));
        }
        let body: Value = response.json().await?;
        ["transcription", "text", "result"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .filter(|text| !text.trim().is_empty())
            .map(|text| text.trim().to_string())
            .ok_or_else(|| Error::Operation(format!("no transcription found in result: {}", body)))
    }

    /// Poll until the task reaches a terminal state, then fetch its result.
    ///
    /// Transient failures (network errors, unexpected HTTP codes, unknown
    /// statuses) are logged and polling continues. Fails with
    /// [`Error::Timeout`] once `budget` has elapsed, [`Error::NotFound`] when
    /// the server forgets the task and [`Error::Operation`] when the task
    /// failed remotely.
    pub async fn wait_for_result(&self, task_id: &str, budget: Duration) -> Result<String> {
        let started = Instant::now();
        let deadline = started + budget;
        let mut delay = self.schedule.initial;

        loop {
            match self.status(task_id).await {
                Ok(TaskState::Completed) => {
                    debug!(
                        task_id,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Remote task completed"
                    );
                    return self.result(task_id).await;
                }
                Ok(TaskState::Failed(message)) => {
                    return Err(Error::Operation(format!("Transcription failed: {}", message)));
                }
                Ok(TaskState::InFlight(status)) => {
                    debug!(task_id, status = %status, "Task still running");
                }
                Ok(TaskState::Unknown(status)) => {
                    warn!(task_id, status = %status, "Unknown task status");
                }
                Err(e @ Error::NotFound(_)) => return Err(e),
                Err(e) => {
                    warn!(task_id, error = %e, "Error checking task status");
                }
            }

            let now = Instant::now();
            if now + delay >= deadline {
                let remaining = deadline.saturating_duration_since(now);
                tokio::time::sleep(remaining).await;
                return Err(Error::Timeout(budget.as_secs()));
            }
            tokio::time::sleep(delay).await;
            delay = self.schedule.next_delay(delay);
        }
    }
}

/// Task id from a submission response, as a string even when numeric.
fn task_id_from(body: &Value) -> Option<String> {
    ["task_id", "id"]
        .iter()
        .filter_map(|key| body.get(*key))
        .find_map(|value| match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_schedule() -> PollSchedule {
        PollSchedule {
            initial: Duration::from_millis(10),
            factor: 1.2,
            max: Duration::from_millis(20),
        }
    }

    fn audio_file(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("memo_en.m4a");
        std::fs::write(&path, b"audio bytes").unwrap();
        path
    }

    #[test]
    fn test_endpoints_derive_from_api_url() {
        let client = RemoteTaskClient::new("http://whisper.local:8080/v1/transcribe", None).unwrap();
        assert_eq!(client.submit_url(), "http://whisper.local:8080/v1/transcribe/async");
        assert_eq!(client.status_url("t1"), "http://whisper.local:8080/tasks/t1");
        assert_eq!(client.result_url("t1"), "http://whisper.local:8080/tasks/t1/result");

        let client = RemoteTaskClient::new("https://api.example.com/transcribe/async/", None).unwrap();
        assert_eq!(client.submit_url(), "https://api.example.com/transcribe/async");
    }

    #[test]
    fn test_invalid_api_url_is_config_error() {
        assert!(matches!(
            RemoteTaskClient::new("not a url", None),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            RemoteTaskClient::new("ftp://host/x", None),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_task_state_vocabulary() {
        for s in ["completed", "success", "DONE"] {
            assert_eq!(TaskState::from_response(&json!({"status": s})), TaskState::Completed);
        }
        for s in ["pending", "running", "processing", "queued"] {
            assert!(matches!(
                TaskState::from_response(&json!({"status": s})),
                TaskState::InFlight(_)
            ));
        }
        assert_eq!(
            TaskState::from_response(&json!({"status": "error", "error_message": "bad audio"})),
            TaskState::Failed("bad audio".to_string())
        );
        assert_eq!(
            TaskState::from_response(&json!({"status": "failed"})),
            TaskState::Failed("Task failed".to_string())
        );
        assert_eq!(
            TaskState::from_response(&json!({"status": "paused"})),
            TaskState::Unknown("paused".to_string())
        );
    }

    #[test]
    fn test_poll_schedule_grows_to_cap() {
        let schedule = PollSchedule::default();
        let mut delay = schedule.initial;
        assert_eq!(delay, Duration::from_secs(2));
        delay = schedule.next_delay(delay);
        assert_eq!(delay, Duration::from_millis(2400));
        for _ in 0..20 {
            delay = schedule.next_delay(delay);
        }
        assert_eq!(delay, Duration::from_secs(10));
    }

    #[test]
    fn test_task_id_from_response() {
        assert_eq!(task_id_from(&json!({"task_id": "abc"})), Some("abc".to_string()));
        assert_eq!(task_id_from(&json!({"id": 42})), Some("42".to_string()));
        assert_eq!(task_id_from(&json!({"task_id": "", "id": "x"})), Some("x".to_string()));
        assert_eq!(task_id_from(&json!({"status": "queued"})), None);
    }

    #[tokio::test]
    async fn test_submit_returns_task_id() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/transcribe/async"))
            .and(header("authorization", "Bearer secret"))
            .and(body_string_contains("output_format"))
            .and(body_string_contains("whisper-base"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": "task-1"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = RemoteTaskClient::new(
            &format!("{}/v1/transcribe", mock_server.uri()),
            Some("secret".to_string()),
        )
        .unwrap();
        let request = TaskRequest {
            model: Some("whisper-base".to_string()),
            ..Default::default()
        };

        let task_id = client.submit(&audio_file(&dir), &request).await.unwrap();
        assert_eq!(task_id, "task-1");
    }

    #[tokio::test]
    async fn test_submit_without_task_id_fails() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/async"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "sync answer"})))
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = RemoteTaskClient::new(&mock_server.uri(), None).unwrap();
        let err = client
            .submit(&audio_file(&dir), &TaskRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Operation(_)));
    }

    #[tokio::test]
    async fn test_wait_polls_until_completed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "completed"})))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/t1/result"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"transcription": " Hello there. "})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = RemoteTaskClient::new(&format!("{}/v1", mock_server.uri()), None)
            .unwrap()
            .with_poll_schedule(fast_schedule());
        let text = client.wait_for_result("t1", Duration::from_secs(5)).await.unwrap();
        assert_eq!(text, "Hello there.");
    }

    #[tokio::test]
    async fn test_wait_reports_remote_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/t2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "failed", "error": "corrupt file"})),
            )
            .mount(&mock_server)
            .await;

        let client = RemoteTaskClient::new(&mock_server.uri(), None)
            .unwrap()
            .with_poll_schedule(fast_schedule());
        let err = client.wait_for_result("t2", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::Operation(_)));
        assert!(err.to_string().contains("corrupt file"));
    }

    #[tokio::test]
    async fn test_wait_unknown_task_is_not_found() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = RemoteTaskClient::new(&mock_server.uri(), None)
            .unwrap()
            .with_poll_schedule(fast_schedule());
        let err = client.wait_for_result("gone", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_wait_survives_server_errors_then_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/slow"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let client = RemoteTaskClient::new(&mock_server.uri(), None)
            .unwrap()
            .with_poll_schedule(fast_schedule());
        let err = client
            .wait_for_result("slow", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_result_without_text_fails() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/t3/result"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"segments": []})))
            .mount(&mock_server)
            .await;

        let client = RemoteTaskClient::new(&mock_server.uri(), None).unwrap();
        assert!(matches!(client.result("t3").await, Err(Error::Operation(_))));
    }
}
