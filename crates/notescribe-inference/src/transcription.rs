//! Transcription backend trait and the OpenAI-compatible Whisper client.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use notescribe_core::{defaults, Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Result of a synchronous transcription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptionResult {
    /// Full transcribed text.
    pub text: String,
    /// Language reported by the backend (ISO 639-1 code).
    pub language: Option<String>,
    /// Audio duration in seconds, when reported.
    pub duration_secs: Option<f64>,
}

/// Backend that turns audio bytes into text in a single request.
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Transcribe audio data. `file_name` is sent with the upload so the
    /// server can infer the container format.
    async fn transcribe(
        &self,
        audio_data: Vec<u8>,
        file_name: &str,
        language: Option<&str>,
    ) -> Result<TranscriptionResult>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// MIME type for an audio file, from its extension.
pub fn mime_for_file(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "m4a" => "audio/mp4",
        "webm" => "audio/webm",
        _ => "application/octet-stream",
    }
}

/// OpenAI-compatible Whisper backend (also works with Speaches and
/// faster-whisper-server).
pub struct WhisperBackend {
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: Option<f32>,
    prompt: Option<String>,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl WhisperBackend {
    /// `base_url` includes the API version segment, e.g.
    /// `https://api.openai.com/v1`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            temperature: None,
            prompt: None,
            client: reqwest::Client::new(),
            timeout_secs: defaults::OPERATION_TIMEOUT_SECS,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_prompt(mut self, prompt: Option<String>) -> Self {
        self.prompt = prompt.filter(|p| !p.is_empty());
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url)
    }
}

/// Whisper API response (`verbose_json` adds language and duration).
#[derive(Deserialize)]
struct WhisperResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

#[async_trait]
impl TranscriptionBackend for WhisperBackend {
    async fn transcribe(
        &self,
        audio_data: Vec<u8>,
        file_name: &str,
        language: Option<&str>,
    ) -> Result<TranscriptionResult> {
        let url = self.endpoint();

        let file_part = reqwest::multipart::Part::bytes(audio_data)
            .file_name(file_name.to_string())
            .mime_str(mime_for_file(file_name))
            .map_err(|e| Error::Internal(format!("Failed to create multipart: {}", e)))?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");

        if let Some(lang) = language {
            form = form.text("language", lang.to_string());
        }
        if let Some(temperature) = self.temperature {
            form = form.text("temperature", temperature.to_string());
        }
        if let Some(prompt) = &self.prompt {
            form = form.text("prompt", prompt.clone());
        }

        let mut request = self
            .client
            .post(&url)
            .multipart(form)
            .timeout(Duration::from_secs(self.timeout_secs));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!(url = %url, model = %self.model, file_name, "Sending transcription request");
        let response = request
            .send()
            .await
            .map_err(|e| Error::Request(format!("Transcription request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Request(format!(
                "Whisper API returned {}: {}",
                status, body
            )));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            Error::Serialization(format!("Failed to parse whisper response: {}", e))
        })?;

        Ok(TranscriptionResult {
            text: result.text.trim().to_string(),
            language: result.language,
            duration_secs: result.duration,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
