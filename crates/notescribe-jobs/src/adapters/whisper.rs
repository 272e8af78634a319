//! Whisper processor: synchronous OpenAI-compatible transcription.

use std::sync::Arc;
use std::time::Duration;

use notescribe_core::{defaults, Error, Result};
use notescribe_inference::{resolve_language, TranscriptionBackend, WhisperBackend};
use serde::Deserialize;
use tracing::debug;

use crate::processor::{Attempt, Outcome};

/// `config:` block of a `whisper` processor.
#[derive(Debug, Clone, Deserialize)]
pub struct WhisperSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Falls back to `OPENAI_API_KEY`. Self-hosted servers often need none.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub prompt: Option<String>,
}

fn default_base_url() -> String {
    defaults::WHISPER_BASE_URL.to_string()
}

fn default_model() -> String {
    defaults::WHISPER_MODEL.to_string()
}

fn default_language() -> String {
    defaults::LANGUAGE_AUTO.to_string()
}

pub struct WhisperProcessor {
    backend: Arc<dyn TranscriptionBackend>,
    language: String,
}

impl WhisperProcessor {
    pub fn new(settings: WhisperSettings, timeout: Duration) -> Result<Self> {
        if settings.base_url.trim().is_empty() {
            return Err(Error::Config("base_url must not be empty".to_string()));
        }
        let api_key = settings
            .api_key
            .or_else(|| std::env::var(defaults::ENV_OPENAI_API_KEY).ok());
        let backend = WhisperBackend::new(settings.base_url, settings.model)
            .with_api_key(api_key)
            .with_temperature(settings.temperature)
            .with_prompt(settings.prompt)
            .with_timeout_secs(timeout.as_secs().max(1));
        Ok(Self::with_backend(Arc::new(backend), settings.language))
    }

    /// Processor over any transcription backend.
    pub fn with_backend(backend: Arc<dyn TranscriptionBackend>, language: impl Into<String>) -> Self {
        Self {
            backend,
            language: language.into(),
        }
    }

    pub async fn execute(&self, attempt: &Attempt<'_>) -> Result<Outcome> {
        let attachment = attempt.attachment;
        let language = resolve_language(Some(&self.language), &attachment.filename);
        let data = tokio::fs::read(&attachment.path).await?;

        debug!(
            operation = attempt.operation,
            attachment = %attachment.filename,
            bytes = data.len(),
            language = language.as_deref().unwrap_or(defaults::LANGUAGE_AUTO),
            "Transcribing attachment"
        );
        let result = self
            .backend
            .transcribe(data, &attachment.filename, language.as_deref())
            .await?;
        if result.text.is_empty() {
            return Err(Error::Operation(format!(
                "empty transcription for {}",
                attachment.filename
            )));
        }

        Ok(Outcome::transcribed(
            &attachment.filename,
            result.text,
            Some(self.backend.model_name().to_string()),
            result.language.or(language),
        ))
    }
}
