//! Configuration model and YAML loader.
//!
//! Configuration is read from a YAML file located by [`Config::discover`]:
//! - an explicit path (an error if it does not exist)
//! - `<vault>/.obsidian/obsidian-postprocessor.yaml`
//! - `./config.yaml`
//!
//! `${VAR}` and `$VAR` references are expanded from the environment before
//! parsing. Unknown variables are left as written.
//!
//! # Example
//!
//! ```yaml
//! vault_path: ~/Notes
//! processors:
//!   transcribe:
//!     type: custom_api
//!     config:
//!       api_url: http://localhost:8000/transcribe
//!       api_key: ${TRANSCRIBE_API_KEY}
//! ```

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::defaults;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid processor type: {0}")]
    InvalidProcessorType(String),

    #[error("Processor '{name}': {reason}")]
    Processor { name: String, reason: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<ConfigError> for crate::Error {
    fn from(e: ConfigError) -> Self {
        crate::Error::Config(e.to_string())
    }
}

// =============================================================================
// PROCESSORS
// =============================================================================

/// Kind of operation a processor runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorKind {
    /// Shell command template.
    Script,
    /// Remote asynchronous task server (submit, poll, fetch result).
    CustomApi,
    /// OpenAI-compatible synchronous transcription endpoint.
    Whisper,
}

impl FromStr for ProcessorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "script" => Ok(Self::Script),
            "custom_api" => Ok(Self::CustomApi),
            "whisper" => Ok(Self::Whisper),
            _ => Err(ConfigError::InvalidProcessorType(s.to_string())),
        }
    }
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script => write!(f, "script"),
            Self::CustomApi => write!(f, "custom_api"),
            Self::Whisper => write!(f, "whisper"),
        }
    }
}

/// One named operation as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(rename = "type")]
    pub kind: ProcessorKind,
    /// Type-specific settings, decoded by the job crate.
    #[serde(default)]
    pub config: serde_yaml::Value,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-attempt timeout in seconds; falls back to `processing.timeout`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Attempt budget; falls back to `processing.retry_attempts`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
}

impl ProcessorConfig {
    pub fn new(kind: ProcessorKind, config: serde_yaml::Value) -> Self {
        Self {
            kind,
            config,
            enabled: true,
            timeout: None,
            retry_attempts: None,
        }
    }

    /// Decode the type-specific settings block. A missing block decodes as an
    /// empty mapping so settings types with all-default fields still load.
    pub fn settings<T: DeserializeOwned>(&self, name: &str) -> ConfigResult<T> {
        let value = match &self.config {
            serde_yaml::Value::Null => serde_yaml::Value::Mapping(Default::default()),
            other => other.clone(),
        };
        serde_yaml::from_value(value).map_err(|e| ConfigError::Processor {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}

fn default_true() -> bool {
    true
}

// =============================================================================
// PROCESSING / LOGGING
// =============================================================================

/// Execution defaults shared by every processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub concurrency_limit: usize,
    pub retry_attempts: u32,
    /// Base retry delay in seconds.
    pub retry_delay: f64,
    /// Retry delay cap in seconds.
    pub max_retry_delay: f64,
    /// Per-attempt timeout in seconds.
    pub timeout: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: defaults::CONCURRENCY_LIMIT,
            retry_attempts: defaults::RETRY_ATTEMPTS,
            retry_delay: defaults::RETRY_BASE_DELAY_SECS,
            max_retry_delay: defaults::RETRY_MAX_DELAY_SECS,
            timeout: defaults::OPERATION_TIMEOUT_SECS,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    #[serde(alias = "structured")]
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            format: LogFormat::Text,
        }
    }
}

/// Severity used when frontmatter cannot be parsed cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrontmatterErrorLevel {
    Debug,
    Info,
    #[default]
    #[serde(alias = "warn")]
    Warning,
    Error,
    Critical,
    /// Suppress frontmatter diagnostics entirely.
    Silent,
}

// =============================================================================
// CONFIG
// =============================================================================

/// Fully resolved configuration handed to the vault and job crates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub vault_path: PathBuf,
    pub exclude_patterns: Vec<String>,
    pub attachment_extensions: Vec<String>,
    pub frontmatter_error_level: FrontmatterErrorLevel,
    pub namespace: String,
    pub processors: BTreeMap<String, ProcessorConfig>,
    pub processing: ProcessingConfig,
    pub logging: LoggingConfig,
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vault_path: PathBuf::new(),
            exclude_patterns: defaults::EXCLUDE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            attachment_extensions: defaults::AUDIO_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            frontmatter_error_level: FrontmatterErrorLevel::default(),
            namespace: defaults::NAMESPACE.to_string(),
            processors: BTreeMap::new(),
            processing: ProcessingConfig::default(),
            logging: LoggingConfig::default(),
            dry_run: false,
        }
    }
}

impl Config {
    /// Locate and load the configuration file.
    pub fn load(explicit: Option<&Path>, vault_hint: Option<&Path>) -> ConfigResult<Self> {
        let path = Self::discover(explicit, vault_hint)?;
        info!(path = %path.display(), "Loading configuration");
        Self::from_file(&path)
    }

    /// Resolve the configuration file path using the documented search order.
    pub fn discover(explicit: Option<&Path>, vault_hint: Option<&Path>) -> ConfigResult<PathBuf> {
        if let Some(path) = explicit {
            if path.is_file() {
                return Ok(path.to_path_buf());
            }
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let mut candidates = Vec::new();
        if let Some(vault) = vault_hint {
            candidates.push(
                vault
                    .join(defaults::OBSIDIAN_DIR)
                    .join(defaults::VAULT_CONFIG_FILE),
            );
        }
        candidates.push(PathBuf::from(defaults::LOCAL_CONFIG_FILE));

        for candidate in &candidates {
            if candidate.is_file() {
                return Ok(candidate.clone());
            }
            debug!(path = %candidate.display(), "Config candidate not present");
        }

        Err(ConfigError::NotFound(
            candidates
                .iter()
                .map(|c| c.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        ))
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration text after environment expansion.
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let expanded = Self::substitute_env_vars(content);
        if expanded.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut config: Config = serde_yaml::from_str(&expanded)?;
        if config.vault_path.as_os_str().is_empty() {
            if let Ok(vault) = env::var(defaults::ENV_VAULT_PATH) {
                config.vault_path = PathBuf::from(vault);
            }
        }
        config.vault_path = expand_home(&config.vault_path);
        Ok(config)
    }

    /// Check the configuration, reporting every problem at once.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut problems = Vec::new();

        if self.vault_path.as_os_str().is_empty() {
            problems.push("vault_path is required".to_string());
        } else if !self.vault_path.is_dir() {
            problems.push(format!(
                "vault_path does not exist or is not a directory: {}",
                self.vault_path.display()
            ));
        }

        if self.processing.concurrency_limit == 0 {
            problems.push("processing.concurrency_limit must be at least 1".to_string());
        }
        if self.processing.timeout == 0 {
            problems.push("processing.timeout must be positive".to_string());
        }
        if self.processing.retry_delay < 0.0 || self.processing.max_retry_delay < 0.0 {
            problems.push("processing retry delays must not be negative".to_string());
        }

        let level = self.logging.level.to_lowercase();
        if !["trace", "debug", "info", "warn", "warning", "error"].contains(&level.as_str()) {
            problems.push(format!("logging.level is invalid: {}", self.logging.level));
        }

        for pattern in &self.exclude_patterns {
            if let Err(e) = glob::Pattern::new(pattern) {
                problems.push(format!("invalid exclude pattern '{}': {}", pattern, e));
            }
        }

        if self.attachment_extensions.is_empty() {
            problems.push("attachment_extensions must not be empty".to_string());
        }

        for (name, processor) in &self.processors {
            if processor.timeout == Some(0) {
                problems.push(format!("processor '{}': timeout must be positive", name));
            }
            if !processor.config.is_null() && !processor.config.is_mapping() {
                problems.push(format!("processor '{}': config must be a mapping", name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(problems.join("; ")))
        }
    }

    /// Enabled processors in name order.
    pub fn enabled_processors(&self) -> impl Iterator<Item = (&String, &ProcessorConfig)> {
        self.processors.iter().filter(|(_, p)| p.enabled)
    }

    pub fn timeout_for(&self, processor: &ProcessorConfig) -> u64 {
        processor.timeout.unwrap_or(self.processing.timeout)
    }

    /// Attempt budget for a processor, never below one.
    pub fn retry_attempts_for(&self, processor: &ProcessorConfig) -> u32 {
        processor
            .retry_attempts
            .unwrap_or(self.processing.retry_attempts)
            .max(1)
    }

    /// Replace `${VAR}` and `$VAR` with environment values.
    pub fn substitute_env_vars(content: &str) -> String {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
                .expect("env var pattern is valid")
        });
        re.replace_all(content, |caps: &regex::Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            env::var(name).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string()
    }
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}
