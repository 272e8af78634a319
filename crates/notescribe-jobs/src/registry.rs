//! Registry of configured operations.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use notescribe_core::{Config, ConfigError, Error, ProcessorConfig, ProcessorKind, Result};
use tracing::{debug, info};

use crate::adapters::{RemoteTaskProcessor, ScriptProcessor, WhisperProcessor};
use crate::processor::{Operation, Processor};

/// Operations by name, iterated in name order.
#[derive(Default)]
pub struct ProcessorRegistry {
    operations: BTreeMap<String, Arc<Operation>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every enabled processor in the configuration.
    ///
    /// Fails on the first processor whose settings are incomplete, so a bad
    /// configuration stops the run before any note is scanned.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        for (name, processor) in config.enabled_processors() {
            registry.register(Self::build_operation(name, processor, config)?);
        }
        for (name, _) in config.processors.iter().filter(|(_, p)| !p.enabled) {
            debug!(operation = %name, "Processor disabled, skipping");
        }
        info!(operations = ?registry.names(), "Processor registry ready");
        Ok(registry)
    }

    /// Build one operation from its configuration entry.
    pub fn build_operation(
        name: &str,
        processor: &ProcessorConfig,
        config: &Config,
    ) -> Result<Operation> {
        let timeout = Duration::from_secs(config.timeout_for(processor));
        let named = |e: Error| match e {
            Error::Config(reason) => Error::from(ConfigError::Processor {
                name: name.to_string(),
                reason,
            }),
            other => other,
        };
        let variant = match processor.kind {
            ProcessorKind::Script => Processor::Script(
                ScriptProcessor::new(processor.settings(name)?, config.vault_path.clone())
                    .map_err(named)?,
            ),
            ProcessorKind::CustomApi => Processor::RemoteTask(
                RemoteTaskProcessor::new(processor.settings(name)?).map_err(named)?,
            ),
            ProcessorKind::Whisper => Processor::Whisper(
                WhisperProcessor::new(processor.settings(name)?, timeout).map_err(named)?,
            ),
        };
        Ok(Operation::new(name, variant)
            .with_timeout(timeout)
            .with_retry_attempts(config.retry_attempts_for(processor)))
    }

    /// Add an operation, replacing one with the same name.
    pub fn register(&mut self, operation: Operation) {
        debug!(operation = %operation.name, kind = %operation.processor.kind(), "Registered processor");
        self.operations
            .insert(operation.name.clone(), Arc::new(operation));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Operation>> {
        self.operations.get(name)
    }

    pub fn operations(&self) -> impl Iterator<Item = &Arc<Operation>> {
        self.operations.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.operations.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> Config {
        Config::from_yaml_str(yaml).unwrap()
    }

    #[test]
    fn test_registry_new_is_empty() {
        let registry = ProcessorRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get("transcribe").is_none());
    }

    #[test]
    fn test_from_config_builds_enabled_processors() {
        let cfg = config(
            r#"
vault_path: /tmp
processing:
  timeout: 120
  retry_attempts: 2
processors:
  transcribe:
    type: custom_api
    timeout: 600
    config:
      api_url: http://localhost:9000/transcribe
  archive:
    type: script
    retry_attempts: 5
    config:
      command: echo {audio_file}
  cloud:
    type: whisper
    enabled: false
"#,
        );
        let registry = ProcessorRegistry::from_config(&cfg).unwrap();
        assert_eq!(registry.names(), vec!["archive", "transcribe"]);

        let transcribe = registry.get("transcribe").unwrap();
        assert_eq!(transcribe.processor.kind(), ProcessorKind::CustomApi);
        assert_eq!(transcribe.timeout, Duration::from_secs(600));
        assert_eq!(transcribe.retry_attempts, 2);

        let archive = registry.get("archive").unwrap();
        assert_eq!(archive.processor.kind(), ProcessorKind::Script);
        assert_eq!(archive.timeout, Duration::from_secs(120));
        assert_eq!(archive.retry_attempts, 5);
    }

    #[test]
    fn test_missing_required_setting_fails_fast() {
        let cfg = config(
            r#"
processors:
  transcribe:
    type: custom_api
    config:
      model: whisper-large
"#,
        );
        let err = ProcessorRegistry::from_config(&cfg).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("transcribe"));
        assert!(err.to_string().contains("api_url"));
    }

    #[test]
    fn test_script_without_command_fails_fast() {
        let cfg = config("processors:\n  run:\n    type: script\n");
        assert!(matches!(
            ProcessorRegistry::from_config(&cfg),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_unknown_processor_type_is_rejected_by_config() {
        assert!(Config::from_yaml_str("processors:\n  x:\n    type: telepathy\n").is_err());
    }
}
