//! Script processor: runs a shell command per attachment.
//!
//! The command template may use `{audio_file}`, `{note_file}` and
//! `{vault_path}`. The same values are exported as `AUDIO_FILE`,
//! `NOTE_FILE` and `VAULT_PATH` for scripts that prefer the environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use notescribe_core::{defaults, Error, ProcessorEvent, Result};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::processor::{Attempt, Outcome};

/// `config:` block of a `script` processor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptSettings {
    #[serde(default)]
    pub command: String,
    /// Extra environment variables for the command.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

pub struct ScriptProcessor {
    command: String,
    env: BTreeMap<String, String>,
    vault_root: PathBuf,
}

impl ScriptProcessor {
    pub fn new(settings: ScriptSettings, vault_root: impl Into<PathBuf>) -> Result<Self> {
        if settings.command.trim().is_empty() {
            return Err(Error::Config(
                "command is required for script processors".to_string(),
            ));
        }
        Ok(Self {
            command: settings.command,
            env: settings.env,
            vault_root: vault_root.into(),
        })
    }

    /// Fill the placeholders of the command template.
    pub fn render_command(&self, audio_file: &Path, note_file: &Path) -> String {
        self.command
            .replace("{audio_file}", &audio_file.to_string_lossy())
            .replace("{note_file}", &note_file.to_string_lossy())
            .replace("{vault_path}", &self.vault_root.to_string_lossy())
    }

    pub async fn execute(&self, attempt: &Attempt<'_>) -> Result<Outcome> {
        let rendered = self.render_command(&attempt.attachment.path, attempt.note);
        let mut cmd = shell(&rendered);
        cmd.current_dir(&self.vault_root)
            .envs(&self.env)
            .env(defaults::ENV_VAULT_PATH, &self.vault_root)
            .env("AUDIO_FILE", &attempt.attachment.path)
            .env("NOTE_FILE", attempt.note)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(
            operation = attempt.operation,
            note = attempt.note_display,
            attachment = %attempt.attachment.filename,
            command = %rendered,
            "Running script"
        );
        let start = Instant::now();
        let output = cmd
            .output()
            .await
            .map_err(|e| Error::Operation(format!("Failed to execute command: {}", e)))?;
        let duration_ms = start.elapsed().as_millis() as u64;

        if let Some(bus) = attempt.events {
            bus.emit(ProcessorEvent::ScriptExecuted {
                operation: attempt.operation.to_string(),
                exit_code: output.status.code(),
                duration_ms,
            });
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            warn!(
                operation = attempt.operation,
                attachment = %attempt.attachment.filename,
                exit = %output.status,
                duration_ms,
                "Script failed"
            );
            return Err(Error::Operation(if stderr.is_empty() {
                format!("Command failed ({})", output.status)
            } else {
                format!("Command failed ({}): {}", output.status, stderr)
            }));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Outcome {
            message: format!("Successfully processed {}", attempt.attachment.filename),
            output: (!stdout.is_empty()).then_some(stdout),
            ..Default::default()
        })
    }
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(not(windows))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}
