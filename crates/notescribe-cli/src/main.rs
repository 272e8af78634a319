//! notescribe: transcribe and post-process voice memos embedded in an
//! Obsidian vault.
//!
//! Processing state lives in each note's frontmatter, so every command can
//! be re-run safely: completed attachments are skipped and interrupted remote
//! tasks resume where they left off.

mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use notescribe_core::{
    defaults, Config, ConfigError, EventBus, MetricsCollector, RunSummary, VaultStatus,
};
use notescribe_jobs::{ProcessorRegistry, VaultProcessor};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "notescribe")]
#[command(author, version, about = "Post-process voice memos in an Obsidian vault")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (default: <vault>/.obsidian/obsidian-postprocessor.yaml, then ./config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Vault directory; overrides `vault_path` and `VAULT_PATH`
    #[arg(long, global = true)]
    vault: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every eligible attachment in the vault
    Run {
        /// Report what would run without running it or writing notes
        #[arg(long)]
        dry_run: bool,

        /// Process only this note (vault-relative path)
        #[arg(long)]
        note: Option<PathBuf>,

        /// Print Prometheus metrics for the run
        #[arg(long)]
        metrics: bool,
    },

    /// Show processing state across the vault
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reset processing records of a note to pending
    Reset {
        /// Vault-relative path of the note
        note: PathBuf,

        /// Operation to reset (default: every enabled processor)
        #[arg(short, long)]
        operation: Option<String>,

        /// Attachment file name (default: every attachment in the note)
        #[arg(short, long)]
        attachment: Option<String>,
    },

    /// Remove failed and broken records so they are retried
    ClearBroken {
        /// Only this note (vault-relative path)
        note: Option<PathBuf>,
    },

    /// Prune old completed/failed records and records of removed attachments
    Cleanup {
        /// Age in days after which records are pruned
        #[arg(long, default_value_t = defaults::STATE_MAX_AGE_DAYS)]
        max_age_days: i64,
    },

    /// Print the resolved configuration with secrets masked
    Config,

    /// Check the configuration and every enabled processor
    Validate,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    let _log_guard = logging::init(&config.logging, cli.verbose);
    info!(
        vault = %config.vault_path.display(),
        processors = config.processors.len(),
        "Configuration loaded"
    );

    match run(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Discover and load the configuration, then apply command-line overrides.
fn load_config(cli: &Cli) -> Result<Config> {
    let vault = cli.vault.clone().or_else(|| {
        std::env::var_os(defaults::ENV_VAULT_PATH)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    });

    let mut config = match Config::load(cli.config.as_deref(), vault.as_deref()) {
        Ok(config) => config,
        Err(ConfigError::NotFound(searched)) if cli.config.is_none() && vault.is_some() => {
            eprintln!("No configuration file found (searched {}); using defaults", searched);
            Config::default()
        }
        Err(e) => return Err(e).context("failed to load configuration"),
    };

    if let Some(dir) = &cli.vault {
        config.vault_path = dir.clone();
    } else if config.vault_path.as_os_str().is_empty() {
        if let Some(dir) = vault {
            config.vault_path = dir;
        }
    }
    Ok(config)
}

async fn run(command: Commands, mut config: Config) -> Result<ExitCode> {
    match command {
        Commands::Config => {
            print!("{}", serde_yaml::to_string(&redacted(&config))?);
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Validate => {
            config.validate()?;
            let registry = ProcessorRegistry::from_config(&config)?;
            println!("Configuration OK");
            println!("  vault: {}", config.vault_path.display());
            println!("  processors: {}", registry.names().join(", "));
            return Ok(ExitCode::SUCCESS);
        }
        _ => config.validate().context("invalid configuration")?,
    }

    match command {
        Commands::Run {
            dry_run,
            note,
            metrics,
        } => {
            config.dry_run |= dry_run;
            let bus = EventBus::default();
            let collector = metrics.then(|| {
                let collector = Arc::new(MetricsCollector::new());
                let handle = collector.spawn(&bus);
                (collector, handle)
            });

            let processor = VaultProcessor::new(&config, bus)?;
            let summary = match note {
                Some(note) => processor.process_note(&note).await?,
                None => processor.run().await?,
            };
            // Dropping the last bus sender lets the collector drain and stop.
            drop(processor);

            print_summary(&summary);
            if let Some((collector, handle)) = collector {
                handle.await.context("metrics collector stopped unexpectedly")?;
                print!("{}", collector.render_prometheus());
            }
            Ok(if summary.failed > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Commands::Status { json } => {
            let processor = VaultProcessor::new(&config, EventBus::default())?;
            let status = processor.vault_status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Reset {
            note,
            operation,
            attachment,
        } => {
            let processor = VaultProcessor::new(&config, EventBus::default())?;
            let reset = processor
                .reset(&note, operation.as_deref(), attachment.as_deref())
                .await?;
            println!("Reset {} record(s) in {}", reset, note.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::ClearBroken { note } => {
            let processor = VaultProcessor::new(&config, EventBus::default())?;
            let cleared = processor.clear_broken(note.as_deref()).await?;
            println!("Cleared {} failed/broken record(s)", cleared);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Cleanup { max_age_days } => {
            let processor = VaultProcessor::new(&config, EventBus::default())?;
            let removed = processor.cleanup_old_states(max_age_days).await?;
            println!(
                "Removed {} record(s) older than {} day(s) or for removed attachments",
                removed, max_age_days
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config | Commands::Validate => Ok(ExitCode::SUCCESS),
    }
}

/// Copy of `config` with credential-like processor settings masked.
fn redacted(config: &Config) -> Config {
    let mut config = config.clone();
    for processor in config.processors.values_mut() {
        let Some(settings) = processor.config.as_mapping_mut() else {
            continue;
        };
        for (key, value) in settings.iter_mut() {
            let secret = key
                .as_str()
                .map(|k| k.contains("key") || k.contains("token") || k.contains("secret"))
                .unwrap_or(false);
            if secret && !value.is_null() {
                *value = serde_yaml::Value::String("********".to_string());
            }
        }
    }
    config
}

fn print_summary(summary: &RunSummary) {
    let prefix = if summary.dry_run { "[dry run] " } else { "" };
    println!(
        "{}Scanned {} note(s), {} with attachments",
        prefix, summary.notes_scanned, summary.notes_with_attachments
    );
    println!(
        "{}Attachments: {} found, {} missing, {} eligible",
        prefix, summary.attachments_found, summary.attachments_missing, summary.eligible
    );
    if !summary.dry_run {
        println!(
            "Processed {}, failed {} in {:.1}s",
            summary.newly_processed,
            summary.failed,
            summary.duration_ms as f64 / 1000.0
        );
    }
    for e in &summary.errors {
        println!("  ! {}", e);
    }
}

fn print_status(status: &VaultStatus) {
    println!(
        "Notes: {} ({} with attachments)",
        status.notes, status.notes_with_attachments
    );
    println!(
        "Attachments: {} ({} missing)",
        status.attachments, status.attachments_missing
    );
    println!("Awaiting processing: {}", status.unprocessed);
    for (state, count) in &status.by_status {
        println!("  {:<11} {}", state.as_str(), count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "notescribe",
            "--vault",
            "/tmp/vault",
            "run",
            "--dry-run",
            "--note",
            "daily/today.md",
        ])
        .unwrap();
        assert_eq!(cli.vault, Some(PathBuf::from("/tmp/vault")));
        match cli.command {
            Commands::Run {
                dry_run,
                note,
                metrics,
            } => {
                assert!(dry_run);
                assert!(!metrics);
                assert_eq!(note, Some(PathBuf::from("daily/today.md")));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_reset_and_cleanup() {
        let cli = Cli::try_parse_from([
            "notescribe",
            "reset",
            "memo.md",
            "-o",
            "transcribe",
            "-a",
            "rec.m4a",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Reset { ref operation, ref attachment, .. }
                if operation.as_deref() == Some("transcribe")
                    && attachment.as_deref() == Some("rec.m4a")
        ));

        let cli = Cli::try_parse_from(["notescribe", "cleanup"]).unwrap();
        assert!(matches!(cli.command, Commands::Cleanup { max_age_days: 30 }));
    }

    #[test]
    fn test_explicit_missing_config_is_an_error() {
        let cli = Cli::try_parse_from([
            "notescribe",
            "--config",
            "/nonexistent/notescribe.yaml",
            "status",
        ])
        .unwrap();
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn test_vault_flag_overrides_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("config.yaml");
        std::fs::write(&file, "vault_path: /somewhere/else\n").unwrap();
        let cli = Cli::try_parse_from([
            "notescribe",
            "--config",
            file.to_str().unwrap(),
            "--vault",
            dir.path().to_str().unwrap(),
            "validate",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.vault_path, dir.path());
    }

    #[test]
    fn test_redacted_masks_credentials() {
        let config = Config::from_yaml_str(
            "processors:\n  t:\n    type: whisper\n    config:\n      api_key: sk-live\n      model: whisper-1\n",
        )
        .unwrap();
        let yaml = serde_yaml::to_string(&redacted(&config)).unwrap();
        assert!(!yaml.contains("sk-live"));
        assert!(yaml.contains("whisper-1"));
        assert!(yaml.contains("********"));
    }
}
