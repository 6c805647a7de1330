//! `validate` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::CoreConfig;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    stream_count: usize,
    synced_stream_count: usize,
    dispatcher_queue_capacity: usize,
    frame_queue_size: u32,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(core) => {
            let warnings = collect_warnings(&core);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(ConfigSummary {
                    version: format!("{:?}", core.version),
                    stream_count: core.streams.len(),
                    synced_stream_count: core.streams.iter().filter(|s| s.metadata).count(),
                    dispatcher_queue_capacity: core.dispatcher.queue_capacity,
                    frame_queue_size: core.frame_source.frame_queue_size,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(core: &CoreConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if core.streams.is_empty() {
        warnings.push("No streams configured - `run` has nothing to capture".to_string());
    }

    if core.frame_source.frame_queue_size == 0 {
        warnings.push("frame_source.frame_queue_size is 0 - every frame will be refused".to_string());
    }

    if core.syncer.max_frame_queue_size == 0 {
        warnings.push(
            "syncer.max_frame_queue_size is 0 - frames are delivered without waiting for metadata"
                .to_string(),
        );
    }

    if !core.streams.is_empty() && core.streams.iter().all(|s| !s.metadata) {
        warnings.push("No stream uses synced metadata - the metadata syncer is idle".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!(
                "  Streams: {} ({} synced)",
                summary.stream_count, summary.synced_stream_count
            );
            println!("  Dispatcher queue: {}", summary.dispatcher_queue_capacity);
            println!("  Frame queue size: {}", summary.frame_queue_size);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
