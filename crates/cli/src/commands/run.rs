//! `run` command implementation.

use anyhow::{Context, Result};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{error, info, warn};

use contracts::CoreConfig;

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let core = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    info!(
        streams = core.streams.len(),
        dispatcher_queue = core.dispatcher.queue_capacity,
        frame_queue_size = core.frame_source.frame_queue_size,
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&core);
        return Ok(());
    }

    let pipeline_config = PipelineConfig {
        core,
        max_frames: (args.max_frames > 0).then_some(args.max_frames),
        duration: (args.duration_secs > 0).then(|| Duration::from_secs(args.duration_secs)),
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
        md_jitter: Duration::from_millis(args.md_jitter_ms),
        md_loss_every: (args.md_loss_every > 0).then_some(args.md_loss_every),
    };

    let pipeline = Pipeline::new(pipeline_config);
    let shutdown = pipeline.shutdown_handle();

    info!("Starting pipeline...");

    // the pipeline blocks on its own threads; keep the runtime free for signals
    let mut task = tokio::task::spawn_blocking(move || pipeline.run());

    let joined = tokio::select! {
        joined = &mut task => joined,
        _ = shutdown_signal() => {
            warn!("Received shutdown signal, stopping pipeline...");
            shutdown.store(true, Ordering::SeqCst);
            task.await
        }
    };

    let stats = joined
        .map_err(|e| CliError::shutdown(format!("pipeline task failed: {e}")))?
        .context("Pipeline execution failed")?;

    info!(
        frames_produced = stats.frames_produced,
        frames_processed = stats.summary.total_frames,
        duration_secs = stats.duration.as_secs_f64(),
        fps = format!("{:.2}", stats.fps()),
        "Pipeline completed successfully"
    );
    stats.print_summary();

    info!("depthcore finished");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(core: &CoreConfig) {
    println!("\n=== Configuration Summary ===\n");
    println!("Dispatcher:");
    println!("  Queue capacity: {}", core.dispatcher.queue_capacity);
    println!("  Flush timeout:  {} ms", core.dispatcher.flush_timeout_ms);
    println!("\nMetadata syncer:");
    println!("  Max frame queue:    {}", core.syncer.max_frame_queue_size);
    println!("  Max metadata queue: {}", core.syncer.max_md_queue_size);
    println!("\nFrame source:");
    println!("  Frame queue size: {}", core.frame_source.frame_queue_size);

    println!("\nStreams ({}):", core.streams.len());
    for stream in &core.streams {
        println!(
            "  - {} ({}) {}x{} @ {} fps{}",
            stream.name,
            stream.key(),
            stream.width,
            stream.height,
            stream.fps,
            if stream.metadata { ", synced metadata" } else { "" }
        );
    }

    println!();
}
