//! `info` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::CoreConfig;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    dispatcher: DispatcherInfo,
    syncer: SyncerInfo,
    frame_source: FrameSourceInfo,
    stream_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    streams: Vec<StreamInfo>,
}

#[derive(Serialize)]
struct DispatcherInfo {
    queue_capacity: usize,
    poll_timeout_ms: u64,
    flush_timeout_ms: u64,
}

#[derive(Serialize)]
struct SyncerInfo {
    max_frame_queue_size: usize,
    max_md_queue_size: usize,
}

#[derive(Serialize)]
struct FrameSourceInfo {
    frame_queue_size: u32,
    recycle_age_ms: u64,
    flush_timeout_ms: u64,
    payload_kinds: Vec<String>,
}

#[derive(Serialize)]
struct StreamInfo {
    name: String,
    key: String,
    fps: f64,
    width: u32,
    height: u32,
    frame_size: usize,
    synced_metadata: bool,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let core = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&core, args.streams);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&core, args.streams);
    }

    Ok(())
}

fn build_config_info(core: &CoreConfig, with_streams: bool) -> ConfigInfo {
    let streams = if with_streams {
        core.streams
            .iter()
            .map(|s| StreamInfo {
                name: s.name.clone(),
                key: s.key().to_string(),
                fps: s.fps,
                width: s.width,
                height: s.height,
                frame_size: s.frame_size(),
                synced_metadata: s.metadata,
            })
            .collect()
    } else {
        Vec::new()
    };

    ConfigInfo {
        version: format!("{:?}", core.version),
        dispatcher: DispatcherInfo {
            queue_capacity: core.dispatcher.queue_capacity,
            poll_timeout_ms: core.dispatcher.poll_timeout_ms,
            flush_timeout_ms: core.dispatcher.flush_timeout_ms,
        },
        syncer: SyncerInfo {
            max_frame_queue_size: core.syncer.max_frame_queue_size,
            max_md_queue_size: core.syncer.max_md_queue_size,
        },
        frame_source: FrameSourceInfo {
            frame_queue_size: core.frame_source.frame_queue_size,
            recycle_age_ms: core.frame_source.recycle_age_ms,
            flush_timeout_ms: core.frame_source.flush_timeout_ms,
            payload_kinds: core
                .frame_source
                .supported_payloads()
                .iter()
                .map(|p| p.to_string())
                .collect(),
        },
        stream_count: core.streams.len(),
        streams,
    }
}

fn print_config_info(core: &CoreConfig, with_streams: bool) {
    println!("=== depthcore Configuration ===\n");

    println!("Version: {:?}", core.version);

    println!("\nDispatcher");
    println!("   Queue capacity: {}", core.dispatcher.queue_capacity);
    println!("   Poll timeout:   {} ms", core.dispatcher.poll_timeout_ms);
    println!("   Flush timeout:  {} ms", core.dispatcher.flush_timeout_ms);

    println!("\nMetadata Syncer");
    println!("   Max frame queue:    {}", core.syncer.max_frame_queue_size);
    println!("   Max metadata queue: {}", core.syncer.max_md_queue_size);

    let payloads: Vec<String> = core
        .frame_source
        .supported_payloads()
        .iter()
        .map(|p| p.to_string())
        .collect();
    println!("\nFrame Source");
    println!("   Frame queue size: {}", core.frame_source.frame_queue_size);
    println!("   Recycle age:      {} ms", core.frame_source.recycle_age_ms);
    println!("   Flush timeout:    {} ms", core.frame_source.flush_timeout_ms);
    println!("   Payload kinds:    {}", payloads.join(", "));

    println!("\nStreams ({})", core.streams.len());
    if with_streams {
        for stream in &core.streams {
            println!(
                "   - {} [{}] {}x{}x{} @ {} fps, {} bytes/frame{}",
                stream.name,
                stream.key(),
                stream.width,
                stream.height,
                stream.bytes_per_pixel,
                stream.fps,
                stream.frame_size(),
                if stream.metadata { ", synced metadata" } else { "" }
            );
        }
    }
    println!();
}
