//! Configuration validation
//!
//! Rules:
//! - field ranges declared on the config types (`validator` derive)
//! - stream names unique
//! - stream keys unique (one archive per key)
//! - fps > 0 and finite
//! - max_md_queue_size >= 1
//! - stream payload kinds accepted by the frame source

use std::collections::HashSet;

use contracts::{ContractError, CoreConfig};
use validator::Validate;

/// Validate a parsed configuration
///
/// Returns the first error found.
pub fn validate(config: &CoreConfig) -> Result<(), ContractError> {
    config
        .validate()
        .map_err(|e| ContractError::config_validation("config", e.to_string()))?;

    validate_syncer(config)?;
    validate_stream_names(config)?;
    validate_stream_keys(config)?;
    validate_stream_rates(config)?;
    validate_payloads(config)?;
    Ok(())
}

fn validate_syncer(config: &CoreConfig) -> Result<(), ContractError> {
    if config.syncer.max_md_queue_size == 0 {
        return Err(ContractError::config_validation(
            "syncer.max_md_queue_size",
            "max_md_queue_size must be >= 1",
        ));
    }
    Ok(())
}

fn validate_stream_names(config: &CoreConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for stream in &config.streams {
        if !seen.insert(stream.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("streams[name={}]", stream.name),
                "duplicate stream name",
            ));
        }
    }
    Ok(())
}

fn validate_stream_keys(config: &CoreConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for stream in &config.streams {
        let key = stream.key();
        if !seen.insert(key) {
            return Err(ContractError::config_validation(
                format!("streams[{}]", stream.name),
                format!("duplicate stream key {key}"),
            ));
        }
    }
    Ok(())
}

fn validate_stream_rates(config: &CoreConfig) -> Result<(), ContractError> {
    for stream in &config.streams {
        if !stream.fps.is_finite() || stream.fps <= 0.0 {
            return Err(ContractError::config_validation(
                format!("streams[{}].fps", stream.name),
                format!("fps must be > 0, got {}", stream.fps),
            ));
        }
    }
    Ok(())
}

fn validate_payloads(config: &CoreConfig) -> Result<(), ContractError> {
    let supported = config.frame_source.supported_payloads();
    for stream in &config.streams {
        let key = stream.key();
        if !supported.contains(&key.payload) {
            return Err(ContractError::config_validation(
                format!("streams[{}].payload_kind", stream.name),
                format!("payload {} not enabled in frame_source.payload_kinds", key.payload),
            ));
        }
    }
    Ok(())
}
