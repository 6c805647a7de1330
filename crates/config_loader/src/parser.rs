//! Configuration parsing
//!
//! TOML is the primary format, JSON is accepted too.

use contracts::{ContractError, CoreConfig};

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML (recommended)
    Toml,
    Json,
}

impl ConfigFormat {
    /// Infer the format from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn parse_toml(content: &str) -> Result<CoreConfig, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse_json(content: &str) -> Result<CoreConfig, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse(content: &str, format: ConfigFormat) -> Result<CoreConfig, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{PayloadKind, StreamKind};

    #[test]
    fn test_parse_toml_minimal() {
        let content = r#"
[syncer]
max_frame_queue_size = 3

[[streams]]
name = "depth"
stream_kind = "depth"
fps = 30.0
metadata = true
"#;
        let result = parse_toml(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.syncer.max_frame_queue_size, 3);
        // unspecified fields keep their defaults
        assert_eq!(config.syncer.max_md_queue_size, 8);
        assert_eq!(config.dispatcher.queue_capacity, 10);
        assert_eq!(config.streams.len(), 1);
        assert_eq!(config.streams[0].stream_kind, StreamKind::Depth);
        assert!(config.streams[0].metadata);
    }

    #[test]
    fn test_parse_json_minimal() {
        let content = r#"{
            "frame_source": { "frame_queue_size": 4 },
            "streams": [{
                "name": "color",
                "stream_kind": "color",
                "payload_kind": "video",
                "fps": 15.0,
                "width": 320,
                "height": 240,
                "bytes_per_pixel": 3
            }]
        }"#;
        let result = parse_json(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.frame_source.frame_queue_size, 4);
        assert_eq!(config.streams[0].payload_kind, Some(PayloadKind::Video));
        assert_eq!(config.streams[0].frame_size(), 320 * 240 * 3);
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let result = parse_toml("invalid toml [[[");
        assert!(matches!(result, Err(ContractError::ConfigParse { .. })));
    }

    #[test]
    fn test_parse_unknown_stream_kind() {
        let content = r#"
[[streams]]
name = "x"
stream_kind = "thermal"
fps = 30.0
"#;
        assert!(parse_toml(content).is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_extension("toml"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("TOML"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("json"),
            Some(ConfigFormat::Json)
        );
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
