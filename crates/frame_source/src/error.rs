//! Frame source error types

use contracts::{ContractError, PayloadKind, StreamKey};
use thiserror::Error;

/// Frame source errors
#[derive(Debug, Error)]
pub enum FrameSourceError {
    /// Operation before `init` (or after `reset`)
    #[error("frame source is not initialized")]
    NotInitialized,

    /// `init` called twice without `reset`
    #[error("frame source is already initialized")]
    AlreadyInitialized,

    /// Payload kind outside the supported set
    #[error("payload kind '{payload}' of {key} is not supported")]
    UnsupportedPayload { key: StreamKey, payload: PayloadKind },

    /// The archive factory failed
    #[error("failed to create archive for {key}: {message}")]
    ArchiveCreation { key: StreamKey, message: String },

    /// Option value outside its range
    #[error("invalid value {value} for option '{option}': {message}")]
    InvalidOption {
        option: &'static str,
        value: f32,
        message: String,
    },

    /// Producer thread could not be spawned
    #[error("failed to spawn producer '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl FrameSourceError {
    /// Create an unsupported payload error
    pub fn unsupported_payload(key: StreamKey) -> Self {
        Self::UnsupportedPayload {
            key,
            payload: key.payload,
        }
    }

    /// Create an archive creation error
    pub fn archive_creation(key: StreamKey, message: impl Into<String>) -> Self {
        Self::ArchiveCreation {
            key,
            message: message.into(),
        }
    }
}

impl From<FrameSourceError> for ContractError {
    fn from(err: FrameSourceError) -> Self {
        match err {
            FrameSourceError::NotInitialized
            | FrameSourceError::AlreadyInitialized
            | FrameSourceError::UnsupportedPayload { .. } => {
                ContractError::wrong_api_call_sequence(err.to_string())
            }
            FrameSourceError::ArchiveCreation { .. } => ContractError::runtime(err.to_string()),
            FrameSourceError::InvalidOption { option, .. } => {
                ContractError::invalid_value(option, err.to_string())
            }
            FrameSourceError::Spawn { source, .. } => ContractError::Io(source),
        }
    }
}

/// Frame source Result type alias
pub type Result<T> = std::result::Result<T, FrameSourceError>;
