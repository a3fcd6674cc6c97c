// Error handling for the media engine

use thiserror::Error;

/// Engine error types
///
/// These never cross the C ABI; `abi` maps them to status codes.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Failed to open or probe a media source
    #[error("Load error: {0}")]
    Load(String),

    /// Media format not supported
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Decoding error
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// Playback error
    #[error("Playback error: {0}")]
    Playback(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The job was abandoned (parse stopped, player stopped)
    #[error("Operation cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata sidecar could not be encoded or decoded
    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
