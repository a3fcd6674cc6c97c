// Error handling for the binding layer

use thiserror::Error;

/// Binding error types
///
/// Runtime failures inside the engine (format errors, stream errors) are
/// reported through state and events instead.
#[derive(Debug, Error)]
pub enum Error {
    /// A required argument was missing or empty
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// The engine handed back a null handle, or the handle was released
    #[error("Invalid or released native handle")]
    InvalidHandle,

    /// The engine instance could not be created
    #[error("Engine initialization failed: {0}")]
    EngineInit(String),

    /// Waiting for an engine notification timed out
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for binding operations
pub type Result<T> = std::result::Result<T, Error>;
