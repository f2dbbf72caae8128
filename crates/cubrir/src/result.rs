//! Result and error types for cubrir.

use thiserror::Error;

/// Result type for cubrir operations
pub type CubrirResult<T> = Result<T, CubrirError>;

/// Errors that can occur while reflecting scripts or writing coverage data.
///
/// Programmer errors (removing an unknown hook id, usage-counter
/// underflow, dropping a multiplexer with live registrations) are not
/// represented here; they abort via panic.
#[derive(Debug, Error)]
pub enum CubrirError {
    /// The reflection routine could not be evaluated against a source file
    #[error("Reflection of {filename} failed: {message}")]
    Reflection {
        /// Source file handed to the reflection interpreter
        filename: String,
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
