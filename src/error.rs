//! Error types for Frameline.

use thiserror::Error;

/// Result type alias using Frameline's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Frameline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A collaborator failed to initialize. Fatal to the owning task.
    #[error("setup failed: {0}")]
    Setup(String),

    /// A collaborator call failed mid-stream. Fatal to the owning task.
    #[error("processing failed: {0}")]
    Process(String),

    /// Teardown failed. Logged by the caller, never reopens a terminal
    /// task outcome.
    #[error("release failed: {0}")]
    Release(String),

    /// An accounting invariant was broken: unknown frame returned,
    /// reentrant command submission, double-set cell. Unrecoverable
    /// programming error.
    #[error("pipeline consistency violated: {0}")]
    Consistency(String),

    /// A timed wait expired before the value was available.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
