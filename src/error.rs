//! Error types for treewire.

use thiserror::Error;

/// Main error type for all treewire operations.
#[derive(Debug, Error)]
pub enum TreewireError {
    /// Malformed wire data: unknown tag, unknown opcode, truncated buffer,
    /// or nesting beyond the configured depth guard.
    ///
    /// Fatal for the envelope being decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A mutation referenced a retired or unknown handle.
    ///
    /// Recoverable: the offending mutation is skipped, batch processing
    /// continues.
    #[error("Reference not found: {0}")]
    ReferenceNotFound(String),

    /// A remote call did not receive its result within the caller's timeout.
    #[error("Remote call timed out")]
    CallTimeout,

    /// The remote side rejected a call (the invoked function failed).
    #[error("Remote call rejected: {0}")]
    CallRejected(String),

    /// A function identifier was exported twice.
    #[error("Function already exported: {0}")]
    ExportConflict(String),

    /// Protocol error (invalid record layout, string table overflow, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The channel peer is gone.
    #[error("Channel closed")]
    ChannelClosed,
}

/// Result type alias using TreewireError.
pub type Result<T> = std::result::Result<T, TreewireError>;
