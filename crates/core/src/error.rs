//! Batch error types

use thiserror::Error;

/// Batch result type
pub type Result<T> = std::result::Result<T, PoaError>;

/// Batch error types
#[derive(Debug, Error)]
pub enum PoaError {
    // Capacity limits (recoverable)
    #[error("Maximum POAs already added to batch (max {max_poas})")]
    CapacityExceeded { max_poas: usize },

    #[error("Inserted sequence of length {len} is not shorter than maximum sequence size {max}")]
    SequenceTooLong { len: usize, max: usize },

    #[error("Number of sequences in POA would reach the limit of {max}")]
    TooManySequences { max: usize },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // GPU errors
    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("Graph capacity exceeded in window {window}: needs {needed} nodes, capacity {capacity}")]
    GraphOverflow {
        window: usize,
        needed: usize,
        capacity: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PoaError {
    /// Capacity errors leave the batch fully usable; the caller can flush
    /// the current batch or retry with smaller input.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PoaError::CapacityExceeded { .. }
                | PoaError::SequenceTooLong { .. }
                | PoaError::TooManySequences { .. }
        )
    }

    /// Device, allocation and configuration failures. A batch that hit one of
    /// these must not be used again.
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }
}
