//! Error types for decision tree storage and building

use thiserror::Error;

/// Errors that can occur while allocating, building or storing trees
#[derive(Error, Debug)]
pub enum DtreeError {
    /// Bad size, position, id, or a second allocation of an allocated store
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No free slot for a child pair or its sibling reservation
    #[error("Capacity exhausted: {0}")]
    CapacityExhausted(String),

    /// Parent is not a split node, tree table is absent, or slot already written
    #[error("Invalid tree state: {0}")]
    InvalidTreeState(String),

    /// The system allocator refused an arena chunk
    #[error("Allocation failure: could not allocate {bytes} bytes")]
    AllocationFailure { bytes: usize },

    /// Configuration could not be parsed or is unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for tree operations
pub type Result<T> = std::result::Result<T, DtreeError>;
