//! Central error handling for the tile residency manager.
//!
//! Provides a unified ResidencyError enum with consistent categorization
//! for allocator, mapping and feedback failures.

/// Centralized error type for all residency operations
#[derive(thiserror::Error, Debug)]
pub enum ResidencyError {
    /// The heap pool has fewer free slots than a request requires.
    #[error("Heap exhausted: requested {requested} slots, {free} free of {capacity}")]
    HeapExhausted {
        requested: usize,
        free: usize,
        capacity: usize,
    },

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Feedback error: {0}")]
    Feedback(String),

    #[error("Surface error: {0}")]
    Surface(String),
}

impl ResidencyError {
    /// Convenience constructors for common error types
    pub fn mapping<T: ToString>(msg: T) -> Self {
        ResidencyError::Mapping(msg.to_string())
    }

    pub fn feedback<T: ToString>(msg: T) -> Self {
        ResidencyError::Feedback(msg.to_string())
    }

    pub fn surface<T: ToString>(msg: T) -> Self {
        ResidencyError::Surface(msg.to_string())
    }
}

/// Result type alias for residency operations
pub type ResidencyResult<T> = Result<T, ResidencyError>;
