//! Error types for SIMS mesh operations
//!
//! One taxonomy covers the codec, the router, the queues and the phone
//! bridge. Most of these conditions are only counted in statistics; the
//! router surfaces errors to callers on user-initiated sends alone.

use thiserror::Error;

/// Failure reported by the radio abstraction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// The radio is busy (transmitting or in a state that cannot accept a packet)
    #[error("Radio busy")]
    Busy,

    /// The radio failed to transmit or receive
    #[error("Radio failure: {0}")]
    Failure(String),
}

/// Main error type for SIMS mesh operations
#[derive(Error, Debug)]
pub enum MeshError {
    // ===== Codec Errors =====
    /// Payload exceeds the inline frame limit
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// A codec writer ran out of room
    #[error("Buffer overflow: need {needed} bytes, {available} available")]
    BufferOverflow {
        /// Bytes the write required
        needed: usize,
        /// Bytes left in the buffer
        available: usize,
    },

    /// A codec reader failed (truncation, impossible length, bad enum value)
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    // ===== Transport Errors =====
    /// The radio refused or failed a transmission
    #[error("Transmit failed: {0}")]
    TransmitFailed(#[from] RadioError),

    // ===== Queue / Bridge Errors =====
    /// A bounded queue was full
    #[error("Queue full (capacity {capacity})")]
    QueueFull {
        /// Queue capacity
        capacity: usize,
    },

    /// The bridge received a phone packet before the handshake completed
    #[error("Bridge not in ready state")]
    NotInReadyState,

    // ===== Configuration / Storage Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Parameter storage failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MeshError {
    /// Errors that are counted in statistics and never surfaced to callers
    pub fn is_counted_only(&self) -> bool {
        matches!(
            self,
            MeshError::MalformedFrame(_) | MeshError::QueueFull { .. } | MeshError::NotInReadyState
        )
    }

    /// Check if the caller may simply retry the operation
    pub fn is_retriable(&self) -> bool {
        matches!(self, MeshError::TransmitFailed(RadioError::Busy))
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            MeshError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            MeshError::BufferOverflow { .. } => "BUFFER_OVERFLOW",
            MeshError::MalformedFrame(_) => "MALFORMED_FRAME",
            MeshError::TransmitFailed(RadioError::Busy) => "RADIO_BUSY",
            MeshError::TransmitFailed(RadioError::Failure(_)) => "RADIO_FAILURE",
            MeshError::QueueFull { .. } => "QUEUE_FULL",
            MeshError::NotInReadyState => "NOT_IN_READY_STATE",
            MeshError::InvalidConfig(_) => "INVALID_CONFIG",
            MeshError::Storage(_) => "STORAGE_ERROR",
            MeshError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for mesh operations
pub type Result<T> = std::result::Result<T, MeshError>;
