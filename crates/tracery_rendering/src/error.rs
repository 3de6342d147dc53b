//! # Rendering Error Types
//!
//! Every failure the GPU layer reports upward. None of them are retried here;
//! the orchestrator decides per frame whether to skip tracing or abort.

use thiserror::Error;
use tracery_core::CoreError;

use crate::accel::FrameState;

/// Errors that can occur in the rendering layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// GPU memory could not be reserved for a buffer or structure.
    #[error("allocation failed for {label} ({size} bytes)")]
    Allocation {
        /// Debug label of the resource.
        label: String,
        /// Requested size in bytes.
        size: u64,
    },

    /// A mesh/material reference is unset or a config value is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Config file could not be loaded.
    #[error("config error: {0}")]
    Config(String),

    /// The backend failed to build the acceleration structure.
    #[error("acceleration structure build failed: {0}")]
    BuildFailed(String),

    /// An acceleration-structure operation was called out of order.
    #[error("{operation} is not valid in state {state}")]
    InvalidTransition {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the manager was in.
        state: FrameState,
    },

    /// The resource was already released.
    #[error("resource already released")]
    Released,

    /// A per-instance update does not match the fixed instance count.
    #[error("instance count mismatch: expected {expected}, got {actual}")]
    CountMismatch {
        /// Fixed instance count.
        expected: u32,
        /// Count that was supplied.
        actual: u32,
    },

    /// A write or read fell outside a buffer.
    #[error("buffer {label} access out of bounds: offset {offset} + {len} > {size}")]
    OutOfBounds {
        /// Debug label of the buffer.
        label: String,
        /// Byte offset.
        offset: u64,
        /// Access length.
        len: u64,
        /// Buffer size.
        size: u64,
    },

    /// A handle does not belong to this device.
    #[error("unknown {kind} handle {id}")]
    UnknownHandle {
        /// Kind of handle (mesh, material, kernel).
        kind: &'static str,
        /// Handle value.
        id: String,
    },

    /// No adapter or device could be created.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
}

impl From<CoreError> for RenderError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidConfig(message) => Self::InvalidConfig(message),
            other => Self::Config(other.to_string()),
        }
    }
}

/// Result type for rendering operations.
pub type RenderResult<T> = Result<T, RenderError>;
