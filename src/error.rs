use thiserror::Error;

use crate::device::ComputePath;

/// Failures surfaced by the normalization operators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncBnError {
    #[error("Shape mismatch in '{operation}': expected {expected}, got {got:?}")]
    ShapeMismatch {
        operation: &'static str,
        expected: String,
        got: Vec<usize>,
    },

    #[error("'{operation}' has no gradient kernel on the {path} path")]
    UnsupportedDevicePath {
        operation: &'static str,
        path: ComputePath,
    },

    #[error("Degenerate statistics in '{operation}': std[{channel}] = {value}")]
    DegenerateStatistics {
        operation: &'static str,
        channel: usize,
        value: f32,
    },

    #[error("'{operation}' needs at least one replica")]
    EmptyReplicaSet { operation: &'static str },

    #[error("'{operation}' reduced over an empty batch")]
    EmptyBatch { operation: &'static str },

    #[error("'{operation}' expected {expected} replicas, got {got}")]
    ReplicaMismatch {
        operation: &'static str,
        expected: usize,
        got: usize,
    },
}

pub type Result<T> = std::result::Result<T, SyncBnError>;

impl SyncBnError {
    pub fn shape(
        operation: &'static str,
        expected: impl Into<String>,
        got: &[usize],
    ) -> Self {
        Self::ShapeMismatch {
            operation,
            expected: expected.into(),
            got: got.to_vec(),
        }
    }

    /// True when the failure is a configuration the caller has to route around
    /// rather than bad data.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::UnsupportedDevicePath { .. })
    }
}
