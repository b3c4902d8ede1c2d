//! Error types for the hang analysis.
//!
//! [`AnalysisError`] separates tool failures from hang findings. Findings are
//! never errors; they are collected in the [`crate::report::HangReport`].
//! Plan-consistency and not-supported errors end the current traversal only.
//! Device access and topology errors end the whole run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use hangscan_core::error::{AccessError, CoreError};
use hangscan_core::id::StreamId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum AnalysisError {
    /// The plan does not describe what the hardware reports.
    #[error("plan inconsistency at stream {stream}: {reason}")]
    PlanInconsistency { stream: StreamId, reason: String },

    /// The stream's state matches no diagnostic branch.
    #[error("unsupported case at stream {stream}: {reason}")]
    UnsupportedCase { stream: StreamId, reason: String },

    /// A path the analysis deliberately does not implement.
    #[error("not supported: {what}")]
    NotSupported { what: String },

    /// A correctness-critical lookup needed the live phase of a stream whose
    /// phase register reads 0.
    #[error("stream {stream} has no live phase")]
    NoLivePhase { stream: StreamId },

    /// A register points across an ethernet link the cluster does not have.
    #[error("no ethernet link partner for the core of stream {stream}")]
    MissingEthernetLink { stream: StreamId },

    /// The cluster description does not match the device block maps.
    #[error("invalid topology: {reason}")]
    InvalidTopology { reason: String },

    /// The traversal state was used in a way it does not allow.
    #[error("invalid traversal state: {reason}")]
    InvalidState { reason: String },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("device access failed: {0}")]
    Access(#[from] AccessError),
}

impl AnalysisError {
    /// True if the error only ends the current traversal. Device access
    /// failures and a broken topology end the run.
    pub fn is_traversal_local(&self) -> bool {
        !matches!(
            self,
            AnalysisError::Access(_) | AnalysisError::InvalidTopology { .. }
        )
    }
}
