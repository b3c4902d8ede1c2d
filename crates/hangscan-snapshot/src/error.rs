//! Snapshot error types for hangscan-snapshot.
//!
//! [`SnapshotError`] covers reading and parsing a snapshot file and the
//! consistency checks run while indexing it.

use std::path::PathBuf;

use thiserror::Error;

use hangscan_core::id::{ChipId, EpochId, StreamId};

/// Errors produced while loading, saving or indexing a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The snapshot file could not be read or written.
    #[error("snapshot i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Two chip records share an id.
    #[error("duplicate chip record: chip={chip}")]
    DuplicateChip { chip: ChipId },

    /// Two register records describe the same stream.
    #[error("duplicate register record for stream {stream}")]
    DuplicateStream { stream: StreamId },

    /// Two plan entries describe the same stream in the same phase.
    #[error("duplicate plan entry: epoch={epoch}, stream={stream}, phase={phase}")]
    DuplicatePlanEntry {
        epoch: EpochId,
        stream: StreamId,
        phase: u32,
    },

    /// A record references a chip that has no chip record.
    #[error("{referenced_by} references unknown chip {chip}")]
    UnknownChip { chip: ChipId, referenced_by: String },

    /// A data integrity violation was detected.
    #[error("integrity error: {reason}")]
    IntegrityError { reason: String },
}
