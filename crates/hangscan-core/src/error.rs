//! Core error types for hangscan-core.
//!
//! [`CoreError`] covers malformed identities and plan records.
//! [`AccessError`] is what collaborator implementations return when a
//! register, epoch or memory read cannot be served.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{ChipId, CoreCoord, StreamId};

/// Errors produced by value-level operations in hangscan-core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum CoreError {
    /// A stream designator did not match `chip_<id>__y_<y>__x_<x>__stream_id_<n>`.
    #[error("malformed stream designator '{designator}': {reason}")]
    MalformedDesignator { designator: String, reason: String },
}

/// Errors produced by device, plan or topology collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum AccessError {
    /// The chip is not part of the cluster.
    #[error("unknown chip {chip}")]
    UnknownChip { chip: ChipId },

    /// No register snapshot could be read for the stream.
    #[error("no register data for stream {stream}")]
    StreamRegisters { stream: StreamId },

    /// The core-to-epoch mapping has no entry for the core.
    #[error("no epoch for core {core} on chip {chip}")]
    CoreEpoch { chip: ChipId, core: CoreCoord },

    /// A DRAM or host memory word could not be read.
    #[error("memory read failed on chip {chip}, channel {channel}, address {address:#x}")]
    MemoryRead {
        chip: ChipId,
        channel: u32,
        address: u64,
    },
}
