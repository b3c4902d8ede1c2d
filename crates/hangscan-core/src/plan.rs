//! Records of the compiled execution plan as seen by the hang analysis.
//!
//! The plan itself is produced and owned elsewhere; these types are the
//! shape in which a plan collaborator hands entries back. A stream's link to
//! the rest of the plan is resolved once into [`StreamLink`] instead of being
//! rediscovered from optional fields at every call site.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::id::{ChipId, CoreCoord, EpochId, StreamId};

/// Buffer ids of scattered buffers are offset from their base by multiples
/// of this value.
pub const UNIQUE_ID_ALIGN: u64 = 1_000_000_000;

/// The stream index a packer core uses for its primary output.
pub const PRIMARY_PACKER_STREAM: u32 = 24;

/// Stream indices reserved for intermediate buffers.
pub const INTERMEDIATE_BUFFER_STREAMS: std::ops::Range<u32> = 32..40;

/// Phase used for classification lookups when the live phase reads 0.
pub const SAFE_LOOKUP_PHASE: u32 = 1;

/// Plan buffer identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(pub u64);

impl BufferId {
    /// The base buffer of a scattered buffer.
    pub fn base(self) -> BufferId {
        BufferId(self.0 - self.0 % UNIQUE_ID_ALIGN)
    }
}

/// Plan pipe identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PipeId(pub u64);

/// The phase key of the plan's stream-source map: `(epoch << 32) | phase`.
pub fn blob_phase(epoch: EpochId, phase: u32) -> u64 {
    (u64::from(epoch.0) << 32) | u64::from(phase)
}

/// What a stream is attached to in the plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum StreamLink {
    #[default]
    Unconnected,
    Buffer(BufferId),
    Pipe(PipeId),
}

/// A stream's plan entry for one phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanStream {
    /// Destination streams. More than one entry describes a multicast
    /// rectangle by its two corners.
    pub dest: SmallVec<[StreamId; 2]>,
    pub link: StreamLink,
    pub source_endpoint: bool,
    pub receiver_endpoint: bool,
    pub input_index: Option<i32>,
    pub output_index: Option<i32>,
    pub fork_stream_ids: Vec<u32>,
    pub dram_output: bool,
    pub phase_id: u32,
}

/// Role of a plan buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferKind {
    Packer,
    Unpacker,
    DramIo,
    Relay,
    #[default]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanBuffer {
    pub id: BufferId,
    pub kind: BufferKind,
    pub chip: ChipId,
    pub core: Option<CoreCoord>,
    pub stream_id: Option<u32>,
    /// A scatter copy of a base buffer.
    pub replicated: bool,
    pub dram_io: bool,
    /// Name of the queue this buffer belongs to, for queue buffers.
    pub queue: Option<String>,
    /// Buffers at the next fan-out level.
    pub fanout: Vec<BufferId>,
    pub input_pipe: Option<PipeId>,
    pub output_pipes: Vec<PipeId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanPipe {
    pub id: PipeId,
    pub input_buffers: Vec<BufferId>,
    pub output_buffers: Vec<BufferId>,
    pub stream_id: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    #[default]
    Queue,
    Ram,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueLocation {
    #[default]
    Dram,
    Host,
    Other(String),
}

/// A queue as the plan describes it, including where its buffers live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanQueue {
    pub name: String,
    pub kind: QueueKind,
    /// Operator writing into the queue, if any.
    pub producer_op: Option<String>,
    /// Operators reading from the queue.
    pub consumer_ops: Vec<String>,
    pub location: QueueLocation,
    pub target_device: ChipId,
    pub entries: u32,
    /// `(channel, address)` of every buffer of the queue.
    pub mem_addrs: Vec<(u32, u64)>,
}

impl PlanQueue {
    pub fn has_op_producer(&self) -> bool {
        self.producer_op.is_some()
    }

    pub fn has_op_consumer(&self) -> bool {
        !self.consumer_ops.is_empty()
    }

    /// A queue nothing in the plan reads from.
    pub fn is_output_queue(&self) -> bool {
        !self.has_op_consumer()
    }
}

/// Entries between a queue's read and write pointers. Pointers wrap at
/// twice the entry count. Computed in `u64` so pointer words read back
/// from memory cannot overflow.
pub fn queue_occupancy(entries: u32, wr_ptr: u32, rd_ptr: u32) -> u64 {
    let (wr, rd) = (u64::from(wr_ptr), u64::from(rd_ptr));
    if wr >= rd {
        wr - rd
    } else {
        (wr + 2 * u64::from(entries)).saturating_sub(rd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_phase_packs_epoch_above_phase() {
        assert_eq!(blob_phase(EpochId(0), 5), 5);
        assert_eq!(blob_phase(EpochId(2), 5), (2u64 << 32) | 5);
    }

    #[test]
    fn base_buffer_strips_scatter_offset() {
        assert_eq!(BufferId(3 * UNIQUE_ID_ALIGN + 17).base(), BufferId(3 * UNIQUE_ID_ALIGN));
        assert_eq!(BufferId(42).base(), BufferId(0));
    }

    #[test]
    fn occupancy_wraps_at_twice_the_entries() {
        assert_eq!(queue_occupancy(4, 3, 1), 2);
        assert_eq!(queue_occupancy(4, 1, 1), 0);
        // wr wrapped past 2 * entries, rd did not
        assert_eq!(queue_occupancy(4, 1, 7), 2);
        assert_eq!(queue_occupancy(4, 3, 7), 4);
    }

    #[test]
    fn occupancy_of_pointers_near_the_top_of_the_word() {
        assert_eq!(queue_occupancy(4, u32::MAX - 1, u32::MAX), 7);
        assert_eq!(queue_occupancy(u32::MAX, 0, u32::MAX), u64::from(u32::MAX));
        assert_eq!(queue_occupancy(4, u32::MAX, u32::MAX - 1), 1);
    }

    #[test]
    fn output_queue_has_no_consumer() {
        let mut q = PlanQueue {
            name: "out".into(),
            ..Default::default()
        };
        assert!(q.is_output_queue());
        q.consumer_ops.push("matmul".into());
        assert!(q.has_op_consumer());
        assert!(!q.is_output_queue());
    }

    #[test]
    fn stream_link_serde_is_tagged() {
        let json = serde_json::to_string(&StreamLink::Pipe(PipeId(7))).unwrap();
        assert_eq!(json, r#"{"kind":"pipe","id":7}"#);
        let back: StreamLink = serde_json::from_str(r#"{"kind":"unconnected"}"#).unwrap();
        assert_eq!(back, StreamLink::Unconnected);
    }
}
