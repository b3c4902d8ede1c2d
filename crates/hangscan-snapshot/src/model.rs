//! The serialized shape of a captured system snapshot.
//!
//! A snapshot is one JSON document holding everything the analysis reads
//! from its collaborators: per-chip register state, core epochs, block maps
//! and memory words, the ethernet cabling, and the compiled plan of every
//! epoch. [`crate::SnapshotStore`] indexes it for lookup.

use serde::{Deserialize, Serialize};

use hangscan_core::id::{ChipId, CoreCoord, EpochId, StreamId};
use hangscan_core::plan::{PlanBuffer, PlanPipe, PlanQueue, PlanStream};
use hangscan_core::regs::StreamRegisters;
use hangscan_core::traits::EthEndpoint;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub chips: Vec<ChipSnapshot>,
    #[serde(default)]
    pub ethernet_connections: Vec<(EthEndpoint, EthEndpoint)>,
    #[serde(default)]
    pub epochs: Vec<EpochPlan>,
}

/// Live state of one chip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChipSnapshot {
    pub id: ChipId,
    #[serde(default)]
    pub worker_cores: Vec<CoreCoord>,
    /// Ethernet cores in channel order.
    #[serde(default)]
    pub eth_cores: Vec<CoreCoord>,
    #[serde(default)]
    pub core_epochs: Vec<CoreEpoch>,
    #[serde(default)]
    pub streams: Vec<StreamRecord>,
    #[serde(default)]
    pub dram: Vec<MemoryWord>,
    #[serde(default)]
    pub host: Vec<MemoryWord>,
}

impl ChipSnapshot {
    pub fn new(id: ChipId) -> Self {
        ChipSnapshot {
            id,
            worker_cores: Vec::new(),
            eth_cores: Vec::new(),
            core_epochs: Vec::new(),
            streams: Vec::new(),
            dram: Vec::new(),
            host: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreEpoch {
    pub core: CoreCoord,
    pub epoch: EpochId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub stream: StreamId,
    pub registers: StreamRegisters,
}

/// One 32-bit word of DRAM or host memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryWord {
    pub channel: u32,
    pub address: u64,
    pub value: u32,
}

/// The compiled plan of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochPlan {
    pub epoch: EpochId,
    #[serde(default)]
    pub streams: Vec<PlanStreamRecord>,
    #[serde(default)]
    pub sources: Vec<SourceRecord>,
    #[serde(default)]
    pub buffers: Vec<PlanBuffer>,
    #[serde(default)]
    pub pipes: Vec<PlanPipe>,
    #[serde(default)]
    pub queues: Vec<PlanQueue>,
}

impl EpochPlan {
    pub fn new(epoch: EpochId) -> Self {
        EpochPlan {
            epoch,
            streams: Vec::new(),
            sources: Vec::new(),
            buffers: Vec::new(),
            pipes: Vec::new(),
            queues: Vec::new(),
        }
    }
}

/// A stream's plan entry in one phase. `phase` is the phase as the stream
/// register reports it, without the epoch bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStreamRecord {
    pub stream: StreamId,
    pub phase: u32,
    #[serde(default)]
    pub entry: PlanStream,
}

/// `source` directly feeds `stream` in `phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub stream: StreamId,
    pub phase: u32,
    pub source: StreamId,
}
