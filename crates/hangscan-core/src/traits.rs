//! The collaborator contracts the hang analysis reads from.
//!
//! Three read-only views make up everything the traversal knows about the
//! system:
//! - [`ExecutionPlan`]: the compiled per-epoch plan of streams, buffers,
//!   pipes and queues.
//! - [`DeviceAccess`]: live register state, core epochs, block maps and
//!   memory words.
//! - [`ClusterTopology`]: which ethernet channels are cabled to which.
//!
//! All backends (the in-memory snapshot store, a live device bridge) implement
//! these traits so the analysis never depends on how the data was obtained.
//! The traits are synchronous; every call may be treated as blocking I/O.

use serde::{Deserialize, Serialize};

use crate::error::AccessError;
use crate::id::{ChipId, CoreCoord, EpochId, PlanKey, StreamId};
use crate::plan::{BufferId, PipeId, PlanBuffer, PlanPipe, PlanQueue, PlanStream};
use crate::regs::StreamRegisters;

/// Core block types the analysis distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    /// Compute ("functional worker") cores.
    Worker,
    /// Ethernet cores.
    Ethernet,
}

/// One end of an ethernet cable: a chip and one of its ethernet channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EthEndpoint {
    pub chip: ChipId,
    pub chan: u32,
}

/// Read-only queries over the compiled execution plan.
pub trait ExecutionPlan {
    /// All epochs the plan defines.
    fn epochs(&self) -> Vec<EpochId>;

    /// Every stream the epoch programs in any phase, in plan order.
    fn epoch_streams(&self, epoch: EpochId) -> Vec<StreamId>;

    /// The stream's entry for the phase in `key`.
    fn stream_entry(&self, epoch: EpochId, key: &PlanKey) -> Option<PlanStream>;

    /// The stream's entry regardless of phase. Used for streams in their
    /// dummy phase, whose phase register does not name a plan phase.
    fn any_phase_entry(&self, epoch: EpochId, stream: &StreamId) -> Option<PlanStream>;

    /// True if the epoch programs the stream at all.
    fn is_stream_in_epoch(&self, epoch: EpochId, stream: &StreamId) -> bool;

    /// The stream directly feeding `stream` at `blob_phase`
    /// (see [`crate::plan::blob_phase`]).
    fn stream_source(&self, epoch: EpochId, stream: &StreamId, blob_phase: u64) -> Option<StreamId>;

    /// Stream indices of the packer buffers of the operator on a core.
    fn packer_streams_on_core(&self, epoch: EpochId, chip: ChipId, core: CoreCoord) -> Vec<u32>;

    /// Stream indices of the unpacker buffers of the operator on a core.
    fn unpacker_streams_on_core(&self, epoch: EpochId, chip: ChipId, core: CoreCoord) -> Vec<u32>;

    fn buffer(&self, epoch: EpochId, id: BufferId) -> Option<PlanBuffer>;

    fn pipe(&self, epoch: EpochId, id: PipeId) -> Option<PlanPipe>;

    fn queue(&self, epoch: EpochId, name: &str) -> Option<PlanQueue>;
}

/// Read-only access to live device state.
pub trait DeviceAccess {
    fn chips(&self) -> Vec<ChipId>;

    fn read_stream_regs(&self, stream: &StreamId) -> Result<StreamRegisters, AccessError>;

    fn core_epoch(&self, chip: ChipId, core: CoreCoord) -> Result<EpochId, AccessError>;

    /// The epoch of every core of the chip.
    fn core_to_epoch_map(&self, chip: ChipId) -> Result<Vec<(CoreCoord, EpochId)>, AccessError>;

    /// Locations of every block of the given type, in channel order for
    /// ethernet cores.
    fn block_locations(&self, chip: ChipId, block: BlockType) -> Vec<CoreCoord>;

    fn is_block(&self, chip: ChipId, core: CoreCoord, block: BlockType) -> bool {
        self.block_locations(chip, block).contains(&core)
    }

    fn read_dram_word(&self, chip: ChipId, channel: u32, address: u64) -> Result<u32, AccessError>;

    fn read_host_word(&self, chip: ChipId, channel: u32, address: u64) -> Result<u32, AccessError>;
}

/// The cluster cabling description.
pub trait ClusterTopology {
    /// Every cable as an unordered pair of endpoints.
    fn ethernet_connections(&self) -> Vec<(EthEndpoint, EthEndpoint)>;
}
