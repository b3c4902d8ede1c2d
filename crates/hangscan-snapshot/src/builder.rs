//! Fluent construction of snapshots for fixtures and tests.
//!
//! Chips and epochs are created on first mention, so a fixture only spells
//! out what its scenario needs.

use hangscan_core::id::{ChipId, CoreCoord, EpochId, StreamId};
use hangscan_core::plan::{PlanBuffer, PlanPipe, PlanQueue, PlanStream};
use hangscan_core::regs::StreamRegisters;
use hangscan_core::traits::EthEndpoint;

use crate::error::SnapshotError;
use crate::model::{
    ChipSnapshot, CoreEpoch, EpochPlan, MemoryWord, PlanStreamRecord, Snapshot, SourceRecord,
    StreamRecord,
};
use crate::store::SnapshotStore;

#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    snapshot: Snapshot,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        SnapshotBuilder::default()
    }

    fn chip_mut(&mut self, chip: ChipId) -> &mut ChipSnapshot {
        let pos = match self.snapshot.chips.iter().position(|c| c.id == chip) {
            Some(pos) => pos,
            None => {
                self.snapshot.chips.push(ChipSnapshot::new(chip));
                self.snapshot.chips.len() - 1
            }
        };
        &mut self.snapshot.chips[pos]
    }

    fn epoch_mut(&mut self, epoch: EpochId) -> &mut EpochPlan {
        let pos = match self.snapshot.epochs.iter().position(|e| e.epoch == epoch) {
            Some(pos) => pos,
            None => {
                self.snapshot.epochs.push(EpochPlan::new(epoch));
                self.snapshot.epochs.len() - 1
            }
        };
        &mut self.snapshot.epochs[pos]
    }

    /// Adds worker cores to a chip.
    pub fn workers(mut self, chip: ChipId, cores: impl IntoIterator<Item = CoreCoord>) -> Self {
        self.chip_mut(chip).worker_cores.extend(cores);
        self
    }

    /// Adds ethernet cores to a chip, in channel order.
    pub fn eth_cores(mut self, chip: ChipId, cores: impl IntoIterator<Item = CoreCoord>) -> Self {
        self.chip_mut(chip).eth_cores.extend(cores);
        self
    }

    pub fn core_epoch(mut self, chip: ChipId, core: CoreCoord, epoch: EpochId) -> Self {
        self.chip_mut(chip).core_epochs.push(CoreEpoch { core, epoch });
        self
    }

    /// Records the register state of a stream.
    pub fn registers(mut self, stream: StreamId, registers: StreamRegisters) -> Self {
        self.chip_mut(stream.chip)
            .streams
            .push(StreamRecord { stream, registers });
        self
    }

    pub fn dram_word(mut self, chip: ChipId, channel: u32, address: u64, value: u32) -> Self {
        self.chip_mut(chip).dram.push(MemoryWord {
            channel,
            address,
            value,
        });
        self
    }

    pub fn host_word(mut self, chip: ChipId, channel: u32, address: u64, value: u32) -> Self {
        self.chip_mut(chip).host.push(MemoryWord {
            channel,
            address,
            value,
        });
        self
    }

    pub fn ethernet_link(mut self, a: EthEndpoint, b: EthEndpoint) -> Self {
        self.snapshot.ethernet_connections.push((a, b));
        self
    }

    /// Adds a plan entry for `stream` in `phase` of `epoch`.
    pub fn plan_stream(mut self, epoch: EpochId, stream: StreamId, phase: u32, entry: PlanStream) -> Self {
        self.epoch_mut(epoch).streams.push(PlanStreamRecord {
            stream,
            phase,
            entry,
        });
        self
    }

    /// Records that `source` directly feeds `stream` in `phase` of `epoch`.
    pub fn plan_source(mut self, epoch: EpochId, stream: StreamId, phase: u32, source: StreamId) -> Self {
        self.epoch_mut(epoch).sources.push(SourceRecord {
            stream,
            phase,
            source,
        });
        self
    }

    pub fn buffer(mut self, epoch: EpochId, buffer: PlanBuffer) -> Self {
        self.epoch_mut(epoch).buffers.push(buffer);
        self
    }

    pub fn pipe(mut self, epoch: EpochId, pipe: PlanPipe) -> Self {
        self.epoch_mut(epoch).pipes.push(pipe);
        self
    }

    pub fn queue(mut self, epoch: EpochId, queue: PlanQueue) -> Self {
        self.epoch_mut(epoch).queues.push(queue);
        self
    }

    pub fn into_snapshot(self) -> Snapshot {
        self.snapshot
    }

    /// Validates and indexes the snapshot.
    pub fn build(self) -> Result<SnapshotStore, SnapshotError> {
        SnapshotStore::new(self.snapshot)
    }
}
