//! In-memory implementation of the collaborator traits over a [`Snapshot`].
//!
//! [`SnapshotStore`] validates a snapshot once and builds HashMap indexes so
//! that every query the analysis makes is a single lookup. It implements
//! [`ExecutionPlan`], [`DeviceAccess`] and [`ClusterTopology`].

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;

use hangscan_core::error::AccessError;
use hangscan_core::id::{ChipId, CoreCoord, EpochId, PlanKey, StreamId};
use hangscan_core::plan::{
    blob_phase, BufferId, BufferKind, PipeId, PlanBuffer, PlanPipe, PlanQueue, PlanStream,
};
use hangscan_core::regs::StreamRegisters;
use hangscan_core::traits::{BlockType, ClusterTopology, DeviceAccess, EthEndpoint, ExecutionPlan};

use crate::error::SnapshotError;
use crate::model::Snapshot;

/// Hardware streams per core. Register reads beyond this index fail.
pub const STREAMS_PER_CORE: u32 = 64;

/// Indexed state of one chip.
#[derive(Debug, Clone, Default)]
struct ChipIndex {
    worker_cores: Vec<CoreCoord>,
    eth_cores: Vec<CoreCoord>,
    core_epochs: HashMap<CoreCoord, EpochId>,
    /// Core epoch records in snapshot order.
    core_epoch_order: Vec<(CoreCoord, EpochId)>,
    streams: HashMap<StreamId, StreamRegisters>,
    dram: HashMap<(u32, u64), u32>,
    host: HashMap<(u32, u64), u32>,
}

/// Indexed plan of one epoch.
#[derive(Debug, Clone, Default)]
struct EpochIndex {
    /// Every stream the plan programs, in plan order.
    stream_order: Vec<StreamId>,
    entries: HashMap<PlanKey, PlanStream>,
    /// The first entry recorded for each stream, whatever its phase.
    first_entries: HashMap<StreamId, PlanStream>,
    /// Keyed by `(stream, blob_phase)`.
    sources: HashMap<(StreamId, u64), StreamId>,
    buffers: HashMap<BufferId, PlanBuffer>,
    pipes: HashMap<PipeId, PlanPipe>,
    queues: HashMap<String, PlanQueue>,
}

/// A validated, indexed snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    snapshot: Snapshot,
    chips: HashMap<ChipId, ChipIndex>,
    epochs: HashMap<EpochId, EpochIndex>,
    epoch_order: Vec<EpochId>,
}

impl SnapshotStore {
    /// Validates and indexes a snapshot.
    pub fn new(snapshot: Snapshot) -> Result<Self, SnapshotError> {
        let mut chips: HashMap<ChipId, ChipIndex> = HashMap::new();
        for chip in &snapshot.chips {
            if chips.contains_key(&chip.id) {
                return Err(SnapshotError::DuplicateChip { chip: chip.id });
            }
            let mut index = ChipIndex {
                worker_cores: chip.worker_cores.clone(),
                eth_cores: chip.eth_cores.clone(),
                ..Default::default()
            };
            for record in &chip.core_epochs {
                index.core_epochs.insert(record.core, record.epoch);
                index.core_epoch_order.push((record.core, record.epoch));
            }
            for record in &chip.streams {
                if record.stream.chip != chip.id {
                    return Err(SnapshotError::IntegrityError {
                        reason: format!(
                            "stream {} is listed under chip {}",
                            record.stream, chip.id
                        ),
                    });
                }
                if index.streams.insert(record.stream, record.registers).is_some() {
                    return Err(SnapshotError::DuplicateStream {
                        stream: record.stream,
                    });
                }
            }
            for word in &chip.dram {
                index.dram.insert((word.channel, word.address), word.value);
            }
            for word in &chip.host {
                index.host.insert((word.channel, word.address), word.value);
            }
            chips.insert(chip.id, index);
        }

        for (a, b) in &snapshot.ethernet_connections {
            for endpoint in [a, b] {
                let chip = chips.get(&endpoint.chip).ok_or_else(|| SnapshotError::UnknownChip {
                    chip: endpoint.chip,
                    referenced_by: "ethernet connection".to_string(),
                })?;
                if endpoint.chan as usize >= chip.eth_cores.len() {
                    return Err(SnapshotError::IntegrityError {
                        reason: format!(
                            "ethernet channel {} on chip {} has no ethernet core",
                            endpoint.chan, endpoint.chip
                        ),
                    });
                }
            }
        }

        let mut epochs: HashMap<EpochId, EpochIndex> = HashMap::new();
        let mut epoch_order = Vec::new();
        for plan in &snapshot.epochs {
            if !epochs.contains_key(&plan.epoch) {
                epoch_order.push(plan.epoch);
            }
            let index = epochs.entry(plan.epoch).or_default();
            let mut seen: HashSet<StreamId> = index.stream_order.iter().copied().collect();

            for record in &plan.streams {
                if !chips.contains_key(&record.stream.chip) {
                    return Err(SnapshotError::UnknownChip {
                        chip: record.stream.chip,
                        referenced_by: format!("plan entry for stream {}", record.stream),
                    });
                }
                let key = record.stream.plan_key(record.phase);
                if index.entries.insert(key, record.entry.clone()).is_some() {
                    return Err(SnapshotError::DuplicatePlanEntry {
                        epoch: plan.epoch,
                        stream: record.stream,
                        phase: record.phase,
                    });
                }
                index
                    .first_entries
                    .entry(record.stream)
                    .or_insert_with(|| record.entry.clone());
                if seen.insert(record.stream) {
                    index.stream_order.push(record.stream);
                }
            }
            for record in &plan.sources {
                index.sources.insert(
                    (record.stream, blob_phase(plan.epoch, record.phase)),
                    record.source,
                );
            }
            for buffer in &plan.buffers {
                index.buffers.insert(buffer.id, buffer.clone());
            }
            for pipe in &plan.pipes {
                index.pipes.insert(pipe.id, pipe.clone());
            }
            for queue in &plan.queues {
                index.queues.insert(queue.name.clone(), queue.clone());
            }
        }

        Ok(SnapshotStore {
            snapshot,
            chips,
            epochs,
            epoch_order,
        })
    }

    /// Parses and indexes a JSON snapshot.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        SnapshotStore::new(snapshot)
    }

    /// Reads, parses and indexes a snapshot file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        SnapshotStore::from_json(&json)
    }

    /// Writes the snapshot as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.snapshot)?;
        fs::write(path, json).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Number of register records across all chips.
    pub fn stream_record_count(&self) -> usize {
        self.chips.values().map(|c| c.streams.len()).sum()
    }

    fn chip(&self, chip: ChipId) -> Result<&ChipIndex, AccessError> {
        self.chips.get(&chip).ok_or(AccessError::UnknownChip { chip })
    }

    /// Buffers of one kind on a core.
    fn core_buffers(
        &self,
        epoch: EpochId,
        chip: ChipId,
        core: CoreCoord,
        kind: BufferKind,
    ) -> Vec<&PlanBuffer> {
        let Some(index) = self.epochs.get(&epoch) else {
            return Vec::new();
        };
        let mut buffers: Vec<&PlanBuffer> = index
            .buffers
            .values()
            .filter(|b| b.kind == kind && b.chip == chip && b.core == Some(core))
            .collect();
        buffers.sort_by_key(|b| b.id);
        buffers
    }

    /// Walks pipes and buffers away from `start` until stream-carrying
    /// entries are found. `downstream` follows output pipes and pipe
    /// outputs; otherwise input pipes and pipe inputs.
    fn walk_to_streams(&self, index: &EpochIndex, start: &PlanBuffer, downstream: bool) -> Vec<u32> {
        let mut found = Vec::new();
        let mut seen_pipes: HashSet<PipeId> = HashSet::new();
        let mut seen_buffers: HashSet<BufferId> = HashSet::from([start.id]);

        let first_pipes: Vec<PipeId> = if downstream {
            start.output_pipes.clone()
        } else {
            start.input_pipe.into_iter().collect()
        };
        let mut pending: VecDeque<PipeId> = first_pipes.into_iter().collect();

        while let Some(pipe_id) = pending.pop_front() {
            if !seen_pipes.insert(pipe_id) {
                continue;
            }
            let Some(pipe) = index.pipes.get(&pipe_id) else {
                continue;
            };
            if let Some(stream) = pipe.stream_id {
                found.push(stream);
                continue;
            }
            let next_buffers = if downstream {
                &pipe.output_buffers
            } else {
                &pipe.input_buffers
            };
            for buffer_id in next_buffers {
                if !seen_buffers.insert(*buffer_id) {
                    continue;
                }
                let Some(buffer) = index.buffers.get(buffer_id) else {
                    continue;
                };
                if let Some(stream) = buffer.stream_id {
                    found.push(stream);
                } else if downstream {
                    pending.extend(buffer.output_pipes.iter().copied());
                } else {
                    pending.extend(buffer.input_pipe);
                }
            }
        }
        found
    }

    fn op_streams_on_core(
        &self,
        epoch: EpochId,
        chip: ChipId,
        core: CoreCoord,
        kind: BufferKind,
    ) -> Vec<u32> {
        let Some(index) = self.epochs.get(&epoch) else {
            return Vec::new();
        };
        let mut streams = BTreeSet::new();
        for buffer in self.core_buffers(epoch, chip, core, kind) {
            match buffer.stream_id {
                Some(stream) => {
                    streams.insert(stream);
                }
                // scatter copies are reached through their base buffer
                None if buffer.replicated => {}
                None => {
                    let downstream = kind == BufferKind::Packer;
                    streams.extend(self.walk_to_streams(index, buffer, downstream));
                }
            }
        }
        streams.into_iter().collect()
    }
}

impl ExecutionPlan for SnapshotStore {
    fn epochs(&self) -> Vec<EpochId> {
        self.epoch_order.clone()
    }

    fn epoch_streams(&self, epoch: EpochId) -> Vec<StreamId> {
        self.epochs
            .get(&epoch)
            .map(|e| e.stream_order.clone())
            .unwrap_or_default()
    }

    fn stream_entry(&self, epoch: EpochId, key: &PlanKey) -> Option<PlanStream> {
        self.epochs.get(&epoch)?.entries.get(key).cloned()
    }

    fn any_phase_entry(&self, epoch: EpochId, stream: &StreamId) -> Option<PlanStream> {
        self.epochs.get(&epoch)?.first_entries.get(stream).cloned()
    }

    fn is_stream_in_epoch(&self, epoch: EpochId, stream: &StreamId) -> bool {
        self.epochs
            .get(&epoch)
            .is_some_and(|e| e.first_entries.contains_key(stream))
    }

    fn stream_source(&self, epoch: EpochId, stream: &StreamId, blob_phase: u64) -> Option<StreamId> {
        self.epochs
            .get(&epoch)?
            .sources
            .get(&(*stream, blob_phase))
            .copied()
    }

    fn packer_streams_on_core(&self, epoch: EpochId, chip: ChipId, core: CoreCoord) -> Vec<u32> {
        self.op_streams_on_core(epoch, chip, core, BufferKind::Packer)
    }

    fn unpacker_streams_on_core(&self, epoch: EpochId, chip: ChipId, core: CoreCoord) -> Vec<u32> {
        self.op_streams_on_core(epoch, chip, core, BufferKind::Unpacker)
    }

    fn buffer(&self, epoch: EpochId, id: BufferId) -> Option<PlanBuffer> {
        self.epochs.get(&epoch)?.buffers.get(&id).cloned()
    }

    fn pipe(&self, epoch: EpochId, id: PipeId) -> Option<PlanPipe> {
        self.epochs.get(&epoch)?.pipes.get(&id).cloned()
    }

    fn queue(&self, epoch: EpochId, name: &str) -> Option<PlanQueue> {
        self.epochs.get(&epoch)?.queues.get(name).cloned()
    }
}

impl DeviceAccess for SnapshotStore {
    fn chips(&self) -> Vec<ChipId> {
        let mut chips: Vec<ChipId> = self.chips.keys().copied().collect();
        chips.sort();
        chips
    }

    /// Streams with no register record read as all zeros, i.e. unconfigured.
    fn read_stream_regs(&self, stream: &StreamId) -> Result<StreamRegisters, AccessError> {
        let chip = self.chip(stream.chip)?;
        if stream.stream >= STREAMS_PER_CORE {
            return Err(AccessError::StreamRegisters { stream: *stream });
        }
        Ok(chip.streams.get(stream).copied().unwrap_or_default())
    }

    fn core_epoch(&self, chip: ChipId, core: CoreCoord) -> Result<EpochId, AccessError> {
        self.chip(chip)?
            .core_epochs
            .get(&core)
            .copied()
            .ok_or(AccessError::CoreEpoch { chip, core })
    }

    fn core_to_epoch_map(&self, chip: ChipId) -> Result<Vec<(CoreCoord, EpochId)>, AccessError> {
        Ok(self.chip(chip)?.core_epoch_order.clone())
    }

    fn block_locations(&self, chip: ChipId, block: BlockType) -> Vec<CoreCoord> {
        match (self.chips.get(&chip), block) {
            (Some(c), BlockType::Worker) => c.worker_cores.clone(),
            (Some(c), BlockType::Ethernet) => c.eth_cores.clone(),
            (None, _) => Vec::new(),
        }
    }

    fn is_block(&self, chip: ChipId, core: CoreCoord, block: BlockType) -> bool {
        match (self.chips.get(&chip), block) {
            (Some(c), BlockType::Worker) => c.worker_cores.contains(&core),
            (Some(c), BlockType::Ethernet) => c.eth_cores.contains(&core),
            (None, _) => false,
        }
    }

    fn read_dram_word(&self, chip: ChipId, channel: u32, address: u64) -> Result<u32, AccessError> {
        self.chip(chip)?
            .dram
            .get(&(channel, address))
            .copied()
            .ok_or(AccessError::MemoryRead {
                chip,
                channel,
                address,
            })
    }

    fn read_host_word(&self, chip: ChipId, channel: u32, address: u64) -> Result<u32, AccessError> {
        self.chip(chip)?
            .host
            .get(&(channel, address))
            .copied()
            .ok_or(AccessError::MemoryRead {
                chip,
                channel,
                address,
            })
    }
}

impl ClusterTopology for SnapshotStore {
    fn ethernet_connections(&self) -> Vec<(EthEndpoint, EthEndpoint)> {
        self.snapshot.ethernet_connections.clone()
    }
}
