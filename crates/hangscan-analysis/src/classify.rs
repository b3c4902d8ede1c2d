//! Plan and register predicates over a single stream.
//!
//! The plan-level predicates are pure functions over a resolved
//! [`PlanStream`] and the block type of the owning core. The methods on
//! [`TraversalContext`] resolve the entry first:
//! - [`TraversalContext::current_entry`] needs a live phase and is used for
//!   every branch that decides where the traversal goes next.
//! - [`TraversalContext::classify_entry`] falls back to phase 1 when the
//!   phase register reads 0, and is only used to decide what kind of stream
//!   this is.
//!
//! Streams in their dummy phase have no plan phase; their entry is looked up
//! without one.

use hangscan_core::id::{CoreCoord, StreamId};
use hangscan_core::plan::{blob_phase, PlanStream, PRIMARY_PACKER_STREAM, SAFE_LOOKUP_PHASE};
use hangscan_core::regs::RemoteEndpoint;
use hangscan_core::traits::{BlockType, DeviceAccess, ExecutionPlan};

use crate::context::TraversalContext;
use crate::error::AnalysisError;

/// No destination, on a worker core, a receiving endpoint with an input
/// index.
pub fn is_unpacker_entry(entry: &PlanStream, on_worker: bool) -> bool {
    entry.dest.is_empty()
        && on_worker
        && entry.receiver_endpoint
        && entry.input_index.is_some_and(|i| i >= 0)
}

/// On a worker core, a sending endpoint with an output index.
pub fn is_packer_entry(entry: &PlanStream, on_worker: bool) -> bool {
    on_worker && entry.source_endpoint && entry.output_index.is_some_and(|i| i >= 0)
}

/// On a worker core, a sending endpoint that fans out to other streams.
pub fn is_packer_fork_entry(entry: &PlanStream, on_worker: bool) -> bool {
    on_worker && entry.source_endpoint && !entry.fork_stream_ids.is_empty()
}

/// Expands a multicast destination list. `first` and `second` are opposite
/// corners of the rectangle; every worker core inside it receives on
/// `first`'s stream index and chip.
pub fn multicast_rectangle(first: StreamId, second: StreamId, workers: &[CoreCoord]) -> Vec<StreamId> {
    let (x0, x1) = (first.core.x.min(second.core.x), first.core.x.max(second.core.x));
    let (y0, y1) = (first.core.y.min(second.core.y), first.core.y.max(second.core.y));
    let mut dests = Vec::new();
    for x in x0..=x1 {
        for y in y0..=y1 {
            let core = CoreCoord::new(x, y);
            if workers.contains(&core) {
                dests.push(StreamId::new(first.chip, core, first.stream));
            }
        }
    }
    dests
}

impl<'a, P: ExecutionPlan, D: DeviceAccess> TraversalContext<'a, P, D> {
    /// `CURR_PHASE` with the epoch bits masked off. Fails if the stream has
    /// no live phase.
    pub fn live_phase(&mut self, stream: StreamId) -> Result<u32, AnalysisError> {
        let regs = self.regs(stream)?;
        if regs.curr_phase == 0 {
            return Err(AnalysisError::NoLivePhase { stream });
        }
        Ok(regs.true_phase())
    }

    /// The plan entry of the stream at `phase` in its core's epoch. An active
    /// stream without one is a plan inconsistency; an inactive one gets an
    /// empty entry.
    pub fn entry_at(&mut self, stream: StreamId, phase: u32) -> Result<PlanStream, AnalysisError> {
        let epoch = self.epoch_of(stream)?;
        match self.plan.stream_entry(epoch, &stream.plan_key(phase)) {
            Some(entry) => Ok(entry),
            None => self.missing_entry(stream, format!("no plan entry in phase {phase} of epoch {epoch}")),
        }
    }

    pub fn dummy_phase_entry(&mut self, stream: StreamId) -> Result<PlanStream, AnalysisError> {
        let epoch = self.epoch_of(stream)?;
        match self.plan.any_phase_entry(epoch, &stream) {
            Some(entry) => Ok(entry),
            None => self.missing_entry(stream, format!("in dummy phase but not programmed in epoch {epoch}")),
        }
    }

    fn missing_entry(&mut self, stream: StreamId, reason: String) -> Result<PlanStream, AnalysisError> {
        if self.regs(stream)?.is_active() {
            return Err(AnalysisError::PlanInconsistency { stream, reason });
        }
        Ok(PlanStream::default())
    }

    /// The entry for the stream's live phase.
    pub fn current_entry(&mut self, stream: StreamId) -> Result<PlanStream, AnalysisError> {
        let regs = self.regs(stream)?;
        if regs.curr_phase == 0 {
            return Err(AnalysisError::NoLivePhase { stream });
        }
        if regs.is_in_dummy_phase() {
            return self.dummy_phase_entry(stream);
        }
        self.entry_at(stream, regs.true_phase())
    }

    /// The entry used to decide what kind of stream this is. A stream whose
    /// phase register reads 0 may belong to an op that is still running, so
    /// it is classified by its first phase.
    pub fn classify_entry(&mut self, stream: StreamId) -> Result<PlanStream, AnalysisError> {
        if self.regs(stream)?.curr_phase == 0 {
            return self.entry_at(stream, SAFE_LOOKUP_PHASE);
        }
        self.current_entry(stream)
    }

    pub fn is_worker(&self, stream: StreamId) -> bool {
        self.is_on_block(stream, BlockType::Worker)
    }

    pub fn is_eth(&self, stream: StreamId) -> bool {
        self.is_on_block(stream, BlockType::Ethernet)
    }

    pub fn holds_tiles(&mut self, stream: StreamId) -> Result<bool, AnalysisError> {
        Ok(self.regs(stream)?.is_holding_tiles())
    }

    pub fn is_unpacker(&mut self, stream: StreamId) -> Result<bool, AnalysisError> {
        let entry = self.classify_entry(stream)?;
        Ok(is_unpacker_entry(&entry, self.is_worker(stream)))
    }

    pub fn is_packer(&mut self, stream: StreamId) -> Result<bool, AnalysisError> {
        let entry = self.classify_entry(stream)?;
        Ok(is_packer_entry(&entry, self.is_worker(stream)))
    }

    pub fn is_packer_fork(&mut self, stream: StreamId) -> Result<bool, AnalysisError> {
        let entry = self.classify_entry(stream)?;
        Ok(is_packer_fork_entry(&entry, self.is_worker(stream)))
    }

    pub fn is_packer_or_fork(&mut self, stream: StreamId) -> Result<bool, AnalysisError> {
        let entry = self.classify_entry(stream)?;
        let on_worker = self.is_worker(stream);
        Ok(is_packer_entry(&entry, on_worker) || is_packer_fork_entry(&entry, on_worker))
    }

    pub fn is_directly_feeding(&mut self, stream: StreamId) -> Result<bool, AnalysisError> {
        Ok(!self.current_entry(stream)?.dest.is_empty())
    }

    pub fn writes_to_dram(&mut self, stream: StreamId) -> Result<bool, AnalysisError> {
        Ok(self.current_entry(stream)?.dram_output)
    }

    /// True if the plan records a stream feeding this one in its live phase.
    pub fn has_direct_producer(&mut self, stream: StreamId) -> Result<bool, AnalysisError> {
        let epoch = self.epoch_of(stream)?;
        let phase = self.live_phase(stream)?;
        Ok(self
            .plan
            .stream_source(epoch, &stream, blob_phase(epoch, phase))
            .is_some())
    }

    pub fn source_stream(&mut self, stream: StreamId) -> Result<StreamId, AnalysisError> {
        let epoch = self.epoch_of(stream)?;
        let phase = self.live_phase(stream)?;
        self.plan
            .stream_source(epoch, &stream, blob_phase(epoch, phase))
            .ok_or_else(|| AnalysisError::PlanInconsistency {
                stream,
                reason: format!("no source stream recorded for phase {phase} of epoch {epoch}"),
            })
    }

    /// Destination streams in the live phase, with multicast rectangles
    /// expanded.
    pub fn dest_streams(&mut self, stream: StreamId) -> Result<Vec<StreamId>, AnalysisError> {
        let entry = self.current_entry(stream)?;
        match entry.dest.as_slice() {
            [first, second, ..] => {
                let workers = self.device.block_locations(first.chip, BlockType::Worker);
                Ok(multicast_rectangle(*first, *second, &workers))
            }
            dests => Ok(dests.to_vec()),
        }
    }

    /// The other output streams of a packer's op: its fork ids plus the
    /// primary packer stream, without the stream itself. Empty if the
    /// packer does not fork.
    pub fn fork_streams(&mut self, stream: StreamId) -> Result<Vec<StreamId>, AnalysisError> {
        let entry = self.classify_entry(stream)?;
        if entry.fork_stream_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut ids = entry.fork_stream_ids;
        if !ids.contains(&PRIMARY_PACKER_STREAM) {
            ids.push(PRIMARY_PACKER_STREAM);
        }
        let mut forks: Vec<StreamId> = Vec::with_capacity(ids.len());
        for id in ids {
            let fork = stream.sibling(id);
            if id != stream.stream && !forks.contains(&fork) {
                forks.push(fork);
            }
        }
        Ok(forks)
    }

    pub fn packer_streams_of_unpacker(&mut self, stream: StreamId) -> Result<Vec<StreamId>, AnalysisError> {
        let epoch = self.epoch_of(stream)?;
        let ids = self.plan.packer_streams_on_core(epoch, stream.chip, stream.core);
        if ids.is_empty() {
            return Err(AnalysisError::PlanInconsistency {
                stream,
                reason: format!("the op on this core has no packer stream in epoch {epoch}"),
            });
        }
        Ok(ids.into_iter().map(|id| stream.sibling(id)).collect())
    }

    pub fn unpacker_streams_of_packer(&mut self, stream: StreamId) -> Result<Vec<StreamId>, AnalysisError> {
        let epoch = self.epoch_of(stream)?;
        Ok(self
            .plan
            .unpacker_streams_on_core(epoch, stream.chip, stream.core)
            .into_iter()
            .map(|id| stream.sibling(id))
            .collect())
    }

    /// Unpacker streams of the same op, without the stream itself.
    pub fn other_unpackers(&mut self, stream: StreamId) -> Result<Vec<StreamId>, AnalysisError> {
        let mut unpackers = self.unpacker_streams_of_packer(stream)?;
        unpackers.retain(|u| *u != stream);
        Ok(unpackers)
    }

    /// A configured, active stream that holds tiles or feeds a stream that
    /// does.
    pub fn is_empty_stream_backpressured(&mut self, stream: StreamId) -> Result<bool, AnalysisError> {
        let regs = self.regs(stream)?;
        if !regs.is_configured() || !regs.is_active() {
            return Ok(false);
        }
        if regs.is_holding_tiles() {
            return Ok(true);
        }
        if !self.is_directly_feeding(stream)? {
            return Ok(false);
        }
        for dest in self.dest_streams(stream)? {
            if self.holds_tiles(dest)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn any_fork_backpressured(&mut self, stream: StreamId) -> Result<bool, AnalysisError> {
        for fork in self.fork_streams(stream)? {
            if self.is_empty_stream_backpressured(fork)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The stream a remote source or dest register points at. The ethernet
    /// sentinel resolves to the core on the other end of this core's link.
    pub fn remote_stream(&mut self, stream: StreamId, remote: RemoteEndpoint) -> Result<StreamId, AnalysisError> {
        if !remote.is_across_ethernet() {
            return Ok(StreamId::new(stream.chip, CoreCoord::new(remote.x, remote.y), remote.stream));
        }
        let (chip, core) = self
            .ethernet_partner(stream.chip, stream.core)
            .ok_or(AnalysisError::MissingEthernetLink { stream })?;
        if chip == stream.chip {
            return Err(AnalysisError::PlanInconsistency {
                stream,
                reason: format!("ethernet partner {core} is on the same chip"),
            });
        }
        Ok(StreamId::new(chip, core, remote.stream))
    }

    /// Active packer, packer-fork or unpacker. Such streams ask their op
    /// siblings to visit them and back.
    pub fn is_active_op_stream(&mut self, stream: StreamId) -> Result<bool, AnalysisError> {
        if !self.regs(stream)?.is_active() {
            return Ok(false);
        }
        Ok(self.is_packer_or_fork(stream)? || self.is_unpacker(stream)?)
    }
}
