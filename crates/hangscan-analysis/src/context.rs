//! The mutable state of a hang analysis run.
//!
//! [`TraversalContext`] owns everything the traversal accumulates: the
//! candidate starting streams and the monotonic cursor over them, the FIFO
//! frontier and its membership set, visitation history by epoch, the source
//! map of who asked to visit whom, per-stream results, register and epoch
//! caches, the connectivity graph and the report under construction.
//!
//! A run is a sequence of traversals. Each one starts from a fresh candidate
//! chosen by [`TraversalContext::choose_unvisited_starting_stream`], drains
//! the frontier through the dispatcher and ends in
//! [`TraversalContext::finish_current_traversal`], either when the frontier
//! empties or when a hang is reported. A traversal stopped by an error ends
//! in [`TraversalContext::abandon_current_traversal`] instead.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use indexmap::{IndexMap, IndexSet};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use hangscan_core::id::{ChipId, CoreCoord, EpochId, StreamId};
use hangscan_core::plan::INTERMEDIATE_BUFFER_STREAMS;
use hangscan_core::regs::StreamRegisters;
use hangscan_core::traits::{BlockType, ClusterTopology, DeviceAccess, EthEndpoint, ExecutionPlan};

use crate::config::AnalysisConfig;
use crate::cycles::ConnectivityGraph;
use crate::error::AnalysisError;
use crate::progress::ProgressReporter;
use crate::report::{HangFinding, HangReport, Warning};

/// Resolution state of a stream within the current traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraversalResult {
    #[default]
    Unvisited,
    /// Enqueued and not yet resolved.
    InProgress,
    Clean,
    Hang,
    /// The path was deliberately stopped here.
    VisitedInTraversal,
}

pub struct TraversalContext<'a, P, D> {
    pub(crate) plan: &'a P,
    pub(crate) device: &'a D,
    config: AnalysisConfig,

    /// Ethernet core -> the core on the other end of its link, both ways.
    eth_links: HashMap<(ChipId, CoreCoord), (ChipId, CoreCoord)>,

    candidates: Vec<StreamId>,
    next_candidate: usize,

    frontier: VecDeque<(StreamId, Option<StreamId>)>,
    frontier_set: HashSet<StreamId>,

    /// Epochs in which each stream was resolved. Missing means none.
    visited_by_epoch: HashMap<StreamId, BTreeSet<EpochId>>,
    /// Distinct requesters of each enqueued stream, first request first.
    sources: IndexMap<StreamId, Vec<Option<StreamId>>>,
    /// Streams requested twice by the same requester.
    repeat_requests: HashSet<StreamId>,
    results: HashMap<StreamId, TraversalResult>,
    /// Streams popped in the current traversal, in pop order.
    current_traversal: IndexSet<StreamId>,
    all_clean: bool,
    pub(crate) backpressure_epochs: BTreeSet<EpochId>,

    reported_streams: HashSet<StreamId>,
    pub(crate) reported_queues: HashSet<String>,
    processed: HashSet<StreamId>,

    regs_cache: HashMap<StreamId, StreamRegisters>,
    epoch_cache: HashMap<(ChipId, CoreCoord), EpochId>,

    labels: HashMap<StreamId, BTreeSet<&'static str>>,
    pub(crate) graph: ConnectivityGraph,
    progress: ProgressReporter,
    pub(crate) report: HangReport,
}

impl<'a, P: ExecutionPlan, D: DeviceAccess> TraversalContext<'a, P, D> {
    /// Builds the context: reads the ethernet cabling, finds the epochs live
    /// on any chip and collects every stream those epochs program on a core
    /// that is currently on that epoch.
    pub fn new<T: ClusterTopology>(
        plan: &'a P,
        device: &'a D,
        topology: &T,
        config: AnalysisConfig,
    ) -> Result<Self, AnalysisError> {
        let eth_links = ethernet_link_map(device, topology)?;

        let mut epoch_cache = HashMap::new();
        let mut live_epochs = BTreeSet::new();
        for chip in device.chips() {
            for (core, epoch) in device.core_to_epoch_map(chip)? {
                epoch_cache.insert((chip, core), epoch);
                live_epochs.insert(epoch);
            }
        }

        let mut ctx = TraversalContext {
            plan,
            device,
            config,
            eth_links,
            candidates: Vec::new(),
            next_candidate: 0,
            frontier: VecDeque::new(),
            frontier_set: HashSet::new(),
            visited_by_epoch: HashMap::new(),
            sources: IndexMap::new(),
            repeat_requests: HashSet::new(),
            results: HashMap::new(),
            current_traversal: IndexSet::new(),
            all_clean: true,
            backpressure_epochs: BTreeSet::new(),
            reported_streams: HashSet::new(),
            reported_queues: HashSet::new(),
            processed: HashSet::new(),
            regs_cache: HashMap::new(),
            epoch_cache,
            labels: HashMap::new(),
            graph: ConnectivityGraph::new(),
            progress: ProgressReporter::new(0, false),
            report: HangReport::default(),
        };

        let mut candidates: IndexSet<StreamId> = IndexSet::new();
        for epoch in plan.epochs() {
            if !live_epochs.contains(&epoch) {
                continue;
            }
            for stream in plan.epoch_streams(epoch) {
                if ctx.epoch_cache.get(&(stream.chip, stream.core)) == Some(&epoch) {
                    candidates.insert(stream);
                }
            }
        }
        let mut candidates: Vec<StreamId> = candidates.into_iter().collect();
        if let Some(seed) = ctx.config.shuffle_seed {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            candidates.shuffle(&mut rng);
        }

        summary!(ctx, "Total active streams: {}", candidates.len());
        ctx.progress = ProgressReporter::new(candidates.len(), ctx.config.progress);
        ctx.candidates = candidates;
        Ok(ctx)
    }

    pub fn verbosity(&self) -> u8 {
        self.config.verbosity
    }

    pub fn candidates(&self) -> &[StreamId] {
        &self.candidates
    }

    /// Index of the next candidate `choose_unvisited_starting_stream` looks at.
    pub fn next_candidate_index(&self) -> usize {
        self.next_candidate
    }

    pub fn report(&self) -> &HangReport {
        &self.report
    }

    pub fn into_report(self) -> HangReport {
        self.report
    }

    pub fn result(&self, stream: StreamId) -> TraversalResult {
        self.results.get(&stream).copied().unwrap_or_default()
    }

    pub fn labels(&self, stream: StreamId) -> Vec<&'static str> {
        self.labels
            .get(&stream)
            .map(|l| l.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn label(&mut self, stream: StreamId, label: &'static str) {
        self.labels.entry(stream).or_default().insert(label);
    }

    pub fn is_in_frontier(&self, stream: StreamId) -> bool {
        self.frontier_set.contains(&stream)
    }

    pub fn frontier_len(&self) -> usize {
        self.frontier.len()
    }

    /// Distinct requesters recorded for a stream.
    pub fn sources_of(&self, stream: StreamId) -> &[Option<StreamId>] {
        self.sources.get(&stream).map(Vec::as_slice).unwrap_or(&[])
    }

    /// A popped stream that more than one distinct requester asked for, or
    /// that the same requester asked for twice.
    pub fn is_revisit(&self, stream: StreamId) -> bool {
        self.sources_of(stream).len() > 1 || self.repeat_requests.contains(&stream)
    }

    pub fn is_visited_in_epoch(&self, stream: StreamId, epoch: EpochId) -> bool {
        self.visited_by_epoch
            .get(&stream)
            .is_some_and(|epochs| epochs.contains(&epoch))
    }

    /// True if the stream was resolved in any epoch.
    pub fn is_visited(&self, stream: StreamId) -> bool {
        self.visited_by_epoch
            .get(&stream)
            .is_some_and(|epochs| !epochs.is_empty())
    }

    pub(crate) fn mark_processed(&mut self, stream: StreamId) {
        if self.processed.insert(stream) {
            self.progress.increment();
        }
    }

    /// Register snapshot of a stream, read once.
    pub fn regs(&mut self, stream: StreamId) -> Result<StreamRegisters, AnalysisError> {
        if let Some(regs) = self.regs_cache.get(&stream) {
            return Ok(*regs);
        }
        let regs = self.device.read_stream_regs(&stream)?;
        self.regs_cache.insert(stream, regs);
        Ok(regs)
    }

    /// Epoch the stream's core is on, read once per core.
    pub fn epoch_of(&mut self, stream: StreamId) -> Result<EpochId, AnalysisError> {
        let key = (stream.chip, stream.core);
        if let Some(epoch) = self.epoch_cache.get(&key) {
            return Ok(*epoch);
        }
        let epoch = self.device.core_epoch(stream.chip, stream.core)?;
        self.epoch_cache.insert(key, epoch);
        Ok(epoch)
    }

    pub(crate) fn is_on_block(&self, stream: StreamId, block: BlockType) -> bool {
        self.device.is_block(stream.chip, stream.core, block)
    }

    /// The core on the far side of an ethernet core's link.
    pub fn ethernet_partner(&self, chip: ChipId, core: CoreCoord) -> Option<(ChipId, CoreCoord)> {
        self.eth_links.get(&(chip, core)).copied()
    }

    /// The single entry point for new work.
    ///
    /// Records `requester` among the candidate's sources and the edge in the
    /// connectivity graph. A candidate already resolved in its core's current
    /// epoch is not enqueued again; a candidate already pending is not
    /// enqueued twice. `requester` may only be `None` on an empty frontier.
    pub fn add_to_frontier(
        &mut self,
        candidate: StreamId,
        requester: Option<StreamId>,
    ) -> Result<(), AnalysisError> {
        if requester.is_none() && !self.frontier.is_empty() {
            return Err(AnalysisError::InvalidState {
                reason: format!(
                    "stream {candidate} enqueued without a requester while {} streams are pending",
                    self.frontier.len()
                ),
            });
        }

        let sources = self.sources.entry(candidate).or_default();
        if sources.contains(&requester) {
            self.repeat_requests.insert(candidate);
        } else {
            sources.push(requester);
        }
        self.graph.add_edge(requester, candidate);

        let epoch = self.epoch_of(candidate)?;
        if self.is_visited_in_epoch(candidate, epoch) {
            step!(self, "\tAlready visited stream {candidate} - not adding it to frontier");
            return Ok(());
        }

        if self.frontier_set.insert(candidate) {
            match requester {
                Some(r) => step!(self, "Adding stream {candidate} to frontier, from stream {r}"),
                None => step!(self, "Adding stream {candidate} to frontier"),
            }
            self.frontier.push_back((candidate, requester));
            self.results.insert(candidate, TraversalResult::InProgress);
        }
        Ok(())
    }

    /// Removes the oldest pending entry and adds it to the current
    /// traversal.
    pub fn pop_frontier(&mut self) -> Option<(StreamId, Option<StreamId>)> {
        let (stream, requester) = self.frontier.pop_front()?;
        self.frontier_set.remove(&stream);
        self.current_traversal.insert(stream);
        step!(self, "popping stream {stream} from frontier");
        Some((stream, requester))
    }

    /// Called when a stream turns out to hold data or be backpressured.
    /// Forgets which streams were already resolved, so empty streams
    /// explored earlier can be walked again along the blocking chain, and
    /// records the stream's epoch as one with backpressure evidence.
    pub fn mark_backpressure_found(&mut self, stream: StreamId) -> Result<(), AnalysisError> {
        self.visited_by_epoch.clear();
        let epoch = self.epoch_of(stream)?;
        self.backpressure_epochs.insert(epoch);
        Ok(())
    }

    /// Sets the stream's result and hands it to every requester upstream
    /// that is still in progress.
    ///
    /// Idempotent for a stream already holding `result`. A `Hang` is never
    /// replaced.
    pub fn propagate_result(&mut self, stream: StreamId, result: TraversalResult) {
        let current = self.result(stream);
        if current == result {
            return;
        }
        if current == TraversalResult::Hang {
            step!(self, "\tnot overwriting hang result of {stream} with {result:?}");
            return;
        }
        self.results.insert(stream, result);

        let mut seen: HashSet<StreamId> = HashSet::from([stream]);
        let mut pending: VecDeque<StreamId> = VecDeque::from([stream]);
        while let Some(current) = pending.pop_front() {
            let requesters: Vec<StreamId> = self.sources_of(current).iter().flatten().copied().collect();
            for requester in requesters {
                if !seen.insert(requester) {
                    continue;
                }
                if self.result(requester) == TraversalResult::InProgress {
                    self.results.insert(requester, result);
                    pending.push_back(requester);
                }
            }
        }
    }

    /// Stops the current path at `stream` without resolving it. A hang
    /// result is kept.
    pub fn truncate_path(&mut self, stream: StreamId) {
        step!(self, "stop_current_path_traversal {stream}");
        if self.result(stream) != TraversalResult::Hang {
            self.results.insert(stream, TraversalResult::VisitedInTraversal);
        }
    }

    /// Advances the candidate cursor to the next stream worth starting a
    /// traversal from: not resolved in its current epoch, configured, active
    /// in hardware and not an intermediate buffer stream. The cursor never
    /// moves back, so each candidate is considered at most once.
    pub fn choose_unvisited_starting_stream(&mut self) -> Result<Option<StreamId>, AnalysisError> {
        self.all_clean = true;
        step!(self, "choose_unvisited_starting_stream");

        while self.next_candidate < self.candidates.len() {
            let stream = self.candidates[self.next_candidate];
            self.next_candidate += 1;
            self.mark_processed(stream);
            self.report.streams_considered += 1;

            let epoch = self.epoch_of(stream)?;
            if self.is_visited_in_epoch(stream, epoch) {
                step!(self, "\tstream {stream} already visited - not choosing it");
                continue;
            }
            let regs = self.regs(stream)?;
            if !regs.is_configured() {
                step!(self, "\tstream {stream} is not configured - not choosing it");
                continue;
            }
            if !regs.is_active() {
                step!(self, "\tstream {stream} is not active - not choosing it");
                continue;
            }
            if INTERMEDIATE_BUFFER_STREAMS.contains(&stream.stream) {
                step!(self, "\tstream {stream} is an intermediate buffer - not choosing it");
                continue;
            }

            summary!(self, "Stream {stream} is active and unvisited and not an intermediate buffer - choosing it");
            return Ok(Some(stream));
        }
        Ok(None)
    }

    /// Ends the current traversal. Every stream it visited is recorded as
    /// resolved in its epoch and resolved `Clean`, or `Hang` if a hang was
    /// reported. The frontier, source map, visited set and backpressure
    /// epochs are cleared.
    pub fn finish_current_traversal(&mut self) -> Result<(), AnalysisError> {
        let outcome = if self.all_clean {
            TraversalResult::Clean
        } else {
            TraversalResult::Hang
        };
        self.close_traversal(Some(outcome))
    }

    /// Ends a traversal cut short by a tool error. Nothing was established
    /// about the streams it visited: they are recorded as resolved in their
    /// epoch but only marked `VisitedInTraversal`, and no result is
    /// propagated. Streams still pending go back to `Unvisited`.
    pub fn abandon_current_traversal(&mut self) -> Result<(), AnalysisError> {
        let pending: Vec<StreamId> = self.frontier.iter().map(|(s, _)| *s).collect();
        for stream in pending {
            if self.result(stream) == TraversalResult::InProgress {
                self.results.remove(&stream);
            }
        }
        self.close_traversal(None)
    }

    fn close_traversal(&mut self, outcome: Option<TraversalResult>) -> Result<(), AnalysisError> {
        let visited = std::mem::take(&mut self.current_traversal);
        if !visited.is_empty() {
            summary!(
                self,
                "Finished a traversal. Streams visited: {:?}",
                visited.iter().map(StreamId::designator).collect::<Vec<_>>()
            );
        }

        let mut first_error = None;
        for stream in &visited {
            match self.epoch_of(*stream) {
                Ok(epoch) => {
                    self.visited_by_epoch.entry(*stream).or_default().insert(epoch);
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
            match outcome {
                Some(outcome) => self.propagate_result(*stream, outcome),
                None => self.truncate_path(*stream),
            }
        }

        self.sources.clear();
        self.repeat_requests.clear();
        self.all_clean = true;
        self.frontier.clear();
        self.frontier_set.clear();
        self.backpressure_epochs.clear();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Reports a hang at `stream` and ends the current traversal.
    pub fn report_hang(&mut self, stream: StreamId, message: String) -> Result<(), AnalysisError> {
        self.report_hang_at(stream, message, None)
    }

    /// Reports a hang attributed to a queue.
    pub fn report_queue_hang(
        &mut self,
        stream: StreamId,
        queue: String,
        message: String,
    ) -> Result<(), AnalysisError> {
        self.report_hang_at(stream, message, Some(queue))
    }

    fn report_hang_at(
        &mut self,
        stream: StreamId,
        message: String,
        queue: Option<String>,
    ) -> Result<(), AnalysisError> {
        self.all_clean = false;
        let path = self.causal_path(stream);

        if self.reported_streams.insert(stream) {
            let epoch = self.epoch_of(stream)?;
            let designators: Vec<String> = path.iter().map(StreamId::designator).collect();
            tracing::error!(
                "Found possible hang at stream {stream}.\n\t{message}.\n\tPath = {designators:?}"
            );
            if self.verbosity() >= 2 {
                for (s, sources) in &self.sources {
                    tracing::debug!("\t{s} <- {sources:?}");
                }
            }
            self.report.hangs.push(HangFinding {
                stream,
                epoch,
                message,
                path,
                labels: self.labels(stream).into_iter().map(String::from).collect(),
                queue,
            });
        }

        self.truncate_path(stream);
        self.finish_current_traversal()
    }

    /// The stream followed by its ancestors in the current traversal,
    /// breadth first over the source map.
    fn causal_path(&self, stream: StreamId) -> Vec<StreamId> {
        let mut path = vec![stream];
        let mut seen: HashSet<StreamId> = HashSet::from([stream]);
        let mut pending: VecDeque<StreamId> = VecDeque::from([stream]);
        while let Some(current) = pending.pop_front() {
            for source in self.sources_of(current).iter().flatten() {
                if self.current_traversal.contains(source) && seen.insert(*source) {
                    path.push(*source);
                    pending.push_back(*source);
                }
            }
        }
        path
    }

    pub(crate) fn warn(&mut self, stream: Option<StreamId>, message: String) {
        tracing::warn!("{}", message);
        self.report.warnings.push(Warning { stream, message });
    }
}

/// Maps each cabled ethernet core to its partner. Channel `n` of a chip is
/// the chip's `n`-th ethernet core.
fn ethernet_link_map<D: DeviceAccess, T: ClusterTopology>(
    device: &D,
    topology: &T,
) -> Result<HashMap<(ChipId, CoreCoord), (ChipId, CoreCoord)>, AnalysisError> {
    let eth_core = |endpoint: &EthEndpoint| -> Result<CoreCoord, AnalysisError> {
        device
            .block_locations(endpoint.chip, BlockType::Ethernet)
            .get(endpoint.chan as usize)
            .copied()
            .ok_or_else(|| AnalysisError::InvalidTopology {
                reason: format!(
                    "chip {} has no ethernet core for channel {}",
                    endpoint.chip, endpoint.chan
                ),
            })
    };

    let mut links = HashMap::new();
    for (a, b) in topology.ethernet_connections() {
        if a.chip == b.chip {
            return Err(AnalysisError::InvalidTopology {
                reason: format!(
                    "ethernet link between channels {} and {} stays on chip {}",
                    a.chan, b.chan, a.chip
                ),
            });
        }
        let core_a = eth_core(&a)?;
        let core_b = eth_core(&b)?;
        links.insert((a.chip, core_a), (b.chip, core_b));
        links.insert((b.chip, core_b), (a.chip, core_a));
    }
    Ok(links)
}
