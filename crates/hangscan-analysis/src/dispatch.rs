//! Per-stream diagnostic handlers.
//!
//! [`TraversalContext::visit_stream`] looks at one popped stream and decides
//! which streams to visit next, whether to stop the current path, or whether
//! to report a hang. A stream holding tiles is blocked downstream, so the
//! search follows its consumers; an empty stream is starved, so the search
//! follows its producers. Branches are tried in a fixed order because a
//! stream can match more than one of them.
//!
//! Streams requested more than once in a traversal are handled by
//! [`TraversalContext::process_revisit`] instead.

use std::collections::BTreeSet;

use hangscan_core::id::StreamId;
use hangscan_core::plan::{blob_phase, QueueKind};
use hangscan_core::traits::{DeviceAccess, ExecutionPlan};

use crate::context::TraversalContext;
use crate::error::AnalysisError;
use crate::queues::queue_names;

impl<'a, P: ExecutionPlan, D: DeviceAccess> TraversalContext<'a, P, D> {
    pub fn visit_stream(&mut self, stream: StreamId, requester: Option<StreamId>) -> Result<(), AnalysisError> {
        self.mark_processed(stream);
        let epoch = self.epoch_of(stream)?;
        step!(self, "Visiting stream {stream}. Core is on epoch {epoch}");

        let regs = self.regs(stream)?;
        if regs.is_holding_tiles() {
            self.mark_backpressure_found(stream)?;
            self.label(stream, "has_tiles");

            if regs.is_in_dummy_phase() {
                self.label(stream, "dummy_phase");
                self.visit_dummy_with_tiles(stream)
            } else if self.is_unpacker(stream)? {
                self.label(stream, "unpacker");
                self.visit_unpacker_with_tiles(stream)
            } else if self.is_directly_feeding(stream)? {
                self.label(stream, "is_direct_producer");
                self.visit_packer_or_relay(stream)
            } else if self.writes_to_dram(stream)? {
                // the consumer side is reached by a later traversal
                self.label(stream, "writes_to_dram");
                self.truncate_path(stream);
                Ok(())
            } else {
                self.label(stream, "unsupported_case");
                Err(AnalysisError::UnsupportedCase {
                    stream,
                    reason: "stream holds tiles but matches no handler".to_string(),
                })
            }
        } else {
            self.label(stream, "empty");
            if !regs.is_configured() {
                self.label(stream, "unconfigured");
                self.truncate_path(stream);
                return Ok(());
            }

            if regs.is_in_dummy_phase() {
                self.label(stream, "dummy_phase");
                self.visit_empty_dummy(stream)
            } else if !regs.is_active() {
                self.label(stream, "inactive");
                self.visit_inactive(stream, requester)
            } else if self.is_empty_stream_backpressured(stream)? {
                self.label(stream, "backpressured");
                self.visit_packer_or_relay(stream)
            } else if self.is_packer_or_fork(stream)? {
                self.label(stream, "packer");
                self.visit_empty_packer(stream)
            } else if self.has_direct_producer(stream)? {
                self.label(stream, "has_direct_producer");
                let producer = self.source_stream(stream)?;
                self.add_to_frontier(producer, Some(stream))
            } else {
                self.label(stream, "dram_reader");
                self.visit_dram_reader(stream)
            }
        }
    }

    /// An unpacker with tiles waits on its op. If the op's outputs are
    /// blocked, follow them; otherwise look at the op's other inputs.
    fn visit_unpacker_with_tiles(&mut self, stream: StreamId) -> Result<(), AnalysisError> {
        let packers = self.packer_streams_of_unpacker(stream)?;
        let Some(&primary) = packers.first() else {
            return Err(AnalysisError::PlanInconsistency {
                stream,
                reason: "the op on this core has no packer stream".to_string(),
            });
        };
        let mut outputs = self.fork_streams(primary)?;
        for packer in packers {
            if !outputs.contains(&packer) {
                outputs.push(packer);
            }
        }

        let mut any_output_blocked = false;
        for output in outputs {
            if self.holds_tiles(output)? || self.is_empty_stream_backpressured(output)? {
                self.add_to_frontier(output, Some(stream))?;
                any_output_blocked = true;
            }
        }
        if any_output_blocked {
            return Ok(());
        }

        let epoch = self.epoch_of(stream)?;
        let mut all_checked = true;
        let mut found_empty = false;
        for unpacker in self.other_unpackers(stream)? {
            if !self.holds_tiles(unpacker)? {
                found_empty = true;
            }
            if self.is_in_frontier(unpacker) {
                step!(self, "\t\t\tFound unchecked unpacker {unpacker}");
                continue;
            }
            all_checked = false;
            self.add_to_frontier(unpacker, Some(stream))?;
        }

        if all_checked {
            if found_empty {
                self.truncate_path(stream);
            } else {
                return self.report_hang(
                    stream,
                    format!(
                        "When visiting unpacker stream {stream} in epoch {epoch}. The stream has tiles, \
                         but all of the op's packer streams are empty and we've visited all other unpacker buffers already"
                    ),
                );
            }
        }
        Ok(())
    }

    /// Enqueues every fork of a packer that is backpressured. Returns true if
    /// none was.
    fn add_backpressured_forks(&mut self, stream: StreamId) -> Result<bool, AnalysisError> {
        let mut none_backpressured = true;
        for fork in self.fork_streams(stream)? {
            if self.is_empty_stream_backpressured(fork)? {
                none_backpressured = false;
                self.mark_backpressure_found(stream)?;
                self.add_to_frontier(fork, Some(stream))?;
            }
        }
        Ok(none_backpressured)
    }

    /// A packer or relay that cannot send: follow its destinations, or check
    /// the output queue when it writes to DRAM.
    fn visit_packer_or_relay(&mut self, stream: StreamId) -> Result<(), AnalysisError> {
        if self.is_packer_or_fork(stream)? {
            self.add_backpressured_forks(stream)?;
        }

        if !self.writes_to_dram(stream)? {
            for dest in self.dest_streams(stream)? {
                self.add_to_frontier(dest, Some(stream))?;
            }
            return Ok(());
        }

        let buffers = self.consumer_queue_buffers(stream)?;
        match buffers.len() {
            0 => {
                return Err(AnalysisError::PlanInconsistency {
                    stream,
                    reason: "writes to DRAM but feeds no queue buffer".to_string(),
                })
            }
            1 => {}
            n => {
                return Err(AnalysisError::NotSupported {
                    what: format!("stream {stream} forking to {n} queue buffers"),
                })
            }
        }

        for name in queue_names(&buffers) {
            let queue = self.queue_by_name(stream, &name)?;
            if queue.has_op_consumer() {
                // queues with a consumer op are sinks for this traversal
                self.truncate_path(stream);
            } else if self.queue_is_full(&queue)? {
                return self.report_queue_hang(
                    stream,
                    name.clone(),
                    format!(
                        "Output queue {name} is not being drained and is causing backpressure to its producers. \
                         They are unable to advance"
                    ),
                );
            }
        }
        Ok(())
    }

    /// Tiles in the dummy phase mean the stream is waiting to hand them on.
    fn visit_dummy_with_tiles(&mut self, stream: StreamId) -> Result<(), AnalysisError> {
        let regs = self.regs(stream)?;
        if regs.remote_receiver {
            let dest = self.remote_stream(stream, regs.remote_dest)?;
            return self.add_to_frontier(dest, Some(stream));
        }
        if !self.is_eth(stream) {
            return self.visit_unpacker_with_tiles(stream);
        }

        let entry = self.dummy_phase_entry(stream)?;
        match entry.dest.as_slice() {
            [dest] => self.add_to_frontier(*dest, Some(stream)),
            dests => Err(AnalysisError::PlanInconsistency {
                stream,
                reason: format!("ethernet stream in dummy phase has {} destinations", dests.len()),
            }),
        }
    }

    fn visit_empty_dummy(&mut self, stream: StreamId) -> Result<(), AnalysisError> {
        let regs = self.regs(stream)?;
        if !regs.remote_receiver && !regs.remote_source {
            return Err(AnalysisError::UnsupportedCase {
                stream,
                reason: "empty stream in dummy phase has no remote source or receiver".to_string(),
            });
        }

        if regs.is_waiting_for_messages() {
            step!(self, "\t\t\twaiting_for_messages");
            if regs.remote_source {
                let source = self.remote_stream(stream, regs.remote_src)?;
                return self.add_to_frontier(source, Some(stream));
            }
            if !self.is_eth(stream) {
                return self.visit_packer_or_relay(stream);
            }

            // receiver side of an ethernet link; find the sender
            let epoch = self.epoch_of(stream)?;
            let entry = self.dummy_phase_entry(stream)?;
            let producer = self
                .plan
                .stream_source(epoch, &stream, blob_phase(epoch, entry.phase_id))
                .ok_or_else(|| AnalysisError::PlanInconsistency {
                    stream,
                    reason: format!("no source stream recorded for phase {} of epoch {epoch}", entry.phase_id),
                })?;
            let producer_epoch = self.epoch_of(producer)?;
            if producer_epoch != epoch {
                return self.report_hang(
                    stream,
                    format!(
                        "Found stream {stream} in epoch {epoch} in dummy phase but its producer stream's \
                         ({producer}) core is not on the same temporal epoch ({producer_epoch})"
                    ),
                );
            }
            return self.add_to_frontier(producer, Some(stream));
        }

        step!(self, "\t\t\tnot waiting_for_messages");
        if regs.has_received_messages() {
            if regs.is_active() {
                return Err(AnalysisError::UnsupportedCase {
                    stream,
                    reason: "active stream in dummy phase is not waiting for messages but has received some"
                        .to_string(),
                });
            }
            return Ok(());
        }

        if (regs.is_active() && self.is_packer_or_fork(stream)?) || self.is_empty_stream_backpressured(stream)? {
            return self.visit_empty_packer(stream);
        }
        if regs.is_active() {
            return Err(AnalysisError::NotSupported {
                what: format!("active empty stream {stream} in dummy phase that is not a packer"),
            });
        }
        Ok(())
    }

    /// An empty packer waits on its op. If a fork is backpressured, follow
    /// it; otherwise follow the op's empty inputs.
    fn visit_empty_packer(&mut self, stream: StreamId) -> Result<(), AnalysisError> {
        if self.any_fork_backpressured(stream)? {
            self.add_backpressured_forks(stream)?;
            return Ok(());
        }

        let epoch = self.epoch_of(stream)?;
        let mut all_hold_tiles = true;
        for unpacker in self.unpacker_streams_of_packer(stream)? {
            if !self.holds_tiles(unpacker)? {
                all_hold_tiles = false;
                self.add_to_frontier(unpacker, Some(stream))?;
            }
        }
        if all_hold_tiles {
            return self.report_hang(
                stream,
                format!(
                    "Visited empty packer stream {stream} in epoch {epoch} where all unpacker streams have tiles. \
                     This packer stream also either doesn't fork or all forked output streams are also empty. \
                     There is likely a hang on this core"
                ),
            );
        }
        Ok(())
    }

    fn visit_inactive(&mut self, stream: StreamId, requester: Option<StreamId>) -> Result<(), AnalysisError> {
        let Some(requester) = requester else {
            return Err(AnalysisError::InvalidState {
                reason: format!("traversal started from inactive stream {stream}"),
            });
        };
        let epoch = self.epoch_of(stream)?;
        let requester_epoch = self.epoch_of(requester)?;
        let mut message = String::from("Visited an inactive stream during traversal.");

        if self.plan.is_stream_in_epoch(epoch, &stream) {
            if self.is_packer_or_fork(stream)? {
                // firmware may be holding it back until the core's other
                // output streams finish
                return self.visit_empty_packer(stream);
            }
            if requester_epoch == epoch {
                message.push_str(&format!(
                    " This stream and its source stream ({requester}) are both in the same epoch ({epoch}) \
                     so there is likely a hang here because the current stream should still be live"
                ));
                return self.report_hang(stream, message);
            }
            message.push_str(&format!(
                " However, the source stream ({requester}) is currently executing a different epoch ({requester_epoch}) \
                 so one of the two streams likely just hasn't reprogrammed to the next epoch"
            ));
        } else {
            message.push_str(&format!(
                " However, this stream isn't configured in the current epoch {epoch}. \
                 The source stream ({requester}) is in epoch {requester_epoch} which may explain this"
            ));
        }
        self.warn(Some(stream), message);
        Ok(())
    }

    /// An empty stream fed from a queue. A starved input queue is only
    /// reported once backpressure was seen in the same epoch.
    fn visit_dram_reader(&mut self, stream: StreamId) -> Result<(), AnalysisError> {
        let queues = self.producer_queues(stream)?;
        let Some(first) = queues.first().cloned() else {
            return Err(AnalysisError::PlanInconsistency {
                stream,
                reason: "reads from DRAM but has no producer queue".to_string(),
            });
        };

        if queues
            .iter()
            .any(|q| q.has_op_producer() || q.kind != QueueKind::Queue)
        {
            self.log_queue_caveat(stream);
            self.truncate_path(stream);
            return Ok(());
        }

        if !self.backpressure_epochs.is_empty() && !self.queue_has_data(&first)? {
            let epoch = self.epoch_of(stream)?;
            if self.backpressure_epochs.contains(&epoch) && self.reported_queues.insert(first.name.clone()) {
                return self.report_queue_hang(
                    stream,
                    first.name.clone(),
                    format!(
                        "Found an empty input queue \"{}\" to stream {stream}, which is waiting for tiles. \
                         This stream was traversed to as a result of hitting other streams that have tile data",
                        first.name
                    ),
                );
            }
            return Ok(());
        }

        self.log_queue_caveat(stream);
        Ok(())
    }

    fn log_queue_caveat(&self, stream: StreamId) {
        summary!(
            self,
            "Found an input queue to stream {stream}. Traversing upwards through queues is not supported. \
             The queue may be the cause of the hang, or the stream may belong to a later epoch programmed early"
        );
    }

    /// A stream requested by more than one requester, or twice by one,
    /// within a traversal. Reported as a hang.
    pub fn process_revisit(&mut self, stream: StreamId) -> Result<(), AnalysisError> {
        let epoch = self.epoch_of(stream)?;
        let regs = self.regs(stream)?;
        let (is_packer, is_unpacker) = if regs.is_in_dummy_phase() {
            (regs.remote_receiver, regs.remote_source)
        } else {
            (self.is_packer_or_fork(stream)?, self.is_unpacker(stream)?)
        };

        if !is_packer && !is_unpacker {
            return self.report_hang(
                stream,
                format!("Visited stream {stream} again. Core is currently on epoch {epoch}. This may indicate a hang source. Look here"),
            );
        }

        if !self.is_eth(stream) {
            match self.op_siblings(stream, is_packer) {
                Ok(siblings) => {
                    let unresolved = siblings.iter().filter(|s| !self.is_visited(**s)).count();
                    step!(
                        self,
                        "\t{unresolved} of {} other op streams on the core of {stream} are unresolved",
                        siblings.len()
                    );
                }
                Err(e) if e.is_traversal_local() => {
                    step!(self, "\tcould not gather op streams of {stream}: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        self.report_hang(
            stream,
            format!(
                "Visited stream {stream} again. All other op buffers on the core were visited. \
                 Core is currently on epoch {epoch}. This may indicate a hang source. Look here"
            ),
        )
    }

    /// The other streams of the op on this stream's core.
    fn op_siblings(&mut self, stream: StreamId, is_packer: bool) -> Result<BTreeSet<StreamId>, AnalysisError> {
        let mut siblings = BTreeSet::new();
        if is_packer {
            siblings.extend(self.fork_streams(stream)?);
            siblings.extend(self.unpacker_streams_of_packer(stream)?);
        } else {
            siblings.extend(self.packer_streams_of_unpacker(stream)?);
            siblings.extend(self.other_unpackers(stream)?);
        }
        Ok(siblings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::context::TraversalResult;
    use hangscan_core::id::{ChipId, CoreCoord, EpochId};
    use hangscan_core::plan::{BufferId, BufferKind, PlanBuffer, PlanQueue, PlanStream, QueueLocation, StreamLink};
    use hangscan_core::regs::StreamRegisters;
    use hangscan_snapshot::{SnapshotBuilder, SnapshotStore};
    use smallvec::smallvec;

    const CORE: CoreCoord = CoreCoord { x: 1, y: 1 };
    const OTHER: CoreCoord = CoreCoord { x: 2, y: 1 };
    const ETH: CoreCoord = CoreCoord { x: 9, y: 0 };

    fn s(index: u32) -> StreamId {
        StreamId::new(ChipId(0), CORE, index)
    }

    fn on(core: CoreCoord, index: u32) -> StreamId {
        StreamId::new(ChipId(0), core, index)
    }

    fn active(phase: u32) -> StreamRegisters {
        StreamRegisters {
            curr_phase: phase,
            debug_status_8: 0x1,
            ..Default::default()
        }
    }

    fn holding(phase: u32) -> StreamRegisters {
        StreamRegisters {
            num_msgs_received: 2,
            ..active(phase)
        }
    }

    fn unpacker_entry() -> PlanStream {
        PlanStream {
            receiver_endpoint: true,
            input_index: Some(0),
            ..Default::default()
        }
    }

    fn packer_entry(dest: StreamId) -> PlanStream {
        PlanStream {
            source_endpoint: true,
            output_index: Some(0),
            dest: smallvec![dest],
            ..Default::default()
        }
    }

    fn op_buffer(id: u64, kind: BufferKind, stream: u32) -> PlanBuffer {
        PlanBuffer {
            id: BufferId(id),
            kind,
            chip: ChipId(0),
            core: Some(CORE),
            stream_id: Some(stream),
            ..Default::default()
        }
    }

    /// Two worker cores and one ethernet core, all on epoch 0.
    fn base() -> SnapshotBuilder {
        SnapshotBuilder::new()
            .workers(ChipId(0), [CORE, OTHER])
            .eth_cores(ChipId(0), [ETH])
            .core_epoch(ChipId(0), CORE, EpochId(0))
            .core_epoch(ChipId(0), OTHER, EpochId(0))
            .core_epoch(ChipId(0), ETH, EpochId(0))
    }

    /// An op on CORE: unpacker stream 4, packer stream 24 feeding OTHER.
    fn with_op(builder: SnapshotBuilder) -> SnapshotBuilder {
        builder
            .plan_stream(EpochId(0), s(4), 1, unpacker_entry())
            .plan_stream(EpochId(0), s(24), 1, packer_entry(on(OTHER, 8)))
            .buffer(EpochId(0), op_buffer(1, BufferKind::Unpacker, 4))
            .buffer(EpochId(0), op_buffer(2, BufferKind::Packer, 24))
    }

    fn context(store: &SnapshotStore) -> TraversalContext<'_, SnapshotStore, SnapshotStore> {
        let config = AnalysisConfig {
            progress: false,
            ..Default::default()
        };
        TraversalContext::new(store, store, store, config).unwrap()
    }

    /// Seeds a traversal at `start` and pops it.
    fn start(ctx: &mut TraversalContext<'_, SnapshotStore, SnapshotStore>, start: StreamId) {
        ctx.add_to_frontier(start, None).unwrap();
        ctx.pop_frontier().unwrap();
    }

    #[test]
    fn unconfigured_stream_ends_the_path() {
        let store = base().build().unwrap();
        let mut ctx = context(&store);
        start(&mut ctx, s(1));
        ctx.add_to_frontier(s(2), Some(s(1))).unwrap();
        ctx.pop_frontier();
        ctx.visit_stream(s(2), Some(s(1))).unwrap();
        assert_eq!(ctx.result(s(2)), TraversalResult::VisitedInTraversal);
        assert_eq!(ctx.labels(s(2)), vec!["empty", "unconfigured"]);
        assert_eq!(ctx.frontier_len(), 0);
    }

    #[test]
    fn lone_unpacker_with_idle_packer_is_a_hang() {
        let store = with_op(base())
            .registers(s(4), holding(1))
            .registers(s(24), active(1))
            .build()
            .unwrap();
        let mut ctx = context(&store);
        start(&mut ctx, s(4));
        ctx.visit_stream(s(4), None).unwrap();

        let hangs = &ctx.report().hangs;
        assert_eq!(hangs.len(), 1);
        assert_eq!(hangs[0].stream, s(4));
        assert!(hangs[0].message.contains("all of the op's packer streams are empty"));
        assert_eq!(hangs[0].labels, vec!["has_tiles".to_string(), "unpacker".to_string()]);
    }

    #[test]
    fn unpacker_of_op_without_packer_is_a_plan_error() {
        let store = base()
            .plan_stream(EpochId(0), s(4), 1, unpacker_entry())
            .buffer(EpochId(0), op_buffer(1, BufferKind::Unpacker, 4))
            .registers(s(4), holding(1))
            .build()
            .unwrap();
        let mut ctx = context(&store);
        start(&mut ctx, s(4));
        let err = ctx.visit_stream(s(4), None).unwrap_err();

        assert!(matches!(err, AnalysisError::PlanInconsistency { stream, .. } if stream == s(4)));
        assert!(err.is_traversal_local());
        assert!(ctx.report().hangs.is_empty());
        assert_eq!(ctx.frontier_len(), 0);
    }

    #[test]
    fn unpacker_with_pending_full_siblings_is_a_hang() {
        let store = with_op(base())
            .plan_stream(EpochId(0), s(5), 1, unpacker_entry())
            .buffer(EpochId(0), op_buffer(3, BufferKind::Unpacker, 5))
            .registers(s(4), holding(1))
            .registers(s(5), holding(1))
            .registers(s(24), active(1))
            .build()
            .unwrap();
        let mut ctx = context(&store);
        start(&mut ctx, s(4));
        ctx.add_to_frontier(s(5), Some(s(4))).unwrap();
        ctx.visit_stream(s(4), None).unwrap();

        let hangs = &ctx.report().hangs;
        assert_eq!(hangs.len(), 1);
        assert_eq!(hangs[0].stream, s(4));
        assert!(hangs[0].message.contains("we've visited all other unpacker buffers already"));
    }

    #[test]
    fn unpacker_follows_blocked_packer() {
        let store = with_op(base())
            .registers(s(4), holding(1))
            .registers(s(24), holding(1))
            .build()
            .unwrap();
        let mut ctx = context(&store);
        start(&mut ctx, s(4));
        ctx.visit_stream(s(4), None).unwrap();

        assert!(ctx.report().hangs.is_empty());
        assert!(ctx.is_in_frontier(s(24)));
        assert_eq!(ctx.sources_of(s(24)), &[Some(s(4))]);
        assert!(ctx.backpressure_epochs.contains(&EpochId(0)));

        // the packer relays its tiles to the next core
        let (next, requester) = ctx.pop_frontier().unwrap();
        ctx.visit_stream(next, requester).unwrap();
        assert!(ctx.is_in_frontier(on(OTHER, 8)));
        assert_eq!(ctx.labels(s(24)), vec!["has_tiles", "is_direct_producer"]);
    }

    #[test]
    fn unpacker_with_empty_sibling_ends_the_path() {
        let store = with_op(base())
            .plan_stream(EpochId(0), s(5), 1, unpacker_entry())
            .buffer(EpochId(0), op_buffer(3, BufferKind::Unpacker, 5))
            .registers(s(4), holding(1))
            .registers(s(5), active(1))
            .registers(s(24), active(1))
            .build()
            .unwrap();
        let mut ctx = context(&store);
        start(&mut ctx, s(4));
        ctx.visit_stream(s(4), None).unwrap();
        // the empty sibling is the one to chase
        assert!(ctx.is_in_frontier(s(5)));
        assert!(ctx.report().hangs.is_empty());
    }

    #[test]
    fn holding_stream_without_handler_is_unsupported() {
        let store = base()
            .registers(s(7), holding(1))
            .plan_stream(EpochId(0), s(7), 1, PlanStream::default())
            .build()
            .unwrap();
        let mut ctx = context(&store);
        start(&mut ctx, s(7));
        let err = ctx.visit_stream(s(7), None).unwrap_err();
        assert!(matches!(err, AnalysisError::UnsupportedCase { .. }));
        assert!(err.is_traversal_local());
    }

    #[test]
    fn inactive_stream_in_same_epoch_is_a_hang() {
        let store = base()
            .registers(s(1), active(1))
            .registers(on(OTHER, 2), StreamRegisters { curr_phase: 1, ..Default::default() })
            .plan_stream(EpochId(0), s(1), 1, PlanStream::default())
            .plan_stream(EpochId(0), on(OTHER, 2), 1, PlanStream::default())
            .build()
            .unwrap();
        let mut ctx = context(&store);
        start(&mut ctx, s(1));
        ctx.add_to_frontier(on(OTHER, 2), Some(s(1))).unwrap();
        ctx.pop_frontier();
        ctx.visit_stream(on(OTHER, 2), Some(s(1))).unwrap();

        let hangs = &ctx.report().hangs;
        assert_eq!(hangs.len(), 1);
        assert_eq!(hangs[0].path, vec![on(OTHER, 2), s(1)]);
        assert!(hangs[0].message.contains("both in the same epoch (0)"));
    }

    #[test]
    fn inactive_stream_in_other_epoch_only_warns() {
        let store = SnapshotBuilder::new()
            .workers(ChipId(0), [CORE, OTHER])
            .core_epoch(ChipId(0), CORE, EpochId(0))
            .core_epoch(ChipId(0), OTHER, EpochId(1))
            .registers(s(1), active(1))
            .registers(on(OTHER, 2), StreamRegisters { curr_phase: 1, ..Default::default() })
            .plan_stream(EpochId(0), s(1), 1, PlanStream::default())
            .plan_stream(EpochId(1), on(OTHER, 2), 1, PlanStream::default())
            .build()
            .unwrap();
        let mut ctx = context(&store);
        start(&mut ctx, s(1));
        ctx.visit_stream(on(OTHER, 2), Some(s(1))).unwrap();

        assert!(ctx.report().hangs.is_empty());
        let warnings = &ctx.report().warnings;
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].stream, Some(on(OTHER, 2)));
        assert!(warnings[0].message.contains("different epoch (0)"));
    }

    #[test]
    fn inactive_start_is_invalid() {
        let store = base()
            .registers(s(1), StreamRegisters { curr_phase: 1, ..Default::default() })
            .build()
            .unwrap();
        let mut ctx = context(&store);
        let err = ctx.visit_stream(s(1), None).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidState { .. }));
    }

    fn reader_store() -> SnapshotStore {
        let input = PlanQueue {
            name: "in0".into(),
            location: QueueLocation::Dram,
            target_device: ChipId(0),
            entries: 4,
            mem_addrs: vec![(0, 0x100)],
            ..Default::default()
        };
        let reader = PlanStream {
            link: StreamLink::Buffer(BufferId(10)),
            ..Default::default()
        };
        base()
            .registers(s(4), active(1))
            .registers(s(5), active(1))
            .plan_stream(EpochId(0), s(4), 1, reader.clone())
            .plan_stream(EpochId(0), s(5), 1, reader)
            .buffer(
                EpochId(0),
                PlanBuffer {
                    id: BufferId(10),
                    kind: BufferKind::DramIo,
                    dram_io: true,
                    queue: Some("in0".into()),
                    ..Default::default()
                },
            )
            .queue(EpochId(0), input)
            .dram_word(ChipId(0), 0, 0x100, 3)
            .dram_word(ChipId(0), 0, 0x104, 3)
            .build()
            .unwrap()
    }

    #[test]
    fn starved_queue_needs_backpressure_evidence() {
        let store = reader_store();
        let mut ctx = context(&store);

        start(&mut ctx, s(4));
        ctx.visit_stream(s(4), None).unwrap();
        assert_eq!(ctx.labels(s(4)), vec!["dram_reader", "empty"]);
        assert!(ctx.report().hangs.is_empty());
        ctx.finish_current_traversal().unwrap();

        ctx.mark_backpressure_found(on(OTHER, 8)).unwrap();
        start(&mut ctx, s(4));
        ctx.visit_stream(s(4), None).unwrap();
        let hangs = &ctx.report().hangs;
        assert_eq!(hangs.len(), 1);
        assert_eq!(hangs[0].queue.as_deref(), Some("in0"));

        // a second reader of the same queue is not reported again
        ctx.mark_backpressure_found(on(OTHER, 8)).unwrap();
        start(&mut ctx, s(5));
        ctx.visit_stream(s(5), None).unwrap();
        assert_eq!(ctx.report().hangs.len(), 1);
    }

    fn writer_store(consumers: Vec<String>) -> SnapshotStore {
        let writer = PlanStream {
            dram_output: true,
            link: StreamLink::Buffer(BufferId(1)),
            ..packer_entry(on(OTHER, 8))
        };
        base()
            .registers(s(24), holding(1))
            .plan_stream(EpochId(0), s(24), 1, writer)
            .buffer(
                EpochId(0),
                PlanBuffer {
                    fanout: vec![BufferId(2)],
                    ..op_buffer(1, BufferKind::Packer, 24)
                },
            )
            .buffer(
                EpochId(0),
                PlanBuffer {
                    id: BufferId(2),
                    kind: BufferKind::DramIo,
                    dram_io: true,
                    queue: Some("out".into()),
                    ..Default::default()
                },
            )
            .queue(
                EpochId(0),
                PlanQueue {
                    name: "out".into(),
                    consumer_ops: consumers,
                    location: QueueLocation::Dram,
                    entries: 4,
                    mem_addrs: vec![(1, 0x200)],
                    ..Default::default()
                },
            )
            // read pointer 0, write pointer 4: full
            .dram_word(ChipId(0), 1, 0x200, 0)
            .dram_word(ChipId(0), 1, 0x204, 4)
            .build()
            .unwrap()
    }

    #[test]
    fn full_output_queue_is_a_hang() {
        let store = writer_store(Vec::new());
        let mut ctx = context(&store);
        start(&mut ctx, s(24));
        ctx.visit_stream(s(24), None).unwrap();
        let hangs = &ctx.report().hangs;
        assert_eq!(hangs.len(), 1);
        assert_eq!(hangs[0].queue.as_deref(), Some("out"));
        assert!(hangs[0].message.starts_with("Output queue out is not being drained"));
    }

    #[test]
    fn queue_with_consumer_op_ends_the_path() {
        let store = writer_store(vec!["matmul".into()]);
        let mut ctx = context(&store);
        start(&mut ctx, s(24));
        ctx.visit_stream(s(24), None).unwrap();
        assert!(ctx.report().hangs.is_empty());
        assert_eq!(ctx.result(s(24)), TraversalResult::VisitedInTraversal);
        assert_eq!(ctx.frontier_len(), 0);
    }

    #[test]
    fn ethernet_receiver_with_producer_on_other_epoch_is_a_hang() {
        let receiver = on(ETH, 10);
        let producer = StreamId::new(ChipId(0), OTHER, 24);
        let store = SnapshotBuilder::new()
            .workers(ChipId(0), [OTHER])
            .eth_cores(ChipId(0), [ETH])
            .core_epoch(ChipId(0), ETH, EpochId(0))
            .core_epoch(ChipId(0), OTHER, EpochId(1))
            .registers(
                receiver,
                StreamRegisters {
                    curr_phase: (0x1F << 15) | 3,
                    msgs_remaining: 2,
                    remote_receiver: true,
                    debug_status_8: 0x1,
                    ..Default::default()
                },
            )
            .plan_stream(EpochId(0), receiver, 3, PlanStream { phase_id: 3, ..Default::default() })
            .plan_source(EpochId(0), receiver, 3, producer)
            .build()
            .unwrap();
        let mut ctx = context(&store);
        start(&mut ctx, receiver);
        ctx.visit_stream(receiver, None).unwrap();

        let hangs = &ctx.report().hangs;
        assert_eq!(hangs.len(), 1);
        assert!(hangs[0].message.contains("core is not on the same temporal epoch (1)"));
        assert_eq!(ctx.labels(receiver), vec!["dummy_phase", "empty"]);
    }

    #[test]
    fn dummy_phase_stream_with_tiles_chases_remote_dest() {
        let sender = s(10);
        let store = base()
            .registers(
                sender,
                StreamRegisters {
                    curr_phase: (0x1F << 15) | 2,
                    num_msgs_received: 1,
                    remote_receiver: true,
                    remote_dest: hangscan_core::regs::RemoteEndpoint { x: 2, y: 1, stream: 11 },
                    ..Default::default()
                },
            )
            .build()
            .unwrap();
        let mut ctx = context(&store);
        start(&mut ctx, sender);
        ctx.visit_stream(sender, None).unwrap();
        assert!(ctx.is_in_frontier(on(OTHER, 11)));
    }

    #[test]
    fn revisited_stream_is_reported() {
        let store = base().build().unwrap();
        let mut ctx = context(&store);
        start(&mut ctx, s(1));
        ctx.add_to_frontier(s(2), Some(s(1))).unwrap();
        ctx.add_to_frontier(s(2), Some(s(3))).unwrap();
        let (next, _) = ctx.pop_frontier().unwrap();
        assert!(ctx.is_revisit(next));
        ctx.process_revisit(next).unwrap();

        let hangs = &ctx.report().hangs;
        assert_eq!(hangs.len(), 1);
        assert_eq!(hangs[0].stream, s(2));
        assert!(hangs[0].message.starts_with("Visited stream chip_0__y_1__x_1__stream_id_2 again"));
        assert_eq!(ctx.frontier_len(), 0);
    }
}
