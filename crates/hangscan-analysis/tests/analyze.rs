//! End-to-end runs of the analysis over in-memory snapshots.

use hangscan_analysis::{analyze, AnalysisConfig, AnalysisError};
use hangscan_core::error::AccessError;
use hangscan_core::id::{ChipId, CoreCoord, EpochId, StreamId};
use hangscan_core::plan::{BufferId, BufferKind, PlanBuffer, PlanQueue, PlanStream, QueueLocation, StreamLink};
use hangscan_core::regs::StreamRegisters;
use hangscan_snapshot::{SnapshotBuilder, SnapshotStore};
use smallvec::smallvec;

const CORE: CoreCoord = CoreCoord { x: 1, y: 1 };
const OTHER: CoreCoord = CoreCoord { x: 2, y: 1 };

fn s(index: u32) -> StreamId {
    StreamId::new(ChipId(0), CORE, index)
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
        num_msgs_received: 3,
        ..active(phase)
    }
}

fn base() -> SnapshotBuilder {
    SnapshotBuilder::new()
        .workers(ChipId(0), [CORE, OTHER])
        .core_epoch(ChipId(0), CORE, EpochId(0))
        .core_epoch(ChipId(0), OTHER, EpochId(0))
}

fn quiet() -> AnalysisConfig {
    AnalysisConfig {
        progress: false,
        ..Default::default()
    }
}

fn run(store: &SnapshotStore) -> Result<hangscan_analysis::HangReport, AnalysisError> {
    analyze(store, store, store, quiet())
}

#[test]
fn idle_system_reports_nothing() {
    let store = base()
        .plan_stream(EpochId(0), s(4), 1, PlanStream::default())
        .build()
        .unwrap();
    let report = run(&store).unwrap();
    assert!(!report.found_hang());
    assert_eq!(report.streams_considered, 1);
    assert_eq!(report.traversals, 0);
    assert!(report.render_text().ends_with("Couldn't find source(s) of hang\n"));
}

#[test]
fn reader_of_healthy_queue_is_not_a_hang() {
    let store = base()
        .registers(s(4), active(1))
        .plan_stream(
            EpochId(0),
            s(4),
            1,
            PlanStream {
                link: StreamLink::Buffer(BufferId(10)),
                ..Default::default()
            },
        )
        .buffer(
            EpochId(0),
            PlanBuffer {
                id: BufferId(10),
                dram_io: true,
                queue: Some("in0".into()),
                ..Default::default()
            },
        )
        .queue(
            EpochId(0),
            PlanQueue {
                name: "in0".into(),
                location: QueueLocation::Dram,
                entries: 2,
                mem_addrs: vec![(0, 0x40)],
                ..Default::default()
            },
        )
        .build()
        .unwrap();
    let report = run(&store).unwrap();
    assert!(report.hangs.is_empty());
    assert!(report.cycles.is_empty());
    assert!(report.errors.is_empty());
    assert_eq!(report.traversals, 1);
}

#[test]
fn stalled_op_is_found_from_both_sides() {
    let store = base()
        .registers(s(4), holding(1))
        .registers(s(24), active(1))
        .plan_stream(
            EpochId(0),
            s(4),
            1,
            PlanStream {
                receiver_endpoint: true,
                input_index: Some(0),
                ..Default::default()
            },
        )
        .plan_stream(
            EpochId(0),
            s(24),
            1,
            PlanStream {
                source_endpoint: true,
                output_index: Some(0),
                dest: smallvec![StreamId::new(ChipId(0), OTHER, 8)],
                ..Default::default()
            },
        )
        .buffer(
            EpochId(0),
            PlanBuffer {
                id: BufferId(1),
                kind: BufferKind::Unpacker,
                core: Some(CORE),
                stream_id: Some(4),
                ..Default::default()
            },
        )
        .buffer(
            EpochId(0),
            PlanBuffer {
                id: BufferId(2),
                kind: BufferKind::Packer,
                core: Some(CORE),
                stream_id: Some(24),
                ..Default::default()
            },
        )
        .build()
        .unwrap();

    let report = run(&store).unwrap();
    assert!(report.found_hang());
    let streams: Vec<StreamId> = report.hangs.iter().map(|h| h.stream).collect();
    assert_eq!(streams, vec![s(4), s(24)]);
    assert!(report.hangs[1].message.starts_with("Visited empty packer stream"));
    assert_eq!(report.traversals, 2);

    let text = report.render_text();
    assert!(text.contains("Found possible hang at stream chip_0__y_1__x_1__stream_id_4 (epoch 0)."));
    assert!(!text.contains("Couldn't find source(s) of hang"));
}

#[test]
fn traversal_errors_are_recorded_and_the_run_continues() {
    let store = base()
        .registers(s(4), holding(1))
        .registers(s(5), active(1))
        .plan_stream(EpochId(0), s(4), 1, PlanStream::default())
        .plan_stream(EpochId(0), s(5), 1, PlanStream::default())
        .build()
        .unwrap();

    let report = run(&store).unwrap();
    assert_eq!(report.errors.len(), 2);
    assert_eq!(report.errors[0].start, s(4));
    assert!(matches!(report.errors[0].error, AnalysisError::UnsupportedCase { .. }));
    // stream 5 reads from DRAM but has no queue behind it
    assert!(matches!(report.errors[1].error, AnalysisError::PlanInconsistency { .. }));
    assert_eq!(report.traversals, 2);
}

/// An op on CORE whose packer 24 relays through OTHER back into the op's
/// own unpacker. Packer 25 is missing from the plan, so every traversal
/// that reaches the op stops before the loop can close on a revisit.
#[test]
fn request_loop_is_reported_as_a_cycle() {
    let relay = StreamId::new(ChipId(0), OTHER, 8);
    let store = base()
        .registers(s(4), holding(1))
        .registers(s(24), holding(1))
        .registers(s(25), active(1))
        .registers(relay, holding(1))
        .plan_stream(
            EpochId(0),
            s(4),
            1,
            PlanStream {
                receiver_endpoint: true,
                input_index: Some(0),
                ..Default::default()
            },
        )
        .plan_stream(
            EpochId(0),
            s(24),
            1,
            PlanStream {
                source_endpoint: true,
                output_index: Some(0),
                dest: smallvec![relay],
                ..Default::default()
            },
        )
        .plan_stream(
            EpochId(0),
            relay,
            1,
            PlanStream {
                dest: smallvec![s(4)],
                ..Default::default()
            },
        )
        .buffer(
            EpochId(0),
            PlanBuffer {
                id: BufferId(1),
                kind: BufferKind::Unpacker,
                core: Some(CORE),
                stream_id: Some(4),
                ..Default::default()
            },
        )
        .buffer(
            EpochId(0),
            PlanBuffer {
                id: BufferId(2),
                kind: BufferKind::Packer,
                core: Some(CORE),
                stream_id: Some(24),
                ..Default::default()
            },
        )
        .buffer(
            EpochId(0),
            PlanBuffer {
                id: BufferId(3),
                kind: BufferKind::Packer,
                core: Some(CORE),
                stream_id: Some(25),
                ..Default::default()
            },
        )
        .build()
        .unwrap();

    let report = run(&store).unwrap();
    assert!(report.hangs.is_empty());
    assert_eq!(report.traversals, 2);
    assert_eq!(report.errors.len(), 2);
    assert_eq!(report.errors[0].start, s(4));
    assert_eq!(report.errors[1].start, s(24));
    assert!(report
        .errors
        .iter()
        .all(|f| matches!(f.error, AnalysisError::PlanInconsistency { stream, .. } if stream == s(25))));
    assert!(report.warnings.is_empty());

    assert!(report.found_hang());
    assert_eq!(report.cycles.len(), 1);
    assert_eq!(report.cycles[0].streams, vec![s(4), s(24), relay]);

    let text = report.render_text();
    assert!(text.contains(
        "Found cycle\n\tchip_0__y_1__x_1__stream_id_4,chip_0__y_1__x_1__stream_id_24,chip_0__y_1__x_2__stream_id_8\n"
    ));
    assert!(!text.contains("Couldn't find source(s) of hang"));
}

#[test]
fn unreadable_stream_aborts_the_run() {
    let store = base()
        .plan_stream(EpochId(0), s(70), 1, PlanStream::default())
        .build()
        .unwrap();
    let err = run(&store).unwrap_err();
    assert_eq!(
        err,
        AnalysisError::Access(AccessError::StreamRegisters { stream: s(70) })
    );
    assert!(!err.is_traversal_local());
}

#[test]
fn seeded_runs_agree() {
    let mut builder = base();
    for index in 0..6 {
        builder = builder
            .registers(s(index), holding(1))
            .plan_stream(EpochId(0), s(index), 1, PlanStream::default());
    }
    let store = builder.build().unwrap();
    let config = AnalysisConfig {
        shuffle_seed: Some(11),
        progress: false,
        ..Default::default()
    };
    let first = analyze(&store, &store, &store, config.clone()).unwrap();
    let second = analyze(&store, &store, &store, config).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.errors.len(), 6);
}
