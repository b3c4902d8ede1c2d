//! The outer analysis loop.

use std::collections::HashSet;

use hangscan_core::id::StreamId;
use hangscan_core::traits::{ClusterTopology, DeviceAccess, ExecutionPlan};

use crate::config::AnalysisConfig;
use crate::context::TraversalContext;
use crate::error::AnalysisError;
use crate::report::{CycleFinding, HangReport, TraversalFailure};

/// Runs a full hang analysis.
///
/// Traversals start from every unvisited active stream in turn and run until
/// the frontier drains or a hang is reported. An error that only concerns
/// one traversal is recorded in the report and the next traversal starts;
/// device access failures and a broken topology abort the run. When no
/// traversal reported a hang, the connectivity graph is searched for a
/// cycle.
pub fn analyze<P, D, T>(
    plan: &P,
    device: &D,
    topology: &T,
    config: AnalysisConfig,
) -> Result<HangReport, AnalysisError>
where
    P: ExecutionPlan,
    D: DeviceAccess,
    T: ClusterTopology,
{
    let mut ctx = TraversalContext::new(plan, device, topology, config)?;

    while let Some(start) = ctx.choose_unvisited_starting_stream()? {
        traverse(&mut ctx, start)?;
        ctx.report.traversals += 1;
    }

    if ctx.report.hangs.is_empty() {
        search_cycles(&mut ctx)?;
    }
    if !ctx.report.found_hang() {
        tracing::warn!("Couldn't find source(s) of hang");
    }
    Ok(ctx.into_report())
}

/// Runs one traversal from `start` until the frontier drains or a hang ends
/// it. A traversal-local error is recorded and the traversal abandoned, so
/// the streams it reached are not resolved `Clean`.
fn traverse<P: ExecutionPlan, D: DeviceAccess>(
    ctx: &mut TraversalContext<'_, P, D>,
    start: StreamId,
) -> Result<(), AnalysisError> {
    ctx.add_to_frontier(start, None)?;
    while let Some((stream, requester)) = ctx.pop_frontier() {
        let visited = if ctx.is_revisit(stream) {
            ctx.process_revisit(stream)
        } else {
            ctx.visit_stream(stream, requester)
        };
        match visited {
            Ok(()) => {}
            Err(e) if e.is_traversal_local() => {
                tracing::warn!("Traversal from {start} stopped at stream {stream}: {e}");
                ctx.report.errors.push(TraversalFailure { start, error: e });
                return ctx.abandon_current_traversal();
            }
            Err(e) => return Err(e),
        }
    }
    ctx.finish_current_traversal()
}

/// Looks for a cycle of visit requests once every traversal came back
/// clean. Edges between op streams of the same core are removed first.
///
/// A stream whose kind cannot be worked out from the plan is left out of
/// the op sources with a warning. Device access failures abort.
fn search_cycles<P: ExecutionPlan, D: DeviceAccess>(
    ctx: &mut TraversalContext<'_, P, D>,
) -> Result<(), AnalysisError> {
    let mut op_sources: HashSet<StreamId> = HashSet::new();
    for stream in ctx.graph.streams() {
        match ctx.is_active_op_stream(stream) {
            Ok(true) => {
                op_sources.insert(stream);
            }
            Ok(false) => {}
            Err(e) if e.is_traversal_local() => {
                ctx.warn(
                    Some(stream),
                    format!("Could not tell whether stream {stream} is an op stream: {e}"),
                );
            }
            Err(e) => return Err(e),
        }
    }

    let removed = ctx
        .graph
        .remove_false_back_edges(|stream| op_sources.contains(&stream));
    step!(ctx, "Removed {} op back edges from the connectivity graph", removed.len());

    if let Some(streams) = ctx.graph.find_cycle() {
        let designators: Vec<String> = streams.iter().map(StreamId::designator).collect();
        tracing::error!("Found cycle\n\t{}", designators.join(","));
        ctx.report.cycles.push(CycleFinding { streams });
    }
    Ok(())
}
