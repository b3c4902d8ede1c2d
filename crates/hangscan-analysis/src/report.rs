//! The outward result of an analysis run.
//!
//! A [`HangReport`] collects hang findings, cycles, warnings and the tool
//! errors that ended individual traversals. It serializes to JSON and
//! renders as plain text.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use hangscan_core::id::{EpochId, StreamId};

use crate::error::AnalysisError;

/// A stream implicated in a hang.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HangFinding {
    pub stream: StreamId,
    /// Epoch the stream's core was on.
    pub epoch: EpochId,
    pub message: String,
    /// The implicated stream followed by every ancestor visited in the
    /// traversal that reached it, nearest first.
    pub path: Vec<StreamId>,
    /// Diagnostic labels attached during the traversal.
    pub labels: Vec<String>,
    /// The starved or undrained queue, when the finding is about one.
    pub queue: Option<String>,
}

/// A cycle of visit requests found after all traversals were exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleFinding {
    pub streams: Vec<StreamId>,
}

/// Ambiguous evidence that did not justify a hang report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub stream: Option<StreamId>,
    pub message: String,
}

/// A traversal that ended because the tool hit an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalFailure {
    /// The stream the failed traversal started from.
    pub start: StreamId,
    pub error: AnalysisError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HangReport {
    pub hangs: Vec<HangFinding>,
    pub cycles: Vec<CycleFinding>,
    pub warnings: Vec<Warning>,
    pub errors: Vec<TraversalFailure>,
    /// Candidate streams considered as traversal starts.
    pub streams_considered: usize,
    pub traversals: usize,
}

impl HangReport {
    /// True if a hang or a cycle was reported.
    pub fn found_hang(&self) -> bool {
        !self.hangs.is_empty() || !self.cycles.is_empty()
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for hang in &self.hangs {
            let path: Vec<String> = hang.path.iter().map(|s| s.designator()).collect();
            let _ = writeln!(
                out,
                "Found possible hang at stream {} (epoch {}).",
                hang.stream, hang.epoch
            );
            let _ = writeln!(out, "\t{}.", hang.message);
            let _ = writeln!(out, "\tPath = [{}]", path.join(", "));
            if !hang.labels.is_empty() {
                let _ = writeln!(out, "\tLabels = {}", hang.labels.join(", "));
            }
        }
        for cycle in &self.cycles {
            let streams: Vec<String> = cycle.streams.iter().map(|s| s.designator()).collect();
            let _ = writeln!(out, "Found cycle");
            let _ = writeln!(out, "\t{}", streams.join(","));
        }
        for warning in &self.warnings {
            let _ = writeln!(out, "Warning: {}", warning.message);
        }
        for failure in &self.errors {
            let _ = writeln!(
                out,
                "Error in traversal from {}: {}",
                failure.start, failure.error
            );
        }
        let _ = writeln!(
            out,
            "Considered {} streams in {} traversals",
            self.streams_considered, self.traversals
        );
        if !self.found_hang() {
            let _ = writeln!(out, "Couldn't find source(s) of hang");
        }
        out
    }
}
