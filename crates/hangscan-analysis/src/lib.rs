//! Hang analysis over a stalled multi-chip dataflow system.
//!
//! Given a compiled execution plan, live stream registers and the cluster's
//! ethernet cabling, [`analyze`] walks the stream dependency graph from every
//! active stream and reports the streams most likely responsible for the
//! stall, falling back to a cycle search when no traversal finds one.
//!
//! The crate is organized as:
//! - [`context`]: traversal state (frontier, visitation, results, caches)
//! - [`classify`]: plan and register predicates over a stream
//! - [`queues`]: DRAM/host queue occupancy checks
//! - [`dispatch`]: the per-stream diagnostic handlers
//! - [`cycles`]: connectivity graph and cycle search
//! - [`driver`]: the outer loop tying it together
//! - [`report`]: findings and their text/JSON rendering

/// Step-level trace, emitted at verbosity 2 and above.
macro_rules! step {
    ($ctx:expr, $($arg:tt)+) => {
        if $ctx.verbosity() >= 2 {
            tracing::debug!($($arg)+);
        }
    };
}

/// Traversal summaries, emitted at verbosity 1 and above.
macro_rules! summary {
    ($ctx:expr, $($arg:tt)+) => {
        if $ctx.verbosity() >= 1 {
            tracing::info!($($arg)+);
        }
    };
}

pub mod classify;
pub mod config;
pub mod context;
pub mod cycles;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod progress;
pub mod queues;
pub mod report;

// Re-export commonly used types
pub use config::AnalysisConfig;
pub use context::{TraversalContext, TraversalResult};
pub use cycles::ConnectivityGraph;
pub use driver::analyze;
pub use error::AnalysisError;
pub use report::{CycleFinding, HangFinding, HangReport, TraversalFailure, Warning};
