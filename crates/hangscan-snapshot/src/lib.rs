//! Offline backend for hang analysis.
//!
//! A snapshot is a captured JSON image of a stalled system: register state,
//! core epochs, block maps, memory words, ethernet cabling and the compiled
//! plan. [`SnapshotStore`] indexes one and implements all three collaborator
//! traits from `hangscan-core`, so the analysis can run without hardware.
//!
//! # Modules
//!
//! - [`error`]: SnapshotError enum
//! - [`model`]: the serde model of the snapshot file
//! - [`store`]: SnapshotStore, the indexed trait implementation
//! - [`builder`]: SnapshotBuilder for fixtures

pub mod builder;
pub mod error;
pub mod model;
pub mod store;

pub use builder::SnapshotBuilder;
pub use error::SnapshotError;
pub use model::Snapshot;
pub use store::SnapshotStore;
