pub mod error;
pub mod id;
pub mod plan;
pub mod regs;
pub mod traits;

// Re-export commonly used types
pub use error::{AccessError, CoreError};
pub use id::{ChipId, CoreCoord, EpochId, PlanKey, StreamId};
pub use plan::{
    BufferId, BufferKind, PipeId, PlanBuffer, PlanPipe, PlanQueue, PlanStream, QueueKind,
    QueueLocation, StreamLink,
};
pub use regs::{RemoteEndpoint, StreamRegisters};
pub use traits::{BlockType, ClusterTopology, DeviceAccess, EthEndpoint, ExecutionPlan};
