pub mod coordinator;
pub mod plan_executor;
pub mod types;

pub use coordinator::{Coordinator, DevicePorts};
pub use plan_executor::PlanExecutor;
pub use types::{CoordinatorState, PipelinePhase};
