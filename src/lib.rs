pub mod factory;
pub mod node;
pub mod shutdown;

pub use factory::JobTaskFactory;
pub use node::{NodeBuilder, NodeEndpoint, SchedulerNode, REPORT_LOCK_NAME};
pub use shutdown::{ShutdownCoordinator, ShutdownPhase};
