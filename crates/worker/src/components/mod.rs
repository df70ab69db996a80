pub mod node_info;
pub mod task_puller;

pub use node_info::{broadcast_job_node_info, JobNodeInfoCollector};
pub use task_puller::TaskPuller;
