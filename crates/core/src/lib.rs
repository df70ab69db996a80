pub mod config;
pub mod errors;

pub use config::models::{
    AppConfig, ClusterConfig, DispatchConfig, ExecutorConfig, JobConfig, LockConfig,
    ObservabilityConfig, PeerConfig, TaskQueueConfig, ThreadPoolSettings, TrackerConfig,
};
pub use errors::*;

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
