pub mod api_observability;
pub mod app_config;
pub mod cluster;
pub mod dispatcher_worker;
pub mod jobs;

// Re-export main types for easier imports
pub use api_observability::ObservabilityConfig;
pub use app_config::AppConfig;
pub use cluster::{ClusterConfig, PeerConfig};
pub use dispatcher_worker::{
    DispatchConfig, ExecutorConfig, LockConfig, TaskQueueConfig, ThreadPoolSettings, TrackerConfig,
};
pub use jobs::JobConfig;
