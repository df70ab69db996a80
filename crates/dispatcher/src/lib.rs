//! 主节点侧的协调组件
//!
//! 包含调度计算、作业/节点跟踪缓存、集群锁（服务端注册表与客户端）、
//! 分布式任务工厂注册表以及任务分发协议的主节点处理逻辑。

pub mod factory_registry;
pub mod lock_client;
pub mod lock_registry;
pub mod schedule;
pub mod task_dispatch;
pub mod tracker_cache;

#[cfg(test)]
pub mod test_utils;

pub use factory_registry::{DistributedTaskFactory, TaskFactoryRegistry, TaskFactoryRegistryBuilder};
pub use lock_client::ClusterLockClient;
pub use lock_registry::{ClusterLockRegistry, Lock};
pub use schedule::{compute_next, parse_frequency, ScheduleCalculator, ScheduleTimes};
pub use task_dispatch::TaskDispatchService;
pub use tracker_cache::{JobNodeTracker, JobNodeTrackerCache, TrackerSnapshot};
