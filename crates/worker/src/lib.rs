//! 节点本地的任务执行
//!
//! 执行引擎按线程池规格运行任务，另有任务队列缓存、限并发的批量执行器，
//! 以及向主节点拉取任务和汇报运行信息的组件。

pub mod components;
pub mod executors;
pub mod fan_out;
pub mod handler;
pub mod task_manager;
pub mod task_queue_cache;
pub mod thread_pool;

pub use components::{broadcast_job_node_info, JobNodeInfoCollector, TaskPuller};
pub use executors::{ShellTaskHandler, ShellTaskParams, SHELL_TASK_TYPE};
pub use fan_out::{FanOut, FanOutStats};
pub use handler::{
    NoopCallback, TaskCallback, TaskContext, TaskHandler, TaskHandlerRegistry,
    TaskHandlerRegistryBuilder,
};
pub use task_manager::{TaskCriteria, TaskFilter, TaskManager, TaskProgress, TaskState};
pub use task_queue_cache::{DestructionCallback, TaskQueue, TaskQueueCache};
pub use thread_pool::TaskPool;
