//! 集群内部RPC的边界
//!
//! 调用方通过 [`ClusterTransport`] 发出请求，传输层把请求路由到目标节点的
//! [`ClusterEndpoint`]。锁请求和任务拉取总是发往当前主节点。

use async_trait::async_trait;

use crate::entities::{ClusterLockRequest, JobNodeInfo, TaskPullRequest, TaskPullResponse};
use scheduler_core::SchedulerResult;

/// 拉取响应的投递回调，投递失败时主节点会回收已取出的任务
#[async_trait]
pub trait PullResponder: Send {
    async fn deliver(self: Box<Self>, response: TaskPullResponse) -> SchedulerResult<()>;
}

/// 节点对外暴露的集群RPC处理入口
#[async_trait]
pub trait ClusterEndpoint: Send + Sync {
    async fn handle_lock_request(&self, request: ClusterLockRequest) -> SchedulerResult<bool>;

    async fn handle_task_pull(
        &self,
        request: TaskPullRequest,
        responder: Box<dyn PullResponder>,
    ) -> SchedulerResult<()>;

    async fn handle_job_node_info(&self) -> SchedulerResult<Vec<JobNodeInfo>>;
}

/// 节点侧的集群RPC客户端
#[async_trait]
pub trait ClusterTransport: Send + Sync {
    /// 发往主节点
    async fn send_lock_request(&self, request: ClusterLockRequest) -> SchedulerResult<bool>;

    /// 发往主节点
    async fn pull_tasks(&self, request: TaskPullRequest) -> SchedulerResult<TaskPullResponse>;

    async fn query_job_node_info(&self, node_name: &str) -> SchedulerResult<Vec<JobNodeInfo>>;
}
