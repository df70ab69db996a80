use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::pull_through_endpoint;
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{
    ClusterEndpoint, ClusterLockRequest, ClusterMembership, ClusterTransport, JobNodeInfo,
    TaskPullRequest, TaskPullResponse,
};

/// 进程内传输层，节点端点直接注册在同一个进程里
///
/// 单机部署和集成测试使用。
pub struct LocalClusterTransport {
    membership: Arc<dyn ClusterMembership>,
    endpoints: DashMap<String, Arc<dyn ClusterEndpoint>>,
    rpc_timeout: Duration,
}

impl LocalClusterTransport {
    pub fn new(membership: Arc<dyn ClusterMembership>, rpc_timeout: Duration) -> Self {
        Self {
            membership,
            endpoints: DashMap::new(),
            rpc_timeout,
        }
    }

    pub fn register(&self, node_name: impl Into<String>, endpoint: Arc<dyn ClusterEndpoint>) {
        let node_name = node_name.into();
        debug!("注册本地节点端点: {}", node_name);
        self.endpoints.insert(node_name, endpoint);
    }

    pub fn unregister(&self, node_name: &str) {
        self.endpoints.remove(node_name);
    }

    fn endpoint(&self, node_name: &str) -> SchedulerResult<Arc<dyn ClusterEndpoint>> {
        self.endpoints
            .get(node_name)
            .map(|endpoint| Arc::clone(endpoint.value()))
            .ok_or_else(|| SchedulerError::Transport(format!("节点 {node_name} 不可达")))
    }

    fn master(&self) -> SchedulerResult<Arc<dyn ClusterEndpoint>> {
        let master = self.membership.master_node().ok_or(SchedulerError::NoMasterNode)?;
        self.endpoint(&master)
    }
}

#[async_trait]
impl ClusterTransport for LocalClusterTransport {
    async fn send_lock_request(&self, request: ClusterLockRequest) -> SchedulerResult<bool> {
        let master = self.master()?;
        tokio::time::timeout(self.rpc_timeout, master.handle_lock_request(request))
            .await
            .map_err(|_| SchedulerError::Transport("锁请求超时".to_string()))?
    }

    async fn pull_tasks(&self, request: TaskPullRequest) -> SchedulerResult<TaskPullResponse> {
        let master = self.master()?;
        pull_through_endpoint(master, request, self.rpc_timeout).await
    }

    async fn query_job_node_info(&self, node_name: &str) -> SchedulerResult<Vec<JobNodeInfo>> {
        let endpoint = self.endpoint(node_name)?;
        tokio::time::timeout(self.rpc_timeout, endpoint.handle_job_node_info())
            .await
            .map_err(|_| SchedulerError::Transport(format!("查询节点 {node_name} 超时")))?
    }
}
