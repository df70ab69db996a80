use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::pull_through_endpoint;
use scheduler_core::{PeerConfig, SchedulerError, SchedulerResult};
use scheduler_domain::{
    ClusterEndpoint, ClusterLockRequest, ClusterMembership, ClusterTransport, JobNodeInfo,
    TaskPullRequest, TaskPullResponse,
};

pub const LOCK_PATH: &str = "/cluster/lock";
pub const TASK_PULL_PATH: &str = "/cluster/tasks/pull";
pub const JOB_NODE_INFO_PATH: &str = "/cluster/job-node-info";

/// 锁请求的HTTP应答体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockReply {
    pub granted: bool,
}

/// 基于HTTP的集群传输层
///
/// 对等节点地址来自配置；发往本节点的请求可以直接交给本地端点处理。
pub struct HttpClusterTransport {
    membership: Arc<dyn ClusterMembership>,
    addresses: HashMap<String, String>,
    client: reqwest::Client,
    local: Option<(String, Arc<dyn ClusterEndpoint>)>,
    rpc_timeout: Duration,
}

impl HttpClusterTransport {
    pub fn new(
        membership: Arc<dyn ClusterMembership>,
        peers: &[PeerConfig],
        rpc_timeout: Duration,
    ) -> SchedulerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(rpc_timeout)
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("创建HTTP客户端失败: {e}")))?;

        let addresses = peers
            .iter()
            .map(|peer| {
                (
                    peer.name.clone(),
                    peer.address.trim_end_matches('/').to_string(),
                )
            })
            .collect();

        Ok(Self {
            membership,
            addresses,
            client,
            local: None,
            rpc_timeout,
        })
    }

    /// 发往 `node_name` 的请求不经过网络
    pub fn with_local_endpoint(
        mut self,
        node_name: impl Into<String>,
        endpoint: Arc<dyn ClusterEndpoint>,
    ) -> Self {
        self.local = Some((node_name.into(), endpoint));
        self
    }

    fn local_endpoint(&self, node_name: &str) -> Option<Arc<dyn ClusterEndpoint>> {
        self.local
            .as_ref()
            .filter(|(name, _)| name == node_name)
            .map(|(_, endpoint)| Arc::clone(endpoint))
    }

    fn url(&self, node_name: &str, path: &str) -> SchedulerResult<String> {
        let address = self
            .addresses
            .get(node_name)
            .ok_or_else(|| SchedulerError::Transport(format!("未知节点地址: {node_name}")))?;
        Ok(format!("{address}{path}"))
    }

    fn master(&self) -> SchedulerResult<String> {
        self.membership.master_node().ok_or(SchedulerError::NoMasterNode)
    }

    async fn read_json<T: DeserializeOwned>(
        node_name: &str,
        response: reqwest::Response,
    ) -> SchedulerResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("节点 {} 返回错误状态: HTTP {} - {}", node_name, status, body);
            return Err(SchedulerError::Transport(format!(
                "节点 {node_name} 返回 HTTP {status}: {body}"
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SchedulerError::Transport(format!("解析节点 {node_name} 的响应失败: {e}")))
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        node_name: &str,
        path: &str,
        body: &B,
    ) -> SchedulerResult<T> {
        let url = self.url(node_name, path)?;
        debug!("POST {}", url);
        let response = self.client.post(&url).json(body).send().await.map_err(|e| {
            error!("连接节点 {} 失败: {}", node_name, e);
            SchedulerError::Transport(format!("连接节点 {node_name} 失败: {e}"))
        })?;
        Self::read_json(node_name, response).await
    }

    async fn get<T: DeserializeOwned>(&self, node_name: &str, path: &str) -> SchedulerResult<T> {
        let url = self.url(node_name, path)?;
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await.map_err(|e| {
            error!("连接节点 {} 失败: {}", node_name, e);
            SchedulerError::Transport(format!("连接节点 {node_name} 失败: {e}"))
        })?;
        Self::read_json(node_name, response).await
    }
}

#[async_trait]
impl ClusterTransport for HttpClusterTransport {
    async fn send_lock_request(&self, request: ClusterLockRequest) -> SchedulerResult<bool> {
        let master = self.master()?;
        if let Some(endpoint) = self.local_endpoint(&master) {
            return endpoint.handle_lock_request(request).await;
        }

        let reply: LockReply = self.post(&master, LOCK_PATH, &request).await?;
        Ok(reply.granted)
    }

    async fn pull_tasks(&self, request: TaskPullRequest) -> SchedulerResult<TaskPullResponse> {
        let master = self.master()?;
        if let Some(endpoint) = self.local_endpoint(&master) {
            return pull_through_endpoint(endpoint, request, self.rpc_timeout).await;
        }

        self.post(&master, TASK_PULL_PATH, &request).await
    }

    async fn query_job_node_info(&self, node_name: &str) -> SchedulerResult<Vec<JobNodeInfo>> {
        if let Some(endpoint) = self.local_endpoint(node_name) {
            return endpoint.handle_job_node_info().await;
        }

        self.get(node_name, JOB_NODE_INFO_PATH).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SoloMaster;

    impl ClusterMembership for SoloMaster {
        fn local_node_name(&self) -> &str {
            "node-a"
        }

        fn master_node(&self) -> Option<String> {
            Some("node-b".to_string())
        }

        fn active_nodes(&self) -> Vec<String> {
            vec!["node-a".to_string(), "node-b".to_string()]
        }
    }

    fn peers() -> Vec<PeerConfig> {
        vec![PeerConfig {
            name: "node-b".to_string(),
            address: "http://127.0.0.1:7071/".to_string(),
        }]
    }

    #[test]
    fn test_url_uses_peer_address() {
        let transport =
            HttpClusterTransport::new(Arc::new(SoloMaster), &peers(), Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            transport.url("node-b", TASK_PULL_PATH).unwrap(),
            "http://127.0.0.1:7071/cluster/tasks/pull"
        );
        assert!(transport.url("node-z", LOCK_PATH).unwrap_err().is_transport_error());
        assert_eq!(transport.master().unwrap(), "node-b");
    }

    #[tokio::test]
    async fn test_unknown_node_fails_without_network() {
        let transport =
            HttpClusterTransport::new(Arc::new(SoloMaster), &[], Duration::from_secs(1)).unwrap();
        let result = transport.query_job_node_info("node-b").await;
        assert!(matches!(result, Err(SchedulerError::Transport(_))));
    }

    #[test]
    fn test_lock_reply_wire_format() {
        let json = serde_json::to_string(&LockReply { granted: true }).unwrap();
        assert_eq!(json, r#"{"granted":true}"#);
    }
}
