//! 集群RPC传输层

pub mod http;
pub mod local;

pub use http::HttpClusterTransport;
pub use local::LocalClusterTransport;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{ClusterEndpoint, PullResponder, TaskPullRequest, TaskPullResponse};

const SERVER_DEADLINE_MARGIN: Duration = Duration::from_millis(500);

/// 主节点侧等待拉取处理的期限，严格短于请求方的超时
///
/// 请求方先放弃而主节点仍投递成功时任务会丢失；留出余量让主节点先放弃，
/// 迟到的投递失败后走回收路径。
pub fn server_pull_deadline(client_timeout: Duration) -> Duration {
    client_timeout
        .saturating_sub(SERVER_DEADLINE_MARGIN)
        .max(client_timeout / 2)
}

/// 把拉取响应交给等待中的请求方；请求方已放弃时投递失败
pub struct OneshotResponder {
    sender: oneshot::Sender<TaskPullResponse>,
}

impl OneshotResponder {
    pub fn channel() -> (Self, oneshot::Receiver<TaskPullResponse>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl PullResponder for OneshotResponder {
    async fn deliver(self: Box<Self>, response: TaskPullResponse) -> SchedulerResult<()> {
        self.sender
            .send(response)
            .map_err(|_| SchedulerError::Delivery("请求方已放弃等待".to_string()))
    }
}

/// 在独立任务中调用端点的拉取处理并等待响应
///
/// 等待超时或调用方被取消时接收端被丢弃，端点侧的投递随之失败并回收任务。
pub async fn pull_through_endpoint(
    endpoint: Arc<dyn ClusterEndpoint>,
    request: TaskPullRequest,
    timeout: Duration,
) -> SchedulerResult<TaskPullResponse> {
    let (responder, receiver) = OneshotResponder::channel();
    let node_name = request.node_name.clone();
    let handle = tokio::spawn(async move {
        endpoint
            .handle_task_pull(request, Box::new(responder))
            .await
    });

    match tokio::time::timeout(timeout, receiver).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(_)) => match handle.await {
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) => Err(SchedulerError::Internal(
                "拉取处理结束但没有投递响应".to_string(),
            )),
            Err(e) => Err(SchedulerError::Internal(format!("拉取处理任务异常退出: {e}"))),
        },
        Err(_) => {
            debug!("节点 {} 的拉取请求等待超时", node_name);
            Err(SchedulerError::Transport(format!(
                "拉取任务超时({}ms)",
                timeout.as_millis()
            )))
        }
    }
}
