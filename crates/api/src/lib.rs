//! # Scheduler API
//!
//! 把节点的 [`ClusterEndpoint`](scheduler_domain::ClusterEndpoint) 以HTTP形式暴露给集群内其他节点。
//!
//! ## API 端点
//!
//! - `GET /health` - 健康检查
//! - `POST /cluster/lock` - 锁请求，应答 `{"granted": bool}`
//! - `POST /cluster/tasks/pull` - 向主节点拉取任务
//! - `GET /cluster/job-node-info` - 本节点的作业执行信息
//!
//! 错误响应统一为 `{"error": {"message", "type", "code", "timestamp"}}`。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;

use axum::Router;
use std::sync::Arc;
use std::time::Duration;

use scheduler_domain::ClusterEndpoint;

pub use error::{ApiError, ApiResult};
pub use routes::{create_routes, AppState};

/// 创建带中间件的完整应用
pub fn create_app(
    node_name: impl Into<String>,
    endpoint: Arc<dyn ClusterEndpoint>,
    rpc_timeout: Duration,
) -> Router {
    let state = AppState {
        node_name: node_name.into(),
        endpoint,
        rpc_timeout,
    };

    create_routes(state)
        .layer(axum::middleware::from_fn(middleware::request_logging))
        .layer(middleware::trace_layer())
}
