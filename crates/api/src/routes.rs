use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;

use scheduler_domain::ClusterEndpoint;
use scheduler_infrastructure::transport::http::{JOB_NODE_INFO_PATH, LOCK_PATH, TASK_PULL_PATH};

use crate::handlers::{
    cluster::{handle_lock, job_node_info, pull_tasks},
    health::health_check,
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub node_name: String,
    pub endpoint: Arc<dyn ClusterEndpoint>,
    /// 集群RPC的请求方超时，主节点侧的拉取期限由它推出
    pub rpc_timeout: Duration,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 集群内部RPC
        .route(LOCK_PATH, post(handle_lock))
        .route(TASK_PULL_PATH, post(pull_tasks))
        .route(JOB_NODE_INFO_PATH, get(job_node_info))
        .with_state(state)
}
