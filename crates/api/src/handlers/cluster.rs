//! 集群内部RPC处理器
//!
//! 请求体和响应体都是领域层消息的JSON形式。

use axum::{extract::State, Json};
use tracing::{debug, warn};

use scheduler_domain::{ClusterLockRequest, JobNodeInfo, TaskPullRequest, TaskPullResponse};
use scheduler_infrastructure::{pull_through_endpoint, server_pull_deadline};
use scheduler_infrastructure::transport::http::LockReply;

use crate::error::{ApiError, ApiResult};
use crate::routes::AppState;

pub async fn handle_lock(
    State(state): State<AppState>,
    Json(request): Json<ClusterLockRequest>,
) -> ApiResult<Json<LockReply>> {
    debug!("收到锁请求: {:?} {}", request.style, request.key);
    let granted = state.endpoint.handle_lock_request(request).await?;
    Ok(Json(LockReply { granted }))
}

/// 客户端断开或等待超过主节点侧期限时，投递失败并回收任务
///
/// 期限短于请求方的超时，请求方放弃之前主节点已先放弃。
pub async fn pull_tasks(
    State(state): State<AppState>,
    Json(request): Json<TaskPullRequest>,
) -> ApiResult<Json<TaskPullResponse>> {
    if request.node_name.is_empty() {
        return Err(ApiError::BadRequest("node_name不能为空".to_string()));
    }

    let node_name = request.node_name.clone();
    let deadline = server_pull_deadline(state.rpc_timeout);
    let response = pull_through_endpoint(state.endpoint.clone(), request, deadline)
        .await
        .inspect_err(|e| warn!("节点 {} 拉取任务失败: {}", node_name, e))?;

    debug!(
        "向节点 {} 返回 {} 个任务",
        node_name, response.total_task_count
    );
    Ok(Json(response))
}

pub async fn job_node_info(State(state): State<AppState>) -> ApiResult<Json<Vec<JobNodeInfo>>> {
    let infos = state.endpoint.handle_job_node_info().await?;
    Ok(Json(infos))
}
