use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::handler::TaskCallback;
use crate::task_manager::TaskManager;
use scheduler_core::{DispatchConfig, SchedulerError, SchedulerResult};
use scheduler_dispatcher::{JobNodeTracker, JobNodeTrackerCache};
use scheduler_domain::{ClusterTransport, RequiredTaskRequest, TaskHandle, TaskPullRequest};

/// 任务结束时归还跟踪器的并发额度，只归还一次
struct TrackingCallback {
    tracker: Arc<JobNodeTracker>,
    finished: AtomicBool,
}

impl TrackingCallback {
    fn new(tracker: Arc<JobNodeTracker>) -> Self {
        Self {
            tracker,
            finished: AtomicBool::new(false),
        }
    }

    fn finish(&self) {
        if !self.finished.swap(true, Ordering::SeqCst) {
            self.tracker.task_finished();
        }
    }
}

impl TaskCallback for TrackingCallback {
    fn on_success(&self, task: &TaskHandle, _result: serde_json::Value) {
        debug!("任务 {} 执行成功", task.display_name());
        self.finish();
    }

    fn on_failure(&self, task: &TaskHandle, error: SchedulerError) {
        warn!("任务 {} 执行失败: {}", task.display_name(), error);
        self.finish();
    }
}

/// Worker侧的任务拉取
///
/// 按固定间隔把本节点已到期且有空闲额度的绑定发给主节点，
/// 收到的任务提交给本地执行引擎。
pub struct TaskPuller {
    node_name: String,
    cache: Arc<JobNodeTrackerCache>,
    transport: Arc<dyn ClusterTransport>,
    engine: Arc<TaskManager>,
    pull_interval: Duration,
}

impl TaskPuller {
    pub fn new(
        cache: Arc<JobNodeTrackerCache>,
        transport: Arc<dyn ClusterTransport>,
        engine: Arc<TaskManager>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            node_name: cache.node_name().to_string(),
            cache,
            transport,
            engine,
            pull_interval: Duration::from_secs(config.pull_interval_seconds),
        }
    }

    /// 没有到期的绑定时返回 None
    pub async fn build_request(&self, now: DateTime<Utc>) -> SchedulerResult<Option<TaskPullRequest>> {
        let due = self.cache.due_trackers(now).await?;
        if due.is_empty() {
            return Ok(None);
        }

        let required_tasks = due
            .iter()
            .map(|tracker| RequiredTaskRequest::new(tracker.binding().clone(), tracker.available_slots()))
            .collect();

        Ok(Some(TaskPullRequest {
            node_name: self.node_name.clone(),
            required_tasks,
        }))
    }

    /// 拉取一次，返回提交给执行引擎的任务数
    pub async fn pull_once(&self) -> SchedulerResult<usize> {
        let now = Utc::now();
        let Some(request) = self.build_request(now).await? else {
            return Ok(0);
        };

        debug!(
            "节点 {} 请求任务: {} 个绑定",
            self.node_name,
            request.required_tasks.len()
        );
        let response = self.transport.pull_tasks(request).await?;

        let mut submitted = 0;
        for batch in response.tasks_by_binding {
            let job_name = batch.binding.job.name.clone();
            let Some(tracker) = self.cache.tracker(&job_name, &self.node_name).await? else {
                warn!("收到未知绑定 {}@{} 的 {} 个任务", job_name, self.node_name, batch.tasks.len());
                continue;
            };

            tracker.mark_executed(now);
            for task in batch.tasks {
                tracker.task_started();
                let callback = Arc::new(TrackingCallback::new(Arc::clone(&tracker)));
                let display_name = task.display_name();

                match self.engine.exec_async(task, Some(callback.clone()), None) {
                    Ok(()) => submitted += 1,
                    Err(e) => {
                        error!("提交任务 {} 失败: {}", display_name, e);
                        callback.finish();
                    }
                }
            }
        }

        if submitted > 0 {
            info!("节点 {} 收到并提交 {} 个任务", self.node_name, submitted);
        }
        Ok(submitted)
    }

    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut ticker = tokio::time::interval(self.pull_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tokio::spawn(async move {
            info!("节点 {} 的任务拉取循环启动", self.node_name);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if self.engine.is_stopped() {
                            continue;
                        }
                        if let Err(e) = self.pull_once().await {
                            error!("拉取任务失败: {}", e);
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("任务拉取循环退出");
                        break;
                    }
                }
            }
        })
    }
}
