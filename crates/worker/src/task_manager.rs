use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::handler::{NoopCallback, TaskCallback, TaskContext, TaskHandler, TaskHandlerRegistry};
use crate::thread_pool::TaskPool;
use scheduler_core::{ExecutorConfig, SchedulerError, SchedulerResult};
use scheduler_domain::{TaskHandle, ThreadPoolSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Submitted,
    Running,
    Succeeded,
    Failed,
    Terminated,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Terminated
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Submitted => "SUBMITTED",
            TaskState::Running => "RUNNING",
            TaskState::Succeeded => "SUCCEEDED",
            TaskState::Failed => "FAILED",
            TaskState::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

/// 在途任务的进度快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub id: Uuid,
    pub task_name: String,
    pub job_name: String,
    pub task_type: String,
    pub submitted_at: DateTime<Utc>,
    pub thread_name: String,
    pub info: String,
    pub node: String,
    pub state: TaskState,
    pub terminate_requested: bool,
}

/// 任务筛选条件
pub trait TaskCriteria: Send + Sync {
    fn matches(&self, progress: &TaskProgress) -> bool;
}

impl<F> TaskCriteria for F
where
    F: Fn(&TaskProgress) -> bool + Send + Sync,
{
    fn matches(&self, progress: &TaskProgress) -> bool {
        self(progress)
    }
}

/// 按字段组合的常用筛选条件，未设置的字段不参与匹配
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub ids: Option<HashSet<Uuid>>,
    pub job_name: Option<String>,
    pub task_type: Option<String>,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn job(job_name: impl Into<String>) -> Self {
        Self {
            job_name: Some(job_name.into()),
            ..Self::default()
        }
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_ids(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }
}

impl TaskCriteria for TaskFilter {
    fn matches(&self, progress: &TaskProgress) -> bool {
        self.ids.as_ref().map_or(true, |ids| ids.contains(&progress.id))
            && self
                .job_name
                .as_ref()
                .map_or(true, |job| job == &progress.job_name)
            && self
                .task_type
                .as_ref()
                .map_or(true, |task_type| task_type == &progress.task_type)
    }
}

struct RunningTask {
    id: Uuid,
    task: TaskHandle,
    submitted_at: DateTime<Utc>,
    thread_name: String,
    state: Mutex<TaskState>,
    info: Arc<Mutex<String>>,
    cancel: CancellationToken,
    kill: CancellationToken,
}

impl RunningTask {
    fn new(id: Uuid, task: TaskHandle, thread_name: String) -> Self {
        Self {
            id,
            task,
            submitted_at: Utc::now(),
            thread_name,
            state: Mutex::new(TaskState::Submitted),
            info: Arc::new(Mutex::new(String::new())),
            cancel: CancellationToken::new(),
            kill: CancellationToken::new(),
        }
    }

    /// 终态之后不再迁移
    fn transition(&self, to: TaskState) -> bool {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return false;
        }
        *state = to;
        true
    }

    fn progress(&self, node: &str) -> TaskProgress {
        TaskProgress {
            id: self.id,
            task_name: self.task.display_name(),
            job_name: self.task.job_name.clone(),
            task_type: self.task.task_type.clone(),
            submitted_at: self.submitted_at,
            thread_name: self.thread_name.clone(),
            info: self.info.lock().clone(),
            node: node.to_string(),
            state: *self.state.lock(),
            terminate_requested: self.cancel.is_cancelled(),
        }
    }
}

/// 异步任务计数，随任务结束或提交失败自动归还
struct AsyncTaskGuard {
    count: Arc<AtomicUsize>,
}

impl AsyncTaskGuard {
    fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self { count }
    }
}

impl Drop for AsyncTaskGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 在途登记，任务结束、调用方放弃等待或提交失败时都会移除
struct RunningGuard {
    running: Arc<DashMap<Uuid, Arc<RunningTask>>>,
    entry: Arc<RunningTask>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        // 同ID重复提交时只移除自己登记的那一项
        self.running
            .remove_if(&self.entry.id, |_, current| Arc::ptr_eq(current, &self.entry));
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn run_task(
    handler: Arc<dyn TaskHandler>,
    entry: Arc<RunningTask>,
    node_name: String,
) -> SchedulerResult<serde_json::Value> {
    let terminated = || SchedulerError::TaskTerminated {
        id: entry.id.to_string(),
    };

    if entry.cancel.is_cancelled() || !entry.transition(TaskState::Running) {
        entry.transition(TaskState::Terminated);
        return Err(terminated());
    }
    counter!("scheduler_tasks_started_total").increment(1);

    let context = TaskContext::new(
        entry.id,
        node_name,
        entry.cancel.clone(),
        Arc::clone(&entry.info),
    );
    let task = entry.task.clone();
    let scope_context = context.clone();
    let scoped = scope_context.scope(async move { handler.handle(&task, &context).await });

    let outcome = tokio::select! {
        biased;
        _ = entry.kill.cancelled() => Err(terminated()),
        result = AssertUnwindSafe(scoped).catch_unwind() => match result {
            Ok(result) => result,
            Err(payload) => Err(SchedulerError::TaskExecution(format!(
                "任务处理器崩溃: {}",
                panic_message(payload)
            ))),
        },
    };

    match outcome {
        Ok(value) => {
            entry.transition(TaskState::Succeeded);
            counter!("scheduler_tasks_succeeded_total").increment(1);
            Ok(value)
        }
        Err(e) if entry.cancel.is_cancelled() => {
            entry.transition(TaskState::Terminated);
            counter!("scheduler_tasks_terminated_total").increment(1);
            debug!("任务 {} 已终止: {}", entry.id, e);
            Err(terminated())
        }
        Err(e) => {
            entry.transition(TaskState::Failed);
            counter!("scheduler_tasks_failed_total").increment(1);
            Err(e)
        }
    }
}

fn notify(callback: &dyn TaskCallback, task: &TaskHandle, outcome: SchedulerResult<serde_json::Value>) {
    let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| match outcome {
        Ok(value) => callback.on_success(task, value),
        Err(e) => callback.on_failure(task, e),
    }));
    if delivered.is_err() {
        error!("任务 {} 的回调发生崩溃", task.display_name());
    }
}

/// 本地任务执行引擎
pub struct TaskManager {
    node_name: String,
    handlers: Arc<TaskHandlerRegistry>,
    default_pool: ThreadPoolSpec,
    pools: DashMap<ThreadPoolSpec, Arc<TaskPool>>,
    pool_creation: Mutex<()>,
    running: Arc<DashMap<Uuid, Arc<RunningTask>>>,
    async_tasks: Arc<AtomicUsize>,
    stopped: AtomicBool,
    exec_seq: AtomicU64,
    shutdown_poll_interval: Duration,
    runtime: Handle,
}

impl TaskManager {
    /// 必须在tokio运行时内创建
    pub fn new(
        node_name: impl Into<String>,
        handlers: Arc<TaskHandlerRegistry>,
        config: &ExecutorConfig,
    ) -> SchedulerResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| SchedulerError::Internal(format!("执行引擎需要在tokio运行时中创建: {e}")))?;

        Ok(Self {
            node_name: node_name.into(),
            handlers,
            default_pool: ThreadPoolSpec::from(&config.default_pool),
            pools: DashMap::new(),
            pool_creation: Mutex::new(()),
            running: Arc::new(DashMap::new()),
            async_tasks: Arc::new(AtomicUsize::new(0)),
            stopped: AtomicBool::new(false),
            exec_seq: AtomicU64::new(0),
            shutdown_poll_interval: Duration::from_millis(config.shutdown_poll_interval_ms),
            runtime,
        })
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn handlers(&self) -> &TaskHandlerRegistry {
        &self.handlers
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn startup(&self) {
        if self.stopped.swap(false, Ordering::SeqCst) {
            info!("执行引擎已重新启动");
        }
    }

    fn ensure_running(&self) -> SchedulerResult<()> {
        if self.is_stopped() {
            return Err(SchedulerError::EngineStopped);
        }
        Ok(())
    }

    fn register(&self, id: Uuid, task: TaskHandle, thread_name: String) -> RunningGuard {
        let entry = Arc::new(RunningTask::new(id, task, thread_name));
        if self.running.insert(id, Arc::clone(&entry)).is_some() {
            warn!("任务ID {} 重复提交，覆盖旧的在途记录", id);
        }
        RunningGuard {
            running: Arc::clone(&self.running),
            entry,
        }
    }

    fn pool_for(&self, spec: &ThreadPoolSpec) -> Arc<TaskPool> {
        if let Some(pool) = self.pools.get(spec) {
            return Arc::clone(&pool);
        }

        let _guard = self.pool_creation.lock();
        Arc::clone(
            &self
                .pools
                .entry(spec.clone())
                .or_insert_with(|| Arc::new(TaskPool::new(spec.clone(), self.runtime.clone()))),
        )
    }

    /// 在调用方的任务中执行并等待结果
    pub async fn exec(&self, task: TaskHandle) -> SchedulerResult<serde_json::Value> {
        self.ensure_running()?;
        let id = task.id.ok_or(SchedulerError::MissingTaskId)?;
        let handler = self.handlers.find(&task.task_type)?;

        let seq = self.exec_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let registration = self.register(id, task, format!("exec-{seq}"));
        debug!("同步执行任务: {} ({})", registration.entry.task.display_name(), id);

        run_task(handler, Arc::clone(&registration.entry), self.node_name.clone()).await
    }

    /// 提交到线程池后立即返回
    ///
    /// 线程池优先取参数，其次取任务自带的规格，最后用默认池。
    /// 引擎已停止、任务缺少ID或没有对应处理器时直接返回错误，不调用回调；
    /// 线程池拒绝提交时通过回调的失败分支报告，返回 `Ok`。
    pub fn exec_async(
        &self,
        task: TaskHandle,
        callback: Option<Arc<dyn TaskCallback>>,
        thread_pool: Option<ThreadPoolSpec>,
    ) -> SchedulerResult<()> {
        self.ensure_running()?;
        let id = task.id.ok_or(SchedulerError::MissingTaskId)?;
        let handler = self.handlers.find(&task.task_type)?;
        let callback = callback.unwrap_or_else(|| Arc::new(NoopCallback) as Arc<dyn TaskCallback>);

        let spec = thread_pool
            .or_else(|| task.thread_pool.clone())
            .unwrap_or_else(|| self.default_pool.clone());
        let pool = self.pool_for(&spec);
        let registration = self.register(id, task, pool.next_thread_name());
        let entry = Arc::clone(&registration.entry);
        let guard = AsyncTaskGuard::new(Arc::clone(&self.async_tasks));

        let job = {
            let callback = Arc::clone(&callback);
            let node_name = self.node_name.clone();
            async move {
                let _guard = guard;
                let entry = Arc::clone(&registration.entry);
                let outcome = run_task(handler, Arc::clone(&entry), node_name).await;
                drop(registration);
                notify(callback.as_ref(), &entry.task, outcome);
            }
        };

        // 被拒绝的任务闭包随错误一起丢弃，在途登记和计数随之归还
        if let Err(e) = pool.submit(job) {
            warn!("任务 {} 提交到线程池 {} 被拒绝: {}", id, spec.name, e);
            entry.transition(TaskState::Failed);
            notify(callback.as_ref(), &entry.task, Err(e));
        }
        Ok(())
    }

    /// 协作式终止单个任务
    pub fn terminate(&self, id: Uuid) -> bool {
        match self.running.get(&id) {
            Some(entry) => {
                entry.cancel.cancel();
                info!("已请求终止任务 {}", id);
                true
            }
            None => false,
        }
    }

    /// 终止全部符合条件的任务
    ///
    /// `kill` 为真时额外中断处理器的执行，且已请求过终止的任务也会出现在结果中。
    pub fn terminate_matching(&self, criteria: &dyn TaskCriteria, kill: bool) -> Vec<TaskProgress> {
        let mut affected = Vec::new();
        for item in self.running.iter() {
            let entry = item.value();
            let progress = entry.progress(&self.node_name);
            if !criteria.matches(&progress) {
                continue;
            }

            if progress.terminate_requested && !kill {
                continue;
            }

            entry.cancel.cancel();
            if kill {
                entry.kill.cancel();
            }
            affected.push(progress);
        }

        if !affected.is_empty() {
            info!("已请求终止 {} 个任务 (kill={})", affected.len(), kill);
        }
        affected
    }

    pub fn progress(&self, criteria: Option<&dyn TaskCriteria>) -> Vec<TaskProgress> {
        let mut progress: Vec<_> = self
            .running
            .iter()
            .map(|item| item.value().progress(&self.node_name))
            .filter(|p| criteria.map_or(true, |c| c.matches(p)))
            .collect();
        progress.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        progress
    }

    pub fn get_current_task_count(&self) -> usize {
        self.running.len()
    }

    pub fn async_task_count(&self) -> usize {
        self.async_tasks.load(Ordering::SeqCst)
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// 停止接收任务，反复通知在途任务终止，直到全部结束后关闭线程池
    ///
    /// 停止标志在调用 [`TaskManager::startup`] 之前一直保持。
    pub async fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        info!("执行引擎开始关闭");

        loop {
            for item in self.running.iter() {
                item.value().cancel.cancel();
            }

            let pending = self.async_task_count();
            let in_flight = self.running.len();
            if pending == 0 && in_flight == 0 {
                break;
            }

            info!("等待任务结束: 异步任务 {} 个, 在途任务 {} 个", pending, in_flight);
            tokio::time::sleep(self.shutdown_poll_interval).await;
        }

        let _guard = self.pool_creation.lock();
        for item in self.pools.iter() {
            item.value().shutdown();
        }
        self.pools.clear();
        info!("执行引擎已关闭");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct SleepHandler;

    #[async_trait]
    impl TaskHandler for SleepHandler {
        fn task_type(&self) -> &str {
            "sleep"
        }

        async fn handle(&self, task: &TaskHandle, context: &TaskContext) -> SchedulerResult<serde_json::Value> {
            let millis = task.payload["millis"].as_u64().unwrap_or(10_000);
            context.set_info("sleeping");
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(millis)) => Ok(json!({ "slept": millis })),
                _ = context.cancelled() => Err(SchedulerError::TaskExecution("interrupted".into())),
            }
        }
    }

    /// 忽略协作式终止，只能被强制中断
    struct StubbornHandler;

    #[async_trait]
    impl TaskHandler for StubbornHandler {
        fn task_type(&self) -> &str {
            "stubborn"
        }

        async fn handle(&self, _task: &TaskHandle, _context: &TaskContext) -> SchedulerResult<serde_json::Value> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!(null))
        }
    }

    struct PanicHandler;

    #[async_trait]
    impl TaskHandler for PanicHandler {
        fn task_type(&self) -> &str {
            "panic"
        }

        async fn handle(&self, _task: &TaskHandle, _context: &TaskContext) -> SchedulerResult<serde_json::Value> {
            panic!("boom");
        }
    }

    #[derive(Default)]
    struct RecordingCallback {
        successes: Mutex<Vec<serde_json::Value>>,
        failures: Mutex<Vec<SchedulerError>>,
    }

    impl RecordingCallback {
        fn calls(&self) -> usize {
            self.successes.lock().len() + self.failures.lock().len()
        }
    }

    impl TaskCallback for RecordingCallback {
        fn on_success(&self, _task: &TaskHandle, result: serde_json::Value) {
            self.successes.lock().push(result);
        }

        fn on_failure(&self, _task: &TaskHandle, error: SchedulerError) {
            self.failures.lock().push(error);
        }
    }

    fn engine() -> TaskManager {
        let handlers = TaskHandlerRegistry::builder()
            .register(Arc::new(SleepHandler))
            .unwrap()
            .register(Arc::new(StubbornHandler))
            .unwrap()
            .register(Arc::new(PanicHandler))
            .unwrap()
            .build();
        let config = ExecutorConfig {
            shutdown_poll_interval_ms: 20,
            ..ExecutorConfig::default()
        };
        TaskManager::new("node-a", Arc::new(handlers), &config).unwrap()
    }

    fn sleep_task(millis: u64) -> TaskHandle {
        TaskHandle::new("job", "sleep", json!({ "millis": millis }))
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_exec_returns_handler_result() {
        let engine = engine();
        let result = engine.exec(sleep_task(1)).await.unwrap();
        assert_eq!(result, json!({ "slept": 1 }));
        assert_eq!(engine.get_current_task_count(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_exec_does_not_block_shutdown() {
        let engine = engine();
        let waited = tokio::time::timeout(Duration::from_millis(50), engine.exec(sleep_task(60_000))).await;
        assert!(waited.is_err());
        assert_eq!(engine.get_current_task_count(), 0);

        let drained = tokio::time::timeout(Duration::from_secs(2), engine.shutdown()).await;
        assert!(drained.is_ok());
    }

    #[tokio::test]
    async fn test_exec_requires_id_and_handler() {
        let engine = engine();
        let mut task = sleep_task(1);
        task.id = None;
        assert!(matches!(engine.exec(task).await, Err(SchedulerError::MissingTaskId)));

        let unknown = TaskHandle::new("job", "unknown", json!({}));
        assert!(matches!(
            engine.exec(unknown).await,
            Err(SchedulerError::NoHandlerRegistered { .. })
        ));
    }

    #[tokio::test]
    async fn test_exec_async_precondition_errors_skip_callback() {
        let engine = engine();
        let callback = Arc::new(RecordingCallback::default());

        let mut anonymous = sleep_task(1);
        anonymous.id = None;
        assert!(matches!(
            engine.exec_async(anonymous, Some(callback.clone()), None),
            Err(SchedulerError::MissingTaskId)
        ));
        let unknown = TaskHandle::new("job", "unknown", json!({}));
        assert!(matches!(
            engine.exec_async(unknown, Some(callback.clone()), None),
            Err(SchedulerError::NoHandlerRegistered { .. })
        ));

        engine.shutdown().await;
        assert!(matches!(
            engine.exec_async(sleep_task(1), Some(callback.clone()), None),
            Err(SchedulerError::EngineStopped)
        ));

        assert_eq!(callback.calls(), 0);
        assert_eq!(engine.get_current_task_count(), 0);
    }

    #[tokio::test]
    async fn test_exec_async_reports_through_callback() {
        let engine = engine();
        let callback = Arc::new(RecordingCallback::default());

        engine
            .exec_async(sleep_task(5), Some(callback.clone()), None)
            .unwrap();
        wait_for(|| callback.calls() == 1).await;

        assert_eq!(callback.successes.lock()[0], json!({ "slept": 5 }));
        wait_for(|| engine.async_task_count() == 0).await;
        assert_eq!(engine.get_current_task_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_handler_routes_to_failure() {
        let engine = engine();
        let callback = Arc::new(RecordingCallback::default());

        engine
            .exec_async(TaskHandle::new("job", "panic", json!({})), Some(callback.clone()), None)
            .unwrap();
        wait_for(|| callback.calls() == 1).await;

        assert!(matches!(
            callback.failures.lock()[0],
            SchedulerError::TaskExecution(ref msg) if msg.contains("boom")
        ));
    }

    #[tokio::test]
    async fn test_cooperative_terminate() {
        let engine = engine();
        let callback = Arc::new(RecordingCallback::default());
        let task = sleep_task(60_000);
        let id = task.id.unwrap();

        engine.exec_async(task, Some(callback.clone()), None).unwrap();
        wait_for(|| engine.progress(None).iter().any(|p| p.info == "sleeping")).await;

        let progress = engine.progress(None);
        assert_eq!(progress[0].state, TaskState::Running);
        assert_eq!(progress[0].thread_name, "default-1");
        assert_eq!(progress[0].node, "node-a");

        assert!(engine.terminate(id));
        wait_for(|| callback.calls() == 1).await;
        assert!(matches!(
            callback.failures.lock()[0],
            SchedulerError::TaskTerminated { .. }
        ));
        assert!(!engine.terminate(id));
    }

    #[tokio::test]
    async fn test_kill_interrupts_stubborn_handler_and_reports_already_terminated() {
        let engine = engine();
        let callback = Arc::new(RecordingCallback::default());
        let task = TaskHandle::new("job", "stubborn", json!({}));

        engine.exec_async(task, Some(callback.clone()), None).unwrap();
        wait_for(|| engine.get_current_task_count() == 1).await;

        let signalled = engine.terminate_matching(&TaskFilter::job("job"), false);
        assert_eq!(signalled.len(), 1);

        // 已请求终止的任务不会再次出现在协作式终止结果中
        assert!(engine.terminate_matching(&TaskFilter::job("job"), false).is_empty());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(callback.calls(), 0);

        let killed = engine.terminate_matching(&TaskFilter::job("job"), true);
        assert_eq!(killed.len(), 1);
        assert!(killed[0].terminate_requested);

        wait_for(|| callback.calls() == 1).await;
        assert!(matches!(
            callback.failures.lock()[0],
            SchedulerError::TaskTerminated { .. }
        ));
    }

    #[tokio::test]
    async fn test_closure_criteria() {
        let engine = engine();
        engine.exec_async(sleep_task(60_000), None, None).unwrap();
        engine
            .exec_async(TaskHandle::new("other", "sleep", json!({ "millis": 60_000 })), None, None)
            .unwrap();
        wait_for(|| engine.get_current_task_count() == 2).await;

        let only_other = |p: &TaskProgress| p.job_name == "other";
        assert_eq!(engine.progress(Some(&only_other)).len(), 1);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_bounded_pool_from_task_spec() {
        let engine = engine();
        let callback = Arc::new(RecordingCallback::default());
        let spec = ThreadPoolSpec::new("narrow", 5, 1, 1);

        for _ in 0..3 {
            engine
                .exec_async(sleep_task(5).with_thread_pool(spec.clone()), Some(callback.clone()), None)
                .unwrap();
        }
        wait_for(|| callback.calls() == 3).await;
        assert_eq!(engine.pool_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_blocks_until_startup() {
        let engine = engine();
        let callback = Arc::new(RecordingCallback::default());
        for _ in 0..4 {
            engine
                .exec_async(sleep_task(60_000), Some(callback.clone()), None)
                .unwrap();
        }
        wait_for(|| engine.get_current_task_count() == 4).await;

        engine.shutdown().await;
        assert_eq!(engine.get_current_task_count(), 0);
        assert_eq!(engine.async_task_count(), 0);
        assert_eq!(engine.pool_count(), 0);
        assert_eq!(callback.calls(), 4);

        assert!(matches!(
            engine.exec(sleep_task(1)).await,
            Err(SchedulerError::EngineStopped)
        ));
        assert!(matches!(
            engine.exec_async(sleep_task(1), None, None),
            Err(SchedulerError::EngineStopped)
        ));

        engine.startup();
        assert!(engine.exec(sleep_task(1)).await.is_ok());
    }
}
