use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::handler::TaskCallback;
use crate::task_manager::TaskManager;
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::TaskHandle;

const DEFAULT_JOIN_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutStats {
    pub running: usize,
    pub remaining: usize,
    pub completed: usize,
    pub total: usize,
}

#[derive(Default)]
struct FanOutState {
    queue: VecDeque<(TaskHandle, Option<Arc<dyn TaskCallback>>)>,
    stats: FanOutStats,
}

struct Inner {
    engine: Arc<TaskManager>,
    concurrent: usize,
    state: Mutex<FanOutState>,
}

/// 限制并发数的批量任务执行器
///
/// 任务经 [`TaskManager::exec_async`] 提交到执行引擎，因此可被查询、终止，
/// 并随引擎关闭一起排空。所有计数都在同一把锁下修改，
/// 任何时刻运行中的任务不超过 `concurrent` 个。
#[derive(Clone)]
pub struct FanOut {
    inner: Arc<Inner>,
}

/// 任务结束时先转告调用方的回调，再启动队列中的下一个任务
struct ForkCompletion {
    inner: Arc<Inner>,
    callback: Option<Arc<dyn TaskCallback>>,
}

impl TaskCallback for ForkCompletion {
    fn on_success(&self, task: &TaskHandle, result: serde_json::Value) {
        if let Some(callback) = &self.callback {
            callback.on_success(task, result);
        }
        FanOut::finish(&self.inner);
    }

    fn on_failure(&self, task: &TaskHandle, error: SchedulerError) {
        debug!("并发任务 {} 失败: {}", task.display_name(), error);
        if let Some(callback) = &self.callback {
            callback.on_failure(task, error);
        }
        FanOut::finish(&self.inner);
    }
}

impl FanOut {
    pub fn new(engine: Arc<TaskManager>, concurrent: usize) -> SchedulerResult<Self> {
        if concurrent == 0 {
            return Err(SchedulerError::Configuration("并发数必须大于0".to_string()));
        }

        Ok(Self {
            inner: Arc::new(Inner {
                engine,
                concurrent,
                state: Mutex::new(FanOutState::default()),
            }),
        })
    }

    pub fn concurrent(&self) -> usize {
        self.inner.concurrent
    }

    pub fn fork(&self, task: TaskHandle) {
        self.enqueue(task, None);
    }

    pub fn fork_with_callback(&self, task: TaskHandle, callback: Arc<dyn TaskCallback>) {
        self.enqueue(task, Some(callback));
    }

    fn enqueue(&self, task: TaskHandle, callback: Option<Arc<dyn TaskCallback>>) {
        {
            let mut state = self.inner.state.lock();
            state.queue.push_back((task, callback));
            state.stats.remaining += 1;
            state.stats.total += 1;
        }
        Self::start_next(&self.inner);
    }

    fn finish(inner: &Arc<Inner>) {
        {
            let mut state = inner.state.lock();
            state.stats.running -= 1;
            state.stats.completed += 1;
        }
        Self::start_next(inner);
    }

    fn start_next(inner: &Arc<Inner>) {
        let ready: Vec<_> = {
            let mut state = inner.state.lock();
            let mut ready = Vec::new();
            while state.stats.running < inner.concurrent {
                let Some(next) = state.queue.pop_front() else {
                    break;
                };
                state.stats.running += 1;
                state.stats.remaining -= 1;
                ready.push(next);
            }
            ready
        };

        // 提交在锁外进行，引擎同步回调时会重新进入 finish
        for (task, callback) in ready {
            let completion = Arc::new(ForkCompletion {
                inner: Arc::clone(inner),
                callback: callback.clone(),
            });
            if let Err(e) = inner.engine.exec_async(task.clone(), Some(completion), None) {
                warn!("并发任务 {} 提交失败: {}", task.display_name(), e);
                if let Some(callback) = callback {
                    callback.on_failure(&task, e);
                }
                Self::finish(inner);
            }
        }
    }

    pub fn stats(&self) -> FanOutStats {
        self.inner.state.lock().stats
    }

    pub fn busy(&self) -> bool {
        let stats = self.stats();
        stats.running > 0 || stats.remaining > 0
    }

    pub async fn join(&self) {
        self.join_with(DEFAULT_JOIN_POLL).await
    }

    pub async fn join_with(&self, poll: Duration) {
        while self.busy() {
            tokio::time::sleep(poll).await;
        }
    }

    /// 丢弃尚未开始的任务，已运行的不受影响；返回丢弃数量
    pub fn clear(&self) -> usize {
        let mut state = self.inner.state.lock();
        let dropped = state.queue.len();
        state.queue.clear();
        state.stats.remaining -= dropped;
        state.stats.total -= dropped;
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{TaskContext, TaskHandler, TaskHandlerRegistry};
    use async_trait::async_trait;
    use scheduler_core::ExecutorConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// 等待闸门放行；负载为 `{"fail": true}` 时直接失败
    struct GateHandler {
        gate: Arc<Semaphore>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TaskHandler for GateHandler {
        fn task_type(&self) -> &str {
            "gate"
        }

        async fn handle(&self, task: &TaskHandle, context: &TaskContext) -> SchedulerResult<serde_json::Value> {
            if task.payload["fail"].as_bool().unwrap_or(false) {
                return Err(SchedulerError::TaskExecution("odd one out".into()));
            }

            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let outcome = tokio::select! {
                permit = self.gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                    Ok(json!(null))
                }
                _ = context.cancelled() => Err(SchedulerError::TaskExecution("interrupted".into())),
            };
            self.active.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }

    struct Fixture {
        engine: Arc<TaskManager>,
        gate: Arc<Semaphore>,
        peak: Arc<AtomicUsize>,
    }

    fn fixture() -> Fixture {
        let gate = Arc::new(Semaphore::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let handlers = TaskHandlerRegistry::builder()
            .register(Arc::new(GateHandler {
                gate: Arc::clone(&gate),
                active: Arc::new(AtomicUsize::new(0)),
                peak: Arc::clone(&peak),
            }))
            .unwrap()
            .build();
        let config = ExecutorConfig {
            shutdown_poll_interval_ms: 20,
            ..ExecutorConfig::default()
        };
        let engine = Arc::new(TaskManager::new("node-a", Arc::new(handlers), &config).unwrap());
        Fixture { engine, gate, peak }
    }

    fn gate_task() -> TaskHandle {
        TaskHandle::new("batch", "gate", json!({}))
    }

    #[derive(Default)]
    struct CountingCallback {
        successes: AtomicUsize,
        failures: AtomicUsize,
    }

    impl TaskCallback for CountingCallback {
        fn on_success(&self, _task: &TaskHandle, _result: serde_json::Value) {
            self.successes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_failure(&self, _task: &TaskHandle, _error: SchedulerError) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_concurrency() {
        let fixture = fixture();
        let fan_out = FanOut::new(Arc::clone(&fixture.engine), 3).unwrap();

        for _ in 0..10 {
            fan_out.fork(gate_task());
        }

        for _ in 0..10 {
            assert!(fan_out.stats().running <= 3);
            assert!(fixture.engine.get_current_task_count() <= 3);
            tokio::time::sleep(Duration::from_millis(5)).await;
            fixture.gate.add_permits(1);
        }

        fan_out.join_with(Duration::from_millis(5)).await;
        let stats = fan_out.stats();
        assert!(fixture.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(stats.completed, 10);
        assert_eq!(stats.total, 10);
        assert_eq!(stats.running, 0);
    }

    #[tokio::test]
    async fn test_failures_and_callbacks_count_as_completed() {
        let fixture = fixture();
        let fan_out = FanOut::new(Arc::clone(&fixture.engine), 2).unwrap();
        let callback = Arc::new(CountingCallback::default());
        fixture.gate.add_permits(4);

        for i in 0..4 {
            let task = TaskHandle::new("batch", "gate", json!({ "fail": i % 2 == 0 }));
            fan_out.fork_with_callback(task, callback.clone());
        }

        fan_out.join_with(Duration::from_millis(5)).await;
        assert_eq!(callback.failures.load(Ordering::SeqCst), 2);
        assert_eq!(callback.successes.load(Ordering::SeqCst), 2);
        assert_eq!(fan_out.stats().completed, 4);
    }

    #[tokio::test]
    async fn test_clear_drops_queued_only() {
        let fixture = fixture();
        let fan_out = FanOut::new(Arc::clone(&fixture.engine), 1).unwrap();
        let callback = Arc::new(CountingCallback::default());

        for _ in 0..5 {
            fan_out.fork_with_callback(gate_task(), callback.clone());
        }

        assert_eq!(fan_out.clear(), 4);
        fixture.gate.add_permits(5);
        fan_out.join_with(Duration::from_millis(5)).await;

        assert_eq!(callback.successes.load(Ordering::SeqCst), 1);
        assert_eq!(fan_out.stats().total, 1);
    }

    #[tokio::test]
    async fn test_forked_tasks_are_visible_and_drained_by_engine() {
        let fixture = fixture();
        let fan_out = FanOut::new(Arc::clone(&fixture.engine), 2).unwrap();
        let callback = Arc::new(CountingCallback::default());

        for _ in 0..5 {
            fan_out.fork_with_callback(gate_task(), callback.clone());
        }
        assert_eq!(fixture.engine.progress(None).len(), 2);

        // 引擎关闭时终止在途任务，之后排队的任务因引擎已停止而失败
        fixture.engine.shutdown().await;
        fan_out.join_with(Duration::from_millis(5)).await;

        assert_eq!(fixture.engine.get_current_task_count(), 0);
        assert_eq!(callback.failures.load(Ordering::SeqCst), 5);
        assert_eq!(fan_out.stats().completed, 5);
    }

    #[tokio::test]
    async fn test_zero_concurrency_rejected() {
        let fixture = fixture();
        assert!(FanOut::new(fixture.engine, 0).is_err());
    }
}
