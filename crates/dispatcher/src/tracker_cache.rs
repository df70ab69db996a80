use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::gauge;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::schedule::{ScheduleCalculator, ScheduleTimes};
use scheduler_core::{SchedulerResult, TrackerConfig};
use scheduler_domain::{JobNodeBinding, JobNodeKey, JobNodeStore};

const NEVER_EXECUTED: i64 = i64::MIN;

/// 跨刷新保留的计数器
#[derive(Debug)]
struct TrackerCounters {
    current_task_count: AtomicU32,
    last_executed_millis: AtomicI64,
    reference_time: DateTime<Utc>,
}

impl TrackerCounters {
    fn new() -> Self {
        Self {
            current_task_count: AtomicU32::new(0),
            last_executed_millis: AtomicI64::new(NEVER_EXECUTED),
            reference_time: Utc::now(),
        }
    }
}

/// 一个作业/节点绑定的实时状态
#[derive(Debug)]
pub struct JobNodeTracker {
    binding: JobNodeBinding,
    counters: Arc<TrackerCounters>,
    calculator: Arc<ScheduleCalculator>,
}

impl JobNodeTracker {
    pub fn binding(&self) -> &JobNodeBinding {
        &self.binding
    }

    pub fn key(&self) -> JobNodeKey {
        self.binding.key()
    }

    pub fn job_name(&self) -> &str {
        &self.binding.job.name
    }

    pub fn calculator(&self) -> Arc<ScheduleCalculator> {
        Arc::clone(&self.calculator)
    }

    pub fn current_task_count(&self) -> u32 {
        self.counters.current_task_count.load(Ordering::SeqCst)
    }

    /// 任务开始，返回新的计数
    pub fn task_started(&self) -> u32 {
        self.counters.current_task_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// 任务结束，计数不会小于0
    pub fn task_finished(&self) -> u32 {
        match self
            .counters
            .current_task_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_sub(1)
            }) {
            Ok(previous) => previous - 1,
            Err(_) => {
                warn!(
                    "作业 {} 的任务计数已为0，忽略过期的任务结束通知",
                    self.binding.key()
                );
                0
            }
        }
    }

    /// 还能启动多少个任务
    pub fn available_slots(&self) -> u32 {
        self.binding
            .task_limit
            .saturating_sub(self.current_task_count())
    }

    pub fn last_executed_time(&self) -> Option<DateTime<Utc>> {
        match self.counters.last_executed_millis.load(Ordering::SeqCst) {
            NEVER_EXECUTED => None,
            millis => DateTime::from_timestamp_millis(millis),
        }
    }

    pub fn mark_executed(&self, at: DateTime<Utc>) {
        self.counters
            .last_executed_millis
            .store(at.timestamp_millis(), Ordering::SeqCst);
    }

    /// 从未执行过时作为调度起算点
    pub fn schedule_reference_time(&self) -> DateTime<Utc> {
        self.counters.reference_time
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.calculator
            .is_due(self.last_executed_time(), self.schedule_reference_time(), now)
    }

    pub fn schedule_times(&self) -> ScheduleTimes {
        let last_executed = self.last_executed_time();
        let reference = last_executed.unwrap_or_else(|| self.schedule_reference_time());
        self.calculator.compute_next(Some(reference), last_executed)
    }
}

/// 不可变的跟踪器快照
#[derive(Debug, Default)]
pub struct TrackerSnapshot {
    trackers: HashMap<JobNodeKey, Arc<JobNodeTracker>>,
}

impl TrackerSnapshot {
    pub fn get(&self, key: &JobNodeKey) -> Option<Arc<JobNodeTracker>> {
        self.trackers.get(key).cloned()
    }

    pub fn trackers(&self) -> Vec<Arc<JobNodeTracker>> {
        let mut trackers: Vec<_> = self.trackers.values().cloned().collect();
        trackers.sort_by(|a, b| a.key().cmp(&b.key()));
        trackers
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}

/// 作业/节点跟踪缓存
///
/// 首次访问时在创建锁下构建快照，之后每个刷新间隔最多由一个调用方刷新一次，
/// 其余调用方继续使用旧快照。刷新失败时保留旧快照，首次构建失败则向上传播。
pub struct JobNodeTrackerCache {
    node_name: String,
    store: Arc<dyn JobNodeStore>,
    refresh_interval: Duration,
    snapshot: RwLock<Option<Arc<TrackerSnapshot>>>,
    last_refresh: Mutex<Instant>,
    creation_lock: tokio::sync::Mutex<()>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl JobNodeTrackerCache {
    pub fn new(
        node_name: impl Into<String>,
        store: Arc<dyn JobNodeStore>,
        config: &TrackerConfig,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            store,
            refresh_interval: Duration::from_secs(config.refresh_interval_seconds),
            snapshot: RwLock::new(None),
            last_refresh: Mutex::new(Instant::now()),
            creation_lock: tokio::sync::Mutex::new(()),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    fn current(&self) -> Option<Arc<TrackerSnapshot>> {
        self.snapshot.read().clone()
    }

    fn is_stale(&self) -> bool {
        self.last_refresh.lock().elapsed() >= self.refresh_interval
    }

    pub async fn get_trackers(&self) -> SchedulerResult<Arc<TrackerSnapshot>> {
        if let Some(snapshot) = self.current() {
            if self.is_stale() {
                if let Ok(_guard) = self.refresh_lock.try_lock() {
                    if self.is_stale() {
                        self.refresh_locked(snapshot.clone()).await;
                    }
                }
            }
            return Ok(self.current().unwrap_or(snapshot));
        }

        let _guard = self.creation_lock.lock().await;
        if let Some(snapshot) = self.current() {
            return Ok(snapshot);
        }

        let snapshot = Arc::new(self.build(None).await?);
        info!(
            "节点 {} 的跟踪缓存初始化完成，共 {} 个跟踪器",
            self.node_name,
            snapshot.len()
        );
        self.publish(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// 等待刷新锁并立即刷新
    pub async fn force_refresh(&self) -> SchedulerResult<Arc<TrackerSnapshot>> {
        let previous = match self.current() {
            Some(snapshot) => snapshot,
            None => return self.get_trackers().await,
        };

        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked(previous).await;
        Ok(self.current().unwrap_or_default())
    }

    async fn refresh_locked(&self, previous: Arc<TrackerSnapshot>) {
        match self.build(Some(&previous)).await {
            Ok(snapshot) => {
                debug!(
                    "节点 {} 的跟踪缓存已刷新，共 {} 个跟踪器",
                    self.node_name,
                    snapshot.len()
                );
                self.publish(Arc::new(snapshot));
            }
            Err(e) => {
                error!("刷新节点 {} 的跟踪缓存失败，继续使用旧快照: {}", self.node_name, e);
                *self.last_refresh.lock() = Instant::now();
            }
        }
    }

    fn publish(&self, snapshot: Arc<TrackerSnapshot>) {
        gauge!("scheduler_tracker_cache_trackers").set(snapshot.len() as f64);
        *self.snapshot.write() = Some(snapshot);
        *self.last_refresh.lock() = Instant::now();
    }

    async fn build(&self, previous: Option<&TrackerSnapshot>) -> SchedulerResult<TrackerSnapshot> {
        let bindings = self.store.find_bindings_for_node(&self.node_name).await?;
        let mut trackers = HashMap::new();

        for binding in bindings {
            if !binding.is_enabled() || binding.node_name != self.node_name {
                continue;
            }

            let key = binding.key();
            let previous_tracker = previous.and_then(|p| p.get(&key));
            let job = &binding.job;

            let calculator = match &previous_tracker {
                Some(tracker) if tracker.calculator.matches(job.schedule_type, &job.schedule_expression) => {
                    Arc::clone(&tracker.calculator)
                }
                _ => {
                    debug!(
                        "编译作业 {} 的调度表达式: {} {}",
                        key, job.schedule_type, job.schedule_expression
                    );
                    Arc::new(ScheduleCalculator::compile(
                        job.schedule_type,
                        &job.schedule_expression,
                    )?)
                }
            };

            let counters = previous_tracker
                .map(|tracker| Arc::clone(&tracker.counters))
                .unwrap_or_else(|| Arc::new(TrackerCounters::new()));

            trackers.insert(
                key,
                Arc::new(JobNodeTracker {
                    binding,
                    counters,
                    calculator,
                }),
            );
        }

        Ok(TrackerSnapshot { trackers })
    }

    pub async fn tracker(
        &self,
        job_name: &str,
        node_name: &str,
    ) -> SchedulerResult<Option<Arc<JobNodeTracker>>> {
        let snapshot = self.get_trackers().await?;
        Ok(snapshot.get(&JobNodeKey::new(job_name, node_name)))
    }

    /// 本节点上指定作业的跟踪器
    pub async fn tracker_for_job(&self, job_name: &str) -> SchedulerResult<Option<Arc<JobNodeTracker>>> {
        self.tracker(job_name, &self.node_name).await
    }

    pub async fn trackers(&self) -> SchedulerResult<Vec<Arc<JobNodeTracker>>> {
        Ok(self.get_trackers().await?.trackers())
    }

    pub async fn calculator(
        &self,
        binding: &JobNodeBinding,
    ) -> SchedulerResult<Option<Arc<ScheduleCalculator>>> {
        let snapshot = self.get_trackers().await?;
        Ok(snapshot.get(&binding.key()).map(|t| t.calculator()))
    }

    /// 已到期且还有空闲并发额度的跟踪器
    pub async fn due_trackers(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<Arc<JobNodeTracker>>> {
        let snapshot = self.get_trackers().await?;
        Ok(snapshot
            .trackers()
            .into_iter()
            .filter(|t| t.available_slots() > 0 && t.is_due(now))
            .collect())
    }

    /// 后台定时检查快照是否过期
    pub fn start_refresh_loop(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut refresh_interval = tokio::time::interval(self.refresh_interval.max(Duration::from_millis(100)));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = refresh_interval.tick() => {
                        if let Err(e) = self.get_trackers().await {
                            error!("节点 {} 的跟踪缓存尚未初始化: {}", self.node_name, e);
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("跟踪缓存刷新任务退出");
                        break;
                    }
                }
            }
        })
    }
}
