use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scheduler_core::TaskQueueConfig;
use scheduler_domain::TaskHandle;

/// 队列被清理时的回调，参数为作业名和队列中剩余的任务
pub type DestructionCallback = Arc<dyn Fn(&str, Vec<TaskHandle>) + Send + Sync>;

/// 按作业记录的队列深度副本
///
/// 每个队列实例带有独立的代号，只有代号匹配的队列才能改写或移除记录，
/// 已被清理的旧队列不会覆盖同名新队列的深度。
#[derive(Default)]
struct DepthReplica {
    depths: DashMap<String, (u64, usize)>,
}

impl DepthReplica {
    fn open(&self, job_name: &str, generation: u64) {
        self.depths.insert(job_name.to_string(), (generation, 0));
    }

    fn record(&self, job_name: &str, generation: u64, depth: usize) {
        if let Some(mut entry) = self.depths.get_mut(job_name) {
            if entry.0 == generation {
                entry.1 = depth;
            }
        }
    }

    fn retire(&self, job_name: &str, generation: u64) {
        self.depths
            .remove_if(job_name, |_, (current, _)| *current == generation);
    }

    fn get(&self, job_name: &str) -> Option<usize> {
        self.depths.get(job_name).map(|entry| entry.1)
    }
}

/// 单个作业的待执行任务队列
pub struct TaskQueue {
    job_name: String,
    generation: u64,
    capacity: usize,
    items: Mutex<VecDeque<TaskHandle>>,
    closed: AtomicBool,
    last_access: Mutex<Instant>,
    on_destroy: Option<DestructionCallback>,
    depths: Arc<DepthReplica>,
}

impl TaskQueue {
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 队列已满或已被清理时返回 false
    pub fn offer(&self, task: TaskHandle) -> bool {
        let mut items = self.items.lock();
        if self.closed.load(Ordering::SeqCst) || items.len() >= self.capacity {
            return false;
        }
        items.push_back(task);
        self.depths.record(&self.job_name, self.generation, items.len());
        true
    }

    pub fn poll(&self) -> Option<TaskHandle> {
        let mut items = self.items.lock();
        let task = items.pop_front();
        if task.is_some() {
            self.depths.record(&self.job_name, self.generation, items.len());
        }
        task
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn touch(&self, now: Instant) {
        *self.last_access.lock() = now;
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_access.lock())
    }

    fn close(&self) -> Vec<TaskHandle> {
        let mut items = self.items.lock();
        self.closed.store(true, Ordering::SeqCst);
        items.drain(..).collect()
    }
}

/// 按作业缓存待执行任务，长时间未访问的队列会被清理
///
/// 队列深度记录在独立的副本中，查询深度不会刷新队列的访问时间。
pub struct TaskQueueCache {
    queues: DashMap<String, Arc<TaskQueue>>,
    depths: Arc<DepthReplica>,
    next_generation: AtomicU64,
    idle_timeout: Duration,
    capacity: usize,
    eviction_interval: Duration,
    default_on_destroy: Option<DestructionCallback>,
}

impl TaskQueueCache {
    pub fn new(config: &TaskQueueConfig) -> Self {
        Self {
            queues: DashMap::new(),
            depths: Arc::new(DepthReplica::default()),
            next_generation: AtomicU64::new(0),
            idle_timeout: Duration::from_secs(config.idle_timeout_seconds),
            capacity: config.capacity,
            eviction_interval: Duration::from_secs(config.eviction_interval_seconds),
            default_on_destroy: None,
        }
    }

    /// 未单独指定回调的队列使用此回调
    pub fn with_destruction_callback(mut self, callback: DestructionCallback) -> Self {
        self.default_on_destroy = Some(callback);
        self
    }

    pub fn get_or_create(&self, job_name: &str) -> Arc<TaskQueue> {
        self.get_or_create_with(job_name, self.default_on_destroy.clone())
    }

    /// 首次创建时绑定清理回调；队列已存在时忽略传入的回调
    pub fn get_or_create_with(
        &self,
        job_name: &str,
        on_destroy: Option<DestructionCallback>,
    ) -> Arc<TaskQueue> {
        let now = Instant::now();
        let queue = Arc::clone(
            &self
                .queues
                .entry(job_name.to_string())
                .or_insert_with(|| {
                    debug!("创建作业 {} 的任务队列", job_name);
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    self.depths.open(job_name, generation);
                    Arc::new(TaskQueue {
                        job_name: job_name.to_string(),
                        generation,
                        capacity: self.capacity,
                        items: Mutex::new(VecDeque::new()),
                        closed: AtomicBool::new(false),
                        last_access: Mutex::new(now),
                        on_destroy,
                        depths: Arc::clone(&self.depths),
                    })
                }),
        );
        queue.touch(now);
        queue
    }

    /// 不刷新访问时间；队列不存在或已被清理时为 None
    pub fn task_count(&self, job_name: &str) -> Option<usize> {
        self.depths.get(job_name)
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    /// 清理在 `now` 时已空闲超过超时时间的队列，返回清理数量
    pub fn evict_idle_at(&self, now: Instant) -> usize {
        let idle: Vec<Arc<TaskQueue>> = self
            .queues
            .iter()
            .filter(|entry| entry.value().idle_for(now) >= self.idle_timeout)
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut evicted = 0;
        for queue in idle {
            let removed = self.queues.remove_if(&queue.job_name, |_, current| {
                Arc::ptr_eq(current, &queue) && current.idle_for(now) >= self.idle_timeout
            });
            if removed.is_some() {
                self.destroy(&queue);
                evicted += 1;
            }
        }

        if evicted > 0 {
            counter!("scheduler_task_queue_evictions_total").increment(evicted as u64);
        }
        evicted
    }

    /// 清理全部队列，停机时调用
    pub fn invalidate_all(&self) {
        let names: Vec<String> = self.queues.iter().map(|entry| entry.key().clone()).collect();
        for name in names {
            if let Some((_, queue)) = self.queues.remove(&name) {
                self.destroy(&queue);
            }
        }
    }

    fn destroy(&self, queue: &TaskQueue) {
        let remaining = queue.close();
        self.depths.retire(&queue.job_name, queue.generation);

        if !remaining.is_empty() {
            warn!(
                "作业 {} 的任务队列被清理，仍有 {} 个任务未执行",
                queue.job_name,
                remaining.len()
            );
        } else {
            debug!("作业 {} 的任务队列已清理", queue.job_name);
        }

        if let Some(callback) = &queue.on_destroy {
            callback(&queue.job_name, remaining);
        }
    }

    pub fn start_eviction_loop(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut ticker = tokio::time::interval(self.eviction_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = self.evict_idle();
                        if evicted > 0 {
                            debug!("清理了 {} 个空闲任务队列", evicted);
                        }
                    }
                    _ = shutdown.cancelled() => {
                        self.invalidate_all();
                        info!("任务队列清理任务退出");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> TaskQueueConfig {
        TaskQueueConfig {
            idle_timeout_seconds: 60,
            capacity: 2,
            eviction_interval_seconds: 10,
        }
    }

    fn task(job: &str) -> TaskHandle {
        TaskHandle::new(job, "noop", json!({}))
    }

    #[test]
    fn test_queue_is_bounded() {
        let cache = TaskQueueCache::new(&config());
        let queue = cache.get_or_create("report");

        assert!(queue.offer(task("report")));
        assert!(queue.offer(task("report")));
        assert!(!queue.offer(task("report")));
        assert_eq!(cache.task_count("report"), Some(2));

        assert!(queue.poll().is_some());
        assert_eq!(cache.task_count("report"), Some(1));
    }

    #[test]
    fn test_get_or_create_reuses_queue() {
        let cache = TaskQueueCache::new(&config());
        let a = cache.get_or_create("report");
        let b = cache.get_or_create("report");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.task_count("missing"), None);
    }

    #[test]
    fn test_idle_queue_evicted_once() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);
        let cache = TaskQueueCache::new(&config()).with_destruction_callback(Arc::new(
            move |job: &str, remaining: Vec<TaskHandle>| {
                recorded.lock().push((job.to_string(), remaining.len()));
            },
        ));

        let queue = cache.get_or_create("report");
        assert!(queue.offer(task("report")));

        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(cache.evict_idle_at(later), 1);
        assert_eq!(cache.evict_idle_at(later), 0);

        assert_eq!(*calls.lock(), vec![("report".to_string(), 1)]);
        assert_eq!(cache.task_count("report"), None);
        assert!(queue.is_closed());
        assert!(!queue.offer(task("report")));
    }

    #[test]
    fn test_task_count_does_not_refresh_idle_clock() {
        let cache = TaskQueueCache::new(&config());
        cache.get_or_create("report");

        let start = Instant::now();
        for _ in 0..10 {
            assert_eq!(cache.task_count("report"), Some(0));
        }

        assert_eq!(cache.evict_idle_at(start + Duration::from_secs(61)), 1);
    }

    #[test]
    fn test_access_keeps_queue_alive() {
        let cache = TaskQueueCache::new(&config());
        cache.get_or_create("report");
        assert_eq!(cache.evict_idle_at(Instant::now() + Duration::from_secs(30)), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_per_job_callback_overrides_default() {
        let default_calls = Arc::new(Mutex::new(0));
        let job_calls = Arc::new(Mutex::new(0));
        let (d, j) = (Arc::clone(&default_calls), Arc::clone(&job_calls));

        let cache = TaskQueueCache::new(&config())
            .with_destruction_callback(Arc::new(move |_: &str, _: Vec<TaskHandle>| *d.lock() += 1));
        cache.get_or_create_with(
            "special",
            Some(Arc::new(move |_: &str, _: Vec<TaskHandle>| *j.lock() += 1)),
        );
        cache.get_or_create("plain");

        cache.invalidate_all();
        assert_eq!(*default_calls.lock(), 1);
        assert_eq!(*job_calls.lock(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_recreated_queue_keeps_its_depth_while_old_one_is_destroyed() {
        let cache = TaskQueueCache::new(&config());
        let old = cache.get_or_create("report");
        assert!(old.offer(task("report")));

        // 淘汰已把旧队列移出映射但尚未清理时，同名队列被重新创建
        cache.queues.remove("report");
        let fresh = cache.get_or_create("report");
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert_eq!(cache.task_count("report"), Some(0));

        assert!(old.offer(task("report")));
        assert_eq!(cache.task_count("report"), Some(0));

        cache.destroy(&old);
        assert!(!old.offer(task("report")));
        assert_eq!(cache.task_count("report"), Some(0));

        assert!(fresh.offer(task("report")));
        assert_eq!(cache.task_count("report"), Some(1));
    }
}
