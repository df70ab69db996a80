use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::debug;

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::ThreadPoolSpec;

/// 一个线程池规格对应的执行池
///
/// 有界池用 `max_pool_size` 个许可限制同时运行的任务数，超出的任务在
/// 无界等待队列中按提交顺序等待；无界池提交即运行。
pub struct TaskPool {
    spec: ThreadPoolSpec,
    permits: Option<Arc<Semaphore>>,
    runtime: Handle,
    active: Arc<AtomicUsize>,
    thread_seq: AtomicU64,
    shut_down: AtomicBool,
}

impl TaskPool {
    pub fn new(spec: ThreadPoolSpec, runtime: Handle) -> Self {
        let permits = spec
            .is_bounded()
            .then(|| Arc::new(Semaphore::new(spec.max_pool_size)));
        debug!("创建线程池: {}", spec);

        Self {
            spec,
            permits,
            runtime,
            active: Arc::new(AtomicUsize::new(0)),
            thread_seq: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn spec(&self) -> &ThreadPoolSpec {
        &self.spec
    }

    /// 为下一个任务分配显示用的线程名
    pub fn next_thread_name(&self) -> String {
        let seq = self.thread_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", self.spec.name, seq)
    }

    /// 正在运行（已获得许可）的任务数
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn submit<F>(&self, job: F) -> SchedulerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(SchedulerError::TaskRejected(format!(
                "线程池 {} 已关闭",
                self.spec.name
            )));
        }

        let permits = self.permits.clone();
        let active = Arc::clone(&self.active);
        self.runtime.spawn(async move {
            // 关闭后不再接收新任务，已排队的任务仍会执行
            let _permit = match permits {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            active.fetch_add(1, Ordering::SeqCst);
            job.await;
            active.fetch_sub(1, Ordering::SeqCst);
        });
        Ok(())
    }

    pub fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("线程池 {} 已关闭", self.spec.name);
        }
    }
}
