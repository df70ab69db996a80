use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use scheduler_core::{JobConfig, SchedulerResult, TaskQueueConfig};
use scheduler_dispatcher::{DistributedTaskFactory, TaskFactoryRegistry};
use scheduler_domain::{JobDescriptor, TaskHandle};
use scheduler_worker::{DestructionCallback, TaskQueueCache};

/// 按作业定义生成任务的工厂
///
/// 回收的任务暂存在按作业划分的队列中，下次取任务时优先交出。
pub struct JobTaskFactory {
    job: JobDescriptor,
    reclaimed: Arc<TaskQueueCache>,
}

impl JobTaskFactory {
    pub fn new(job: JobDescriptor, reclaimed: Arc<TaskQueueCache>) -> Self {
        Self { job, reclaimed }
    }

    fn create_task(&self) -> TaskHandle {
        TaskHandle::new(&self.job.name, &self.job.task_type, self.job.parameters.clone())
    }
}

#[async_trait]
impl DistributedTaskFactory for JobTaskFactory {
    fn job_name(&self) -> &str {
        &self.job.name
    }

    async fn fetch(&self, node_name: &str, count: u32) -> SchedulerResult<Vec<TaskHandle>> {
        let queue = self.reclaimed.get_or_create(&self.job.name);
        let mut tasks = Vec::with_capacity(count as usize);

        while tasks.len() < count as usize {
            match queue.poll() {
                Some(task) => tasks.push(task),
                None => break,
            }
        }
        let reused = tasks.len();
        while tasks.len() < count as usize {
            tasks.push(self.create_task());
        }

        debug!(
            "作业 {} 为节点 {} 生成 {} 个任务(复用 {} 个)",
            self.job.name,
            node_name,
            tasks.len(),
            reused
        );
        Ok(tasks)
    }

    async fn abandon(&self, node_name: &str, tasks: Vec<TaskHandle>) -> SchedulerResult<()> {
        let queue = self.reclaimed.get_or_create(&self.job.name);
        let total = tasks.len();
        let dropped = tasks
            .into_iter()
            .map(|task| queue.offer(task))
            .filter(|accepted| !accepted)
            .count();

        if dropped > 0 {
            warn!(
                "作业 {} 回收队列已满，丢弃节点 {} 未交付的 {} 个任务",
                self.job.name, node_name, dropped
            );
        }
        debug!(
            "回收节点 {} 未交付的任务: 作业 {}, {} 个",
            node_name,
            self.job.name,
            total - dropped
        );
        Ok(())
    }
}

/// 回收队列因空闲被清理时丢弃其中的任务
pub fn reclaimed_queue_cache(config: &TaskQueueConfig) -> TaskQueueCache {
    let on_destroy: DestructionCallback = Arc::new(|job_name: &str, tasks: Vec<TaskHandle>| {
        if !tasks.is_empty() {
            warn!("作业 {} 的回收队列已清理，丢弃 {} 个任务", job_name, tasks.len());
        }
    });
    TaskQueueCache::new(config).with_destruction_callback(on_destroy)
}

/// 为每个配置的作业注册一个工厂，作业名重复时失败
pub fn build_factory_registry(
    jobs: &[JobConfig],
    reclaimed: &Arc<TaskQueueCache>,
) -> SchedulerResult<TaskFactoryRegistry> {
    let mut builder = TaskFactoryRegistry::builder();
    for config in jobs {
        let job = JobDescriptor::try_from(config)?;
        builder = builder.register(Arc::new(JobTaskFactory::new(job, Arc::clone(reclaimed))))?;
    }
    let registry = builder.build();
    if registry.is_empty() {
        debug!("没有配置作业，任务工厂注册表为空");
    }
    Ok(registry)
}
