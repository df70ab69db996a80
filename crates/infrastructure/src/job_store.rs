use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use scheduler_core::{JobConfig, SchedulerResult};
use scheduler_domain::{JobDescriptor, JobNodeBinding, JobNodeKey, JobNodeStore};

/// 内存作业存储
///
/// 单机或静态集群部署时由配置中的作业初始化，每个作业绑定到所有节点。
#[derive(Debug, Default)]
pub struct InMemoryJobNodeStore {
    jobs: RwLock<HashMap<String, JobDescriptor>>,
    bindings: RwLock<HashMap<JobNodeKey, JobNodeBinding>>,
}

impl InMemoryJobNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_config(jobs: &[JobConfig], node_names: &[String]) -> SchedulerResult<Self> {
        let store = Self::new();
        for config in jobs {
            let job = JobDescriptor::try_from(config)?;
            for node in node_names {
                store
                    .upsert_binding(JobNodeBinding::new(job.clone(), node, config.task_limit))
                    .await;
            }
            store.upsert_job(job).await;
        }

        info!(
            "作业存储初始化完成: {} 个作业, {} 个节点",
            jobs.len(),
            node_names.len()
        );
        Ok(store)
    }

    /// 同时更新所有引用该作业的绑定
    pub async fn upsert_job(&self, job: JobDescriptor) {
        {
            let mut bindings = self.bindings.write().await;
            for binding in bindings.values_mut().filter(|b| b.job.name == job.name) {
                binding.job = job.clone();
            }
        }
        debug!("写入作业: {}", job.name);
        self.jobs.write().await.insert(job.name.clone(), job);
    }

    pub async fn upsert_binding(&self, binding: JobNodeBinding) {
        self.jobs
            .write()
            .await
            .entry(binding.job.name.clone())
            .or_insert_with(|| binding.job.clone());
        self.bindings.write().await.insert(binding.key(), binding);
    }

    pub async fn remove_binding(&self, key: &JobNodeKey) -> Option<JobNodeBinding> {
        self.bindings.write().await.remove(key)
    }
}

#[async_trait]
impl JobNodeStore for InMemoryJobNodeStore {
    async fn find_bindings_for_node(&self, node_name: &str) -> SchedulerResult<Vec<JobNodeBinding>> {
        let mut bindings: Vec<_> = self
            .bindings
            .read()
            .await
            .values()
            .filter(|b| b.node_name == node_name)
            .cloned()
            .collect();
        bindings.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(bindings)
    }

    async fn find_job(&self, job_name: &str) -> SchedulerResult<Option<JobDescriptor>> {
        Ok(self.jobs.read().await.get(job_name).cloned())
    }

    async fn find_all_bindings(&self) -> SchedulerResult<Vec<JobNodeBinding>> {
        let mut bindings: Vec<_> = self.bindings.read().await.values().cloned().collect();
        bindings.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(bindings)
    }
}
