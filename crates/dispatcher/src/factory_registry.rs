use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::TaskHandle;

/// 分布式任务工厂，每个作业一个
///
/// `fetch` 最多返回 `count` 个任务；`abandon` 接收那些已取出但未能交付的任务，
/// 工厂自行决定重新排队还是丢弃。
#[async_trait]
pub trait DistributedTaskFactory: Send + Sync {
    fn job_name(&self) -> &str;

    async fn fetch(&self, node_name: &str, count: u32) -> SchedulerResult<Vec<TaskHandle>>;

    async fn abandon(&self, node_name: &str, tasks: Vec<TaskHandle>) -> SchedulerResult<()>;
}

#[derive(Default)]
pub struct TaskFactoryRegistryBuilder {
    factories: HashMap<String, Arc<dyn DistributedTaskFactory>>,
}

impl TaskFactoryRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, factory: Arc<dyn DistributedTaskFactory>) -> SchedulerResult<Self> {
        let job_name = factory.job_name().to_string();
        if self.factories.contains_key(&job_name) {
            return Err(SchedulerError::DuplicateRegistration {
                kind: "task factory".to_string(),
                key: job_name,
            });
        }

        debug!("注册任务工厂: {}", job_name);
        self.factories.insert(job_name, factory);
        Ok(self)
    }

    pub fn build(self) -> TaskFactoryRegistry {
        TaskFactoryRegistry {
            factories: self.factories,
        }
    }
}

/// 按作业名查找任务工厂，构建后只读
#[derive(Default)]
pub struct TaskFactoryRegistry {
    factories: HashMap<String, Arc<dyn DistributedTaskFactory>>,
}

impl TaskFactoryRegistry {
    pub fn builder() -> TaskFactoryRegistryBuilder {
        TaskFactoryRegistryBuilder::new()
    }

    pub fn find_factory(&self, job_name: &str) -> SchedulerResult<Arc<dyn DistributedTaskFactory>> {
        self.factories
            .get(job_name)
            .cloned()
            .ok_or_else(|| SchedulerError::NoFactoryRegistered {
                job: job_name.to_string(),
            })
    }

    pub fn contains(&self, job_name: &str) -> bool {
        self.factories.contains_key(job_name)
    }

    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingFactory;

    #[test]
    fn test_register_and_find() {
        let registry = TaskFactoryRegistry::builder()
            .register(Arc::new(RecordingFactory::new("report")))
            .unwrap()
            .register(Arc::new(RecordingFactory::new("cleanup")))
            .unwrap()
            .build();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find_factory("report").unwrap().job_name(), "report");
        assert_eq!(registry.job_names(), vec!["cleanup", "report"]);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let result = TaskFactoryRegistry::builder()
            .register(Arc::new(RecordingFactory::new("report")))
            .unwrap()
            .register(Arc::new(RecordingFactory::new("report")));

        assert!(matches!(
            result,
            Err(SchedulerError::DuplicateRegistration { ref key, .. }) if key == "report"
        ));
    }

    #[test]
    fn test_missing_factory_is_error() {
        let registry = TaskFactoryRegistry::builder().build();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.find_factory("unknown"),
            Err(SchedulerError::NoFactoryRegistered { ref job }) if job == "unknown"
        ));
    }
}
