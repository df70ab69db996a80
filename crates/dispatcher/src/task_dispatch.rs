use std::sync::Arc;

use metrics::counter;
use tracing::{debug, error, info, warn};

use crate::factory_registry::TaskFactoryRegistry;
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{BindingTasks, PullResponder, TaskPullRequest, TaskPullResponse};

/// 主节点处理任务拉取请求
///
/// 按请求行的顺序向各作业的工厂取任务。任何一步失败时，已经取出的任务会
/// 交还给各自的工厂，且每批任务只交还一次。
pub struct TaskDispatchService {
    registry: Arc<TaskFactoryRegistry>,
}

impl TaskDispatchService {
    pub fn new(registry: Arc<TaskFactoryRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TaskFactoryRegistry {
        &self.registry
    }

    pub async fn handle_pull(
        &self,
        request: TaskPullRequest,
        responder: Box<dyn PullResponder>,
    ) -> SchedulerResult<()> {
        let node_name = request.node_name;
        let mut response = TaskPullResponse::default();

        for line in request.required_tasks {
            if line.required_count == 0 {
                continue;
            }

            let job_name = line.binding.job.name.clone();
            let fetched = match self.registry.find_factory(&job_name) {
                Ok(factory) => factory.fetch(&node_name, line.required_count).await,
                Err(e) => Err(e),
            };

            match fetched {
                Ok(tasks) if tasks.is_empty() => {
                    debug!("作业 {} 暂无可分配任务", job_name);
                }
                Ok(tasks) => {
                    debug!("为节点 {} 取出作业 {} 的 {} 个任务", node_name, job_name, tasks.len());
                    response.total_task_count += tasks.len();
                    response.tasks_by_binding.push(BindingTasks {
                        binding: line.binding,
                        tasks,
                    });
                }
                Err(e) => {
                    error!("为节点 {} 取作业 {} 的任务失败: {}", node_name, job_name, e);
                    self.abandon_all(&node_name, response.tasks_by_binding).await;
                    return Err(e);
                }
            }
        }

        let delivered = response.clone();
        if let Err(e) = responder.deliver(response).await {
            warn!(
                "向节点 {} 投递 {} 个任务失败，交还任务: {}",
                node_name, delivered.total_task_count, e
            );
            self.abandon_all(&node_name, delivered.tasks_by_binding).await;
            return Err(SchedulerError::Delivery(e.to_string()));
        }

        if !delivered.is_empty() {
            info!("已向节点 {} 分配 {} 个任务", node_name, delivered.total_task_count);
            counter!("scheduler_tasks_dispatched_total").increment(delivered.total_task_count as u64);
        }
        Ok(())
    }

    async fn abandon_all(&self, node_name: &str, batches: Vec<BindingTasks>) {
        for batch in batches {
            let job_name = &batch.binding.job.name;
            let count = batch.tasks.len();

            let factory = match self.registry.find_factory(job_name) {
                Ok(factory) => factory,
                Err(e) => {
                    error!("无法交还作业 {} 的 {} 个任务: {}", job_name, count, e);
                    continue;
                }
            };

            match factory.abandon(node_name, batch.tasks).await {
                Ok(()) => {
                    counter!("scheduler_tasks_abandoned_total").increment(count as u64);
                    debug!("已交还作业 {} 的 {} 个任务", job_name, count);
                }
                Err(e) => error!("交还作业 {} 的 {} 个任务失败: {}", job_name, count, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory_registry::DistributedTaskFactory;
    use crate::test_utils::{binding, CapturingResponder, FailingResponder, RecordingFactory};
    use parking_lot::Mutex;
    use scheduler_domain::{RequiredTaskRequest, ScheduleType};

    fn service(factories: Vec<Arc<RecordingFactory>>) -> TaskDispatchService {
        let mut builder = TaskFactoryRegistry::builder();
        for factory in factories {
            builder = builder
                .register(factory as Arc<dyn DistributedTaskFactory>)
                .unwrap();
        }
        TaskDispatchService::new(Arc::new(builder.build()))
    }

    fn line(job: &str, count: u32) -> RequiredTaskRequest {
        RequiredTaskRequest::new(binding(job, "worker-1", ScheduleType::Frequency, "1m", 10), count)
    }

    fn request(lines: Vec<RequiredTaskRequest>) -> TaskPullRequest {
        TaskPullRequest {
            node_name: "worker-1".to_string(),
            required_tasks: lines,
        }
    }

    #[tokio::test]
    async fn test_pull_accumulates_in_request_order() {
        let a = Arc::new(RecordingFactory::new("a"));
        let b = Arc::new(RecordingFactory::new("b"));
        let service = service(vec![a.clone(), b.clone()]);
        let slot = Arc::new(Mutex::new(None));

        service
            .handle_pull(
                request(vec![line("b", 2), line("a", 0), line("a", 3)]),
                Box::new(CapturingResponder { slot: slot.clone() }),
            )
            .await
            .unwrap();

        let response = slot.lock().take().unwrap();
        assert_eq!(response.total_task_count, 5);
        assert_eq!(response.tasks_by_binding.len(), 2);
        assert_eq!(response.tasks_by_binding[0].binding.job.name, "b");
        assert_eq!(response.tasks_by_binding[1].tasks.len(), 3);
        assert!(a.abandoned().is_empty());
        assert!(b.abandoned().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_abandons_each_task_once() {
        let factory = Arc::new(RecordingFactory::new("report"));
        let service = service(vec![factory.clone()]);

        let result = service
            .handle_pull(request(vec![line("report", 5)]), Box::new(FailingResponder))
            .await;
        assert!(matches!(result, Err(SchedulerError::Delivery(_))));

        let abandoned = factory.abandoned();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].0, "worker-1");
        assert_eq!(abandoned[0].1, factory.fetched());
        assert_eq!(abandoned[0].1.len(), 5);
    }

    #[tokio::test]
    async fn test_fetch_failure_abandons_earlier_batches() {
        let good = Arc::new(RecordingFactory::new("good"));
        let bad = Arc::new(RecordingFactory::failing("bad"));
        let service = service(vec![good.clone(), bad.clone()]);
        let slot = Arc::new(Mutex::new(None));

        let result = service
            .handle_pull(
                request(vec![line("good", 2), line("bad", 1)]),
                Box::new(CapturingResponder { slot: slot.clone() }),
            )
            .await;

        assert!(matches!(result, Err(SchedulerError::Internal(_))));
        assert!(slot.lock().is_none());
        assert_eq!(good.abandoned().len(), 1);
        assert_eq!(good.abandoned()[0].1.len(), 2);
        assert!(bad.abandoned().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job_fails_pull() {
        let good = Arc::new(RecordingFactory::new("good"));
        let service = service(vec![good.clone()]);

        let result = service
            .handle_pull(
                request(vec![line("good", 1), line("ghost", 1)]),
                Box::new(FailingResponder),
            )
            .await;

        assert!(matches!(result, Err(SchedulerError::NoFactoryRegistered { .. })));
        assert_eq!(good.abandoned().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_request_delivers_empty_response() {
        let service = service(vec![]);
        let slot = Arc::new(Mutex::new(None));

        service
            .handle_pull(request(vec![]), Box::new(CapturingResponder { slot: slot.clone() }))
            .await
            .unwrap();

        assert!(slot.lock().take().unwrap().is_empty());
    }
}
