use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::factory_registry::DistributedTaskFactory;
use crate::lock_registry::ClusterLockRegistry;
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{
    ClusterLockRequest, ClusterTransport, JobDescriptor, JobNodeBinding, JobNodeInfo, JobNodeStore,
    PullResponder, ScheduleType, TaskHandle, TaskPullRequest, TaskPullResponse,
};

pub fn binding(
    job_name: &str,
    node_name: &str,
    schedule_type: ScheduleType,
    expression: &str,
    task_limit: u32,
) -> JobNodeBinding {
    JobNodeBinding::new(
        JobDescriptor::new(job_name, schedule_type, expression),
        node_name,
        task_limit,
    )
}

pub struct FakeJobNodeStore {
    bindings: Mutex<Vec<JobNodeBinding>>,
    failing: AtomicBool,
    fetches: AtomicUsize,
}

impl FakeJobNodeStore {
    pub fn new(bindings: Vec<JobNodeBinding>) -> Self {
        Self {
            bindings: Mutex::new(bindings),
            failing: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_bindings(&self, bindings: Vec<JobNodeBinding>) {
        *self.bindings.lock() = bindings;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn check(&self) -> SchedulerResult<()> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SchedulerError::Internal("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobNodeStore for FakeJobNodeStore {
    async fn find_bindings_for_node(&self, _node_name: &str) -> SchedulerResult<Vec<JobNodeBinding>> {
        self.check()?;
        Ok(self.bindings.lock().clone())
    }

    async fn find_job(&self, job_name: &str) -> SchedulerResult<Option<JobDescriptor>> {
        self.check()?;
        Ok(self
            .bindings
            .lock()
            .iter()
            .find(|b| b.job.name == job_name)
            .map(|b| b.job.clone()))
    }

    async fn find_all_bindings(&self) -> SchedulerResult<Vec<JobNodeBinding>> {
        self.check()?;
        Ok(self.bindings.lock().clone())
    }
}

/// 每次按请求数量生成任务，并记录回收调用
pub struct RecordingFactory {
    job_name: String,
    failing: AtomicBool,
    fetched: Mutex<Vec<TaskHandle>>,
    abandoned: Mutex<Vec<(String, Vec<TaskHandle>)>>,
}

impl RecordingFactory {
    pub fn new(job_name: &str) -> Self {
        Self {
            job_name: job_name.to_string(),
            failing: AtomicBool::new(false),
            fetched: Mutex::new(Vec::new()),
            abandoned: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(job_name: &str) -> Self {
        let factory = Self::new(job_name);
        factory.failing.store(true, Ordering::SeqCst);
        factory
    }

    pub fn fetched(&self) -> Vec<TaskHandle> {
        self.fetched.lock().clone()
    }

    pub fn abandoned(&self) -> Vec<(String, Vec<TaskHandle>)> {
        self.abandoned.lock().clone()
    }
}

#[async_trait]
impl DistributedTaskFactory for RecordingFactory {
    fn job_name(&self) -> &str {
        &self.job_name
    }

    async fn fetch(&self, _node_name: &str, count: u32) -> SchedulerResult<Vec<TaskHandle>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SchedulerError::Internal(format!("{} fetch failed", self.job_name)));
        }
        let tasks: Vec<_> = (0..count)
            .map(|i| TaskHandle::new(&self.job_name, "noop", serde_json::json!({ "seq": i })))
            .collect();
        self.fetched.lock().extend(tasks.iter().cloned());
        Ok(tasks)
    }

    async fn abandon(&self, node_name: &str, tasks: Vec<TaskHandle>) -> SchedulerResult<()> {
        self.abandoned.lock().push((node_name.to_string(), tasks));
        Ok(())
    }
}

/// 把投递结果存入共享槽位
pub struct CapturingResponder {
    pub slot: Arc<Mutex<Option<TaskPullResponse>>>,
}

#[async_trait]
impl PullResponder for CapturingResponder {
    async fn deliver(self: Box<Self>, response: TaskPullResponse) -> SchedulerResult<()> {
        *self.slot.lock() = Some(response);
        Ok(())
    }
}

pub struct FailingResponder;

#[async_trait]
impl PullResponder for FailingResponder {
    async fn deliver(self: Box<Self>, _response: TaskPullResponse) -> SchedulerResult<()> {
        Err(SchedulerError::Transport("requester went away".to_string()))
    }
}

/// 直接路由到本地锁注册表的传输层，可切换为不可达
pub struct RegistryTransport {
    pub registry: Arc<ClusterLockRegistry>,
    pub unreachable: AtomicBool,
}

impl RegistryTransport {
    pub fn new(registry: Arc<ClusterLockRegistry>) -> Self {
        Self {
            registry,
            unreachable: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ClusterTransport for RegistryTransport {
    async fn send_lock_request(&self, request: ClusterLockRequest) -> SchedulerResult<bool> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SchedulerError::Transport("master unreachable".to_string()));
        }
        Ok(self.registry.handle(&request))
    }

    async fn pull_tasks(&self, _request: TaskPullRequest) -> SchedulerResult<TaskPullResponse> {
        Ok(TaskPullResponse::default())
    }

    async fn query_job_node_info(&self, _node_name: &str) -> SchedulerResult<Vec<JobNodeInfo>> {
        Ok(Vec::new())
    }
}
