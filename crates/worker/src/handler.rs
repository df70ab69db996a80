use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;
use uuid::Uuid;

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::TaskHandle;

tokio::task_local! {
    static CURRENT_TASK: TaskContext;
}

/// 任务执行上下文
///
/// 处理器通过 [`TaskContext::is_terminated`] 或 [`TaskContext::cancelled`]
/// 感知协作式终止请求。
#[derive(Debug, Clone)]
pub struct TaskContext {
    id: Uuid,
    node_name: String,
    cancel: CancellationToken,
    info: Arc<Mutex<String>>,
}

impl TaskContext {
    pub(crate) fn new(
        id: Uuid,
        node_name: impl Into<String>,
        cancel: CancellationToken,
        info: Arc<Mutex<String>>,
    ) -> Self {
        Self {
            id,
            node_name: node_name.into(),
            cancel,
            info,
        }
    }

    /// 当前任务的上下文，只能在处理器内部调用
    pub fn current() -> Option<TaskContext> {
        CURRENT_TASK.try_with(|context| context.clone()).ok()
    }

    pub(crate) async fn scope<F: std::future::Future>(self, future: F) -> F::Output {
        CURRENT_TASK.scope(self, future).await
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn is_terminated(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// 更新进度描述
    pub fn set_info(&self, info: impl Into<String>) {
        *self.info.lock() = info.into();
    }

    pub fn info(&self) -> String {
        self.info.lock().clone()
    }
}

/// 某一类任务的处理器
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> &str;

    async fn handle(&self, task: &TaskHandle, context: &TaskContext) -> SchedulerResult<serde_json::Value>;
}

/// 异步任务结果回调，每个提交的任务恰好回调一次
pub trait TaskCallback: Send + Sync {
    fn on_success(&self, task: &TaskHandle, result: serde_json::Value);

    fn on_failure(&self, task: &TaskHandle, error: SchedulerError);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallback;

impl TaskCallback for NoopCallback {
    fn on_success(&self, _task: &TaskHandle, _result: serde_json::Value) {}

    fn on_failure(&self, _task: &TaskHandle, _error: SchedulerError) {}
}

#[derive(Default)]
pub struct TaskHandlerRegistryBuilder {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskHandlerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, handler: Arc<dyn TaskHandler>) -> SchedulerResult<Self> {
        let task_type = handler.task_type().to_string();
        if self.handlers.contains_key(&task_type) {
            return Err(SchedulerError::DuplicateRegistration {
                kind: "task handler".to_string(),
                key: task_type,
            });
        }

        debug!("注册任务处理器: {}", task_type);
        self.handlers.insert(task_type, handler);
        Ok(self)
    }

    pub fn build(self) -> TaskHandlerRegistry {
        TaskHandlerRegistry {
            handlers: self.handlers,
        }
    }
}

/// 任务类型到处理器的映射
#[derive(Default)]
pub struct TaskHandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskHandlerRegistry {
    pub fn builder() -> TaskHandlerRegistryBuilder {
        TaskHandlerRegistryBuilder::new()
    }

    pub fn find(&self, task_type: &str) -> SchedulerResult<Arc<dyn TaskHandler>> {
        self.handlers
            .get(task_type)
            .cloned()
            .ok_or_else(|| SchedulerError::NoHandlerRegistered {
                task_type: task_type.to_string(),
            })
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}
