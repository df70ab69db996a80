use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("没有为作业注册任务工厂: {job}")]
    NoFactoryRegistered { job: String },

    #[error("没有为任务类型注册处理器: {task_type}")]
    NoHandlerRegistered { task_type: String },

    #[error("重复注册{kind}: {key}")]
    DuplicateRegistration { kind: String, key: String },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("无效的频率表达式: '{expr}' - {message}")]
    InvalidFrequency { expr: String, message: String },

    #[error("所有任务必须预先分配ID")]
    MissingTaskId,

    #[error("执行引擎已停止")]
    EngineStopped,

    #[error("任务提交被拒绝: {0}")]
    TaskRejected(String),

    #[error("任务已终止: {id}")]
    TaskTerminated { id: String },

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("集群通信错误: {0}")]
    Transport(String),

    #[error("当前没有可用的主节点")]
    NoMasterNode,

    #[error("响应投递失败: {0}")]
    Delivery(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 配置类错误: 启动时致命或立即上报，永不重试
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            SchedulerError::Configuration(_)
                | SchedulerError::NoFactoryRegistered { .. }
                | SchedulerError::NoHandlerRegistered { .. }
                | SchedulerError::DuplicateRegistration { .. }
                | SchedulerError::InvalidCron { .. }
                | SchedulerError::InvalidFrequency { .. }
        )
    }

    /// 通信类错误: 调用方按失败结果处理
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            SchedulerError::Transport(_) | SchedulerError::NoMasterNode | SchedulerError::Delivery(_)
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}
