use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use scheduler_core::{JobConfig, SchedulerError, ThreadPoolSettings};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 当前时间的毫秒时间戳
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 集群锁的身份标识
///
/// 相等性由全部字段共同决定。每次获取都会生成新的 `token`，
/// 同一节点在同一毫秒内两次获取同名锁也会得到不同的键，过期的持有者无法误续约或误释放。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    pub name: String,
    pub owner_node_name: String,
    pub acquired_at_millis: i64,
    pub token: Uuid,
}

impl LockKey {
    pub fn new(name: impl Into<String>, owner_node_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner_node_name: owner_node_name.into(),
            acquired_at_millis: now_millis(),
            token: Uuid::new_v4(),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}#{}/{}",
            self.name, self.owner_node_name, self.acquired_at_millis, self.token
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockStyle {
    #[serde(rename = "TRY")]
    Try,
    #[serde(rename = "RELEASE")]
    Release,
    #[serde(rename = "KEEP_ALIVE")]
    KeepAlive,
}

/// 发往主节点的锁请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterLockRequest {
    pub key: LockKey,
    pub style: LockStyle,
}

impl ClusterLockRequest {
    pub fn new(key: LockKey, style: LockStyle) -> Self {
        Self { key, style }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleType {
    #[serde(rename = "CRON")]
    Cron,
    #[serde(rename = "FREQUENCY")]
    Frequency,
    #[serde(rename = "MANUAL")]
    Manual,
}

impl FromStr for ScheduleType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cron" => Ok(ScheduleType::Cron),
            "frequency" => Ok(ScheduleType::Frequency),
            "manual" => Ok(ScheduleType::Manual),
            _ => Err(SchedulerError::Configuration(format!(
                "未知的调度类型: {s}"
            ))),
        }
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScheduleType::Cron => "CRON",
            ScheduleType::Frequency => "FREQUENCY",
            ScheduleType::Manual => "MANUAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub name: String,
    pub schedule_type: ScheduleType,
    pub schedule_expression: String,
    pub enabled: bool,
    pub task_type: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl JobDescriptor {
    pub fn new(
        name: impl Into<String>,
        schedule_type: ScheduleType,
        schedule_expression: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            schedule_type,
            schedule_expression: schedule_expression.into(),
            enabled: true,
            task_type: "shell".to_string(),
            parameters: serde_json::Value::Null,
        }
    }
}

impl TryFrom<&JobConfig> for JobDescriptor {
    type Error = SchedulerError;

    fn try_from(config: &JobConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            name: config.name.clone(),
            schedule_type: config.schedule_type.parse()?,
            schedule_expression: config.schedule_expression.clone(),
            enabled: config.enabled,
            task_type: config.task_type.clone(),
            parameters: config.parameters.clone(),
        })
    }
}

/// (作业名, 节点名)，作业/节点绑定的查找键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobNodeKey {
    pub job_name: String,
    pub node_name: String,
}

impl JobNodeKey {
    pub fn new(job_name: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            node_name: node_name.into(),
        }
    }
}

impl fmt::Display for JobNodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.job_name, self.node_name)
    }
}

/// 作业与节点的绑定，`task_limit` 为该节点上此作业的最大并发任务数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobNodeBinding {
    pub job: JobDescriptor,
    pub node_name: String,
    pub task_limit: u32,
}

impl JobNodeBinding {
    pub fn new(job: JobDescriptor, node_name: impl Into<String>, task_limit: u32) -> Self {
        Self {
            job,
            node_name: node_name.into(),
            task_limit,
        }
    }

    pub fn key(&self) -> JobNodeKey {
        JobNodeKey::new(&self.job.name, &self.node_name)
    }

    pub fn is_enabled(&self) -> bool {
        self.job.enabled
    }
}

/// 拉取请求中的一行: 该绑定还能接收多少个任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredTaskRequest {
    pub binding: JobNodeBinding,
    pub required_count: u32,
}

impl RequiredTaskRequest {
    pub fn new(binding: JobNodeBinding, required_count: u32) -> Self {
        Self {
            binding,
            required_count,
        }
    }
}

/// 线程池规格，按值判等；`max_pool_size == 0` 表示无界线程池
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadPoolSpec {
    pub name: String,
    pub priority: u8,
    pub core_pool_size: usize,
    pub max_pool_size: usize,
}

impl ThreadPoolSpec {
    pub fn new(
        name: impl Into<String>,
        priority: u8,
        core_pool_size: usize,
        max_pool_size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            core_pool_size,
            max_pool_size,
        }
    }

    pub fn unbounded(name: impl Into<String>) -> Self {
        Self::new(name, 5, 0, 0)
    }

    pub fn is_bounded(&self) -> bool {
        self.max_pool_size > 0
    }
}

impl Default for ThreadPoolSpec {
    fn default() -> Self {
        Self::from(&ThreadPoolSettings::default())
    }
}

impl From<&ThreadPoolSettings> for ThreadPoolSpec {
    fn from(settings: &ThreadPoolSettings) -> Self {
        Self::new(
            settings.name.clone(),
            settings.priority,
            settings.core_pool_size,
            settings.max_pool_size,
        )
    }
}

impl fmt::Display for ThreadPoolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_bounded() {
            write!(
                f,
                "{}(p{}, {}..{})",
                self.name, self.priority, self.core_pool_size, self.max_pool_size
            )
        } else {
            write!(f, "{}(p{}, unbounded)", self.name, self.priority)
        }
    }
}

/// 一个可执行的任务实例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHandle {
    /// 任务标识，提交给执行引擎前必须已分配
    pub id: Option<Uuid>,
    pub job_name: String,
    pub task_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub thread_pool: Option<ThreadPoolSpec>,
    #[serde(default)]
    pub user_context: Option<String>,
}

impl TaskHandle {
    pub fn new(
        job_name: impl Into<String>,
        task_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Some(Uuid::new_v4()),
            job_name: job_name.into(),
            task_type: task_type.into(),
            payload,
            thread_pool: None,
            user_context: None,
        }
    }

    pub fn with_thread_pool(mut self, spec: ThreadPoolSpec) -> Self {
        self.thread_pool = Some(spec);
        self
    }

    pub fn with_user_context(mut self, user_context: impl Into<String>) -> Self {
        self.user_context = Some(user_context.into());
        self
    }

    /// 显示用名称: `job/task_type`
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.job_name, self.task_type)
    }
}

/// Worker发往主节点的拉取请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPullRequest {
    pub node_name: String,
    pub required_tasks: Vec<RequiredTaskRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingTasks {
    pub binding: JobNodeBinding,
    pub tasks: Vec<TaskHandle>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskPullResponse {
    pub total_task_count: usize,
    pub tasks_by_binding: Vec<BindingTasks>,
}

impl TaskPullResponse {
    pub fn is_empty(&self) -> bool {
        self.total_task_count == 0
    }
}

/// 单个节点上某个作业/节点绑定的运行信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobNodeInfo {
    pub binding: JobNodeBinding,
    pub current_task_count: u32,
    pub schedule_reference_time: Option<DateTime<Utc>>,
    pub last_executed_time: Option<DateTime<Utc>>,
    pub cached_queue_depth: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_lock_key_identity_includes_timestamp() {
        let a = LockKey {
            name: "report".into(),
            owner_node_name: "node-a".into(),
            acquired_at_millis: 1,
            token: Uuid::nil(),
        };
        let mut b = a.clone();
        assert_eq!(a, b);
        b.acquired_at_millis = 2;
        assert_ne!(a, b);
    }

    #[test]
    fn test_keys_minted_in_same_millisecond_differ() {
        let a = LockKey::new("report", "node-a");
        let mut b = LockKey::new("report", "node-a");
        b.acquired_at_millis = a.acquired_at_millis;
        assert_ne!(a, b);
    }

    #[test]
    fn test_thread_pool_spec_value_identity() {
        let mut set = HashSet::new();
        set.insert(ThreadPoolSpec::new("io", 5, 2, 4));
        set.insert(ThreadPoolSpec::new("io", 5, 2, 4));
        set.insert(ThreadPoolSpec::new("io", 5, 2, 8));
        assert_eq!(set.len(), 2);
        assert!(!ThreadPoolSpec::unbounded("burst").is_bounded());
    }

    #[test]
    fn test_schedule_type_parse() {
        assert_eq!("CRON".parse::<ScheduleType>().unwrap(), ScheduleType::Cron);
        assert_eq!(
            "frequency".parse::<ScheduleType>().unwrap(),
            ScheduleType::Frequency
        );
        assert!("weekly".parse::<ScheduleType>().is_err());
    }

    #[test]
    fn test_lock_request_wire_format() {
        let request = ClusterLockRequest::new(
            LockKey {
                name: "a".into(),
                owner_node_name: "n".into(),
                acquired_at_millis: 5,
                token: Uuid::nil(),
            },
            LockStyle::KeepAlive,
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["style"], "KEEP_ALIVE");
        assert_eq!(json["key"]["acquired_at_millis"], 5);
    }

    #[test]
    fn test_task_handle_allocates_id() {
        let a = TaskHandle::new("job", "shell", serde_json::json!({}));
        let b = TaskHandle::new("job", "shell", serde_json::json!({}));
        assert!(a.id.is_some());
        assert_ne!(a.id, b.id);
        assert_eq!(a.display_name(), "job/shell");
    }
}
