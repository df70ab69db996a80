use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    api_observability::ObservabilityConfig,
    cluster::ClusterConfig,
    dispatcher_worker::{DispatchConfig, ExecutorConfig, LockConfig, TaskQueueConfig, TrackerConfig},
    jobs::JobConfig,
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cluster: ClusterConfig,
    pub lock: LockConfig,
    pub tracker: TrackerConfig,
    pub dispatch: DispatchConfig,
    pub executor: ExecutorConfig,
    pub task_queue: TaskQueueConfig,
    pub observability: ObservabilityConfig,
    pub jobs: Vec<JobConfig>,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: SCHEDULER__, e.g. `SCHEDULER__CLUSTER__NODE_NAME`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/scheduler.toml",
                "scheduler.toml",
                "/etc/scheduler/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SCHEDULER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.cluster.validate().context("集群配置验证失败")?;
        self.lock.validate().context("集群锁配置验证失败")?;
        self.tracker.validate().context("跟踪缓存配置验证失败")?;
        self.dispatch.validate().context("任务分发配置验证失败")?;
        self.executor.validate().context("执行引擎配置验证失败")?;
        self.task_queue.validate().context("任务队列配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        let mut seen = std::collections::HashSet::new();
        for job in &self.jobs {
            job.validate().context("作业配置验证失败")?;
            if !seen.insert(job.name.as_str()) {
                return Err(anyhow::anyhow!("作业名称重复: {}", job.name));
            }
        }

        Ok(())
    }
}
