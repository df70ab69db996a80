use serde::{Deserialize, Serialize};

/// 集群锁配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// 客户端续约间隔
    pub keep_alive_interval_seconds: u64,
    /// 服务端清理过期锁的扫描间隔
    pub janitor_interval_seconds: u64,
    /// 锁在未续约情况下的有效期
    pub expiry_seconds: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval_seconds: 60,
            janitor_interval_seconds: 600,
            expiry_seconds: 600,
        }
    }
}

impl LockConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.keep_alive_interval_seconds == 0 {
            return Err(anyhow::anyhow!("锁续约间隔必须大于0"));
        }

        if self.janitor_interval_seconds == 0 {
            return Err(anyhow::anyhow!("锁清理间隔必须大于0"));
        }

        if self.expiry_seconds <= self.keep_alive_interval_seconds {
            return Err(anyhow::anyhow!(
                "锁过期时间({}s)必须大于续约间隔({}s)",
                self.expiry_seconds,
                self.keep_alive_interval_seconds
            ));
        }

        Ok(())
    }
}

/// 作业/节点跟踪缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub refresh_interval_seconds: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: 10,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.refresh_interval_seconds == 0 {
            return Err(anyhow::anyhow!("跟踪缓存刷新间隔必须大于0"));
        }
        Ok(())
    }
}

/// Worker拉取任务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub pull_interval_seconds: u64,
    /// 主节点汇总全集群作业运行信息的间隔
    pub report_interval_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            pull_interval_seconds: 5,
            report_interval_seconds: 60,
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pull_interval_seconds == 0 {
            return Err(anyhow::anyhow!("任务拉取间隔必须大于0"));
        }
        if self.report_interval_seconds == 0 {
            return Err(anyhow::anyhow!("运行信息汇总间隔必须大于0"));
        }
        Ok(())
    }
}

/// 线程池规格配置，`max_pool_size = 0` 表示无界线程池
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadPoolSettings {
    pub name: String,
    pub priority: u8,
    pub core_pool_size: usize,
    pub max_pool_size: usize,
}

impl Default for ThreadPoolSettings {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            priority: 5,
            core_pool_size: 4,
            max_pool_size: 16,
        }
    }
}

/// 本地执行引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// 关闭时轮询剩余异步任务的间隔
    pub shutdown_poll_interval_ms: u64,
    pub default_pool: ThreadPoolSettings,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shutdown_poll_interval_ms: 1000,
            default_pool: ThreadPoolSettings::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.shutdown_poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("关闭轮询间隔必须大于0"));
        }

        if self.default_pool.name.is_empty() {
            return Err(anyhow::anyhow!("默认线程池名称不能为空"));
        }

        let pool = &self.default_pool;
        if pool.max_pool_size != 0 && pool.core_pool_size > pool.max_pool_size {
            return Err(anyhow::anyhow!(
                "线程池 {} 的核心线程数({})不能大于最大线程数({})",
                pool.name,
                pool.core_pool_size,
                pool.max_pool_size
            ));
        }

        Ok(())
    }
}

/// 任务队列缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskQueueConfig {
    pub idle_timeout_seconds: u64,
    pub capacity: usize,
    pub eviction_interval_seconds: u64,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: 60,
            capacity: 1000,
            eviction_interval_seconds: 10,
        }
    }
}

impl TaskQueueConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.idle_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("队列空闲超时必须大于0"));
        }

        if self.capacity == 0 {
            return Err(anyhow::anyhow!("队列容量必须大于0"));
        }

        if self.eviction_interval_seconds == 0 {
            return Err(anyhow::anyhow!("队列清理间隔必须大于0"));
        }

        Ok(())
    }
}
