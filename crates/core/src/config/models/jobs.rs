use serde::{Deserialize, Serialize};

fn default_enabled() -> bool {
    true
}

fn default_task_type() -> String {
    "shell".to_string()
}

fn default_task_limit() -> u32 {
    1
}

/// 单机节点启动时写入作业存储的作业定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    /// "cron"、"frequency" 或 "manual"
    pub schedule_type: String,
    #[serde(default)]
    pub schedule_expression: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_task_type")]
    pub task_type: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub parameters: serde_json::Value,
    #[serde(default = "default_task_limit")]
    pub task_limit: u32,
}

impl JobConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            return Err(anyhow::anyhow!("作业名称不能为空"));
        }

        let valid_types = ["cron", "frequency", "manual"];
        if !valid_types.contains(&self.schedule_type.to_lowercase().as_str()) {
            return Err(anyhow::anyhow!(
                "作业 {} 的调度类型无效: {}，支持的类型: {:?}",
                self.name,
                self.schedule_type,
                valid_types
            ));
        }

        if self.schedule_type.to_lowercase() != "manual" && self.schedule_expression.is_empty() {
            return Err(anyhow::anyhow!("作业 {} 缺少调度表达式", self.name));
        }

        if self.task_type.is_empty() {
            return Err(anyhow::anyhow!("作业 {} 的任务类型不能为空", self.name));
        }

        Ok(())
    }
}
