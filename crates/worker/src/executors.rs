use std::collections::HashMap;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::handler::{TaskContext, TaskHandler};
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::TaskHandle;

pub const SHELL_TASK_TYPE: &str = "shell";

/// Shell任务参数，来自任务的 payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShellTaskParams {
    pub command: String,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env_vars: Option<HashMap<String, String>>,
}

/// Shell任务处理器
///
/// 子进程以 `kill_on_drop` 启动，任务被终止时子进程随之被杀掉。
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellTaskHandler;

impl ShellTaskHandler {
    pub fn new() -> Self {
        Self
    }

    fn build_command(params: &ShellTaskParams) -> Command {
        let mut cmd = Command::new(&params.command);
        if let Some(args) = &params.args {
            cmd.args(args);
        }
        if let Some(dir) = &params.working_dir {
            cmd.current_dir(dir);
        }
        if let Some(env_vars) = &params.env_vars {
            cmd.envs(env_vars);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TaskHandler for ShellTaskHandler {
    fn task_type(&self) -> &str {
        SHELL_TASK_TYPE
    }

    async fn handle(&self, task: &TaskHandle, context: &TaskContext) -> SchedulerResult<serde_json::Value> {
        let params: ShellTaskParams = serde_json::from_value(task.payload.clone())
            .map_err(|e| SchedulerError::TaskExecution(format!("解析Shell任务参数失败: {e}")))?;

        info!(
            "执行Shell任务: task={}, command={}, args={:?}",
            context.id(),
            params.command,
            params.args.as_deref().unwrap_or_default()
        );
        context.set_info(format!("running {}", params.command));

        let start_time = Instant::now();
        let child = Self::build_command(&params)
            .spawn()
            .map_err(|e| SchedulerError::TaskExecution(format!("启动Shell命令失败: {e}")))?;

        let output = tokio::select! {
            output = child.wait_with_output() => {
                output.map_err(|e| SchedulerError::TaskExecution(format!("等待进程结束失败: {e}")))?
            }
            _ = context.cancelled() => {
                warn!("Shell任务 {} 被终止，结束子进程", context.id());
                return Err(SchedulerError::TaskTerminated {
                    id: context.id().to_string(),
                });
            }
        };

        let execution_time_ms = start_time.elapsed().as_millis() as u64;
        let exit_code = output.status.code();
        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();

        info!(
            "Shell任务执行完成: task={}, success={}, exit_code={:?}, duration={}ms",
            context.id(),
            output.status.success(),
            exit_code,
            execution_time_ms
        );

        if !output.status.success() {
            let message = if stderr.is_empty() {
                format!("命令执行失败，退出码: {exit_code:?}")
            } else {
                stderr
            };
            return Err(SchedulerError::TaskExecution(message));
        }

        Ok(serde_json::json!({
            "exit_code": exit_code,
            "stdout": stdout,
            "stderr": stderr,
            "execution_time_ms": execution_time_ms,
        }))
    }
}
