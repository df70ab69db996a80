//! 节点关闭协调
//!
//! 关闭按固定顺序进行: 取消后台循环并等待其退出，释放本节点持有的集群锁，
//! 排空执行引擎，最后清空回收队列。锁在引擎排空之前释放，
//! 其他节点不必等本节点的任务跑完就能接手汇总之类的单例工作。

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::node::SchedulerNode;

/// 节点关闭进度，只会向前推进
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
    Running,
    Triggered,
    StoppingLoops,
    ReleasingLocks,
    DrainingEngine,
    Stopped,
}

/// 节点关闭协调器
#[derive(Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    phase: Arc<watch::Sender<ShutdownPhase>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        Self {
            token: CancellationToken::new(),
            phase: Arc::new(phase),
        }
    }

    /// 后台循环使用的子令牌，触发关闭时一并取消
    pub fn loop_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// 触发关闭，重复调用无效果
    pub fn trigger(&self) {
        let first = self.phase.send_if_modified(|phase| {
            if *phase == ShutdownPhase::Running {
                *phase = ShutdownPhase::Triggered;
                true
            } else {
                false
            }
        });
        if first {
            info!("触发节点关闭");
        } else {
            debug!("节点关闭已经触发过");
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn triggered(&self) {
        self.token.cancelled().await
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    pub async fn stopped(&self) {
        let mut phase = self.phase.subscribe();
        let _ = phase.wait_for(|phase| *phase == ShutdownPhase::Stopped).await;
    }

    fn advance(&self, to: ShutdownPhase) {
        debug!("节点关闭进入阶段: {:?}", to);
        self.phase.send_replace(to);
    }

    /// 按顺序收尾；只有第一个调用者执行，其余调用者等它完成
    pub async fn wind_down(&self, loops: Vec<JoinHandle<()>>, node: &SchedulerNode) {
        self.trigger();
        let owner = self.phase.send_if_modified(|phase| {
            if *phase == ShutdownPhase::Triggered {
                *phase = ShutdownPhase::StoppingLoops;
                true
            } else {
                false
            }
        });
        if !owner {
            self.stopped().await;
            return;
        }

        info!("节点 {} 开始停止，等待 {} 个后台任务退出", node.node_name(), loops.len());
        for handle in loops {
            if let Err(e) = handle.await {
                error!("后台任务异常退出: {}", e);
            }
        }

        self.advance(ShutdownPhase::ReleasingLocks);
        node.lock_client().release_all().await;

        self.advance(ShutdownPhase::DrainingEngine);
        node.engine().shutdown().await;
        node.reclaimed().invalidate_all();

        self.advance(ShutdownPhase::Stopped);
        info!("节点 {} 已停止", node.node_name());
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
