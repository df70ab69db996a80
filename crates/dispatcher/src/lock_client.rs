use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use scheduler_core::LockConfig;
use scheduler_domain::{ClusterLockRequest, ClusterTransport, LockKey, LockStyle};

/// 集群锁客户端
///
/// 记录本节点认为自己持有的锁，所有请求都经传输层发往主节点。
/// 传输失败按"未获得/未释放"处理，不会向调用方抛出。
pub struct ClusterLockClient {
    node_name: String,
    transport: Arc<dyn ClusterTransport>,
    held: DashMap<String, LockKey>,
    keep_alive_interval: Duration,
}

impl ClusterLockClient {
    pub fn new(
        node_name: impl Into<String>,
        transport: Arc<dyn ClusterTransport>,
        config: &LockConfig,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            transport,
            held: DashMap::new(),
            keep_alive_interval: Duration::from_secs(config.keep_alive_interval_seconds),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub async fn try_lock(&self, name: &str) -> bool {
        let key = LockKey::new(name, &self.node_name);
        let request = ClusterLockRequest::new(key.clone(), LockStyle::Try);

        match self.transport.send_lock_request(request).await {
            Ok(true) => {
                debug!("获得集群锁: {}", key);
                self.held.insert(name.to_string(), key);
                true
            }
            Ok(false) => {
                debug!("集群锁 {} 已被其他节点持有", name);
                false
            }
            Err(e) => {
                error!("请求集群锁 {} 失败: {}", name, e);
                false
            }
        }
    }

    pub async fn release(&self, name: &str) -> bool {
        let Some((_, key)) = self.held.remove(name) else {
            warn!("节点 {} 未持有锁 {}，忽略释放", self.node_name, name);
            return false;
        };

        match self
            .transport
            .send_lock_request(ClusterLockRequest::new(key.clone(), LockStyle::Release))
            .await
        {
            Ok(released) => {
                if released {
                    debug!("已释放集群锁: {}", key);
                } else {
                    warn!("主节点拒绝释放锁 {}，锁可能已过期", key);
                }
                released
            }
            Err(e) => {
                error!("释放集群锁 {} 失败: {}", key, e);
                false
            }
        }
    }

    /// 续约单个锁；主节点不再承认时放弃本地记录
    pub async fn keep_alive(&self, name: &str) -> bool {
        let Some(key) = self.held.get(name).map(|entry| entry.value().clone()) else {
            return false;
        };

        match self
            .transport
            .send_lock_request(ClusterLockRequest::new(key.clone(), LockStyle::KeepAlive))
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                self.forget(&key);
                false
            }
            Err(e) => {
                // 主节点不可达时保留本地记录，下个周期重试
                warn!("续约集群锁 {} 失败: {}", key, e);
                false
            }
        }
    }

    fn forget(&self, key: &LockKey) {
        if self
            .held
            .remove_if(&key.name, |_, held| held == key)
            .is_some()
        {
            error!("集群锁 {} 已不存在，本节点不再持有", key);
        } else {
            debug!("集群锁 {} 续约被拒绝，本地记录已变更", key);
        }
    }

    /// 续约本节点持有的全部锁，返回仍然有效的数量
    pub async fn keep_alive_all(&self) -> usize {
        let names: Vec<String> = self.held.iter().map(|entry| entry.key().clone()).collect();
        let mut alive = 0;
        for name in names {
            if self.keep_alive(&name).await {
                alive += 1;
            }
        }
        alive
    }

    /// 停机时释放全部锁
    pub async fn release_all(&self) {
        let names: Vec<String> = self.held.iter().map(|entry| entry.key().clone()).collect();
        for name in names {
            self.release(&name).await;
        }
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held.contains_key(name)
    }

    pub fn held_key(&self, name: &str) -> Option<LockKey> {
        self.held.get(name).map(|entry| entry.value().clone())
    }

    pub fn held_locks(&self) -> Vec<LockKey> {
        let mut keys: Vec<_> = self.held.iter().map(|entry| entry.value().clone()).collect();
        keys.sort_by(|a, b| a.name.cmp(&b.name));
        keys
    }

    pub fn start_keep_alive_loop(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut ticker = tokio::time::interval(self.keep_alive_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tokio::spawn(async move {
            info!("节点 {} 的锁续约任务启动", self.node_name);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !self.held.is_empty() {
                            let alive = self.keep_alive_all().await;
                            debug!("锁续约完成，有效 {} 个", alive);
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("锁续约任务退出");
                        break;
                    }
                }
            }
        })
    }
}
