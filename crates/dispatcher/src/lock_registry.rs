use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scheduler_core::LockConfig;
use scheduler_domain::{now_millis, ClusterLockRequest, LockKey, LockStyle};

/// 服务端锁表中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    pub key: LockKey,
    pub last_refresh_millis: i64,
}

/// 集群锁注册表
///
/// 每个节点都运行一份，只有主节点上的是权威的。每个名称最多一项；
/// 释放、续约和过期清理都按完整的 [`LockKey`] 做条件操作。
pub struct ClusterLockRegistry {
    node_name: String,
    locks: DashMap<String, Lock>,
    expiry_millis: i64,
    janitor_interval: Duration,
}

impl ClusterLockRegistry {
    pub fn new(node_name: impl Into<String>, config: &LockConfig) -> Self {
        Self {
            node_name: node_name.into(),
            locks: DashMap::new(),
            expiry_millis: (config.expiry_seconds * 1000) as i64,
            janitor_interval: Duration::from_secs(config.janitor_interval_seconds),
        }
    }

    pub fn handle(&self, request: &ClusterLockRequest) -> bool {
        match request.style {
            LockStyle::Try => self.try_lock(&request.key),
            LockStyle::Release => self.release(&request.key),
            LockStyle::KeepAlive => self.keep_alive(&request.key),
        }
    }

    pub fn try_lock(&self, key: &LockKey) -> bool {
        self.try_lock_at(key, now_millis())
    }

    /// 仅当名称空闲时插入；已有项时无论键是否相同都拒绝
    pub fn try_lock_at(&self, key: &LockKey, now: i64) -> bool {
        let acquired = match self.locks.entry(key.name.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(Lock {
                    key: key.clone(),
                    last_refresh_millis: now,
                });
                true
            }
            Entry::Occupied(_) => false,
        };

        if acquired {
            debug!("节点 {} 获得锁: {}", key.owner_node_name, key);
            counter!("scheduler_lock_granted_total").increment(1);
            gauge!("scheduler_lock_entries").set(self.locks.len() as f64);
        } else {
            debug!("锁 {} 已被占用，拒绝节点 {}", key.name, key.owner_node_name);
            counter!("scheduler_lock_denied_total").increment(1);
        }
        acquired
    }

    pub fn release(&self, key: &LockKey) -> bool {
        if self
            .locks
            .remove_if(&key.name, |_, lock| lock.key == *key)
            .is_some()
        {
            debug!("锁已释放: {}", key);
            counter!("scheduler_lock_released_total").increment(1);
            gauge!("scheduler_lock_entries").set(self.locks.len() as f64);
            return true;
        }

        match self.locks.get(&key.name) {
            Some(current) => warn!(
                "释放锁失败，锁已被其他持有者占用: 请求={}, 当前={}",
                key, current.key
            ),
            None => warn!("释放锁失败，锁已不存在（可能已被过期清理）: {}", key),
        }
        false
    }

    pub fn keep_alive(&self, key: &LockKey) -> bool {
        self.keep_alive_at(key, now_millis())
    }

    pub fn keep_alive_at(&self, key: &LockKey, now: i64) -> bool {
        let Some(mut lock) = self.locks.get_mut(&key.name) else {
            debug!("续约失败，锁不存在: {}", key);
            return false;
        };

        if lock.key != *key {
            debug!("续约失败，持有者不匹配: 请求={}, 当前={}", key, lock.key);
            return false;
        }

        lock.last_refresh_millis = now;
        true
    }

    pub fn get(&self, name: &str) -> Option<Lock> {
        self.locks.get(name).map(|lock| lock.clone())
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    fn find_expired(&self, now: i64) -> Vec<Lock> {
        let cutoff = now - self.expiry_millis;
        self.locks
            .iter()
            .filter(|entry| entry.last_refresh_millis < cutoff)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// 只删除仍然是被检查时那把键、且仍然过期的项
    fn remove_expired(&self, inspected: &Lock, now: i64) -> bool {
        let cutoff = now - self.expiry_millis;
        self.locks
            .remove_if(&inspected.key.name, |_, current| {
                current.key == inspected.key && current.last_refresh_millis < cutoff
            })
            .is_some()
    }

    /// 清理超过有效期未续约的锁，返回清理数量
    pub fn sweep_expired(&self, now: i64) -> usize {
        let mut removed = 0;
        for lock in self.find_expired(now) {
            if self.remove_expired(&lock, now) {
                warn!(
                    "清理过期锁: {}，距最后续约 {}ms",
                    lock.key,
                    now - lock.last_refresh_millis
                );
                removed += 1;
            }
        }

        if removed > 0 {
            counter!("scheduler_lock_expired_total").increment(removed as u64);
            gauge!("scheduler_lock_entries").set(self.locks.len() as f64);
        }
        removed
    }

    pub fn start_janitor(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut janitor_interval = tokio::time::interval(self.janitor_interval);
        janitor_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tokio::spawn(async move {
            info!("节点 {} 的锁清理任务启动", self.node_name);
            loop {
                tokio::select! {
                    _ = janitor_interval.tick() => {
                        let removed = self.sweep_expired(now_millis());
                        debug!("锁清理完成: 清理 {} 个，剩余 {} 个", removed, self.lock_count());
                    }
                    _ = shutdown.cancelled() => {
                        info!("锁清理任务退出");
                        break;
                    }
                }
            }
        })
    }
}
