use std::collections::BTreeSet;

use parking_lot::RwLock;
use tracing::info;

use scheduler_core::ClusterConfig;
use scheduler_domain::ClusterMembership;

/// 基于配置的静态集群成员
///
/// 未指定主节点时，活跃节点中名称最小的为主节点；指定的主节点下线后没有主节点。
pub struct StaticMembership {
    local_node: String,
    configured_master: Option<String>,
    nodes: BTreeSet<String>,
    down: RwLock<BTreeSet<String>>,
}

impl StaticMembership {
    pub fn new(
        local_node: impl Into<String>,
        nodes: impl IntoIterator<Item = String>,
        configured_master: Option<String>,
    ) -> Self {
        let local_node = local_node.into();
        let mut nodes: BTreeSet<String> = nodes.into_iter().collect();
        nodes.insert(local_node.clone());

        Self {
            local_node,
            configured_master,
            nodes,
            down: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(
            config.node_name.clone(),
            config.all_node_names(),
            config.master_node.clone(),
        )
    }

    pub fn mark_down(&self, node: &str) {
        if self.down.write().insert(node.to_string()) {
            info!("节点 {} 标记为下线", node);
        }
    }

    pub fn mark_up(&self, node: &str) {
        if self.down.write().remove(node) {
            info!("节点 {} 恢复上线", node);
        }
    }
}

impl ClusterMembership for StaticMembership {
    fn local_node_name(&self) -> &str {
        &self.local_node
    }

    fn master_node(&self) -> Option<String> {
        let down = self.down.read();
        match &self.configured_master {
            Some(master) => (!down.contains(master)).then(|| master.clone()),
            None => self.nodes.iter().find(|n| !down.contains(*n)).cloned(),
        }
    }

    fn active_nodes(&self) -> Vec<String> {
        let down = self.down.read();
        self.nodes
            .iter()
            .filter(|n| !down.contains(*n))
            .cloned()
            .collect()
    }
}
