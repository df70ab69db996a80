use serde::{Deserialize, Serialize};

fn default_node_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "node-001".to_string())
}

/// 集群内对等节点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerConfig {
    pub name: String,
    /// 形如 `http://10.0.0.2:7070`
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub node_name: String,
    /// 未指定时取活跃节点中名称最小的一个
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_node: Option<String>,
    pub bind_address: String,
    pub peers: Vec<PeerConfig>,
    pub rpc_timeout_seconds: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            master_node: None,
            bind_address: "0.0.0.0:7070".to_string(),
            peers: Vec::new(),
            rpc_timeout_seconds: 10,
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node_name.is_empty() {
            return Err(anyhow::anyhow!("节点名称不能为空"));
        }

        if self.bind_address.is_empty() {
            return Err(anyhow::anyhow!("绑定地址不能为空"));
        }

        if self.rpc_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("RPC超时时间必须大于0"));
        }

        for peer in &self.peers {
            if peer.name.is_empty() {
                return Err(anyhow::anyhow!("对等节点名称不能为空"));
            }
            if !peer.address.starts_with("http://") && !peer.address.starts_with("https://") {
                return Err(anyhow::anyhow!(
                    "对等节点 {} 的地址格式无效: {}",
                    peer.name,
                    peer.address
                ));
            }
        }

        if let Some(master) = &self.master_node {
            let known = master == &self.node_name || self.peers.iter().any(|p| &p.name == master);
            if !known {
                return Err(anyhow::anyhow!("主节点 {} 不在集群节点列表中", master));
            }
        }

        Ok(())
    }

    /// 本节点加上所有对等节点的名称
    pub fn all_node_names(&self) -> Vec<String> {
        let mut names = vec![self.node_name.clone()];
        for peer in &self.peers {
            if !names.contains(&peer.name) {
                names.push(peer.name.clone());
            }
        }
        names
    }
}
