use std::sync::Arc;

use async_trait::async_trait;
use scheduler_core::{LockConfig, SchedulerResult};
use scheduler_dispatcher::{ClusterLockClient, ClusterLockRegistry};
use scheduler_domain::{
    ClusterLockRequest, ClusterTransport, JobNodeInfo, TaskPullRequest, TaskPullResponse,
};

struct DirectTransport {
    registry: Arc<ClusterLockRegistry>,
}

#[async_trait]
impl ClusterTransport for DirectTransport {
    async fn send_lock_request(&self, request: ClusterLockRequest) -> SchedulerResult<bool> {
        Ok(self.registry.handle(&request))
    }

    async fn pull_tasks(&self, _request: TaskPullRequest) -> SchedulerResult<TaskPullResponse> {
        Ok(TaskPullResponse::default())
    }

    async fn query_job_node_info(&self, _node_name: &str) -> SchedulerResult<Vec<JobNodeInfo>> {
        Ok(Vec::new())
    }
}

fn cluster(nodes: &[&str]) -> (Arc<ClusterLockRegistry>, Vec<Arc<ClusterLockClient>>) {
    let config = LockConfig::default();
    let registry = Arc::new(ClusterLockRegistry::new("master", &config));
    let transport: Arc<dyn ClusterTransport> = Arc::new(DirectTransport {
        registry: Arc::clone(&registry),
    });
    let clients = nodes
        .iter()
        .map(|name| Arc::new(ClusterLockClient::new(*name, Arc::clone(&transport), &config)))
        .collect();
    (registry, clients)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_nodes_get_single_owner() {
    let names: Vec<String> = (0..16).map(|i| format!("node-{i}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let (registry, clients) = cluster(&refs);

    let mut handles = Vec::new();
    for client in &clients {
        let client = Arc::clone(client);
        handles.push(tokio::spawn(async move { client.try_lock("daily-report").await }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    let owner = registry.get("daily-report").unwrap().key.owner_node_name;
    let holders: Vec<_> = clients.iter().filter(|c| c.is_held("daily-report")).collect();
    assert_eq!(holders.len(), 1);
    assert_eq!(holders[0].node_name(), owner);
}

#[tokio::test]
async fn test_expired_holder_cannot_release_new_owner() {
    let (registry, clients) = cluster(&["node-a", "node-b"]);
    let (a, b) = (&clients[0], &clients[1]);

    assert!(a.try_lock("sync").await);
    let stale = registry.get("sync").unwrap();

    // 过期清理后由其他节点重新获取
    let removed = registry.sweep_expired(stale.last_refresh_millis + 600_001);
    assert_eq!(removed, 1);
    assert!(b.try_lock("sync").await);

    assert!(!a.keep_alive("sync").await);
    assert!(!a.is_held("sync"));
    assert!(!a.release("sync").await);
    assert_eq!(registry.get("sync").unwrap().key.owner_node_name, "node-b");
}

#[tokio::test]
async fn test_same_node_reacquire_gets_fresh_key() {
    let (registry, clients) = cluster(&["node-a"]);
    let a = &clients[0];

    assert!(a.try_lock("sync").await);
    let first = a.held_key("sync").unwrap();
    assert!(a.release("sync").await);

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    assert!(a.try_lock("sync").await);
    let second = a.held_key("sync").unwrap();

    assert_ne!(first, second);
    assert!(!registry.release(&first));
    assert!(registry.get("sync").is_some());
}
