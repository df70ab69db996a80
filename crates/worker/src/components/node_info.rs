use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::task_queue_cache::TaskQueueCache;
use scheduler_core::SchedulerResult;
use scheduler_dispatcher::JobNodeTrackerCache;
use scheduler_domain::{ClusterMembership, ClusterTransport, JobNodeInfo};

/// 汇总本节点各绑定的运行信息
pub struct JobNodeInfoCollector {
    cache: Arc<JobNodeTrackerCache>,
    queues: Option<Arc<TaskQueueCache>>,
}

impl JobNodeInfoCollector {
    pub fn new(cache: Arc<JobNodeTrackerCache>) -> Self {
        Self { cache, queues: None }
    }

    pub fn with_queue_cache(mut self, queues: Arc<TaskQueueCache>) -> Self {
        self.queues = Some(queues);
        self
    }

    pub async fn collect(&self) -> SchedulerResult<Vec<JobNodeInfo>> {
        let trackers = self.cache.trackers().await?;
        Ok(trackers
            .iter()
            .map(|tracker| JobNodeInfo {
                binding: tracker.binding().clone(),
                current_task_count: tracker.current_task_count(),
                schedule_reference_time: Some(tracker.schedule_reference_time()),
                last_executed_time: tracker.last_executed_time(),
                cached_queue_depth: self
                    .queues
                    .as_ref()
                    .and_then(|queues| queues.task_count(tracker.job_name())),
            })
            .collect())
    }
}

/// 向所有活跃节点查询运行信息，失败的节点记录日志后跳过
pub async fn broadcast_job_node_info(
    membership: &dyn ClusterMembership,
    transport: &dyn ClusterTransport,
) -> BTreeMap<String, Vec<JobNodeInfo>> {
    let mut aggregated = BTreeMap::new();
    for node in membership.active_nodes() {
        match transport.query_job_node_info(&node).await {
            Ok(infos) => {
                debug!("节点 {} 返回 {} 条运行信息", node, infos.len());
                aggregated.insert(node, infos);
            }
            Err(e) => warn!("查询节点 {} 的运行信息失败: {}", node, e),
        }
    }
    aggregated
}
