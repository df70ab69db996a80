//! 领域仓储抽象
//!
//! 作业/绑定的持久化与集群成员管理由外部协作方提供，这里只定义边界接口

use async_trait::async_trait;

use crate::entities::{JobDescriptor, JobNodeBinding};
use scheduler_core::SchedulerResult;

/// 作业与作业/节点绑定的存储
#[async_trait]
pub trait JobNodeStore: Send + Sync {
    /// 指定节点上的全部绑定（包含已禁用的作业）
    async fn find_bindings_for_node(&self, node_name: &str) -> SchedulerResult<Vec<JobNodeBinding>>;
    async fn find_job(&self, job_name: &str) -> SchedulerResult<Option<JobDescriptor>>;
    async fn find_all_bindings(&self) -> SchedulerResult<Vec<JobNodeBinding>>;
}

/// 集群成员解析
pub trait ClusterMembership: Send + Sync {
    fn local_node_name(&self) -> &str;
    /// 当前主节点，没有活跃节点时为 None
    fn master_node(&self) -> Option<String>;
    fn active_nodes(&self) -> Vec<String>;

    fn is_master(&self) -> bool {
        self.master_node().as_deref() == Some(self.local_node_name())
    }
}
