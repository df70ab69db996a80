//! 调度节点的基础设施实现: 作业存储、集群成员和集群传输层

pub mod job_store;
pub mod membership;
pub mod transport;

pub use job_store::InMemoryJobNodeStore;
pub use membership::StaticMembership;
pub use transport::{
    pull_through_endpoint, server_pull_deadline, HttpClusterTransport, LocalClusterTransport, OneshotResponder,
};
