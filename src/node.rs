//! 调度节点的组装与运行
//!
//! 每个节点同时具备主节点和工作节点的能力: 持有锁注册表和任务分发服务，
//! 并向当前主节点拉取任务在本地执行。

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use scheduler_api::create_app;
use scheduler_core::{AppConfig, SchedulerResult};
use scheduler_dispatcher::{
    ClusterLockClient, ClusterLockRegistry, JobNodeTrackerCache, TaskDispatchService,
};
use scheduler_domain::{
    ClusterEndpoint, ClusterLockRequest, ClusterMembership, ClusterTransport, JobNodeInfo,
    JobNodeStore, PullResponder, TaskPullRequest,
};
use scheduler_infrastructure::{
    HttpClusterTransport, InMemoryJobNodeStore, LocalClusterTransport, StaticMembership,
};
use scheduler_worker::{
    broadcast_job_node_info, JobNodeInfoCollector, ShellTaskHandler, TaskHandler,
    TaskHandlerRegistry, TaskManager, TaskPuller, TaskQueueCache,
};

use crate::factory::{build_factory_registry, reclaimed_queue_cache};
use crate::shutdown::ShutdownCoordinator;

/// 持有此锁的节点负责汇总全集群的作业运行信息
pub const REPORT_LOCK_NAME: &str = "job-node-info-report";

/// 本节点对外的集群RPC入口
pub struct NodeEndpoint {
    locks: Arc<ClusterLockRegistry>,
    dispatch: Arc<TaskDispatchService>,
    collector: Arc<JobNodeInfoCollector>,
}

#[async_trait]
impl ClusterEndpoint for NodeEndpoint {
    async fn handle_lock_request(&self, request: ClusterLockRequest) -> SchedulerResult<bool> {
        Ok(self.locks.handle(&request))
    }

    async fn handle_task_pull(
        &self,
        request: TaskPullRequest,
        responder: Box<dyn PullResponder>,
    ) -> SchedulerResult<()> {
        self.dispatch.handle_pull(request, responder).await
    }

    async fn handle_job_node_info(&self) -> SchedulerResult<Vec<JobNodeInfo>> {
        self.collector.collect().await
    }
}

pub struct NodeBuilder {
    config: AppConfig,
    handlers: Vec<Arc<dyn TaskHandler>>,
    local_transport: Option<Arc<LocalClusterTransport>>,
}

impl NodeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            handlers: Vec::new(),
            local_transport: None,
        }
    }

    /// 内置的shell处理器之外的任务处理器
    pub fn with_handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// 使用进程内传输层，不启动HTTP服务
    pub fn with_local_transport(mut self, transport: Arc<LocalClusterTransport>) -> Self {
        self.local_transport = Some(transport);
        self
    }

    pub async fn build(self) -> Result<SchedulerNode> {
        let config = self.config;
        let node_name = config.cluster.node_name.clone();
        info!("组装调度节点: {}", node_name);

        let membership = Arc::new(StaticMembership::from_config(&config.cluster));
        let store: Arc<dyn JobNodeStore> = Arc::new(
            InMemoryJobNodeStore::from_config(&config.jobs, &config.cluster.all_node_names())
                .await
                .context("初始化作业存储失败")?,
        );
        let trackers = Arc::new(JobNodeTrackerCache::new(
            &node_name,
            store,
            &config.tracker,
        ));

        let reclaimed = Arc::new(reclaimed_queue_cache(&config.task_queue));
        let factories = build_factory_registry(&config.jobs, &reclaimed)
            .context("注册任务工厂失败")?;
        let dispatch = Arc::new(TaskDispatchService::new(Arc::new(factories)));
        let locks = Arc::new(ClusterLockRegistry::new(&node_name, &config.lock));

        let mut handlers = TaskHandlerRegistry::builder()
            .register(Arc::new(ShellTaskHandler::new()))
            .context("注册shell任务处理器失败")?;
        for handler in self.handlers {
            handlers = handlers.register(handler).context("注册任务处理器失败")?;
        }
        let engine = Arc::new(
            TaskManager::new(&node_name, Arc::new(handlers.build()), &config.executor)
                .context("创建执行引擎失败")?,
        );

        let collector = Arc::new(
            JobNodeInfoCollector::new(Arc::clone(&trackers)).with_queue_cache(Arc::clone(&reclaimed)),
        );
        let endpoint = Arc::new(NodeEndpoint {
            locks: Arc::clone(&locks),
            dispatch,
            collector,
        });

        let rpc_timeout = Duration::from_secs(config.cluster.rpc_timeout_seconds);
        let serve_http = self.local_transport.is_none();
        let transport: Arc<dyn ClusterTransport> = match self.local_transport {
            Some(local) => {
                local.register(&node_name, endpoint.clone());
                local as Arc<dyn ClusterTransport>
            }
            None => Arc::new(
                HttpClusterTransport::new(membership.clone(), &config.cluster.peers, rpc_timeout)
                    .context("创建HTTP传输层失败")?
                    .with_local_endpoint(&node_name, endpoint.clone()),
            ),
        };

        let lock_client = Arc::new(ClusterLockClient::new(
            &node_name,
            Arc::clone(&transport),
            &config.lock,
        ));
        let puller = Arc::new(TaskPuller::new(
            Arc::clone(&trackers),
            Arc::clone(&transport),
            Arc::clone(&engine),
            &config.dispatch,
        ));

        Ok(SchedulerNode {
            config,
            membership,
            trackers,
            locks,
            lock_client,
            engine,
            reclaimed,
            transport,
            endpoint,
            puller,
            serve_http,
            shutdown: ShutdownCoordinator::new(),
        })
    }
}

/// 组装完成的调度节点
pub struct SchedulerNode {
    config: AppConfig,
    membership: Arc<StaticMembership>,
    trackers: Arc<JobNodeTrackerCache>,
    locks: Arc<ClusterLockRegistry>,
    lock_client: Arc<ClusterLockClient>,
    engine: Arc<TaskManager>,
    reclaimed: Arc<TaskQueueCache>,
    transport: Arc<dyn ClusterTransport>,
    endpoint: Arc<NodeEndpoint>,
    puller: Arc<TaskPuller>,
    serve_http: bool,
    shutdown: ShutdownCoordinator,
}

impl SchedulerNode {
    pub fn builder(config: AppConfig) -> NodeBuilder {
        NodeBuilder::new(config)
    }

    pub fn node_name(&self) -> &str {
        &self.config.cluster.node_name
    }

    pub fn membership(&self) -> &Arc<StaticMembership> {
        &self.membership
    }

    pub fn endpoint(&self) -> Arc<dyn ClusterEndpoint> {
        self.endpoint.clone()
    }

    pub fn trackers(&self) -> &Arc<JobNodeTrackerCache> {
        &self.trackers
    }

    pub fn lock_registry(&self) -> &Arc<ClusterLockRegistry> {
        &self.locks
    }

    pub fn lock_client(&self) -> &Arc<ClusterLockClient> {
        &self.lock_client
    }

    pub fn engine(&self) -> &Arc<TaskManager> {
        &self.engine
    }

    pub fn puller(&self) -> &Arc<TaskPuller> {
        &self.puller
    }

    pub(crate) fn reclaimed(&self) -> &Arc<TaskQueueCache> {
        &self.reclaimed
    }

    /// 触发或等待本节点关闭的句柄
    pub fn shutdown_handle(&self) -> ShutdownCoordinator {
        self.shutdown.clone()
    }

    /// 启动全部后台循环，每个循环在节点关闭触发后退出
    pub fn start_background(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let shutdown = &self.shutdown;
        vec![
            Arc::clone(&self.trackers).start_refresh_loop(shutdown.loop_token()),
            Arc::clone(&self.locks).start_janitor(shutdown.loop_token()),
            Arc::clone(&self.lock_client).start_keep_alive_loop(shutdown.loop_token()),
            Arc::clone(&self.reclaimed).start_eviction_loop(shutdown.loop_token()),
            Arc::clone(&self.puller).start(shutdown.loop_token()),
            Arc::clone(self).start_report_loop(shutdown.loop_token()),
        ]
    }

    /// 持有汇总锁时查询所有节点并记录汇总结果，返回本轮是否执行了汇总
    pub async fn report_once(&self) -> bool {
        if !self.lock_client.is_held(REPORT_LOCK_NAME)
            && !self.lock_client.try_lock(REPORT_LOCK_NAME).await
        {
            debug!("汇总锁由其他节点持有，跳过本轮汇总");
            return false;
        }

        let aggregated =
            broadcast_job_node_info(self.membership.as_ref(), self.transport.as_ref()).await;
        for (node, infos) in &aggregated {
            let running: u32 = infos.iter().map(|info| info.current_task_count).sum();
            info!(
                node = %node,
                bindings = infos.len(),
                running_tasks = running,
                "集群作业运行信息"
            );
        }
        true
    }

    fn start_report_loop(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut ticker = tokio::time::interval(Duration::from_secs(
            self.config.dispatch.report_interval_seconds,
        ));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.report_once().await;
                    }
                    _ = shutdown.cancelled() => {
                        info!("运行信息汇总任务退出");
                        break;
                    }
                }
            }
        })
    }

    /// 运行节点直到关闭被触发，然后按顺序收尾
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.trackers
            .get_trackers()
            .await
            .context("构建作业跟踪快照失败")?;

        let handles = self.start_background();
        info!(
            "节点 {} 已启动，当前主节点: {:?}",
            self.node_name(),
            self.membership.master_node()
        );

        let served = if self.serve_http {
            self.serve_cluster_rpc().await
        } else {
            self.shutdown.triggered().await;
            Ok(())
        };

        // 服务异常退出时同样收尾，避免锁和在途任务悬空
        self.shutdown.wind_down(handles, &self).await;
        served
    }

    async fn serve_cluster_rpc(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.cluster.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.cluster.bind_address))?;
        info!("集群RPC服务监听: {}", self.config.cluster.bind_address);

        let app = create_app(
            self.node_name(),
            self.endpoint(),
            Duration::from_secs(self.config.cluster.rpc_timeout_seconds),
        );
        let token = self.shutdown.loop_token();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .context("集群RPC服务异常退出")
    }

    /// 不经过 `run` 直接停止节点: 释放持有的锁，等待本地任务结束，清理回收队列
    pub async fn stop(&self) {
        self.shutdown.wind_down(Vec::new(), self).await;
    }
}
