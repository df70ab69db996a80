use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cluster_scheduler::SchedulerNode;
use scheduler_core::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("scheduler")
        .version(env!("CARGO_PKG_VERSION"))
        .about("集群感知的分布式任务调度节点")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时按默认路径查找"),
        )
        .arg(
            Arg::new("node-name")
                .short('n')
                .long("node-name")
                .value_name("NAME")
                .help("节点名称，覆盖配置文件"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let mut config = AppConfig::load(config_path.map(String::as_str))
        .with_context(|| format!("加载配置失败: {}", config_path.map_or("默认路径", |p| p.as_str())))?;

    if let Some(node_name) = matches.get_one::<String>("node-name") {
        config.cluster.node_name = node_name.clone();
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }
    config.validate().context("命令行参数覆盖后配置无效")?;

    init_logging(&config.observability.log_level, &config.observability.log_format)?;

    info!("启动调度节点: {}", config.cluster.node_name);
    info!("已配置 {} 个作业, {} 个对等节点", config.jobs.len(), config.cluster.peers.len());

    let node = Arc::new(SchedulerNode::builder(config).build().await?);
    let shutdown = node.shutdown_handle();

    let mut node_handle = tokio::spawn(async move {
        if let Err(e) = node.run().await {
            error!("节点运行失败: {e:#}");
        }
    });

    let signalled = tokio::select! {
        _ = wait_for_shutdown_signal() => true,
        joined = &mut node_handle => {
            if let Err(e) = joined {
                error!("节点任务异常退出: {e}");
            }
            false
        }
    };

    if signalled {
        info!("收到关闭信号，开始优雅关闭...");
        shutdown.trigger();
        match tokio::time::timeout(Duration::from_secs(30), node_handle).await {
            Ok(Ok(())) => info!("节点已优雅关闭"),
            Ok(Err(e)) => error!("节点关闭时发生错误: {e}"),
            Err(_) => warn!("节点关闭超时，强制退出"),
        }
    }

    info!("调度节点已退出");
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
