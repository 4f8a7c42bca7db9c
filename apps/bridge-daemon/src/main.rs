//! MQTT → Graphite 桥接进程入口。
//!
//! 启动顺序：加载配置（缺失即以非零码退出）→ 初始化日志 → 装配并
//! 启动各任务 → 等待 SIGINT/SIGTERM → 广播停机信号并回收任务。

mod bridge;

use std::sync::Arc;

use bridge_config::AppConfig;
use bridge_telemetry::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置；broker 或存储端点缺失在这里直接失败
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    // 设备注册表启动时构建一次，之后只读
    let registry = Arc::new(config.load_registry()?);
    info!(
        brokers = config.brokers.len(),
        devices = registry.name_count(),
        denied = registry.deny_count(),
        graphite_host = %config.graphite_host,
        graphite_port = config.graphite_port,
        "bridge_starting"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let tasks = bridge::spawn_bridge(&config, registry, shutdown_rx);

    wait_for_signal().await;
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        let _ = task.await;
    }
    info!("bridge_stopped");
    Ok(())
}

/// SIGINT 与 SIGTERM 都触发协调停机。
async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
