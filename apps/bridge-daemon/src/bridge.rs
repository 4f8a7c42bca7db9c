//! 桥接链路装配模块
//!
//! 该模块把数据链路的各个组件（broker 订阅源、规范化器、转发器）组装
//! 在一起：每个 broker 一个接收任务，规范化在接收任务内同步执行，
//! 产出的样本交给转发队列；另有一个转发任务和一个周期统计任务。

use std::sync::Arc;
use std::time::Duration;

use bridge_config::AppConfig;
use bridge_forward::{Forwarder, ForwarderConfig};
use bridge_ingest::{BrokerConfig, BrokerSource, IngestError, RawMessageHandler};
use bridge_normalize::{Normalized, Normalizer};
use bridge_telemetry::{
    record_dropped_denied, record_dropped_invalid, record_dropped_unmatched,
    record_queue_overflow, record_raw_message, record_samples_normalized,
};
use domain::{DeviceRegistry, RawMessage, path};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// 规范化处理器
///
/// 实现 [`RawMessageHandler`]：对每条原始消息做格式归类与规范化，
/// 把样本推入转发队列。消息级失败只记录与计数，从不向上传播——
/// 单条坏消息不能拖垮整条接入链路。
struct NormalizeHandler {
    normalizer: Normalizer,
    forwarder: Forwarder,
}

#[async_trait::async_trait]
impl RawMessageHandler for NormalizeHandler {
    async fn handle(&self, message: RawMessage) -> Result<(), IngestError> {
        record_raw_message();
        debug!(
            target: "bridge.ingest",
            broker = %message.broker_id,
            topic = %message.topic,
            payload_size = message.payload.len(),
            "raw_message_received"
        );

        match self.normalizer.normalize(&message) {
            Ok(Normalized::Samples(samples)) => {
                record_samples_normalized(samples.len() as u64);
                debug!(
                    target: "bridge.ingest",
                    broker = %message.broker_id,
                    topic = %message.topic,
                    samples = samples.len(),
                    "message_normalized"
                );
                let dropped = self.forwarder.enqueue(samples).await;
                if dropped > 0 {
                    // 断线积压超限，最旧样本被丢弃；数据丢失是接受的
                    // 取舍，只告警不算错误
                    record_queue_overflow(dropped as u64);
                    warn!(target: "bridge.forward", dropped, "queue_overflow");
                }
            }
            Ok(Normalized::Denied { device_id }) => {
                record_dropped_denied();
                debug!(
                    target: "bridge.ingest",
                    device = %device_id,
                    "message_denied"
                );
            }
            Ok(Normalized::Unmatched) => {
                record_dropped_unmatched();
                warn!(
                    target: "bridge.ingest",
                    broker = %message.broker_id,
                    topic = %message.topic,
                    "topic_unmatched"
                );
            }
            Err(err) => {
                record_dropped_invalid();
                warn!(
                    target: "bridge.ingest",
                    broker = %message.broker_id,
                    topic = %message.topic,
                    error = %err,
                    "message_invalid"
                );
            }
        }
        Ok(())
    }
}

/// 装配并启动全部后台任务，返回句柄供入口在停机时回收。
pub fn spawn_bridge(
    config: &AppConfig,
    registry: Arc<DeviceRegistry>,
    shutdown: watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let backoff_initial = Duration::from_millis(config.backoff_initial_ms);
    let backoff_max = Duration::from_millis(config.backoff_max_ms);

    let forwarder = Forwarder::new(ForwarderConfig {
        host: config.graphite_host.clone(),
        port: config.graphite_port,
        queue_capacity: config.forward_queue_capacity,
        metric_prefix: path::metric_prefix(&config.mqtt_topic_prefix),
        backoff_initial,
        backoff_max,
    });

    let normalizer = Normalizer::new(
        config.mqtt_topic_prefix.clone(),
        config.legacy_report_topic.clone(),
        config.legacy_packet_topic.clone(),
        registry,
    );
    let handler = Arc::new(NormalizeHandler {
        normalizer,
        forwarder: forwarder.clone(),
    });

    let mut tasks = Vec::new();

    // 1. 转发任务：独占到存储端点的出站连接
    {
        let forwarder = forwarder.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move { forwarder.run(shutdown).await }));
    }

    // 2. 每个 broker 一个接收任务，互不阻塞
    for endpoint in &config.brokers {
        let source = BrokerSource::new(BrokerConfig {
            id: endpoint.id.clone(),
            host: endpoint.host.clone(),
            port: endpoint.port,
            username: endpoint.username.clone(),
            password: endpoint.password.clone(),
            topic_filters: config.topic_filters.clone(),
            backoff_initial,
            backoff_max,
        });
        info!(
            target: "bridge.ingest",
            broker = %endpoint.id,
            filters = config.topic_filters.len(),
            "broker_task_starting"
        );
        let handler: Arc<dyn RawMessageHandler> = handler.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(
            async move { source.run(handler, shutdown).await },
        ));
    }

    // 3. 周期统计日志
    {
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move { stats_loop(shutdown).await }));
    }

    tasks
}

/// 每 60 秒输出一次计数器快照。
async fn stats_loop(mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    // interval 的第一次 tick 立即返回，跳过避免启动即打一条全零统计
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = bridge_telemetry::metrics().snapshot();
                info!(
                    target: "bridge.stats",
                    raw_messages = snapshot.raw_messages,
                    samples_normalized = snapshot.samples_normalized,
                    lines_forwarded = snapshot.lines_forwarded,
                    dropped_invalid = snapshot.dropped_invalid,
                    dropped_denied = snapshot.dropped_denied,
                    dropped_unmatched = snapshot.dropped_unmatched,
                    queue_overflow = snapshot.queue_overflow,
                    broker_reconnects = snapshot.broker_reconnects,
                    forwarder_reconnects = snapshot.forwarder_reconnects,
                    "bridge_stats"
                );
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
