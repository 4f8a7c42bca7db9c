//! MQTT 订阅接入。
//!
//! 每个配置的 broker 对应一个 [`BrokerSource`]，独占一个接收任务：
//! 连接 → ConnAck 后批量注册订阅 → 收到消息同步分发给处理器。
//! 连接断开走封顶指数退避无限重试，单个 broker 不可达不影响进程，
//! 也不影响其它 broker 的接收。

use async_trait::async_trait;
use domain::{Backoff, RawMessage};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, SubscribeFilter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// 采集错误。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("handler error: {0}")]
    Handler(String),
}

/// RawMessage 处理器。规范化在接收任务内同步执行。
#[async_trait]
pub trait RawMessageHandler: Send + Sync {
    async fn handle(&self, message: RawMessage) -> Result<(), IngestError>;
}

/// 单个 broker 的接入配置。
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// 消息归属与日志标识，一般取 `host:port`。
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// ConnAck 后一次性批量注册的主题过滤器。
    pub topic_filters: Vec<String>,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

/// MQTT 采集源：一个 broker 一个实例。
pub struct BrokerSource {
    config: BrokerConfig,
}

impl BrokerSource {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// 接收循环。只有停机信号能让它返回。
    ///
    /// 认证失败与网络故障走同一条退避重试路径（broker 对两者返回的
    /// 都是连接层错误，这里不做区分）。
    pub async fn run(
        &self,
        handler: Arc<dyn RawMessageHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut options = MqttOptions::new(
            self.client_id(),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (
            self.config.username.as_ref(),
            self.config.password.as_ref(),
        ) {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 16);
        let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_max);
        let mut connected = false;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(target: "bridge.ingest", broker = %self.config.id, "broker_task_stopped");
                        return;
                    }
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        backoff.reset();
                        connected = true;
                        info!(
                            target: "bridge.ingest",
                            broker = %self.config.id,
                            filters = self.config.topic_filters.len(),
                            "broker_connected"
                        );
                        // 批量注册全部过滤器；失败时交给下一次重连补注册
                        if let Err(err) = client.subscribe_many(self.subscriptions()).await {
                            warn!(
                                target: "bridge.ingest",
                                broker = %self.config.id,
                                error = %err,
                                "subscribe_failed"
                            );
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        backoff.reset();
                        let message = RawMessage {
                            broker_id: self.config.id.clone(),
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                            received_at: now_epoch_secs(),
                        };
                        if let Err(err) = handler.handle(message).await {
                            warn!(
                                target: "bridge.ingest",
                                broker = %self.config.id,
                                topic = %publish.topic,
                                error = %err,
                                "message_handler_failed"
                            );
                        }
                    }
                    Ok(_) => {
                        backoff.reset();
                    }
                    Err(err) => {
                        if connected {
                            connected = false;
                            info!(
                                target: "bridge.ingest",
                                broker = %self.config.id,
                                "broker_disconnected"
                            );
                        }
                        bridge_telemetry::record_broker_reconnect();
                        let delay = backoff.next_delay();
                        warn!(
                            target: "bridge.ingest",
                            broker = %self.config.id,
                            attempt = backoff.attempt(),
                            retry_in_ms = delay.as_millis() as u64,
                            error = %err,
                            "broker_connect_retry"
                        );
                        // 退避休眠与停机信号竞争：停机不等退避结束
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    info!(target: "bridge.ingest", broker = %self.config.id, "broker_task_stopped");
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    fn subscriptions(&self) -> Vec<SubscribeFilter> {
        self.config
            .topic_filters
            .iter()
            .map(|filter| SubscribeFilter::new(filter.clone(), QoS::AtMostOnce))
            .collect()
    }

    /// 客户端标识需要全局唯一，否则 broker 会互踢同名会话。
    fn client_id(&self) -> String {
        let broker = self.config.id.replace([':', '.', '/'], "-");
        format!("bridge-{}-{}", broker, now_epoch_ms())
    }
}

fn now_epoch_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
