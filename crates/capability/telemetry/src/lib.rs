//! 追踪初始化与进程级计数器。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 基础指标快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub raw_messages: u64,
    pub samples_normalized: u64,
    pub lines_forwarded: u64,
    pub dropped_invalid: u64,
    pub dropped_denied: u64,
    pub dropped_unmatched: u64,
    pub queue_overflow: u64,
    pub broker_reconnects: u64,
    pub forwarder_reconnects: u64,
}

/// 基础指标。
pub struct TelemetryMetrics {
    raw_messages: AtomicU64,
    samples_normalized: AtomicU64,
    lines_forwarded: AtomicU64,
    dropped_invalid: AtomicU64,
    dropped_denied: AtomicU64,
    dropped_unmatched: AtomicU64,
    queue_overflow: AtomicU64,
    broker_reconnects: AtomicU64,
    forwarder_reconnects: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            raw_messages: AtomicU64::new(0),
            samples_normalized: AtomicU64::new(0),
            lines_forwarded: AtomicU64::new(0),
            dropped_invalid: AtomicU64::new(0),
            dropped_denied: AtomicU64::new(0),
            dropped_unmatched: AtomicU64::new(0),
            queue_overflow: AtomicU64::new(0),
            broker_reconnects: AtomicU64::new(0),
            forwarder_reconnects: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            raw_messages: self.raw_messages.load(Ordering::Relaxed),
            samples_normalized: self.samples_normalized.load(Ordering::Relaxed),
            lines_forwarded: self.lines_forwarded.load(Ordering::Relaxed),
            dropped_invalid: self.dropped_invalid.load(Ordering::Relaxed),
            dropped_denied: self.dropped_denied.load(Ordering::Relaxed),
            dropped_unmatched: self.dropped_unmatched.load(Ordering::Relaxed),
            queue_overflow: self.queue_overflow.load(Ordering::Relaxed),
            broker_reconnects: self.broker_reconnects.load(Ordering::Relaxed),
            forwarder_reconnects: self.forwarder_reconnects.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录收到一条原始消息。
pub fn record_raw_message() {
    metrics().raw_messages.fetch_add(1, Ordering::Relaxed);
}

/// 记录规范化产出的样本数。
pub fn record_samples_normalized(count: u64) {
    metrics()
        .samples_normalized
        .fetch_add(count, Ordering::Relaxed);
}

/// 记录已写出的指标行数。
pub fn record_lines_forwarded(count: u64) {
    metrics()
        .lines_forwarded
        .fetch_add(count, Ordering::Relaxed);
}

/// 记录非法消息丢弃次数。
pub fn record_dropped_invalid() {
    metrics().dropped_invalid.fetch_add(1, Ordering::Relaxed);
}

/// 记录拒绝清单策略丢弃次数。
pub fn record_dropped_denied() {
    metrics().dropped_denied.fetch_add(1, Ordering::Relaxed);
}

/// 记录主题未匹配任何已知格式的丢弃次数。
pub fn record_dropped_unmatched() {
    metrics().dropped_unmatched.fetch_add(1, Ordering::Relaxed);
}

/// 记录转发队列溢出丢弃的样本数。
pub fn record_queue_overflow(count: u64) {
    metrics().queue_overflow.fetch_add(count, Ordering::Relaxed);
}

/// 记录 broker 侧重连尝试。
pub fn record_broker_reconnect() {
    metrics().broker_reconnects.fetch_add(1, Ordering::Relaxed);
}

/// 记录转发侧重连尝试。
pub fn record_forwarder_reconnect() {
    metrics()
        .forwarder_reconnects
        .fetch_add(1, Ordering::Relaxed);
}
