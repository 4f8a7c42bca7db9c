//! Graphite 明文协议转发。
//!
//! 持有唯一一条到存储摄入端点的 TCP 连接，状态机为
//! `Disconnected → Connecting → Connected`。连接可用时每批样本立即
//! 逐行写出（不开批量窗口，保住端到端延迟）；断线期间样本进入有界
//! 队列，满了丢最旧——把历史样本乱序补写进时序库比丢掉最旧积压更糟。
//! 重连退避与 broker 侧相互独立，两个故障域互不阻塞。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use domain::{Backoff, CanonicalSample, path};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify, watch};
use tracing::{debug, info, warn};

/// 转发配置。
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub host: String,
    pub port: u16,
    /// 断线期间缓冲的样本上限，超出时丢弃最旧样本。
    pub queue_capacity: usize,
    /// 指标路径前缀（已点分，如 `sensors.home`）。
    pub metric_prefix: String,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

struct ForwarderInner {
    config: ForwarderConfig,
    queue: Mutex<VecDeque<CanonicalSample>>,
    notify: Notify,
}

/// 指标转发器。`enqueue` 由各 broker 任务并发调用，`run` 独占一个任务。
#[derive(Clone)]
pub struct Forwarder {
    inner: Arc<ForwarderInner>,
}

impl Forwarder {
    pub fn new(config: ForwarderConfig) -> Self {
        let mut config = config;
        if config.queue_capacity == 0 {
            config.queue_capacity = 1;
        }
        Self {
            inner: Arc::new(ForwarderInner {
                config,
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// 样本入队，返回因溢出被丢弃的最旧样本数（调用方记录告警）。
    pub async fn enqueue(&self, samples: Vec<CanonicalSample>) -> usize {
        if samples.is_empty() {
            return 0;
        }
        let mut queue = self.inner.queue.lock().await;
        queue.extend(samples);
        let mut dropped = 0;
        while queue.len() > self.inner.config.queue_capacity {
            queue.pop_front();
            dropped += 1;
        }
        drop(queue);
        self.inner.notify.notify_one();
        dropped
    }

    /// 当前积压的样本数。
    pub async fn queued(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    /// 转发循环。只有停机信号能让它返回；写出中的批次会先写完，
    /// 退避休眠则被立即打断。
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let endpoint = format!(
            "{}:{}",
            self.inner.config.host, self.inner.config.port
        );
        let mut backoff = Backoff::new(
            self.inner.config.backoff_initial,
            self.inner.config.backoff_max,
        );

        'reconnect: loop {
            // Connecting：带退避的连接尝试
            let mut stream = loop {
                info!(target: "bridge.forward", endpoint = %endpoint, "forwarder_connecting");
                let connect = TcpStream::connect(&endpoint);
                tokio::select! {
                    result = connect => match result {
                        Ok(stream) => {
                            backoff.reset();
                            info!(target: "bridge.forward", endpoint = %endpoint, "forwarder_connected");
                            break stream;
                        }
                        Err(err) => {
                            bridge_telemetry::record_forwarder_reconnect();
                            let delay = backoff.next_delay();
                            warn!(
                                target: "bridge.forward",
                                endpoint = %endpoint,
                                attempt = backoff.attempt(),
                                retry_in_ms = delay.as_millis() as u64,
                                error = %err,
                                "forwarder_connect_retry"
                            );
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                changed = shutdown.changed() => {
                                    if changed.is_err() || *shutdown.borrow() {
                                        info!(target: "bridge.forward", "forwarder_task_stopped");
                                        return;
                                    }
                                }
                            }
                        }
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!(target: "bridge.forward", "forwarder_task_stopped");
                            return;
                        }
                    }
                }
            };

            // Connected：按到达顺序排空队列
            loop {
                let batch: Vec<CanonicalSample> = {
                    let mut queue = self.inner.queue.lock().await;
                    queue.drain(..).collect()
                };

                if batch.is_empty() {
                    if *shutdown.borrow() {
                        info!(target: "bridge.forward", "forwarder_task_stopped");
                        return;
                    }
                    tokio::select! {
                        _ = self.inner.notify.notified() => continue,
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                info!(target: "bridge.forward", "forwarder_task_stopped");
                                return;
                            }
                        }
                    }
                    continue;
                }

                match self.write_batch(&mut stream, &batch).await {
                    Ok(lines) => {
                        bridge_telemetry::record_lines_forwarded(lines);
                        debug!(
                            target: "bridge.forward",
                            samples = batch.len(),
                            lines,
                            "samples_forwarded"
                        );
                        if *shutdown.borrow() {
                            info!(target: "bridge.forward", "forwarder_task_stopped");
                            return;
                        }
                    }
                    Err((err, unsent)) => {
                        // 未写出的尾部按原顺序放回队头，重连后续传
                        let requeued = unsent.len();
                        {
                            let mut queue = self.inner.queue.lock().await;
                            for sample in unsent.into_iter().rev() {
                                queue.push_front(sample);
                            }
                            while queue.len() > self.inner.config.queue_capacity {
                                queue.pop_front();
                            }
                        }
                        warn!(
                            target: "bridge.forward",
                            endpoint = %endpoint,
                            requeued,
                            error = %err,
                            "forwarder_write_failed"
                        );
                        info!(target: "bridge.forward", endpoint = %endpoint, "forwarder_disconnected");
                        continue 'reconnect;
                    }
                }
            }
        }
    }

    /// 逐样本写出；某个样本写失败时返回未写出的尾部。
    async fn write_batch(
        &self,
        stream: &mut TcpStream,
        batch: &[CanonicalSample],
    ) -> Result<u64, (std::io::Error, Vec<CanonicalSample>)> {
        let mut lines_written = 0u64;
        for (index, sample) in batch.iter().enumerate() {
            let lines = sample_lines(&self.inner.config.metric_prefix, sample);
            let mut payload = String::new();
            for line in &lines {
                payload.push_str(line);
                payload.push('\n');
            }
            if let Err(err) = stream.write_all(payload.as_bytes()).await {
                return Err((err, batch[index..].to_vec()));
            }
            lines_written += lines.len() as u64;
        }
        Ok(lines_written)
    }
}

/// 一个样本序列化为 1~2 行：`<path> <value> <timestamp>`。
///
/// 设备带显示名时同值双发（原始标识路径 + 显示名_标识路径）。这是
/// 现行命名方案的约定行为，既有看板同时按两种路径建查询。
pub fn sample_lines(prefix: &str, sample: &CanonicalSample) -> Vec<String> {
    let mut lines = Vec::with_capacity(2);
    let id_path = path::metric_path(prefix, &sample.device_id, &sample.series, sample.statistic);
    lines.push(format!(
        "{} {} {}",
        id_path, sample.value, sample.timestamp
    ));
    if let Some(name) = sample.device_name.as_deref() {
        let token = path::display_token(name, &sample.device_id);
        let name_path = path::metric_path(prefix, &token, &sample.series, sample.statistic);
        lines.push(format!(
            "{} {} {}",
            name_path, sample.value, sample.timestamp
        ));
    }
    lines
}
