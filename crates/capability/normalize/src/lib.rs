//! 消息规范化。
//!
//! 入站 (topic, payload) 先按主题模式归入三种线上格式之一，再做负载
//! 解析；格式集合是封闭的 [`MessageFormat`]，每种格式一个解析分支，
//! 匹配穷尽性由编译器保证。单条坏消息只丢弃自身，绝不中断整条链路。

use std::sync::Arc;

use domain::path::sanitize_name;
use domain::{CanonicalSample, DeviceRegistry, RawMessage, Statistic};
use serde::Deserialize;

/// 规范化错误（消息级，调用方记录后丢弃该消息）。
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("series {series}: {reason}")]
    Series { series: String, reason: &'static str },
    #[error("sensor_name must be a string")]
    SensorName,
    #[error("no series in report")]
    EmptyReport,
    #[error(transparent)]
    Packet(#[from] bridge_protocol::PacketError),
}

/// 三种线上格式，由主题模式先行判定，不看负载内容。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageFormat {
    /// 当前 JSON 格式：`<prefix>/<deviceId>/data`，设备标识在主题里。
    Current { device_id: String },
    /// 旧版 JSON 格式：固定主题，设备标识在负载里。
    LegacyReport,
    /// 旧版二进制格式：固定主题，定宽报文。
    LegacyPacket,
}

impl MessageFormat {
    /// 主题归类；不属于任何已知格式时返回 `None`。
    pub fn classify(
        topic: &str,
        topic_prefix: &str,
        report_topic: &str,
        packet_topic: &str,
    ) -> Option<Self> {
        let trimmed = topic.trim_matches('/');
        if trimmed == report_topic.trim_matches('/') {
            return Some(MessageFormat::LegacyReport);
        }
        if trimmed == packet_topic.trim_matches('/') {
            return Some(MessageFormat::LegacyPacket);
        }

        let prefix = topic_prefix.trim_matches('/');
        let rest = if prefix.is_empty() {
            trimmed
        } else {
            trimmed
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('/'))?
        };
        let mut parts = rest.split('/');
        let device_id = parts.next()?;
        if device_id.is_empty() || parts.next()? != "data" || parts.next().is_some() {
            return None;
        }
        Some(MessageFormat::Current {
            device_id: device_id.to_string(),
        })
    }
}

/// 规范化结果。
#[derive(Debug)]
pub enum Normalized {
    /// 规范样本，保持消息内发射顺序（每序列依次 min、max、avg）。
    Samples(Vec<CanonicalSample>),
    /// 设备在拒绝清单上，整条消息按策略丢弃（不是错误）。
    Denied { device_id: String },
    /// 主题不属于任何已知格式。
    Unmatched,
}

/// RawMessage → CanonicalSample 规范化器。
///
/// 注册表在构造时注入且只读，便于测试时替换假表。
#[derive(Clone)]
pub struct Normalizer {
    topic_prefix: String,
    report_topic: String,
    packet_topic: String,
    registry: Arc<DeviceRegistry>,
}

impl Normalizer {
    pub fn new(
        topic_prefix: impl Into<String>,
        report_topic: impl Into<String>,
        packet_topic: impl Into<String>,
        registry: Arc<DeviceRegistry>,
    ) -> Self {
        Self {
            topic_prefix: topic_prefix.into(),
            report_topic: report_topic.into(),
            packet_topic: packet_topic.into(),
            registry,
        }
    }

    pub fn normalize(&self, message: &RawMessage) -> Result<Normalized, NormalizeError> {
        let format = MessageFormat::classify(
            &message.topic,
            &self.topic_prefix,
            &self.report_topic,
            &self.packet_topic,
        );
        match format {
            Some(MessageFormat::Current { device_id }) => {
                self.normalize_current(device_id, &message.payload, message.received_at)
            }
            Some(MessageFormat::LegacyReport) => {
                self.normalize_report(&message.payload, message.received_at)
            }
            Some(MessageFormat::LegacyPacket) => {
                self.normalize_packet(&message.payload, message.received_at)
            }
            None => Ok(Normalized::Unmatched),
        }
    }

    /// 当前 JSON 格式：顶层键（除 `sensor_name` 外）即序列名。
    fn normalize_current(
        &self,
        device_id: String,
        payload: &[u8],
        received_at: i64,
    ) -> Result<Normalized, NormalizeError> {
        if self.registry.is_denied(&device_id) {
            return Ok(Normalized::Denied { device_id });
        }

        let root: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(payload)?;

        let payload_name = match root.get("sensor_name") {
            Some(serde_json::Value::String(name)) => Some(name.clone()),
            Some(_) => return Err(NormalizeError::SensorName),
            None => None,
        };
        let device_name = self.display_name(&device_id, payload_name.as_deref());

        let mut samples = Vec::new();
        for (series, value) in root.iter().filter(|(key, _)| *key != "sensor_name") {
            let stats: SeriesStats = serde_json::from_value(value.clone()).map_err(|_| {
                NormalizeError::Series {
                    series: series.clone(),
                    reason: "malformed series object",
                }
            })?;
            let stats = stats.validated(series)?;
            let record = SeriesRecord {
                min: stats.min,
                max: stats.max,
                avg: stats.avg,
                min_ts: stats.min_ts,
                max_ts: stats.max_ts,
                // avg 没有独立时间戳字段，用序列 ts 或接收时间
                avg_ts: stats.ts.unwrap_or(received_at),
            };
            push_series(
                &mut samples,
                &device_id,
                device_name.as_deref(),
                series,
                record,
            );
        }
        if samples.is_empty() {
            return Err(NormalizeError::EmptyReport);
        }
        Ok(Normalized::Samples(samples))
    }

    /// 旧版 JSON 格式：单序列，标识与字段名沿用老固件的 `f_*`/`i_*` 约定。
    fn normalize_report(
        &self,
        payload: &[u8],
        received_at: i64,
    ) -> Result<Normalized, NormalizeError> {
        let report: LegacyReport = serde_json::from_slice(payload)?;
        if report.serie.is_empty() {
            return Err(NormalizeError::Series {
                series: report.serie,
                reason: "empty serie name",
            });
        }
        if self.registry.is_denied(&report.uid) {
            return Ok(Normalized::Denied {
                device_id: report.uid,
            });
        }

        let record = SeriesRecord {
            min: report.f_min,
            max: report.f_max,
            avg: report.f_avg,
            min_ts: check_ts(&report.serie, "negative i_min_ts", report.i_min_ts)?,
            max_ts: check_ts(&report.serie, "negative i_max_ts", report.i_max_ts)?,
            avg_ts: match report.i_ts {
                Some(ts) => check_ts(&report.serie, "negative i_ts", ts)?,
                None => received_at,
            },
        };

        let device_name = self.display_name(&report.uid, None);
        let mut samples = Vec::new();
        push_series(
            &mut samples,
            &report.uid,
            device_name.as_deref(),
            &report.serie,
            record,
        );
        Ok(Normalized::Samples(samples))
    }

    /// 旧版二进制格式：解码失败整包丢弃，不产出部分样本。
    fn normalize_packet(
        &self,
        payload: &[u8],
        received_at: i64,
    ) -> Result<Normalized, NormalizeError> {
        let packet = bridge_protocol::decode(payload)?;
        if self.registry.is_denied(&packet.device_id) {
            return Ok(Normalized::Denied {
                device_id: packet.device_id,
            });
        }

        let device_name = self.display_name(&packet.device_id, None);
        let mut samples = Vec::new();
        for (series, record) in packet.series() {
            let record = SeriesRecord {
                min: f64::from(record.min),
                max: f64::from(record.max),
                avg: f64::from(record.avg),
                min_ts: i64::from(record.min_ts),
                max_ts: i64::from(record.max_ts),
                // 报文不携带 avg 时间戳，回落到接收时间
                avg_ts: received_at,
            };
            push_series(
                &mut samples,
                &packet.device_id,
                device_name.as_deref(),
                series,
                record,
            );
        }
        Ok(Normalized::Samples(samples))
    }

    /// 显示名解析：注册表优先，当前格式的负载字段兜底；命中即清洗。
    fn display_name(&self, device_id: &str, payload_name: Option<&str>) -> Option<String> {
        self.registry
            .display_name(device_id)
            .or(payload_name)
            .map(sanitize_name)
            .filter(|name| !name.is_empty())
    }
}

/// 当前格式单个序列对象。`unit` 为信息性字段，解析时直接忽略。
#[derive(Debug, Deserialize)]
struct SeriesStats {
    min: Option<f64>,
    max: Option<f64>,
    avg: Option<f64>,
    min_ts: Option<i64>,
    max_ts: Option<i64>,
    #[serde(alias = "timestamp")]
    ts: Option<i64>,
}

impl SeriesStats {
    /// 必填字段齐全性与时间戳符号校验。
    ///
    /// `min_ts`/`max_ts` 缺失是校验错误，绝不默认填充：静默补时间戳
    /// 会把极值记到错误的时刻上。
    fn validated(self, series: &str) -> Result<ValidatedStats, NormalizeError> {
        let missing = |reason: &'static str| NormalizeError::Series {
            series: series.to_string(),
            reason,
        };
        let min = self.min.ok_or_else(|| missing("missing min"))?;
        let max = self.max.ok_or_else(|| missing("missing max"))?;
        let avg = self.avg.ok_or_else(|| missing("missing avg"))?;
        let min_ts = self.min_ts.ok_or_else(|| missing("missing min_ts"))?;
        let max_ts = self.max_ts.ok_or_else(|| missing("missing max_ts"))?;
        let min_ts = check_ts(series, "negative min_ts", min_ts)?;
        let max_ts = check_ts(series, "negative max_ts", max_ts)?;
        let ts = match self.ts {
            Some(ts) => Some(check_ts(series, "negative ts", ts)?),
            None => None,
        };
        Ok(ValidatedStats {
            min,
            max,
            avg,
            min_ts,
            max_ts,
            ts,
        })
    }
}

struct ValidatedStats {
    min: f64,
    max: f64,
    avg: f64,
    min_ts: i64,
    max_ts: i64,
    ts: Option<i64>,
}

/// 旧版 JSON 上报负载。
#[derive(Debug, Deserialize)]
struct LegacyReport {
    uid: String,
    serie: String,
    f_min: f64,
    f_max: f64,
    f_avg: f64,
    i_min_ts: i64,
    i_max_ts: i64,
    #[serde(default)]
    i_ts: Option<i64>,
}

/// 统一的序列记录：三个统计量各自带时间戳。
struct SeriesRecord {
    min: f64,
    max: f64,
    avg: f64,
    min_ts: i64,
    max_ts: i64,
    avg_ts: i64,
}

fn check_ts(series: &str, reason: &'static str, ts: i64) -> Result<i64, NormalizeError> {
    if ts < 0 {
        return Err(NormalizeError::Series {
            series: series.to_string(),
            reason,
        });
    }
    Ok(ts)
}

/// 按固定顺序（min、max、avg）发射一个序列的三个样本。
fn push_series(
    samples: &mut Vec<CanonicalSample>,
    device_id: &str,
    device_name: Option<&str>,
    series: &str,
    record: SeriesRecord,
) {
    for (statistic, value, timestamp) in [
        (Statistic::Min, record.min, record.min_ts),
        (Statistic::Max, record.max, record.max_ts),
        (Statistic::Avg, record.avg, record.avg_ts),
    ] {
        samples.push(CanonicalSample {
            device_id: device_id.to_string(),
            device_name: device_name.map(str::to_string),
            series: series.to_string(),
            statistic,
            value,
            timestamp,
        });
    }
}
