//! 定宽遥测包的解码与（测试/模拟用）编码。

use crate::error::PacketError;

/// 设备标识字段宽度（字节）。
pub const DEVICE_ID_LEN: usize = 12;

/// 单个序列块宽度：min/max/avg 各 4 字节 + 两个时间戳各 4 字节。
const SERIES_BLOCK_LEN: usize = 20;

/// 报文总长（设备标识 + Temperature 块 + Humidity 块）。
pub const PACKET_LEN: usize = DEVICE_ID_LEN + 2 * SERIES_BLOCK_LEN;

/// 旧版报文固定携带的两个序列名，按报文内顺序排列。
const SERIES_NAMES: [&str; 2] = ["Temperature", "Humidity"];

/// 单个序列的统计记录。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesRecord {
    pub min: f32,
    pub max: f32,
    pub avg: f32,
    /// 区间内最小值出现时刻（Unix 秒）。
    pub min_ts: u32,
    /// 区间内最大值出现时刻（Unix 秒）。
    pub max_ts: u32,
}

/// 解码后的完整报文。
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyPacket {
    pub device_id: String,
    pub temperature: SeriesRecord,
    pub humidity: SeriesRecord,
}

impl LegacyPacket {
    /// 按报文顺序给出（序列名, 记录）对。
    pub fn series(&self) -> [(&'static str, &SeriesRecord); 2] {
        [
            (SERIES_NAMES[0], &self.temperature),
            (SERIES_NAMES[1], &self.humidity),
        ]
    }
}

/// 解码一个定宽报文。
///
/// 长度不符或标识字段非法时整包拒绝，不产出部分结果。
pub fn decode(payload: &[u8]) -> Result<LegacyPacket, PacketError> {
    if payload.len() != PACKET_LEN {
        return Err(PacketError::Length(payload.len()));
    }

    let device_id = decode_device_id(&payload[..DEVICE_ID_LEN])?;
    let temperature = decode_series(&payload[DEVICE_ID_LEN..DEVICE_ID_LEN + SERIES_BLOCK_LEN])?;
    let humidity = decode_series(&payload[DEVICE_ID_LEN + SERIES_BLOCK_LEN..PACKET_LEN])?;

    check_finite(SERIES_NAMES[0], &temperature)?;
    check_finite(SERIES_NAMES[1], &humidity)?;

    Ok(LegacyPacket {
        device_id,
        temperature,
        humidity,
    })
}

/// 标识字段：ASCII 字母数字，NUL 右填充，不得为空。
fn decode_device_id(field: &[u8]) -> Result<String, PacketError> {
    let end = field
        .iter()
        .position(|byte| *byte == 0)
        .unwrap_or(field.len());
    let id = &field[..end];
    if id.is_empty() || !id.iter().all(|byte| byte.is_ascii_alphanumeric()) {
        return Err(PacketError::DeviceId);
    }
    // 填充区必须全为 NUL，否则视为损坏报文。
    if field[end..].iter().any(|byte| *byte != 0) {
        return Err(PacketError::DeviceId);
    }
    String::from_utf8(id.to_vec()).map_err(|_| PacketError::DeviceId)
}

fn decode_series(block: &[u8]) -> Result<SeriesRecord, PacketError> {
    Ok(SeriesRecord {
        min: be_f32(block, 0),
        max: be_f32(block, 4),
        avg: be_f32(block, 8),
        min_ts: be_u32(block, 12),
        max_ts: be_u32(block, 16),
    })
}

fn check_finite(series: &'static str, record: &SeriesRecord) -> Result<(), PacketError> {
    for (field, value) in [
        ("min", record.min),
        ("max", record.max),
        ("avg", record.avg),
    ] {
        if !value.is_finite() {
            return Err(PacketError::NonFinite { series, field });
        }
    }
    Ok(())
}

fn be_f32(block: &[u8], offset: usize) -> f32 {
    f32::from_be_bytes([
        block[offset],
        block[offset + 1],
        block[offset + 2],
        block[offset + 3],
    ])
}

fn be_u32(block: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        block[offset],
        block[offset + 1],
        block[offset + 2],
        block[offset + 3],
    ])
}

/// 编码一个报文，供测试与设备模拟器使用。
///
/// 标识超过 12 字节时截断；不做合法性检查，解码侧负责校验。
pub fn encode(packet: &LegacyPacket) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(PACKET_LEN);
    let mut id_field = [0u8; DEVICE_ID_LEN];
    for (slot, byte) in id_field
        .iter_mut()
        .zip(packet.device_id.bytes().take(DEVICE_ID_LEN))
    {
        *slot = byte;
    }
    buffer.extend_from_slice(&id_field);
    for record in [&packet.temperature, &packet.humidity] {
        buffer.extend_from_slice(&record.min.to_be_bytes());
        buffer.extend_from_slice(&record.max.to_be_bytes());
        buffer.extend_from_slice(&record.avg.to_be_bytes());
        buffer.extend_from_slice(&record.min_ts.to_be_bytes());
        buffer.extend_from_slice(&record.max_ts.to_be_bytes());
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> LegacyPacket {
        LegacyPacket {
            device_id: "110020FF0001".to_string(),
            temperature: SeriesRecord {
                min: -3.5,
                max: 12.25,
                avg: 4.75,
                min_ts: 1_732_233_000,
                max_ts: 1_732_233_200,
            },
            humidity: SeriesRecord {
                min: 45.0,
                max: 75.5,
                avg: 60.25,
                min_ts: 1_732_233_050,
                max_ts: 1_732_233_150,
            },
        }
    }

    #[test]
    fn round_trip_matches_inputs() {
        let packet = sample_packet();
        let bytes = encode(&packet);
        assert_eq!(bytes.len(), PACKET_LEN);

        let decoded = decode(&bytes).expect("decode");
        assert_eq!(decoded.device_id, packet.device_id);
        // 时间戳为整型字段，要求逐位相等
        assert_eq!(decoded.temperature.min_ts, packet.temperature.min_ts);
        assert_eq!(decoded.humidity.max_ts, packet.humidity.max_ts);
        // 浮点字段允许编码往返的微小误差
        assert!((decoded.temperature.min - packet.temperature.min).abs() < 1e-6);
        assert!((decoded.temperature.avg - packet.temperature.avg).abs() < 1e-6);
        assert!((decoded.humidity.max - packet.humidity.max).abs() < 1e-6);
    }

    #[test]
    fn short_packet_is_rejected() {
        let bytes = encode(&sample_packet());
        let err = decode(&bytes[..PACKET_LEN - 1]).expect_err("short packet");
        assert!(matches!(err, PacketError::Length(len) if len == PACKET_LEN - 1));
    }

    #[test]
    fn long_packet_is_rejected() {
        let mut bytes = encode(&sample_packet());
        bytes.push(0);
        assert!(matches!(decode(&bytes), Err(PacketError::Length(_))));
    }

    #[test]
    fn non_printable_device_id_is_rejected() {
        let mut bytes = encode(&sample_packet());
        bytes[0] = 0x01;
        assert!(matches!(decode(&bytes), Err(PacketError::DeviceId)));
    }

    #[test]
    fn empty_device_id_is_rejected() {
        let mut bytes = encode(&sample_packet());
        for byte in bytes.iter_mut().take(DEVICE_ID_LEN) {
            *byte = 0;
        }
        assert!(matches!(decode(&bytes), Err(PacketError::DeviceId)));
    }

    #[test]
    fn garbage_after_padding_is_rejected() {
        let mut bytes = encode(&sample_packet());
        // "ABC\0X..." 形式：NUL 之后又出现数据
        bytes[3] = 0;
        assert!(matches!(decode(&bytes), Err(PacketError::DeviceId)));
    }

    #[test]
    fn non_finite_value_is_rejected() {
        let mut packet = sample_packet();
        packet.temperature.avg = f32::NAN;
        let bytes = encode(&packet);
        assert!(matches!(
            decode(&bytes),
            Err(PacketError::NonFinite {
                series: "Temperature",
                field: "avg"
            })
        ));
    }

    #[test]
    fn series_order_is_temperature_then_humidity() {
        let packet = sample_packet();
        let names: Vec<&str> = packet.series().iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["Temperature", "Humidity"]);
    }
}
