//! # 旧版报文解码能力模块
//!
//! 解码老一代传感器固件使用的定宽二进制遥测包。
//!
//! ## 报文布局（大端序，共 52 字节）
//!
//! ```text
//! 偏移  长度  字段
//! 0     12    设备标识（ASCII，NUL 右填充）
//! 12    20    Temperature 块
//! 32    20    Humidity 块
//!
//! 序列块：min f32 | max f32 | avg f32 | min_ts u32 | max_ts u32
//! ```
//!
//! 字节序与字段宽度是与已部署设备的固定契约：任何改动都会破坏兼容性，
//! 必须以新版本报文呈现，不允许静默变更。

mod error;
mod packet;

pub use error::PacketError;
pub use packet::{LegacyPacket, SeriesRecord, DEVICE_ID_LEN, PACKET_LEN, decode, encode};
