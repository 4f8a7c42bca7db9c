//! 报文解码错误类型定义

/// 报文解码错误
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    /// 报文长度与固定契约不符
    #[error("unexpected packet length: {0}")]
    Length(usize),

    /// 设备标识字段包含不可打印或非法字节
    #[error("invalid device id field")]
    DeviceId,

    /// 序列块中的数值非有限浮点
    #[error("non-finite {field} value in {series} block")]
    NonFinite {
        series: &'static str,
        field: &'static str,
    },
}
