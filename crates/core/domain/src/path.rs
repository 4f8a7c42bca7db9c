//! 指标路径构造。
//!
//! 外部看板按精确路径字符串查询，因此这里的每个函数都是确定性的纯函数：
//! 相同输入永远得到相同路径。

use crate::data::Statistic;

/// 主题前缀为空时使用的默认指标前缀。
pub const DEFAULT_METRIC_PREFIX: &str = "monitoring_data";

/// 由 MQTT 主题前缀导出点分指标前缀。
///
/// `sensors/home` → `sensors.home`；空前缀回落到 `monitoring_data`。
pub fn metric_prefix(topic_prefix: &str) -> String {
    let trimmed = topic_prefix.trim_matches('/');
    if trimmed.is_empty() {
        DEFAULT_METRIC_PREFIX.to_string()
    } else {
        trimmed.replace('/', ".")
    }
}

/// 构造单个统计量的指标路径：`<prefix>.<token>.<series>.<stat>`。
pub fn metric_path(prefix: &str, device_token: &str, series: &str, statistic: Statistic) -> String {
    format!(
        "{}.{}.{}.{}",
        prefix,
        device_token,
        sanitize_segment(series),
        statistic.as_str()
    )
}

/// 显示名路径令牌：清洗后的显示名与原始标识用下划线连接。
///
/// `("Bedroom Sensor", "110020FF0001")` → `BEDROOM_SENSOR_110020FF0001`。
pub fn display_token(display_name: &str, device_id: &str) -> String {
    format!("{}_{}", sanitize_name(display_name), device_id)
}

/// 显示名清洗：去首尾空白、空格换下划线、转大写。
pub fn sanitize_name(name: &str) -> String {
    name.trim().replace(' ', "_").to_uppercase()
}

/// 路径段清洗：序列名中的空格换为下划线。
fn sanitize_segment(segment: &str) -> String {
    segment.replace(' ', "_")
}
