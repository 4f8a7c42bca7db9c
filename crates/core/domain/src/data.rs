/// 订阅层产出的原始消息。
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub broker_id: String,
    pub topic: String,
    pub payload: Vec<u8>,
    /// 接收时间（Unix 秒）。
    pub received_at: i64,
}

/// 报告区间内的统计量（封闭集合）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statistic {
    Min,
    Max,
    Avg,
}

impl Statistic {
    /// 指标路径末段使用的小写名称。
    pub fn as_str(self) -> &'static str {
        match self {
            Statistic::Min => "min",
            Statistic::Max => "max",
            Statistic::Avg => "avg",
        }
    }
}

/// 规范化后的单个统计样本。
///
/// 一条原始消息展开为 0 个或多个样本（通常 3 统计量 × N 序列）。
/// 由 normalize 产出，forward 持有直至写出，其余组件不修改。
#[derive(Debug, Clone)]
pub struct CanonicalSample {
    pub device_id: String,
    /// 注册表或负载提供的显示名（已按命名规则清洗），用于双路径发射。
    pub device_name: Option<String>,
    pub series: String,
    pub statistic: Statistic,
    pub value: f64,
    /// 样本时间戳（Unix 秒）；来源消息未携带时为接收时间。
    pub timestamp: i64,
}
