//! 重连退避状态机。
//!
//! broker 订阅侧与 Graphite 转发侧共用同一套封顶指数退避策略。
//! 状态机本身不休眠，调用方拿到 `next_delay()` 的时长后自行执行
//! `tokio::time::sleep` 并与停机信号竞争，因此可以在不等待真实时间的
//! 情况下做单元测试。

use std::time::Duration;

/// 封顶指数退避：每次失败延迟翻倍，到达上限后保持不变。
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        // 零初值会退化为忙等，最小钳制到 1ms；上限不得低于初值。
        let initial = initial.max(Duration::from_millis(1));
        let max = max.max(initial);
        Self {
            initial,
            max,
            next: initial,
            attempt: 0,
        }
    }

    /// 取出当前延迟并推进状态。第 1 次失败返回初值，之后翻倍封顶。
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.attempt = self.attempt.saturating_add(1);
        self.next = (self.next * 2).min(self.max);
        delay
    }

    /// 连接成功后归位。
    pub fn reset(&mut self) {
        self.next = self.initial;
        self.attempt = 0;
    }

    /// 已连续失败次数（用于日志）。
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
