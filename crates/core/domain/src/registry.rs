//! 设备注册表：旧设备标识 → 显示名映射，以及静默丢弃的拒绝清单。
//!
//! 启动时构建一次，进程生命周期内只读，无需加锁。

use std::collections::{HashMap, HashSet};

/// 只读设备注册表。
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    names: HashMap<String, String>,
    deny: HashSet<String>,
}

impl DeviceRegistry {
    pub fn new(names: HashMap<String, String>, deny: HashSet<String>) -> Self {
        Self { names, deny }
    }

    /// 查询标识对应的显示名（未清洗的原始配置值）。
    pub fn display_name(&self, device_id: &str) -> Option<&str> {
        self.names.get(device_id).map(String::as_str)
    }

    /// 标识是否在拒绝清单上。命中时整条消息按策略丢弃，不算错误。
    pub fn is_denied(&self, device_id: &str) -> bool {
        self.deny.contains(device_id)
    }

    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    pub fn deny_count(&self) -> usize {
        self.deny.len()
    }
}
