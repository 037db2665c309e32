use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;

use crate::models::ItemId;

#[derive(Debug, Default)]
struct CounterState {
    total_items: usize,
    total_sub_items: usize,
    completed_items: HashSet<ItemId>,
    completed_sub_items: usize,
    in_flight: HashMap<ItemId, String>,
}

/// 计数器快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub total_items: usize,
    pub total_sub_items: usize,
    pub completed_items: usize,
    pub completed_sub_items: usize,
    /// 文件 → 正在处理它的实例
    pub in_flight: HashMap<ItemId, String>,
}

impl CountersSnapshot {
    pub fn remaining_items(&self) -> usize {
        self.total_items
            .saturating_sub(self.completed_items)
            .saturating_sub(self.in_flight.len())
    }

    pub fn remaining_sub_items(&self) -> usize {
        self.total_sub_items.saturating_sub(self.completed_sub_items)
    }
}

/// 进程级共享计数器
///
/// 每次更新都在同一个互斥区内完成，并发任务之间不会丢失更新。
#[derive(Debug, Default)]
pub struct ProgressCounters {
    state: Mutex<CounterState>,
}

impl ProgressCounters {
    /// 用启动前的预扫描结果初始化
    pub fn new(total_items: usize, total_sub_items: usize, completed_sub_items: usize) -> Self {
        Self {
            state: Mutex::new(CounterState {
                total_items,
                total_sub_items,
                completed_sub_items,
                ..CounterState::default()
            }),
        }
    }

    pub async fn mark_started(&self, id: &ItemId, instance: &str) {
        let mut state = self.state.lock().await;
        state.in_flight.insert(id.clone(), instance.to_string());
    }

    /// 文件处理结束（无论成功与否），本轮不再认领
    pub async fn mark_completed(&self, id: &ItemId) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(id);
        state.completed_items.insert(id.clone());
    }

    /// 文件释放但还会重试
    pub async fn mark_released(&self, id: &ItemId) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(id);
    }

    pub async fn add_completed_sub_items(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut state = self.state.lock().await;
        state.completed_sub_items += count;
    }

    pub async fn snapshot(&self) -> CountersSnapshot {
        let state = self.state.lock().await;
        CountersSnapshot {
            total_items: state.total_items,
            total_sub_items: state.total_sub_items,
            completed_items: state.completed_items.len(),
            completed_sub_items: state.completed_sub_items,
            in_flight: state.in_flight.clone(),
        }
    }
}
