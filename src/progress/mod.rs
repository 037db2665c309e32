//! 进度汇总
//!
//! - `ProgressCounters`：进程级共享计数器，由各实例在处理过程中更新
//! - `InstanceStats`：单个实例的统计与状态
//! - `ProgressAggregator`：只读汇总，定时输出，判断整体是否完成
//!
//! 汇总器只观察不修改，完成判断仅用于停止刷新，不会终止工作循环。

pub mod counters;
pub mod instance;

pub use counters::{CountersSnapshot, ProgressCounters};
pub use instance::{FileProgress, InstanceSnapshot, InstanceStats, WorkerState};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use instance::percent;

/// 某一时刻的全局进度
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub counters: CountersSnapshot,
    pub instances: Vec<InstanceSnapshot>,
}

impl ProgressSnapshot {
    pub fn percent_items(&self) -> f64 {
        percent(self.counters.completed_items, self.counters.total_items)
    }

    pub fn percent_sub_items(&self) -> f64 {
        percent(
            self.counters.completed_sub_items,
            self.counters.total_sub_items,
        )
    }

    pub fn total_resolved(&self) -> usize {
        self.instances.iter().map(|i| i.resolved).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.instances.iter().map(|i| i.errors).sum()
    }

    pub fn total_files_done(&self) -> usize {
        self.instances.iter().map(|i| i.files_done).sum()
    }

    pub fn active_tasks(&self) -> usize {
        self.instances.iter().map(|i| i.active_tasks).sum()
    }

    /// 剩余为零且没有任何进行中的文件或任务
    pub fn is_done(&self) -> bool {
        self.counters.remaining_items() == 0
            && self.counters.in_flight.is_empty()
            && self.active_tasks() == 0
    }
}

/// 跨实例的只读进度汇总
pub struct ProgressAggregator {
    counters: Arc<ProgressCounters>,
    instances: Vec<Arc<InstanceStats>>,
}

impl ProgressAggregator {
    pub fn new(counters: Arc<ProgressCounters>, instances: Vec<Arc<InstanceStats>>) -> Self {
        Self {
            counters,
            instances,
        }
    }

    pub async fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            counters: self.counters.snapshot().await,
            instances: self.instances.iter().map(|i| i.snapshot()).collect(),
        }
    }

    /// 按固定间隔输出进度，完成或 `stop` 结束时返回
    pub async fn monitor<S>(&self, interval: Duration, stop: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(stop);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // 第一次 tick 立即返回
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    let snapshot = self.snapshot().await;
                    report(&snapshot);
                    if snapshot.is_done() {
                        info!("🏁 所有文件均已处理，停止刷新进度");
                        break;
                    }
                }
            }
        }
    }

    /// 输出最终汇总
    pub async fn final_summary(&self) -> ProgressSnapshot {
        let snapshot = self.snapshot().await;
        let counters = &snapshot.counters;

        info!("\n{}", "=".repeat(60));
        info!("📊 全部实例处理完成统计");
        info!(
            "完成时间: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        info!("{}", "=".repeat(60));
        for instance in &snapshot.instances {
            info!(
                "[{}] 文件 {} | 提取成功 {} | 失败 {} | 状态 {}",
                instance.id, instance.files_done, instance.resolved, instance.errors, instance.state
            );
        }
        info!("{}", "─".repeat(60));
        info!(
            "📁 文件: {}/{} ({:.1}%)",
            counters.completed_items,
            counters.total_items,
            snapshot.percent_items()
        );
        info!(
            "🎬 剧集: {}/{} ({:.1}%)",
            counters.completed_sub_items,
            counters.total_sub_items,
            snapshot.percent_sub_items()
        );
        info!("✅ 本次提取成功: {}", snapshot.total_resolved());
        info!("❌ 本次提取失败: {}", snapshot.total_errors());
        info!("{}", "=".repeat(60));

        snapshot
    }
}

fn report(snapshot: &ProgressSnapshot) {
    let counters = &snapshot.counters;
    info!("{}", "─".repeat(60));
    info!(
        "📈 进度: 文件 {}/{} ({:.1}%) | 剧集 {}/{} ({:.1}%) | 处理中 {} | 剩余 {}",
        counters.completed_items,
        counters.total_items,
        snapshot.percent_items(),
        counters.completed_sub_items,
        counters.total_sub_items,
        snapshot.percent_sub_items(),
        counters.in_flight.len(),
        counters.remaining_items()
    );
    for instance in &snapshot.instances {
        match &instance.current {
            Some(file) => info!(
                "[{}] {} | {} {:.1}% ({}+{}/{}) | 任务 {}/{} | ✅ {} ❌ {}",
                instance.id,
                instance.state,
                file.file_name,
                file.percent(),
                file.skipped,
                file.processed,
                file.total_episodes,
                instance.active_tasks,
                instance.capacity,
                instance.resolved,
                instance.errors
            ),
            None => info!(
                "[{}] {} | 文件 {} | ✅ {} ❌ {}",
                instance.id, instance.state, instance.files_done, instance.resolved, instance.errors
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemId;

    #[tokio::test]
    async fn done_only_when_nothing_remains_or_runs() {
        let counters = Arc::new(ProgressCounters::new(2, 10, 4));
        let stats = Arc::new(InstanceStats::new("INST-01"));
        let aggregator = ProgressAggregator::new(counters.clone(), vec![stats.clone()]);

        let a = ItemId::new("anime_a.json");
        let b = ItemId::new("anime_b.json");

        assert!(!aggregator.snapshot().await.is_done());

        counters.mark_started(&a, "INST-01").await;
        counters.mark_completed(&a).await;
        counters.mark_started(&b, "INST-01").await;
        let snapshot = aggregator.snapshot().await;
        assert!(!snapshot.is_done());
        assert_eq!(snapshot.counters.remaining_items(), 0);

        counters.mark_completed(&b).await;
        counters.add_completed_sub_items(6).await;
        let snapshot = aggregator.snapshot().await;
        assert!(snapshot.is_done());
        assert_eq!(snapshot.percent_items(), 100.0);
        assert_eq!(snapshot.percent_sub_items(), 100.0);
    }

    #[tokio::test]
    async fn active_tasks_block_completion() {
        let counters = Arc::new(ProgressCounters::new(0, 0, 0));
        let stats = Arc::new(InstanceStats::new("INST-01"));
        let aggregator = ProgressAggregator::new(counters, vec![stats.clone()]);

        stats.task_started();
        assert!(!aggregator.snapshot().await.is_done());
        stats.task_finished();
        assert!(aggregator.snapshot().await.is_done());
    }

    #[tokio::test]
    async fn monitor_returns_on_stop() {
        let counters = Arc::new(ProgressCounters::new(5, 5, 0));
        let aggregator = ProgressAggregator::new(counters, Vec::new());
        tokio::time::timeout(
            Duration::from_secs(5),
            aggregator.monitor(Duration::from_secs(3600), async {}),
        )
        .await
        .expect("monitor should stop immediately");
    }
}
