//! 实例工作循环 - 编排层
//!
//! 每个实例是一个状态机：
//!
//! ```text
//! Starting → Scanning → Claimed → Processing → Releasing → Scanning → …
//!                 ↓ (无可用文件)
//!              IdleWait → Scanning → Terminated
//! ```
//!
//! 单个文件的任何失败都不会让循环退出；锁在每条路径上都会被释放。

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::IndexedRandom;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::coordination::{Backlog, ClaimMode, LockCoordinator};
use crate::error::{AppError, FileError};
use crate::extraction::Extractor;
use crate::models::{ItemId, ItemStore};
use crate::orchestrator::batch_processor::{BatchOutcome, BatchProcessor};
use crate::orchestrator::shutdown::ShutdownSignal;
use crate::pool::TabFactory;
use crate::progress::{InstanceStats, ProgressCounters, WorkerState};

/// 实例编号，如 `INST-01`
pub fn instance_id(index: usize) -> String {
    format!("INST-{:02}", index)
}

/// 写入锁文件的持有者标识
pub fn holder_id(instance: &str) -> String {
    format!("{}@{}", instance, std::process::id())
}

/// 循环节奏相关的设置
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub claim_mode: ClaimMode,
    pub idle_wait: Duration,
    pub claim_pause: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            claim_mode: ClaimMode::Exclusive,
            idle_wait: Duration::from_secs(30),
            claim_pause: Duration::from_secs(5),
        }
    }
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            claim_mode: config.claim_mode,
            idle_wait: config.idle_wait,
            claim_pause: config.claim_pause,
        }
    }
}

/// 处理完一个文件后的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// 本次运行不再认领
    Settled,
    /// 退避结束后再认领
    Deferred(Instant),
    /// 因停止信号中断，保持原状
    Interrupted,
}

/// 实例退出时的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub files_processed: usize,
    pub resolved: usize,
    pub failed: usize,
}

/// 单个实例的工作循环
pub struct WorkerLoop<F: TabFactory, E> {
    id: String,
    holder: String,
    coordinator: Arc<LockCoordinator>,
    backlog: Arc<Backlog>,
    store: Arc<dyn ItemStore>,
    processor: BatchProcessor<F, E>,
    counters: Arc<ProgressCounters>,
    stats: Arc<InstanceStats>,
    settings: WorkerSettings,
    shutdown: ShutdownSignal,
}

impl<F, E> WorkerLoop<F, E>
where
    F: TabFactory,
    E: Extractor<F::Tab>,
{
    pub fn new(
        coordinator: Arc<LockCoordinator>,
        backlog: Arc<Backlog>,
        store: Arc<dyn ItemStore>,
        processor: BatchProcessor<F, E>,
        counters: Arc<ProgressCounters>,
        stats: Arc<InstanceStats>,
    ) -> Self {
        let id = stats.id().to_string();
        let holder = holder_id(&id);
        let processor = processor.with_lock_refresh(Arc::clone(&coordinator), holder.clone());
        Self {
            holder,
            id,
            coordinator,
            backlog,
            store,
            processor,
            counters,
            stats,
            settings: WorkerSettings::default(),
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn with_settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn enter(&self, state: WorkerState) {
        debug!("[{}] → {}", self.id, state);
        self.stats.set_state(state);
    }

    /// 运行直到没有可认领的文件或收到停止信号
    pub async fn run(&self) -> WorkerReport {
        self.enter(WorkerState::Starting);
        info!("[{}] 🚀 实例启动，持有者 {}", self.id, self.holder);

        let mut report = WorkerReport::default();
        let mut rescanned = false;

        loop {
            if self.shutdown.is_requested() {
                info!("[{}] ⏹️ 收到停止信号", self.id);
                break;
            }

            self.enter(WorkerState::Scanning);
            let candidates = self.backlog.candidates(Instant::now()).await;
            let available = self.coordinator.list_available(&candidates.ready).await;

            let Some(id) = choose(&available) else {
                self.enter(WorkerState::IdleWait);
                if let Some(until) = candidates.next_deferred {
                    let wait = until.saturating_duration_since(Instant::now());
                    info!("[{}] ⏳ 等待重试退避 {:?}", self.id, wait);
                    rescanned = false;
                    if self.shutdown.sleep(wait).await {
                        break;
                    }
                    continue;
                }
                if rescanned {
                    info!("[{}] 🏁 没有可处理的文件，实例退出", self.id);
                    break;
                }
                info!(
                    "[{}] 💤 暂无可用文件，{:?} 后重新扫描",
                    self.id, self.settings.idle_wait
                );
                rescanned = true;
                if self.shutdown.sleep(self.settings.idle_wait).await {
                    break;
                }
                continue;
            };
            rescanned = false;

            self.enter(WorkerState::Claimed);
            if !self.backlog.begin(&id).await {
                debug!("[{}] {} 正被本进程其他实例处理，重新扫描", self.id, id);
                continue;
            }
            if !self
                .coordinator
                .claim(&id, &self.holder, self.settings.claim_mode)
                .await
            {
                self.backlog.release(&id).await;
                debug!("[{}] {} 已被其他实例认领，重新扫描", self.id, id);
                continue;
            }
            info!("[{}] 🔒 认领文件: {}", self.id, id);

            self.enter(WorkerState::Processing);
            self.counters.mark_started(&id, &self.id).await;
            let (disposition, outcome) = self.process(&id).await;

            self.enter(WorkerState::Releasing);
            self.coordinator.release(&id).await;
            match disposition {
                Disposition::Settled => {
                    self.backlog.settle(&id).await;
                    self.counters.mark_completed(&id).await;
                    self.stats.record_file_done();
                    report.files_processed += 1;
                }
                Disposition::Deferred(until) => {
                    self.backlog.defer(&id, until).await;
                    self.counters.mark_released(&id).await;
                }
                Disposition::Interrupted => {
                    self.backlog.release(&id).await;
                    self.counters.mark_released(&id).await;
                }
            }
            if let Some(outcome) = outcome {
                report.resolved += outcome.resolved;
                report.failed += outcome.failed;
            }
            info!("[{}] 🔓 已释放: {}", self.id, id);

            if self.shutdown.sleep(self.settings.claim_pause).await {
                break;
            }
        }

        self.enter(WorkerState::Terminated);
        info!(
            "[{}] ✓ 实例结束: 文件 {} | 成功 {} | 失败 {}",
            self.id, report.files_processed, report.resolved, report.failed
        );
        report
    }

    /// 加载并处理一个文件，所有错误在此消化
    async fn process(&self, id: &ItemId) -> (Disposition, Option<BatchOutcome>) {
        let mut item = match self.store.load(id).await {
            Ok(item) => item,
            Err(AppError::File(e @ FileError::Malformed { .. })) => {
                error!("[{}] ❌ 文件格式错误，本次运行跳过: {}", self.id, e);
                return (Disposition::Settled, None);
            }
            Err(e) => {
                error!("[{}] ❌ 读取 {} 失败，本次运行跳过: {}", self.id, id, e);
                return (Disposition::Settled, None);
            }
        };

        let outcome = self.processor.run(id, &mut item).await;
        let disposition = if outcome.interrupted {
            Disposition::Interrupted
        } else if outcome.is_settled() {
            if outcome.exhausted > 0 {
                warn!(
                    "[{}] ⚠️ {} 有 {} 集已达最大尝试次数，放弃",
                    self.id, id, outcome.exhausted
                );
            }
            Disposition::Settled
        } else {
            let backoff = self.processor.retry().backoff_for(outcome.retry_pass);
            info!(
                "[{}] 🔁 {} 仍有 {} 集待重试，{:?} 后再认领",
                self.id, id, outcome.still_pending, backoff
            );
            Disposition::Deferred(Instant::now() + backoff)
        };

        (disposition, Some(outcome))
    }
}

/// 在可用文件中随机选一个，分散实例之间的竞争
fn choose(available: &[ItemId]) -> Option<ItemId> {
    let mut rng = rand::rng();
    available.choose(&mut rng).cloned()
}
