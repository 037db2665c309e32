//! 单个文件的批处理器 - 编排层
//!
//! ## 职责
//!
//! 把一个文件中尚未完成的剧集按波次（wave）并发处理：
//!
//! 1. **筛选**：跳过已有结果的剧集和已用完重试次数的剧集
//! 2. **分波**：每波最多 `wave_size` 个剧集，`wave_size` 等于资源池容量
//! 3. **并发**：每个剧集一个任务：借标签页 → 提取 → 归还 → 冷却
//! 4. **屏障**：整波完成后才开始下一波
//! 5. **检查点**：每波结束后把整个文件写回磁盘，崩溃最多丢失一波，
//!    同时刷新文件锁的时间
//!
//! 失败的剧集写入 null 结果并追加一条失败记录，不在本轮内重试。

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::coordination::LockCoordinator;
use crate::error::AppResult;
use crate::extraction::Extractor;
use crate::models::{EpisodeRef, FailureRecord, ItemId, ItemStore, WorkItem};
use crate::orchestrator::retry::RetryPolicy;
use crate::orchestrator::shutdown::ShutdownSignal;
use crate::pool::{TabFactory, TabPool};
use crate::progress::{FileProgress, InstanceStats, ProgressCounters};
use crate::services::FailureLog;
use crate::utils::logging::truncate_text;

/// 提取返回 `None` 时记录的原因
pub const NO_RESULT_REASON: &str = "No iframe found (None result)";

/// 文件中待处理剧集的划分
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pending {
    /// 需要处理的剧集，按文件中的顺序
    pub refs: Vec<EpisodeRef>,
    /// 已完成（跳过）的数量
    pub done: usize,
    /// 没有结果且已用完重试次数的数量
    pub exhausted: usize,
}

/// 一次 `run` 的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub total: usize,
    pub skipped: usize,
    pub exhausted: usize,
    pub waves: usize,
    pub resolved: usize,
    pub failed: usize,
    /// 收到停止信号，剩余波次未执行
    pub interrupted: bool,
    /// 运行结束后仍可重试的剧集数
    pub still_pending: usize,
    /// 可重试剧集中最大的已尝试次数，用于计算退避
    pub retry_pass: u32,
}

impl BatchOutcome {
    /// 没有可重试的剧集，文件在本次运行中不需要再认领
    pub fn is_settled(&self) -> bool {
        self.still_pending == 0
    }
}

/// 单个剧集任务的结果
enum TaskResult {
    Resolved(String),
    Failed(String),
}

/// 单个文件的批处理器
pub struct BatchProcessor<F: TabFactory, E> {
    pool: Arc<TabPool<F>>,
    extractor: Arc<E>,
    store: Arc<dyn ItemStore>,
    failures: Arc<FailureLog>,
    stats: Arc<InstanceStats>,
    counters: Arc<ProgressCounters>,
    retry: RetryPolicy,
    cooldown: (Duration, Duration),
    shutdown: ShutdownSignal,
    wave_size: usize,
    lock: Option<(Arc<LockCoordinator>, String)>,
}

impl<F, E> BatchProcessor<F, E>
where
    F: TabFactory,
    E: Extractor<F::Tab>,
{
    pub fn new(
        pool: Arc<TabPool<F>>,
        extractor: Arc<E>,
        store: Arc<dyn ItemStore>,
        failures: Arc<FailureLog>,
        stats: Arc<InstanceStats>,
        counters: Arc<ProgressCounters>,
    ) -> Self {
        let wave_size = pool.capacity().max(1);
        stats.set_capacity(wave_size);
        Self {
            pool,
            extractor,
            store,
            failures,
            stats,
            counters,
            retry: RetryPolicy::default(),
            cooldown: (Duration::ZERO, Duration::ZERO),
            shutdown: ShutdownSignal::new(),
            wave_size,
            lock: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 归还标签页后的随机冷却区间
    pub fn with_cooldown(mut self, min: Duration, max: Duration) -> Self {
        self.cooldown = (min, max.max(min));
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// 每波检查点之后以 `holder` 的身份刷新文件锁
    pub fn with_lock_refresh(mut self, coordinator: Arc<LockCoordinator>, holder: String) -> Self {
        self.lock = Some((coordinator, holder));
        self
    }

    pub fn wave_size(&self) -> usize {
        self.wave_size
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// 筛选需要处理的剧集
    pub fn pending(&self, item: &WorkItem) -> Pending {
        let mut pending = Pending::default();
        for (r, episode) in item.episodes() {
            if episode.is_done() {
                pending.done += 1;
            } else if self.retry.allows(episode.extract_attempts) {
                pending.refs.push(r);
            } else {
                pending.exhausted += 1;
            }
        }
        pending
    }

    /// 按波次处理文件中所有待处理的剧集
    pub async fn run(&self, id: &ItemId, item: &mut WorkItem) -> BatchOutcome {
        let pending = self.pending(item);
        let mut outcome = BatchOutcome {
            total: item.total_episodes(),
            skipped: pending.done,
            exhausted: pending.exhausted,
            ..BatchOutcome::default()
        };

        info!(
            "[{}] 📄 {}: 共 {} 集 | 已完成 {} | 待处理 {} | 放弃 {}",
            self.stats.id(),
            id,
            outcome.total,
            outcome.skipped,
            pending.refs.len(),
            outcome.exhausted
        );

        if pending.refs.is_empty() {
            info!("[{}] ✓ {} 无待处理剧集，跳过", self.stats.id(), id);
            return outcome;
        }

        self.stats.begin_file(FileProgress {
            file_name: id.name(),
            total_episodes: outcome.total,
            processed: 0,
            skipped: outcome.skipped,
            remaining: pending.refs.len(),
        });

        let total_waves = pending.refs.len().div_ceil(self.wave_size);
        for (index, wave) in pending.refs.chunks(self.wave_size).enumerate() {
            if self.shutdown.is_requested() {
                warn!(
                    "[{}] ⏹️ 收到停止信号，{} 剩余 {} 波未执行",
                    self.stats.id(),
                    id,
                    total_waves - index
                );
                outcome.interrupted = true;
                break;
            }

            debug!(
                "[{}] 🌊 {} 第 {}/{} 波，{} 集",
                self.stats.id(),
                id,
                index + 1,
                total_waves,
                wave.len()
            );

            let (resolved, failed) = self.run_wave(id, item, wave).await;
            outcome.waves += 1;
            outcome.resolved += resolved;
            outcome.failed += failed;
            self.counters.add_completed_sub_items(resolved).await;

            self.checkpoint(id, item).await;
            if let Some((coordinator, holder)) = &self.lock {
                coordinator.refresh(id, holder).await;
            }

            info!(
                "[{}] ✓ {} 第 {}/{} 波完成: 成功 {} | 失败 {}",
                self.stats.id(),
                id,
                index + 1,
                total_waves,
                resolved,
                failed
            );
        }

        let after = self.pending(item);
        outcome.still_pending = after.refs.len();
        outcome.exhausted = after.exhausted;
        outcome.retry_pass = after
            .refs
            .iter()
            .map(|r| item.episode(*r).extract_attempts)
            .max()
            .unwrap_or(0);

        self.stats.end_file();
        outcome
    }

    /// 并发处理一波剧集，等待全部完成后把结果写回文件
    async fn run_wave(
        &self,
        id: &ItemId,
        item: &mut WorkItem,
        wave: &[EpisodeRef],
    ) -> (usize, usize) {
        let handles: Vec<_> = wave
            .iter()
            .map(|r| {
                let url = item.episode(*r).url.clone();
                let pool = Arc::clone(&self.pool);
                let extractor = Arc::clone(&self.extractor);
                let stats = Arc::clone(&self.stats);
                let cooldown = self.cooldown;
                tokio::spawn(async move {
                    let active = ActiveTask::start(stats);
                    let result = extract_one(&pool, extractor.as_ref(), &url).await;
                    drop(active);
                    sleep_cooldown(cooldown).await;
                    result
                })
            })
            .collect();

        let results = join_all(handles).await;

        let mut resolved = 0;
        let mut failed = 0;
        for (r, joined) in wave.iter().zip(results) {
            let result = match joined {
                Ok(result) => result,
                Err(e) => TaskResult::Failed(format!("任务异常终止: {}", e)),
            };

            let unit = item.units[r.unit].label();
            let episode = item.episode_mut(*r);
            match result {
                TaskResult::Resolved(iframe) => {
                    episode.iframe_url = Some(iframe);
                    resolved += 1;
                    self.stats.record_resolved();
                }
                TaskResult::Failed(reason) => {
                    episode.iframe_url = None;
                    episode.extract_attempts += 1;
                    failed += 1;
                    self.stats.record_error();

                    warn!(
                        "[{}] ❌ {} | {} (第 {} 次): {}",
                        self.stats.id(),
                        unit,
                        episode.url,
                        episode.extract_attempts,
                        truncate_text(&reason, 160)
                    );
                    let record = FailureRecord::new(
                        self.stats.id(),
                        id.name(),
                        unit,
                        episode.url.clone(),
                        episode.extract_attempts,
                        reason,
                    );
                    if let Err(e) = self.failures.append(&record).await {
                        error!("[{}] 写入失败记录出错: {}", self.stats.id(), e);
                    }
                }
            }
        }

        (resolved, failed)
    }

    /// 写回整个文件，出错只记录日志
    async fn checkpoint(&self, id: &ItemId, item: &WorkItem) {
        match self.store.save(id, item).await {
            Ok(()) => debug!("[{}] 💾 已保存 {}", self.stats.id(), id),
            Err(e) => error!("[{}] ❌ 保存 {} 失败: {}", self.stats.id(), id, e),
        }
    }
}

/// 任务计数，任务异常终止时也会减回去
struct ActiveTask(Arc<InstanceStats>);

impl ActiveTask {
    fn start(stats: Arc<InstanceStats>) -> Self {
        stats.task_started();
        Self(stats)
    }
}

impl Drop for ActiveTask {
    fn drop(&mut self) {
        self.0.task_finished();
    }
}

async fn extract_one<F, E>(pool: &Arc<TabPool<F>>, extractor: &E, url: &str) -> TaskResult
where
    F: TabFactory,
    E: Extractor<F::Tab>,
{
    let lease = match pool.acquire().await {
        Ok(lease) => lease,
        Err(e) => return TaskResult::Failed(e.to_string()),
    };
    let result: AppResult<Option<String>> = extractor.extract(url, lease.tab()).await;
    pool.release(lease);

    match result {
        Ok(Some(iframe)) if !iframe.is_empty() => TaskResult::Resolved(iframe),
        Ok(_) => TaskResult::Failed(NO_RESULT_REASON.to_string()),
        Err(e) => TaskResult::Failed(e.to_string()),
    }
}

async fn sleep_cooldown((min, max): (Duration, Duration)) {
    if max.is_zero() {
        return;
    }
    let millis = {
        let mut rng = rand::rng();
        rng.random_range(min.as_millis() as u64..=max.as_millis() as u64)
    };
    tokio::time::sleep(Duration::from_millis(millis)).await;
}
