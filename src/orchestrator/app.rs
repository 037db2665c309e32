//! 应用主结构 - 编排层
//!
//! ## 职责
//!
//! 1. **预扫描**：列出所有待处理文件，统计剧集总数和已完成数
//! 2. **共享资源**：锁协调器、待处理列表、文件存储、失败记录、进度计数器
//! 3. **启动实例**：按间隔依次启动 N 个实例，每个实例拥有自己的资源池
//! 4. **进度监控**：定时输出汇总进度
//! 5. **优雅停止**：Ctrl-C 后当前波次完成即退出
//! 6. **最终统计**：所有实例结束后输出汇总

use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::browser::ChromeTabFactory;
use crate::config::Config;
use crate::coordination::{Backlog, FsLockStore, LockCoordinator};
use crate::extraction::{Extractor, IframeExtractor};
use crate::models::{ItemId, ItemStore, JsonDirStore};
use crate::orchestrator::batch_processor::BatchProcessor;
use crate::orchestrator::shutdown::ShutdownSignal;
use crate::orchestrator::worker::{instance_id, WorkerLoop, WorkerReport, WorkerSettings};
use crate::pool::{TabFactory, TabPool};
use crate::progress::{InstanceStats, ProgressAggregator, ProgressCounters, WorkerState};
use crate::services::FailureLog;
use crate::utils::logging::{log_backlog_loaded, log_startup, print_finish};

/// 所有实例共享的资源
struct Shared {
    config: Config,
    coordinator: Arc<LockCoordinator>,
    backlog: Arc<Backlog>,
    store: Arc<dyn ItemStore>,
    failures: Arc<FailureLog>,
    counters: Arc<ProgressCounters>,
    shutdown: ShutdownSignal,
}

/// 应用主结构
pub struct App {
    shared: Arc<Shared>,
}

impl App {
    /// 初始化应用：预扫描文件并准备共享资源
    pub async fn initialize(config: Config) -> Result<Self> {
        log_startup(&config);

        let store = JsonDirStore::new(&config.backlog_dir, &config.file_prefix);
        let items = store.list().await?;
        let (episodes, done) = prescan(&store, &items).await;
        log_backlog_loaded(items.len(), episodes, done);

        let lock_store = FsLockStore::open(config.lock_dir()).await?;
        let coordinator = LockCoordinator::new(Arc::new(lock_store), config.lock_stale_after);

        let shared = Shared {
            coordinator: Arc::new(coordinator),
            counters: Arc::new(ProgressCounters::new(items.len(), episodes, done)),
            backlog: Arc::new(Backlog::new(items)),
            store: Arc::new(store),
            failures: Arc::new(FailureLog::new(&config.failure_log_file)),
            shutdown: ShutdownSignal::new(),
            config,
        };

        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// 运行所有实例直到结束
    pub async fn run(&self) -> Result<()> {
        let shared = &self.shared;
        if shared.backlog.is_empty() {
            warn!("⚠️ 没有找到待处理的 JSON 文件，程序结束");
            return Ok(());
        }

        let signal = shared.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("⏹️ 收到 Ctrl-C，当前波次完成后停止...");
                signal.request();
            }
        });

        let stats: Vec<Arc<InstanceStats>> = (1..=shared.config.instances)
            .map(|n| Arc::new(InstanceStats::new(instance_id(n))))
            .collect();

        let aggregator = Arc::new(ProgressAggregator::new(
            Arc::clone(&shared.counters),
            stats.clone(),
        ));
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let monitor = {
            let aggregator = Arc::clone(&aggregator);
            let interval = shared.config.monitor_interval;
            tokio::spawn(async move {
                aggregator
                    .monitor(interval, async {
                        let _ = stop_rx.await;
                    })
                    .await;
            })
        };

        let handles: Vec<_> = stats
            .iter()
            .enumerate()
            .map(|(index, stats)| {
                let shared = Arc::clone(shared);
                let stats = Arc::clone(stats);
                tokio::spawn(async move {
                    let delay = shared.config.instance_stagger * index as u32;
                    if shared.shutdown.sleep(delay).await {
                        stats.set_state(WorkerState::Terminated);
                        return WorkerReport::default();
                    }
                    let factory = Arc::new(ChromeTabFactory::from_config(&shared.config));
                    let extractor = Arc::new(IframeExtractor::from_config(&shared.config));
                    run_instance(&shared, factory, extractor, stats).await
                })
            })
            .collect();

        let mut files = 0;
        for (index, joined) in join_all(handles).await.into_iter().enumerate() {
            match joined {
                Ok(report) => files += report.files_processed,
                Err(e) => error!("❌ 实例 {} 异常终止: {}", instance_id(index + 1), e),
            }
        }

        let _ = stop_tx.send(());
        if let Err(e) = monitor.await {
            warn!("进度监控任务异常: {}", e);
        }

        info!("✓ 所有实例已结束，本次共处理 {} 个文件", files);
        aggregator.final_summary().await;
        print_finish(&shared.config.failure_log_file, &shared.config.output_log_file);

        Ok(())
    }
}

/// 启动一个实例：初始化资源池，运行工作循环，最后关闭资源池
async fn run_instance<F, E>(
    shared: &Shared,
    factory: Arc<F>,
    extractor: Arc<E>,
    stats: Arc<InstanceStats>,
) -> WorkerReport
where
    F: TabFactory,
    E: Extractor<F::Tab>,
{
    let config = &shared.config;
    info!("[{}] 🚀 正在启动实例...", stats.id());

    let pool = match TabPool::initialize(
        factory,
        config.browsers_per_instance,
        config.tabs_per_browser,
    )
    .await
    {
        Ok(pool) => pool,
        Err(e) => {
            error!("[{}] ❌ 资源池初始化失败，实例退出: {}", stats.id(), e);
            stats.set_state(WorkerState::Terminated);
            return WorkerReport::default();
        }
    };

    let processor = BatchProcessor::new(
        Arc::clone(&pool),
        extractor,
        Arc::clone(&shared.store),
        Arc::clone(&shared.failures),
        Arc::clone(&stats),
        Arc::clone(&shared.counters),
    )
    .with_retry(config.retry)
    .with_cooldown(config.tab_cooldown.0, config.tab_cooldown.1)
    .with_shutdown(shared.shutdown.clone());

    let worker = WorkerLoop::new(
        Arc::clone(&shared.coordinator),
        Arc::clone(&shared.backlog),
        Arc::clone(&shared.store),
        processor,
        Arc::clone(&shared.counters),
        stats,
    )
    .with_settings(WorkerSettings::from_config(config))
    .with_shutdown(shared.shutdown.clone());

    let report = worker.run().await;
    pool.shutdown().await;
    report
}

/// 统计剧集总数和已完成数；无法解析的文件只记录警告
async fn prescan(store: &JsonDirStore, items: &[ItemId]) -> (usize, usize) {
    let mut episodes = 0;
    let mut done = 0;
    for id in items {
        match store.load(id).await {
            Ok(item) => {
                episodes += item.total_episodes();
                done += item.done_episodes();
            }
            Err(e) => warn!("⚠️ 预扫描跳过 {}: {}", id, e),
        }
    }
    (episodes, done)
}
