mod common;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{FakeFactory, FnExtractor};
use iframe_harvester::coordination::{Backlog, ClaimMode, LockCoordinator, MemoryLockStore};
use iframe_harvester::extraction::Extractor;
use iframe_harvester::models::{load_work_item, save_work_item, ItemId, ItemStore, JsonDirStore};
use iframe_harvester::orchestrator::{
    BatchProcessor, RetryPolicy, ShutdownSignal, WorkerLoop, WorkerSettings,
};
use iframe_harvester::progress::{
    InstanceStats, ProgressAggregator, ProgressCounters, WorkerState,
};
use iframe_harvester::services::FailureLog;

/// 一个测试场景共享的资源
struct Scene {
    dir: tempfile::TempDir,
    store: Arc<JsonDirStore>,
    locks: Arc<MemoryLockStore>,
    coordinator: Arc<LockCoordinator>,
    backlog: Arc<Backlog>,
    counters: Arc<ProgressCounters>,
    failures: Arc<FailureLog>,
    shutdown: ShutdownSignal,
}

const STALE: Duration = Duration::from_secs(600);

impl Scene {
    async fn new(files: &[(&str, &[usize])]) -> Self {
        Self::with_stale(files, STALE).await
    }

    async fn with_stale(files: &[(&str, &[usize])], stale_after: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for (name, units) in files {
            let item = common::work_item(name, units, 0);
            save_work_item(&dir.path().join(format!("anime_{}.json", name)), &item)
                .await
                .unwrap();
        }
        Self::open(dir, stale_after).await
    }

    async fn open(dir: tempfile::TempDir, stale_after: Duration) -> Self {
        let store = Arc::new(JsonDirStore::new(dir.path(), "anime_"));
        let items = store.list().await.unwrap();
        let locks = Arc::new(MemoryLockStore::new());
        let coordinator = Arc::new(LockCoordinator::new(locks.clone(), stale_after));
        Self {
            failures: Arc::new(FailureLog::new(dir.path().join("failed.jsonl"))),
            counters: Arc::new(ProgressCounters::new(items.len(), 0, 0)),
            backlog: Arc::new(Backlog::new(items)),
            store,
            locks,
            coordinator,
            shutdown: ShutdownSignal::new(),
            dir,
        }
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(format!("anime_{}.json", name))
    }

    async fn worker<E: Extractor<usize>>(
        &self,
        instance: usize,
        extractor: Arc<E>,
        retry: RetryPolicy,
    ) -> (WorkerLoop<FakeFactory, E>, Arc<InstanceStats>) {
        self.worker_in(
            instance,
            extractor,
            retry,
            Arc::clone(&self.backlog),
            Arc::clone(&self.counters),
            Duration::from_millis(20),
        )
        .await
    }

    /// 一个实例；传入独立的 backlog 和计数器即模拟另一个进程
    async fn worker_in<E: Extractor<usize>>(
        &self,
        instance: usize,
        extractor: Arc<E>,
        retry: RetryPolicy,
        backlog: Arc<Backlog>,
        counters: Arc<ProgressCounters>,
        idle_wait: Duration,
    ) -> (WorkerLoop<FakeFactory, E>, Arc<InstanceStats>) {
        let stats = Arc::new(InstanceStats::new(format!("INST-{:02}", instance)));
        let pool = common::pool(1, 2).await;
        let processor = BatchProcessor::new(
            pool,
            extractor,
            self.store.clone(),
            Arc::clone(&self.failures),
            Arc::clone(&stats),
            Arc::clone(&counters),
        )
        .with_retry(retry)
        .with_shutdown(self.shutdown.clone());

        let worker = WorkerLoop::new(
            Arc::clone(&self.coordinator),
            backlog,
            self.store.clone(),
            processor,
            Arc::clone(&counters),
            Arc::clone(&stats),
        )
        .with_settings(WorkerSettings {
            claim_mode: ClaimMode::Exclusive,
            idle_wait,
            claim_pause: Duration::ZERO,
        })
        .with_shutdown(self.shutdown.clone());

        (worker, stats)
    }
}

async fn done_count(path: &Path) -> usize {
    load_work_item(path).await.unwrap().done_episodes()
}

#[tokio::test]
async fn two_instances_partition_the_backlog() {
    let scene = Scene::new(&[("naruto", &[3]), ("bleach", &[2, 2])]).await;
    let extractor = Arc::new(FnExtractor::resolving().with_delay(Duration::from_millis(10)));

    let (first, first_stats) = scene
        .worker(1, Arc::clone(&extractor), RetryPolicy::default())
        .await;
    let (second, second_stats) = scene
        .worker(2, Arc::clone(&extractor), RetryPolicy::default())
        .await;

    let (a, b) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(first.run(), second.run())
    })
    .await
    .expect("both workers terminate");

    assert_eq!(a.files_processed + b.files_processed, 2);
    assert_eq!(extractor.call_count(), 7);
    for url in extractor.calls() {
        assert_eq!(extractor.calls_for(&url), 1, "processed twice: {}", url);
    }
    assert_eq!(done_count(&scene.path("naruto")).await, 3);
    assert_eq!(done_count(&scene.path("bleach")).await, 4);
    assert!(scene.locks.is_empty(), "no lock marker may outlive its holder");
    assert_eq!(first_stats.state(), WorkerState::Terminated);
    assert_eq!(second_stats.state(), WorkerState::Terminated);

    let aggregator = ProgressAggregator::new(
        Arc::clone(&scene.counters),
        vec![first_stats, second_stats],
    );
    let snapshot = aggregator.snapshot().await;
    assert!(snapshot.is_done());
    assert_eq!(snapshot.counters.completed_items, 2);
    assert_eq!(snapshot.total_resolved(), 7);
    assert_eq!(snapshot.total_files_done(), 2);
}

#[tokio::test]
async fn failed_episode_is_retried_on_a_later_pass() {
    let scene = Scene::new(&[("flaky", &[3])]).await;
    let flaky_url = common::episode_url("flaky", 0, 1);
    let seen = Arc::new(AtomicUsize::new(0));

    let extractor = {
        let flaky_url = flaky_url.clone();
        let seen = Arc::clone(&seen);
        Arc::new(FnExtractor::new(move |url| {
            if url == flaky_url && seen.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(None);
            }
            Ok(Some(common::iframe_for(url)))
        }))
    };

    let (worker, _stats) = scene
        .worker(1, Arc::clone(&extractor), RetryPolicy::new(3, Duration::ZERO))
        .await;
    let report = tokio::time::timeout(Duration::from_secs(10), worker.run())
        .await
        .expect("worker terminates");

    assert_eq!(report.files_processed, 1);
    assert_eq!(extractor.calls_for(&flaky_url), 2);
    assert_eq!(extractor.call_count(), 4);

    let item = load_work_item(&scene.path("flaky")).await.unwrap();
    assert_eq!(item.done_episodes(), 3);
    assert_eq!(item.units[0].episodes[1].extract_attempts, 1);
    assert_eq!(common::read_failure_lines(&scene.dir.path().join("failed.jsonl")).len(), 1);
}

#[tokio::test]
async fn retries_stop_at_the_attempt_bound() {
    let scene = Scene::new(&[("dead", &[2])]).await;
    let extractor = Arc::new(FnExtractor::new(|_| Ok(None)));

    let (worker, _stats) = scene
        .worker(1, Arc::clone(&extractor), RetryPolicy::new(2, Duration::ZERO))
        .await;
    let report = tokio::time::timeout(Duration::from_secs(10), worker.run())
        .await
        .expect("worker terminates");

    assert_eq!(report.files_processed, 1);
    assert_eq!(report.resolved, 0);
    assert_eq!(report.failed, 4);
    assert_eq!(extractor.call_count(), 4);
    for url in common::all_urls(&common::work_item("dead", &[2], 0)) {
        assert_eq!(extractor.calls_for(&url), 2);
    }

    let counters = scene.counters.snapshot().await;
    assert_eq!(counters.completed_items, 1);
    assert_eq!(counters.completed_sub_items, 0);
    assert!(counters.in_flight.is_empty());

    let item = load_work_item(&scene.path("dead")).await.unwrap();
    assert!(item.episodes().all(|(_, e)| e.extract_attempts == 2));
    assert!(item.episodes().all(|(_, e)| e.iframe_url.is_none()));
    assert_eq!(common::read_failure_lines(&scene.dir.path().join("failed.jsonl")).len(), 4);
    assert!(scene.locks.is_empty());
}

#[tokio::test]
async fn long_running_item_keeps_its_lock_against_another_process() {
    // 12 集、每波 2 集、每集 40ms：处理时间远超过锁的过期阈值
    let scene = Scene::with_stale(&[("long", &[12])], Duration::from_millis(150)).await;
    let extractor = Arc::new(FnExtractor::resolving().with_delay(Duration::from_millis(40)));

    let (first, _) = scene
        .worker(1, Arc::clone(&extractor), RetryPolicy::default())
        .await;
    let (second, _) = scene
        .worker_in(
            2,
            Arc::clone(&extractor),
            RetryPolicy::default(),
            Arc::new(Backlog::new(vec![ItemId::new(scene.path("long"))])),
            Arc::new(ProgressCounters::new(1, 0, 0)),
            Duration::from_millis(170),
        )
        .await;

    let (a, b) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(first.run(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            second.run().await
        })
    })
    .await
    .expect("both workers terminate");

    assert_eq!(a.files_processed, 1);
    assert_eq!(b.resolved, 0);
    assert_eq!(extractor.call_count(), 12);
    for url in extractor.calls() {
        assert_eq!(extractor.calls_for(&url), 1, "processed twice: {}", url);
    }
    assert_eq!(done_count(&scene.path("long")).await, 12);
}

#[tokio::test]
async fn item_in_progress_is_never_reclaimed_within_the_process() {
    // 锁一写入就算过期，只有进程内的占用记录能阻止重复认领
    let scene = Scene::with_stale(&[("busy", &[6])], Duration::ZERO).await;
    let extractor = Arc::new(FnExtractor::resolving().with_delay(Duration::from_millis(30)));

    let (first, _) = scene
        .worker(1, Arc::clone(&extractor), RetryPolicy::default())
        .await;
    let (second, _) = scene
        .worker(2, Arc::clone(&extractor), RetryPolicy::default())
        .await;

    let (a, b) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(first.run(), second.run())
    })
    .await
    .expect("both workers terminate");

    assert_eq!(a.files_processed + b.files_processed, 1);
    assert_eq!(extractor.call_count(), 6);
    for url in extractor.calls() {
        assert_eq!(extractor.calls_for(&url), 1, "processed twice: {}", url);
    }
    assert_eq!(done_count(&scene.path("busy")).await, 6);
}

#[tokio::test]
async fn malformed_file_does_not_stop_the_instance() {
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("anime_bad.json");
    std::fs::write(&bad, r#"{ "anime": [ { "episodes": [ { "iframe_url": null } ] } ] }"#).unwrap();
    save_work_item(
        &dir.path().join("anime_good.json"),
        &common::work_item("good", &[2], 0),
    )
    .await
    .unwrap();
    let before = std::fs::read_to_string(&bad).unwrap();

    let scene = Scene::open(dir, STALE).await;
    let extractor = Arc::new(FnExtractor::resolving());
    let (worker, _stats) = scene
        .worker(1, Arc::clone(&extractor), RetryPolicy::default())
        .await;
    let report = tokio::time::timeout(Duration::from_secs(10), worker.run())
        .await
        .expect("worker terminates");

    assert_eq!(report.resolved, 2);
    assert_eq!(done_count(&scene.path("good")).await, 2);
    assert_eq!(std::fs::read_to_string(&bad).unwrap(), before);
    assert_eq!(scene.backlog.settled_count().await, 2);
    assert!(scene.locks.is_empty());
}

#[tokio::test]
async fn item_locked_elsewhere_is_left_alone_after_one_rescan() {
    let scene = Scene::new(&[("busy", &[2])]).await;
    let busy = ItemId::new(scene.path("busy"));
    scene.coordinator.acquire(&busy, "INST-07@999").await;

    let extractor = Arc::new(FnExtractor::resolving());
    let (worker, stats) = scene
        .worker(1, Arc::clone(&extractor), RetryPolicy::default())
        .await;
    let report = tokio::time::timeout(Duration::from_secs(10), worker.run())
        .await
        .expect("worker terminates");

    assert_eq!(report.files_processed, 0);
    assert_eq!(extractor.call_count(), 0);
    assert_eq!(scene.locks.holder("anime_busy.json").as_deref(), Some("INST-07@999"));
    assert_eq!(stats.state(), WorkerState::Terminated);
}

#[tokio::test]
async fn shutdown_before_start_claims_nothing() {
    let scene = Scene::new(&[("idle", &[2])]).await;
    scene.shutdown.request();

    let extractor = Arc::new(FnExtractor::resolving());
    let (worker, _stats) = scene
        .worker(1, Arc::clone(&extractor), RetryPolicy::default())
        .await;
    let report = worker.run().await;

    assert_eq!(report.files_processed, 0);
    assert_eq!(extractor.call_count(), 0);
    assert!(scene.locks.is_empty());
}

#[tokio::test]
async fn empty_backlog_terminates_after_idle_wait() {
    let scene = Scene::new(&[]).await;
    let extractor = Arc::new(FnExtractor::resolving());
    let (worker, _stats) = scene
        .worker(1, Arc::clone(&extractor), RetryPolicy::default())
        .await;

    let report = tokio::time::timeout(Duration::from_secs(5), worker.run())
        .await
        .expect("worker terminates");
    assert_eq!(report.files_processed, 0);
}
