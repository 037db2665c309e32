#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map};

use iframe_harvester::error::{AppError, AppResult, BrowserError, FileError};
use iframe_harvester::extraction::Extractor;
use iframe_harvester::models::{Episode, ItemId, ItemStore, Unit, WorkItem};
use iframe_harvester::orchestrator::BatchProcessor;
use iframe_harvester::pool::{TabFactory, TabPool};
use iframe_harvester::progress::{InstanceStats, ProgressCounters};
use iframe_harvester::services::FailureLog;

/// 不启动真实浏览器的工厂：浏览器和标签页都只是编号
#[derive(Debug, Default)]
pub struct FakeFactory {
    pub failing_browsers: Vec<usize>,
    pub fail_tabs: bool,
    next_tab: AtomicUsize,
    pub closed_tabs: AtomicUsize,
    pub closed_browsers: AtomicUsize,
}

impl FakeFactory {
    pub fn failing_browsers(indices: &[usize]) -> Self {
        Self {
            failing_browsers: indices.to_vec(),
            ..Self::default()
        }
    }

    pub fn failing_tabs() -> Self {
        Self {
            fail_tabs: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl TabFactory for FakeFactory {
    type Browser = usize;
    type Tab = usize;

    async fn launch_browser(&self, index: usize) -> AppResult<usize> {
        if self.failing_browsers.contains(&index) {
            return Err(BrowserError::ConfigurationFailed {
                reason: format!("fake launch failure {}", index),
            }
            .into());
        }
        Ok(index)
    }

    async fn open_tab(&self, _browser: &usize) -> AppResult<usize> {
        if self.fail_tabs {
            return Err(BrowserError::ConfigurationFailed {
                reason: "fake tab failure".to_string(),
            }
            .into());
        }
        Ok(self.next_tab.fetch_add(1, Ordering::SeqCst))
    }

    async fn close_tab(&self, _tab: usize) -> AppResult<()> {
        self.closed_tabs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close_browser(&self, _browser: usize) -> AppResult<()> {
        self.closed_browsers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

type ExtractFn = dyn Fn(&str) -> AppResult<Option<String>> + Send + Sync;

/// 由闭包决定结果的提取器，记录调用和并发峰值
pub struct FnExtractor {
    f: Box<ExtractFn>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FnExtractor {
    pub fn new(f: impl Fn(&str) -> AppResult<Option<String>> + Send + Sync + 'static) -> Self {
        Self {
            f: Box::new(f),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// 每个 URL 都能提取到结果
    pub fn resolving() -> Self {
        Self::new(|url| Ok(Some(iframe_for(url))))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Extractor<T> for FnExtractor {
    async fn extract(&self, url: &str, _tab: &T) -> AppResult<Option<String>> {
        self.calls.lock().unwrap().push(url.to_string());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = (self.f)(url);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// 内存中的文件存储，统计读写次数
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<ItemId, WorkItem>>,
    saves: AtomicUsize,
    checkpoints: Mutex<Vec<usize>>,
}

impl MemoryStore {
    pub fn with(items: Vec<(ItemId, WorkItem)>) -> Self {
        Self {
            items: Mutex::new(items.into_iter().collect()),
            saves: AtomicUsize::new(0),
            checkpoints: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self, id: &ItemId) -> Option<WorkItem> {
        self.items.lock().unwrap().get(id).cloned()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// 每次保存时已完成的剧集数
    pub fn checkpoints(&self) -> Vec<usize> {
        self.checkpoints.lock().unwrap().clone()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn list(&self) -> AppResult<Vec<ItemId>> {
        Ok(self.items.lock().unwrap().keys().cloned().collect())
    }

    async fn load(&self, id: &ItemId) -> AppResult<WorkItem> {
        self.get(id).ok_or_else(|| {
            AppError::File(FileError::ReadFailed {
                path: id.path().to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            })
        })
    }

    async fn save(&self, id: &ItemId, item: &WorkItem) -> AppResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.checkpoints.lock().unwrap().push(item.done_episodes());
        self.items.lock().unwrap().insert(id.clone(), item.clone());
        Ok(())
    }
}

pub fn iframe_for(url: &str) -> String {
    let slug = url.rsplit('/').next().unwrap_or("x");
    format!("https://kwik.si/e/{}", slug)
}

pub fn episode_url(item: &str, unit: usize, episode: usize) -> String {
    format!("https://animepahe.example/play/{}-{}/{}", item, unit, episode)
}

/// 构造一个文件：`units[i]` 是第 i 部动画的集数，前 `done` 集已完成
pub fn work_item(name: &str, units: &[usize], done: usize) -> WorkItem {
    let mut completed = 0;
    let units = units
        .iter()
        .enumerate()
        .map(|(u, count)| {
            let episodes = (0..*count)
                .map(|e| {
                    let url = episode_url(name, u, e);
                    let mut episode = Episode::new(url.clone());
                    if completed < done {
                        episode.iframe_url = Some(iframe_for(&url));
                        completed += 1;
                    }
                    episode
                })
                .collect();
            let mut extra = Map::new();
            extra.insert("title".to_string(), json!(format!("{} #{}", name, u)));
            Unit { episodes, extra }
        })
        .collect();
    WorkItem {
        units,
        extra: Map::new(),
    }
}

pub fn all_urls(item: &WorkItem) -> Vec<String> {
    item.episodes().map(|(_, e)| e.url.clone()).collect()
}

pub async fn pool(
    browsers: usize,
    tabs_per_browser: usize,
) -> Arc<TabPool<FakeFactory>> {
    TabPool::initialize(Arc::new(FakeFactory::default()), browsers, tabs_per_browser)
        .await
        .expect("fake pool initializes")
}

pub fn processor<E>(
    pool: Arc<TabPool<FakeFactory>>,
    extractor: Arc<E>,
    store: Arc<dyn ItemStore>,
    failure_log: &Path,
) -> BatchProcessor<FakeFactory, E>
where
    E: Extractor<usize>,
{
    let total = 0;
    BatchProcessor::new(
        pool,
        extractor,
        store,
        Arc::new(FailureLog::new(failure_log)),
        Arc::new(InstanceStats::new("INST-01")),
        Arc::new(ProgressCounters::new(total, total, 0)),
    )
}

pub fn read_failure_lines(path: &Path) -> Vec<serde_json::Value> {
    match std::fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .map(|l| serde_json::from_str(l).expect("valid json line"))
            .collect(),
        Err(_) => Vec::new(),
    }
}
