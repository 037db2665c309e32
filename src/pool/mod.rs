//! 标签页资源池
//!
//! 每个实例启动时创建固定数量的浏览器，每个浏览器预先打开固定数量的标签页。
//! 标签页要么在所属浏览器的空闲列表里，要么被恰好一个任务借出。
//!
//! - `acquire()` 在没有空闲标签页时协作式等待，不阻塞线程
//! - 归还总是无条件放回空闲列表（不做健康检查）
//! - 借出通过 [`TabLease`] 完成，离开作用域即归还

pub mod factory;

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::{AppResult, PoolError};

pub use factory::TabFactory;

/// 一个浏览器的空闲列表
struct BrowserSlot<T> {
    id: usize,
    capacity: usize,
    free: VecDeque<T>,
}

/// 单个浏览器的容量快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrowserStats {
    pub id: usize,
    pub capacity: usize,
    pub free: usize,
}

/// 资源池快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub free: usize,
    pub checked_out: usize,
    pub browsers: Vec<BrowserStats>,
}

/// 标签页资源池
pub struct TabPool<F: TabFactory> {
    factory: Arc<F>,
    slots: Mutex<Vec<BrowserSlot<F::Tab>>>,
    browsers: tokio::sync::Mutex<Vec<F::Browser>>,
    capacity: usize,
    checked_out: AtomicUsize,
    available: Notify,
    closed: AtomicBool,
}

impl<F: TabFactory> TabPool<F> {
    /// 启动 `browser_count` 个浏览器，每个打开 `tabs_per_browser` 个标签页
    ///
    /// 单个浏览器或标签页启动失败只记录日志，资源池以较小的容量继续；
    /// 一个标签页都没有时返回错误。
    pub async fn initialize(
        factory: Arc<F>,
        browser_count: usize,
        tabs_per_browser: usize,
    ) -> AppResult<Arc<Self>> {
        info!("🚀 正在初始化 {} 个浏览器...", browser_count);

        let mut browsers = Vec::with_capacity(browser_count);
        let mut slots = Vec::with_capacity(browser_count);

        for index in 0..browser_count {
            let browser = match factory.launch_browser(index).await {
                Ok(browser) => browser,
                Err(e) => {
                    error!("❌ 浏览器 {} 初始化失败: {}", index + 1, e);
                    continue;
                }
            };
            info!("✅ 浏览器 {} 已启动", index + 1);

            let mut free = VecDeque::with_capacity(tabs_per_browser);
            for tab_index in 0..tabs_per_browser {
                match factory.open_tab(&browser).await {
                    Ok(tab) => {
                        debug!("✅ 浏览器 {}, 标签页 {} 就绪", index + 1, tab_index + 1);
                        free.push_back(tab);
                    }
                    Err(e) => {
                        error!(
                            "❌ 浏览器 {} 的标签页 {} 创建失败: {}",
                            index + 1,
                            tab_index + 1,
                            e
                        );
                    }
                }
            }

            slots.push(BrowserSlot {
                id: index,
                capacity: free.len(),
                free,
            });
            browsers.push(browser);
        }

        let capacity: usize = slots.iter().map(|s| s.capacity).sum();
        if capacity == 0 {
            for browser in browsers {
                if let Err(e) = factory.close_browser(browser).await {
                    warn!("关闭浏览器失败: {}", e);
                }
            }
            return Err(PoolError::NoTabs {
                browsers: browser_count,
                tabs_per_browser,
            }
            .into());
        }

        let expected = browser_count * tabs_per_browser;
        if capacity < expected {
            warn!("⚠️ 资源池容量不足: {}/{} 个标签页可用", capacity, expected);
        } else {
            info!("✓ 资源池就绪: {} 个标签页", capacity);
        }

        Ok(Arc::new(Self {
            factory,
            slots: Mutex::new(slots),
            browsers: tokio::sync::Mutex::new(browsers),
            capacity,
            checked_out: AtomicUsize::new(0),
            available: Notify::new(),
            closed: AtomicBool::new(false),
        }))
    }

    /// 标签页总数（初始化后固定不变）
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn checked_out(&self) -> usize {
        self.checked_out.load(Ordering::SeqCst)
    }

    fn lock_slots(&self) -> MutexGuard<'_, Vec<BrowserSlot<F::Tab>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 借出一个标签页，全部借出时等待归还
    pub async fn acquire(self: &Arc<Self>) -> AppResult<TabLease<F>> {
        loop {
            // 先登记再检查，检查与等待之间的归还和关闭都不会丢失
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Ordering::SeqCst) {
                return Err(PoolError::Closed.into());
            }
            if let Some(lease) = self.try_acquire() {
                return Ok(lease);
            }
            notified.await;
        }
    }

    /// 不等待：有空闲标签页就借出
    pub fn try_acquire(self: &Arc<Self>) -> Option<TabLease<F>> {
        let mut slots = self.lock_slots();
        for slot in slots.iter_mut() {
            if let Some(tab) = slot.free.pop_front() {
                self.checked_out.fetch_add(1, Ordering::SeqCst);
                return Some(TabLease {
                    tab: Some(tab),
                    browser_id: slot.id,
                    pool: Arc::clone(self),
                });
            }
        }
        None
    }

    /// 归还标签页到所属浏览器
    pub fn release(&self, lease: TabLease<F>) {
        drop(lease);
    }

    fn put_back(&self, browser_id: usize, tab: F::Tab) {
        {
            let mut slots = self.lock_slots();
            self.checked_out.fetch_sub(1, Ordering::SeqCst);
            if self.closed.load(Ordering::SeqCst) {
                debug!("资源池已关闭，丢弃归还的标签页 (浏览器 {})", browser_id + 1);
                return;
            }
            if let Some(slot) = slots.iter_mut().find(|s| s.id == browser_id) {
                slot.free.push_back(tab);
            }
        }
        self.available.notify_one();
    }

    pub fn stats(&self) -> PoolStats {
        let slots = self.lock_slots();
        let browsers: Vec<BrowserStats> = slots
            .iter()
            .map(|s| BrowserStats {
                id: s.id,
                capacity: s.capacity,
                free: s.free.len(),
            })
            .collect();
        PoolStats {
            capacity: self.capacity,
            free: browsers.iter().map(|b| b.free).sum(),
            checked_out: self.checked_out.load(Ordering::SeqCst),
            browsers,
        }
    }

    /// 关闭所有标签页和浏览器，单个失败只记录日志
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("🧹 正在关闭资源池...");
        self.available.notify_waiters();

        let outstanding = self.checked_out();
        if outstanding > 0 {
            warn!("⚠️ 关闭时仍有 {} 个标签页未归还", outstanding);
        }

        let tabs: Vec<F::Tab> = {
            let mut slots = self.lock_slots();
            slots.iter_mut().flat_map(|s| s.free.drain(..)).collect()
        };
        for tab in tabs {
            if let Err(e) = self.factory.close_tab(tab).await {
                warn!("关闭标签页失败: {}", e);
            }
        }

        let browsers: Vec<F::Browser> = self.browsers.lock().await.drain(..).collect();
        for browser in browsers {
            if let Err(e) = self.factory.close_browser(browser).await {
                error!("❌ 关闭浏览器失败: {}", e);
            }
        }

        info!("✓ 资源池已关闭");
    }
}

/// 借出的标签页，离开作用域时自动归还
pub struct TabLease<F: TabFactory> {
    tab: Option<F::Tab>,
    browser_id: usize,
    pool: Arc<TabPool<F>>,
}

impl<F: TabFactory> TabLease<F> {
    pub fn tab(&self) -> &F::Tab {
        // 只有 Drop 会取走
        self.tab.as_ref().expect("tab is present until the lease is dropped")
    }

    /// 标签页所属浏览器
    pub fn browser_id(&self) -> usize {
        self.browser_id
    }
}

impl<F: TabFactory> Deref for TabLease<F> {
    type Target = F::Tab;

    fn deref(&self) -> &Self::Target {
        self.tab()
    }
}

impl<F: TabFactory> Drop for TabLease<F> {
    fn drop(&mut self) {
        if let Some(tab) = self.tab.take() {
            self.pool.put_back(self.browser_id, tab);
        }
    }
}
