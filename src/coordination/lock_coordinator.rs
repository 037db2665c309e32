//! 跨进程文件锁协调
//!
//! 锁是建议性的：读写锁文件的 I/O 错误只记录日志，不会中断工作循环。
//! 丢失一个锁最多导致一次重复处理，而已完成的剧集不会被再次处理。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::coordination::lock_store::LockStore;
use crate::models::ItemId;

/// 认领方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimMode {
    /// 先列出可用文件再写锁；两个实例可能在同一窗口内选中同一个文件
    BestEffort,
    /// 写锁时原子地检查是否已存在，失败的一方回到扫描
    ///
    /// 过期锁的回收不是原子的：删除前会再读一次年龄，但两个进程仍可能在
    /// 这一次读取和删除之间交错，后删除的一方会删掉对方刚写入的新锁。
    Exclusive,
}

impl std::str::FromStr for ClaimMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best-effort" | "best_effort" | "besteffort" => Ok(ClaimMode::BestEffort),
            "exclusive" | "atomic" => Ok(ClaimMode::Exclusive),
            other => Err(format!("unknown claim mode: {}", other)),
        }
    }
}

/// 锁协调器
pub struct LockCoordinator {
    store: Arc<dyn LockStore>,
    stale_after: Duration,
}

impl LockCoordinator {
    pub fn new(store: Arc<dyn LockStore>, stale_after: Duration) -> Self {
        Self { store, stale_after }
    }

    /// 锁年龄严格大于阈值才算过期
    pub fn is_stale(&self, age: Duration) -> bool {
        age > self.stale_after
    }

    /// 返回没有有效锁的文件；过期的锁会先被删除
    pub async fn list_available(&self, item_ids: &[ItemId]) -> Vec<ItemId> {
        let mut available = Vec::with_capacity(item_ids.len());
        for id in item_ids {
            if !self.is_locked(id).await {
                available.push(id.clone());
            }
        }
        available
    }

    async fn is_locked(&self, id: &ItemId) -> bool {
        let key = id.name();
        match self.store.age(&key).await {
            Ok(None) => false,
            Ok(Some(age)) if self.is_stale(age) => self.reclaim(&key, age).await,
            Ok(Some(_)) => true,
            Err(e) => {
                // 读不到锁状态时按已锁定处理，宁可跳过也不重复处理
                warn!("读取锁状态失败 {}: {}", key, e);
                true
            }
        }
    }

    /// 删除过期锁，返回锁是否仍然有效
    ///
    /// 删除前再读一次年龄，期间被刷新或重新认领的锁保留。
    async fn reclaim(&self, key: &str, age: Duration) -> bool {
        match self.store.age(key).await {
            Ok(None) => return false,
            Ok(Some(current)) if !self.is_stale(current) => {
                debug!("锁在回收前已被刷新: {}", key);
                return true;
            }
            Ok(Some(_)) => {}
            Err(e) => {
                warn!("读取锁状态失败 {}: {}", key, e);
                return true;
            }
        }

        info!(
            "🔓 锁已过期 ({:?} > {:?})，回收: {}",
            age, self.stale_after, key
        );
        if let Err(e) = self.store.delete(key).await {
            warn!("删除过期锁失败 {}: {}", key, e);
        }
        false
    }

    /// 写入锁，不检查是否已有其他持有者
    pub async fn acquire(&self, id: &ItemId, holder: &str) {
        let key = id.name();
        match self.store.put(&key, holder).await {
            Ok(()) => debug!("🔒 [{}] 已加锁: {}", holder, key),
            Err(e) => warn!("[{}] 创建锁失败 {}: {}", holder, key, e),
        }
    }

    /// 原子认领：锁已存在时返回 `false`
    ///
    /// 写锁出错时按认领成功处理，与 [`acquire`](Self::acquire) 的语义一致。
    pub async fn try_acquire(&self, id: &ItemId, holder: &str) -> bool {
        let key = id.name();
        match self.store.put_if_absent(&key, holder).await {
            Ok(true) => {
                debug!("🔒 [{}] 已加锁: {}", holder, key);
                true
            }
            Ok(false) => {
                debug!("[{}] 锁已被其他实例持有: {}", holder, key);
                false
            }
            Err(e) => {
                warn!("[{}] 创建锁失败 {}: {}", holder, key, e);
                true
            }
        }
    }

    /// 按认领方式加锁
    pub async fn claim(&self, id: &ItemId, holder: &str, mode: ClaimMode) -> bool {
        match mode {
            ClaimMode::BestEffort => {
                self.acquire(id, holder).await;
                true
            }
            ClaimMode::Exclusive => self.try_acquire(id, holder).await,
        }
    }

    /// 刷新自己持有的锁的时间，长时间处理的文件不会被判为过期
    pub async fn refresh(&self, id: &ItemId, holder: &str) {
        let key = id.name();
        match self.store.put(&key, holder).await {
            Ok(()) => debug!("🔒 [{}] 已刷新锁: {}", holder, key),
            Err(e) => warn!("[{}] 刷新锁失败 {}: {}", holder, key, e),
        }
    }

    /// 释放锁，可重复调用，从不失败
    pub async fn release(&self, id: &ItemId) {
        let key = id.name();
        match self.store.delete(&key).await {
            Ok(true) => debug!("🔓 已解锁: {}", key),
            Ok(false) => {}
            Err(e) => warn!("删除锁失败 {}: {}", key, e),
        }
    }
}
