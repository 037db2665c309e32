//! 进程内的待处理列表
//!
//! 同一进程里的所有实例共享：哪些文件本轮已经结清，哪些文件在等待重试退避，
//! 哪些文件正被本进程的某个实例处理。

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tokio::sync::Mutex;

use crate::models::ItemId;

/// 扫描结果
#[derive(Debug, Default)]
pub struct Candidates {
    /// 现在就可以认领的文件
    pub ready: Vec<ItemId>,
    /// 最早结束退避的时间
    pub next_deferred: Option<Instant>,
}

#[derive(Debug, Default)]
struct BacklogState {
    settled: HashSet<ItemId>,
    deferred: HashMap<ItemId, Instant>,
    active: HashSet<ItemId>,
}

/// 共享待处理列表
#[derive(Debug)]
pub struct Backlog {
    items: Vec<ItemId>,
    state: Mutex<BacklogState>,
}

impl Backlog {
    pub fn new(items: Vec<ItemId>) -> Self {
        Self {
            items,
            state: Mutex::new(BacklogState::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 未结清、不在退避中、且没有被本进程处理的文件
    pub async fn candidates(&self, now: Instant) -> Candidates {
        let state = self.state.lock().await;
        let mut candidates = Candidates::default();

        for id in &self.items {
            if state.settled.contains(id) || state.active.contains(id) {
                continue;
            }
            match state.deferred.get(id) {
                Some(until) if *until > now => {
                    candidates.next_deferred = Some(match candidates.next_deferred {
                        Some(current) => current.min(*until),
                        None => *until,
                    });
                }
                _ => candidates.ready.push(id.clone()),
            }
        }

        candidates
    }

    /// 标记文件正被本进程处理；已被其他实例占用时返回 `false`
    ///
    /// 锁过期与否不影响这里的判断，同一进程内的实例不会并发处理同一个文件。
    pub async fn begin(&self, id: &ItemId) -> bool {
        let mut state = self.state.lock().await;
        !state.settled.contains(id) && state.active.insert(id.clone())
    }

    /// 放弃处理，文件可以立即再次认领
    pub async fn release(&self, id: &ItemId) {
        self.state.lock().await.active.remove(id);
    }

    /// 本轮不再认领该文件
    pub async fn settle(&self, id: &ItemId) {
        let mut state = self.state.lock().await;
        state.active.remove(id);
        state.deferred.remove(id);
        state.settled.insert(id.clone());
    }

    /// 在 `until` 之前不认领该文件
    pub async fn defer(&self, id: &ItemId, until: Instant) {
        let mut state = self.state.lock().await;
        state.active.remove(id);
        state.deferred.insert(id.clone(), until);
    }

    pub async fn settled_count(&self) -> usize {
        self.state.lock().await.settled.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ids(names: &[&str]) -> Vec<ItemId> {
        names.iter().map(|n| ItemId::new(*n)).collect()
    }

    #[tokio::test]
    async fn settled_and_deferred_items_are_not_candidates() {
        let backlog = Backlog::new(ids(&["anime_a.json", "anime_b.json", "anime_c.json"]));
        let now = Instant::now();

        backlog.settle(&ItemId::new("anime_a.json")).await;
        backlog
            .defer(&ItemId::new("anime_b.json"), now + Duration::from_secs(10))
            .await;

        let candidates = backlog.candidates(now).await;
        assert_eq!(candidates.ready, ids(&["anime_c.json"]));
        assert_eq!(candidates.next_deferred, Some(now + Duration::from_secs(10)));

        let later = backlog.candidates(now + Duration::from_secs(11)).await;
        assert_eq!(later.ready, ids(&["anime_b.json", "anime_c.json"]));
        assert!(later.next_deferred.is_none());
    }

    #[tokio::test]
    async fn active_item_is_hidden_until_released() {
        let backlog = Backlog::new(ids(&["anime_a.json", "anime_b.json"]));
        let a = ItemId::new("anime_a.json");
        let now = Instant::now();

        assert!(backlog.begin(&a).await);
        assert!(!backlog.begin(&a).await);
        assert_eq!(backlog.candidates(now).await.ready, ids(&["anime_b.json"]));

        backlog.release(&a).await;
        assert_eq!(backlog.candidates(now).await.ready.len(), 2);

        assert!(backlog.begin(&a).await);
        backlog.settle(&a).await;
        assert!(!backlog.begin(&a).await);
    }
}
