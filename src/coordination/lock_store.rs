//! 锁文件存储
//!
//! 跨进程共享的键值存储，只有四个操作：查询存在及年龄、写入、
//! 不存在时写入、删除。过期判断留给 [`LockCoordinator`](super::LockCoordinator)。

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait LockStore: Send + Sync {
    /// 锁存在时返回它的年龄
    async fn age(&self, key: &str) -> io::Result<Option<Duration>>;

    /// 写入锁，已存在时覆盖
    async fn put(&self, key: &str, holder: &str) -> io::Result<()>;

    /// 只在锁不存在时写入，返回是否写入成功
    async fn put_if_absent(&self, key: &str, holder: &str) -> io::Result<bool>;

    /// 删除锁，不存在时返回 `false`
    async fn delete(&self, key: &str) -> io::Result<bool>;
}

/// 基于目录的锁存储：每个锁是一个 `<key>.lock` 文件，内容为持有者，
/// 修改时间即获取时间
#[derive(Debug, Clone)]
pub struct FsLockStore {
    dir: PathBuf,
}

impl FsLockStore {
    /// 创建锁目录（已存在则直接使用）
    pub async fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn marker_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", key))
    }
}

#[async_trait]
impl LockStore for FsLockStore {
    async fn age(&self, key: &str) -> io::Result<Option<Duration>> {
        match fs::metadata(self.marker_path(key)).await {
            Ok(meta) => {
                let modified = meta.modified()?;
                // 时钟回拨时按刚创建处理
                let age = SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or(Duration::ZERO);
                Ok(Some(age))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn put(&self, key: &str, holder: &str) -> io::Result<()> {
        fs::write(self.marker_path(key), holder).await
    }

    async fn put_if_absent(&self, key: &str, holder: &str) -> io::Result<bool> {
        let opened = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.marker_path(key))
            .await;

        match opened {
            Ok(mut file) => {
                file.write_all(holder.as_bytes()).await?;
                file.flush().await?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, key: &str) -> io::Result<bool> {
        match fs::remove_file(self.marker_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// 内存锁存储，用于测试
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    markers: Mutex<HashMap<String, (String, SystemTime)>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 把锁的获取时间往前推，模拟过期
    pub fn backdate(&self, key: &str, by: Duration) {
        let mut markers = self.markers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, at)) = markers.get_mut(key) {
            *at = at.checked_sub(by).unwrap_or(SystemTime::UNIX_EPOCH);
        }
    }

    pub fn holder(&self, key: &str) -> Option<String> {
        let markers = self.markers.lock().unwrap_or_else(|e| e.into_inner());
        markers.get(key).map(|(holder, _)| holder.clone())
    }

    pub fn len(&self) -> usize {
        self.markers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn age(&self, key: &str) -> io::Result<Option<Duration>> {
        let markers = self.markers.lock().unwrap_or_else(|e| e.into_inner());
        Ok(markers.get(key).map(|(_, at)| {
            SystemTime::now()
                .duration_since(*at)
                .unwrap_or(Duration::ZERO)
        }))
    }

    async fn put(&self, key: &str, holder: &str) -> io::Result<()> {
        let mut markers = self.markers.lock().unwrap_or_else(|e| e.into_inner());
        markers.insert(key.to_string(), (holder.to_string(), SystemTime::now()));
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, holder: &str) -> io::Result<bool> {
        let mut markers = self.markers.lock().unwrap_or_else(|e| e.into_inner());
        if markers.contains_key(key) {
            return Ok(false);
        }
        markers.insert(key.to_string(), (holder.to_string(), SystemTime::now()));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> io::Result<bool> {
        let mut markers = self.markers.lock().unwrap_or_else(|e| e.into_inner());
        Ok(markers.remove(key).is_some())
    }
}
