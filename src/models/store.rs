//! 待处理文件的持久化存储
//!
//! 每个文件在认领时完整读入内存，每个波次结束后完整写回。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::error::{AppError, AppResult, FileError};
use crate::models::work_item::{ItemId, WorkItem};

/// 待处理文件存储
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// 列出所有待处理文件
    async fn list(&self) -> AppResult<Vec<ItemId>>;

    /// 完整读取一个文件
    async fn load(&self, id: &ItemId) -> AppResult<WorkItem>;

    /// 完整写回一个文件
    async fn save(&self, id: &ItemId, item: &WorkItem) -> AppResult<()>;
}

/// 基于目录的 JSON 文件存储
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    dir: PathBuf,
    prefix: String,
}

impl JsonDirStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        name.starts_with(&self.prefix) && name.ends_with(".json")
    }
}

#[async_trait]
impl ItemStore for JsonDirStore {
    async fn list(&self) -> AppResult<Vec<ItemId>> {
        if !fs::try_exists(&self.dir).await.unwrap_or(false) {
            return Err(FileError::DirectoryNotFound {
                path: self.dir.clone(),
            }
            .into());
        }

        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| AppError::file_read_failed(&self.dir, e))?;

        let mut items = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::file_read_failed(&self.dir, e))?
        {
            let path = entry.path();
            if self.matches(&path) {
                items.push(ItemId::new(path));
            }
        }

        items.sort();
        Ok(items)
    }

    async fn load(&self, id: &ItemId) -> AppResult<WorkItem> {
        load_work_item(id.path()).await
    }

    async fn save(&self, id: &ItemId, item: &WorkItem) -> AppResult<()> {
        save_work_item(id.path(), item).await
    }
}

/// 从 JSON 文件加载数据
pub async fn load_work_item(path: &Path) -> AppResult<WorkItem> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| AppError::file_read_failed(path, e))?;

    let item: WorkItem = serde_json::from_str(&content).map_err(|source| FileError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(item)
}

/// 先写临时文件再改名，中途崩溃不会留下半个文件
pub async fn save_work_item(path: &Path, item: &WorkItem) -> AppResult<()> {
    let json = serde_json::to_string_pretty(item).map_err(|source| FileError::SerializeFailed {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, json)
        .await
        .map_err(|e| AppError::file_write_failed(&tmp, e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| AppError::file_write_failed(path, e))?;

    Ok(())
}
