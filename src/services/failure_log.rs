//! 失败记录服务 - 业务能力层
//!
//! 只负责"追加一行失败记录"，不关心流程，运行期间从不回读

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::FailureRecord;

/// 失败记录写入服务
///
/// 职责：
/// - 将无法提取的剧集以 JSON Lines 形式追加到文件
/// - 同一进程内的多个实例共用一个实例，写入互斥
pub struct FailureLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加一条失败记录
    pub async fn append(&self, record: &FailureRecord) -> AppResult<()> {
        debug!(
            "写入失败记录: {} | {} | {}",
            record.item, record.url, record.reason
        );

        let mut line = serde_json::to_string(record).map_err(|e| {
            AppError::file_write_failed(&self.path, std::io::Error::other(e))
        })?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AppError::file_write_failed(&self.path, e))?;

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| AppError::file_write_failed(&self.path, e))?;

        Ok(())
    }
}
