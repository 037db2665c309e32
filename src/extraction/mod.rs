//! 提取能力层
//!
//! 对单个剧集 URL 的提取被当作黑盒：可能很慢，可能失败，自身不做重试。

pub mod iframe;

use async_trait::async_trait;

use crate::error::AppResult;

pub use iframe::{pick_iframe, IframeExtractor, ProbeResult};

/// 单个 URL 的提取器
///
/// 返回 `Ok(None)` 表示页面加载成功但没有找到结果。
#[async_trait]
pub trait Extractor<T>: Send + Sync + 'static {
    async fn extract(&self, url: &str, tab: &T) -> AppResult<Option<String>>;
}
