use async_trait::async_trait;

use crate::error::AppResult;

/// 浏览器与标签页的创建和关闭
///
/// 资源池只通过这个接口接触真实浏览器，测试里可以换成假的实现。
#[async_trait]
pub trait TabFactory: Send + Sync + 'static {
    type Browser: Send + Sync + 'static;
    type Tab: Send + Sync + 'static;

    /// 启动第 `index` 个浏览器
    async fn launch_browser(&self, index: usize) -> AppResult<Self::Browser>;

    /// 在浏览器中打开一个标签页
    async fn open_tab(&self, browser: &Self::Browser) -> AppResult<Self::Tab>;

    async fn close_tab(&self, tab: Self::Tab) -> AppResult<()>;

    async fn close_browser(&self, browser: Self::Browser) -> AppResult<()>;
}
