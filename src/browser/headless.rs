use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::{AppResult, BrowserError};
use crate::pool::TabFactory;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

static PROFILE_SEQ: AtomicUsize = AtomicUsize::new(0);

/// 启动中的无头浏览器及其事件处理任务
pub struct ChromeBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: PathBuf,
}

impl ChromeBrowser {
    pub fn browser(&self) -> &Browser {
        &self.browser
    }
}

/// 用 chromiumoxide 启动无头浏览器并打开空白标签页
#[derive(Debug, Clone, Default)]
pub struct ChromeTabFactory {
    chrome_executable: Option<PathBuf>,
}

impl ChromeTabFactory {
    pub fn new(chrome_executable: Option<PathBuf>) -> Self {
        Self { chrome_executable }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.chrome_executable.clone())
    }

    fn browser_config(&self, user_data_dir: &Path) -> AppResult<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .new_headless_mode()
            .user_data_dir(user_data_dir)
            .args(vec![
                "--disable-blink-features=AutomationControlled".to_string(),
                "--no-sandbox".to_string(),
                "--disable-dev-shm-usage".to_string(),
                "--disable-gpu".to_string(),
                "--window-size=1920,1080".to_string(),
                format!("--user-agent={}", USER_AGENT),
            ]);

        if let Some(path) = &self.chrome_executable {
            builder = builder.chrome_executable(path);
        }

        builder.build().map_err(|reason| {
            error!("配置无头浏览器失败: {}", reason);
            BrowserError::ConfigurationFailed { reason }.into()
        })
    }
}

#[async_trait]
impl TabFactory for ChromeTabFactory {
    type Browser = ChromeBrowser;
    type Tab = Page;

    async fn launch_browser(&self, index: usize) -> AppResult<ChromeBrowser> {
        // 同时运行多个浏览器时每个都需要独立的用户目录
        let user_data_dir = std::env::temp_dir().join(format!(
            "iframe_harvester-{}-{}",
            std::process::id(),
            PROFILE_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let config = self.browser_config(&user_data_dir)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|source| BrowserError::LaunchFailed { index, source })?;
        debug!("无头浏览器 {} 启动成功", index + 1);

        // 在后台处理浏览器事件
        let handler = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        // 添加短暂延迟以等待浏览器状态同步
        sleep(Duration::from_millis(300)).await;

        Ok(ChromeBrowser {
            browser,
            handler,
            user_data_dir,
        })
    }

    async fn open_tab(&self, browser: &ChromeBrowser) -> AppResult<Page> {
        let page = browser
            .browser
            .new_page("about:blank")
            .await
            .map_err(|source| BrowserError::TabCreationFailed { source })?;

        // 隐藏自动化特征
        if let Err(e) = page
            .evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(
                "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });",
            ))
            .await
        {
            warn!("注入初始化脚本失败: {}", e);
        }

        Ok(page)
    }

    async fn close_tab(&self, tab: Page) -> AppResult<()> {
        tab.close().await.map_err(|source| BrowserError::CloseFailed {
            what: "标签页",
            source,
        })?;
        Ok(())
    }

    async fn close_browser(&self, mut browser: ChromeBrowser) -> AppResult<()> {
        let closed = browser.browser.close().await;
        if closed.is_ok() {
            let _ = browser.browser.wait().await;
        }
        browser.handler.abort();

        if let Err(e) = tokio::fs::remove_dir_all(&browser.user_data_dir).await {
            debug!(
                "清理浏览器临时目录失败 {}: {}",
                browser.user_data_dir.display(),
                e
            );
        }

        closed.map_err(|source| BrowserError::CloseFailed {
            what: "浏览器",
            source,
        })?;
        Ok(())
    }
}
