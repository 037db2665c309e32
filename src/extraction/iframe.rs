//! 播放器 iframe 提取
//!
//! 流程：导航 → 等待 DDoS-Guard 放行 → 页面稳定 → 执行一次 JS 探测
//! → 按优先级挑选候选地址。

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use regex::Regex;
use serde::Deserialize;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info};
use url::Url;

use crate::config::Config;
use crate::error::{AppError, AppResult, ExtractionError};
use crate::extraction::Extractor;
use crate::infrastructure::JsExecutor;

const DDOS_GUARD_TITLE: &str = "DDoS-Guard";

/// 在页面内收集候选地址，不做取舍
const PROBE_JS: &str = r#"
(() => {
    const results = { iframes: [], dataAttrs: [], scriptUrls: [], playerUrls: [] };
    document.querySelectorAll('iframe').forEach(f => {
        const src = f.getAttribute('src');
        if (src) results.iframes.push(src);
    });
    document.querySelectorAll('[data-src], [data-embed], [data-iframe], [data-url]').forEach(el => {
        Array.from(el.attributes).forEach(attr => {
            if (attr.name.startsWith('data-') && attr.value.includes('http')) {
                results.dataAttrs.push(attr.value);
            }
        });
    });
    document.querySelectorAll('script').forEach(script => {
        const content = script.textContent || '';
        const matches = content.match(/(https?:\/\/[^"'\s]+)/g);
        if (matches) matches.forEach(u => results.scriptUrls.push(u));
    });
    const selectors = ['#player', '.player', '#video-player', '.video-player', '#embed-player',
        '.embed-player', '[id*="player"]', '[class*="player"]', '.pahe-player', '#kwikPlayer'];
    selectors.forEach(sel => {
        document.querySelectorAll(sel).forEach(el => {
            const inner = el.querySelector('iframe');
            if (inner && inner.getAttribute('src')) results.playerUrls.push(inner.getAttribute('src'));
            ['data-src', 'data-embed', 'data-iframe', 'data-url'].forEach(a => {
                const v = el.getAttribute(a);
                if (v && v.includes('http')) results.playerUrls.push(v);
            });
        });
    });
    return results;
})()
"#;

/// JS 探测结果
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    #[serde(default)]
    pub iframes: Vec<String>,
    #[serde(default)]
    pub data_attrs: Vec<String>,
    #[serde(default)]
    pub script_urls: Vec<String>,
    #[serde(default)]
    pub player_urls: Vec<String>,
}

/// 基于无头浏览器标签页的 iframe 提取器
pub struct IframeExtractor {
    navigation_timeout: Duration,
    settle_delay: Duration,
}

impl IframeExtractor {
    pub fn new(navigation_timeout: Duration) -> Self {
        Self {
            navigation_timeout,
            settle_delay: Duration::from_secs(2),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.navigation_timeout)
    }

    async fn navigate(&self, url: &str, page: &Page) -> AppResult<()> {
        match timeout(self.navigation_timeout, page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(AppError::navigation_failed(url, e)),
            Err(_) => Err(ExtractionError::Timeout {
                url: url.to_string(),
                seconds: self.navigation_timeout.as_secs(),
            }
            .into()),
        }
    }

    /// 标题里带 DDoS-Guard 时轮询直到放行或超时
    async fn wait_for_guard(&self, url: &str, executor: &JsExecutor<'_>) -> AppResult<String> {
        let deadline = Instant::now() + self.navigation_timeout;
        let mut title = executor.title().await?;
        if title.contains(DDOS_GUARD_TITLE) {
            info!("🛡️ 等待 DDoS-Guard 放行: {}", url);
        }
        while title.contains(DDOS_GUARD_TITLE) {
            if Instant::now() >= deadline {
                return Err(ExtractionError::Timeout {
                    url: url.to_string(),
                    seconds: self.navigation_timeout.as_secs(),
                }
                .into());
            }
            sleep(Duration::from_millis(500)).await;
            title = executor.title().await?;
        }
        Ok(title)
    }
}

#[async_trait]
impl Extractor<Page> for IframeExtractor {
    async fn extract(&self, url: &str, tab: &Page) -> AppResult<Option<String>> {
        info!("🔍 正在提取: {}", url);
        self.navigate(url, tab).await?;

        let executor = JsExecutor::new(tab);
        let title = self.wait_for_guard(url, &executor).await?;
        debug!("✅ 已加载: {}", title);

        sleep(self.settle_delay).await;

        let base = tab
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());
        let probe: ProbeResult = executor.eval_as(PROBE_JS).await?;

        let found = pick_iframe(&base, &probe);
        match &found {
            Some(iframe) => info!("✅ 找到播放器 iframe: {}", iframe),
            None => debug!("未找到 iframe: {}", url),
        }
        Ok(found)
    }
}

fn player_pattern() -> Regex {
    Regex::new(r"(?i)player|video|embed|kwik|stream").expect("static pattern is valid")
}

fn embed_pattern() -> Regex {
    Regex::new(r"(?i)embed|player|kwik").expect("static pattern is valid")
}

/// 把相对地址转换为绝对地址
pub fn absolutize(base: &str, candidate: &str) -> Option<String> {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return None;
    }
    if let Some(rest) = candidate.strip_prefix("//") {
        return Some(format!("https://{}", rest));
    }
    if let Ok(absolute) = Url::parse(candidate) {
        return Some(absolute.to_string());
    }
    Url::parse(base)
        .and_then(|b| b.join(candidate))
        .map(|u| u.to_string())
        .ok()
}

/// 按优先级挑选 iframe 地址
///
/// 1. 页面上的 iframe：带播放器关键字的优先，其次是外站 iframe
/// 2. `data-*` 属性中的嵌入地址
/// 3. 脚本中的嵌入地址
/// 4. 播放器容器中的任何地址
pub fn pick_iframe(base: &str, probe: &ProbeResult) -> Option<String> {
    let player = player_pattern();
    let embed = embed_pattern();
    let base_host = Url::parse(base)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string));

    let iframes: Vec<String> = probe
        .iframes
        .iter()
        .filter_map(|src| absolutize(base, src))
        .collect();

    if let Some(hit) = iframes.iter().find(|u| player.is_match(u)) {
        return Some(hit.clone());
    }
    let external = iframes.iter().find(|u| {
        let host = Url::parse(u).ok().and_then(|p| p.host_str().map(str::to_string));
        host.is_some() && host != base_host
    });
    if let Some(hit) = external {
        return Some(hit.clone());
    }

    for list in [&probe.data_attrs, &probe.script_urls] {
        let hit = list
            .iter()
            .filter_map(|u| absolutize(base, u))
            .find(|u| embed.is_match(u));
        if hit.is_some() {
            return hit;
        }
    }

    probe
        .player_urls
        .iter()
        .find_map(|u| absolutize(base, u))
}
