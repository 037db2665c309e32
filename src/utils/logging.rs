/// 日志工具模块
///
/// 初始化 tracing 订阅器，并提供日志格式化和输出的辅助函数
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;

/// 初始化日志：控制台 + 纯文本日志文件
///
/// 优先使用 `RUST_LOG`，未设置时为 `info`。
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init(log_file_path: &Path) -> Result<()> {
    init_log_file(log_file_path)?;

    let file = OpenOptions::new().append(true).open(log_file_path)?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()?;

    Ok(())
}

/// 写入日志文件头（覆盖旧文件）
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &Path) -> Result<()> {
    let log_header = format!(
        "{}\n剧集 iframe 提取日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录程序启动信息
///
/// # 参数
/// - `config`: 程序配置
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 多实例 iframe 提取模式");
    info!("📁 数据目录: {}", config.backlog_dir.display());
    info!(
        "📊 实例数: {} | 每实例浏览器: {} | 每浏览器标签页: {}",
        config.instances, config.browsers_per_instance, config.tabs_per_browser
    );
    info!(
        "🔒 锁目录: {} | 过期时间: {:?} | 认领方式: {:?}",
        config.lock_dir().display(),
        config.lock_stale_after,
        config.claim_mode
    );
    info!("{}", "=".repeat(60));
}

/// 记录预扫描结果
///
/// # 参数
/// - `files`: 文件总数
/// - `episodes`: 剧集总数
/// - `done`: 已完成剧集数
pub fn log_backlog_loaded(files: usize, episodes: usize, done: usize) {
    info!("✓ 找到 {} 个待处理的文件", files);
    info!(
        "🎬 剧集: 共 {} | 已完成 {} | 待处理 {}",
        episodes,
        done,
        episodes.saturating_sub(done)
    );
}

/// 打印结束信息
///
/// # 参数
/// - `failure_log`: 失败记录文件路径
/// - `log_file_path`: 日志文件路径
pub fn print_finish(failure_log: &Path, log_file_path: &Path) {
    info!("\n失败记录: {}", failure_log.display());
    info!("日志已保存至: {}", log_file_path.display());
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
