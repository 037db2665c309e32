use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::coordination::ClaimMode;
use crate::error::{AppResult, ConfigError};
use crate::orchestrator::retry::RetryPolicy;

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 待处理 JSON 文件所在目录
    pub backlog_dir: PathBuf,
    /// 只处理以此前缀开头的 JSON 文件
    pub file_prefix: String,
    /// 同时运行的实例数量
    pub instances: usize,
    /// 每个实例的浏览器数量
    pub browsers_per_instance: usize,
    /// 每个浏览器的标签页数量
    pub tabs_per_browser: usize,
    /// 锁文件目录，未设置时使用 `<backlog_dir>/.coordination`
    pub lock_dir: Option<PathBuf>,
    /// 锁文件过期时间
    pub lock_stale_after: Duration,
    /// 认领方式
    pub claim_mode: ClaimMode,
    /// 没有可用文件时的等待时间
    pub idle_wait: Duration,
    /// 处理完一个文件后的停顿
    pub claim_pause: Duration,
    /// 实例之间的启动间隔
    pub instance_stagger: Duration,
    /// 进度报告间隔
    pub monitor_interval: Duration,
    /// 重试策略
    pub retry: RetryPolicy,
    /// 释放标签页后的随机冷却区间
    pub tab_cooldown: (Duration, Duration),
    /// 页面导航超时
    pub navigation_timeout: Duration,
    /// 浏览器可执行文件路径
    pub chrome_executable: Option<PathBuf>,
    /// 失败记录文件
    pub failure_log_file: PathBuf,
    /// 输出日志文件
    pub output_log_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backlog_dir: PathBuf::from("."),
            file_prefix: "anime_".to_string(),
            instances: 3,
            browsers_per_instance: 2,
            tabs_per_browser: 2,
            lock_dir: None,
            lock_stale_after: Duration::from_secs(600),
            claim_mode: ClaimMode::Exclusive,
            idle_wait: Duration::from_secs(30),
            claim_pause: Duration::from_secs(5),
            instance_stagger: Duration::from_secs(2),
            monitor_interval: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            tab_cooldown: (Duration::from_millis(1000), Duration::from_millis(3000)),
            navigation_timeout: Duration::from_secs(60),
            chrome_executable: None,
            failure_log_file: PathBuf::from("failed_episodes.jsonl"),
            output_log_file: PathBuf::from("iframe_extraction.log"),
        }
    }
}

impl Config {
    /// 从环境变量读取配置，未设置的项使用默认值
    ///
    /// 数量类配置不在这里限制范围：日志初始化之后再调用 [`clamped`](Self::clamped)，
    /// 调整时的警告才会被记录。
    pub fn from_env() -> AppResult<Self> {
        let default = Self::default();

        let retry = RetryPolicy::new(
            env_or("MAX_ATTEMPTS", default.retry.max_attempts)?,
            env_secs("RETRY_BACKOFF_SECS", default.retry.initial_backoff)?,
        );

        let config = Self {
            backlog_dir: env_or("BACKLOG_DIR", default.backlog_dir)?,
            file_prefix: env_or("FILE_PREFIX", default.file_prefix)?,
            instances: env_or("INSTANCES", default.instances)?,
            browsers_per_instance: env_or("BROWSERS_PER_INSTANCE", default.browsers_per_instance)?,
            tabs_per_browser: env_or("TABS_PER_BROWSER", default.tabs_per_browser)?,
            lock_dir: env_opt("LOCK_DIR")?,
            lock_stale_after: env_secs("LOCK_STALE_SECS", default.lock_stale_after)?,
            claim_mode: env_or("CLAIM_MODE", default.claim_mode)?,
            idle_wait: env_secs("IDLE_WAIT_SECS", default.idle_wait)?,
            claim_pause: env_secs("CLAIM_PAUSE_SECS", default.claim_pause)?,
            instance_stagger: env_secs("INSTANCE_STAGGER_SECS", default.instance_stagger)?,
            monitor_interval: env_secs("MONITOR_INTERVAL_SECS", default.monitor_interval)?,
            retry,
            tab_cooldown: (
                env_millis("TAB_COOLDOWN_MIN_MS", default.tab_cooldown.0)?,
                env_millis("TAB_COOLDOWN_MAX_MS", default.tab_cooldown.1)?,
            ),
            navigation_timeout: env_secs("NAV_TIMEOUT_SECS", default.navigation_timeout)?,
            chrome_executable: env_opt("CHROME_EXECUTABLE")?,
            failure_log_file: env_or("FAILURE_LOG", default.failure_log_file)?,
            output_log_file: env_or("OUTPUT_LOG_FILE", default.output_log_file)?,
        };

        Ok(config)
    }

    /// 把数量类配置限制在合理范围内
    pub fn clamped(mut self) -> Self {
        self.instances = clamp_logged("INSTANCES", self.instances, 1, 8);
        self.browsers_per_instance =
            clamp_logged("BROWSERS_PER_INSTANCE", self.browsers_per_instance, 1, 4);
        self.tabs_per_browser = clamp_logged("TABS_PER_BROWSER", self.tabs_per_browser, 1, 4);
        if self.tab_cooldown.1 < self.tab_cooldown.0 {
            self.tab_cooldown.1 = self.tab_cooldown.0;
        }
        self
    }

    /// 锁文件目录
    pub fn lock_dir(&self) -> PathBuf {
        self.lock_dir
            .clone()
            .unwrap_or_else(|| self.backlog_dir.join(".coordination"))
    }
}

fn env_or<T>(var_name: &str, default: T) -> AppResult<T>
where
    T: FromStr,
{
    match std::env::var(var_name) {
        Ok(value) if !value.trim().is_empty() => parse_value(var_name, &value),
        _ => Ok(default),
    }
}

fn env_opt<T: FromStr>(var_name: &str) -> AppResult<Option<T>> {
    match std::env::var(var_name) {
        Ok(value) if !value.trim().is_empty() => parse_value(var_name, &value).map(Some),
        _ => Ok(None),
    }
}

fn env_secs(var_name: &str, default: Duration) -> AppResult<Duration> {
    env_or(var_name, default.as_secs()).map(Duration::from_secs)
}

fn env_millis(var_name: &str, default: Duration) -> AppResult<Duration> {
    env_or(var_name, default.as_millis() as u64).map(Duration::from_millis)
}

fn parse_value<T: FromStr>(var_name: &str, value: &str) -> AppResult<T> {
    value.trim().parse::<T>().map_err(|_| {
        ConfigError::EnvVarParseFailed {
            var_name: var_name.to_string(),
            value: value.to_string(),
            expected_type: std::any::type_name::<T>().to_string(),
        }
        .into()
    })
}

fn clamp_logged(name: &str, value: usize, min: usize, max: usize) -> usize {
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!("⚠️ {} = {} 超出范围 [{}, {}]，已调整为 {}", name, value, min, max, clamped);
    }
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    #[test]
    fn clamps_counts_into_supported_range() {
        let config = Config {
            instances: 20,
            browsers_per_instance: 0,
            tabs_per_browser: 3,
            ..Config::default()
        }
        .clamped();

        assert_eq!(config.instances, 8);
        assert_eq!(config.browsers_per_instance, 1);
        assert_eq!(config.tabs_per_browser, 3);
    }

    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn each_clamp_is_logged_as_a_warning() {
        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(Arc::clone(&warnings)));

        let config = tracing::subscriber::with_default(subscriber, || {
            Config {
                instances: 20,
                browsers_per_instance: 0,
                ..Config::default()
            }
            .clamped()
        });

        assert_eq!(config.instances, 8);
        assert_eq!(warnings.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn lock_dir_defaults_under_backlog() {
        let config = Config {
            backlog_dir: PathBuf::from("/data/backlog"),
            ..Config::default()
        };
        assert_eq!(config.lock_dir(), PathBuf::from("/data/backlog/.coordination"));
    }

    #[test]
    fn reports_unparseable_values() {
        let err = parse_value::<usize>("INSTANCES", "three").unwrap_err();
        assert!(err.to_string().contains("INSTANCES"));
    }
}
