//! 重试策略
//!
//! 失败的剧集不会在同一轮中立即重试，而是由外层循环在退避时间之后
//! 重新认领整个文件。本模块只描述"还能试几次"和"要等多久"。

use std::time::Duration;

/// 剧集级重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 每个剧集最多尝试次数（跨轮次累计，持久化在文件里）
    pub max_attempts: u32,
    /// 第一次退避时间
    pub initial_backoff: Duration,
    /// 退避倍数
    pub multiplier: u32,
    /// 退避上限
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            multiplier: 2,
            max_backoff: Duration::from_secs(30 * 60),
        }
    }

    /// 只尝试一次，不再重新认领
    pub fn single_attempt() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// 已尝试 `attempts` 次的剧集是否还能再试
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// 第 `pass` 轮（从 1 开始）失败后，下一次认领前的等待时间
    pub fn backoff_for(&self, pass: u32) -> Duration {
        let exponent = pass.saturating_sub(1).min(16);
        let factor = self.multiplier.saturating_pow(exponent);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}
