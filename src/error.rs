use std::path::PathBuf;

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 浏览器相关错误
    #[error("浏览器错误: {0}")]
    Browser(#[from] BrowserError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    /// 标签页资源池错误
    #[error("资源池错误: {0}")]
    Pool(#[from] PoolError),
    /// 提取错误
    #[error("提取错误: {0}")]
    Extraction(#[from] ExtractionError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
}

/// 浏览器相关错误
#[derive(Debug, Error)]
pub enum BrowserError {
    /// 浏览器配置失败
    #[error("浏览器配置失败: {reason}")]
    ConfigurationFailed { reason: String },
    /// 启动浏览器失败
    #[error("启动浏览器 {index} 失败: {source}")]
    LaunchFailed {
        index: usize,
        #[source]
        source: chromiumoxide::error::CdpError,
    },
    /// 创建标签页失败
    #[error("创建标签页失败: {source}")]
    TabCreationFailed {
        #[source]
        source: chromiumoxide::error::CdpError,
    },
    /// 关闭失败
    #[error("关闭{what}失败: {source}")]
    CloseFailed {
        what: &'static str,
        #[source]
        source: chromiumoxide::error::CdpError,
    },
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 目录不存在
    #[error("目录不存在: {}", path.display())]
    DirectoryNotFound { path: PathBuf },
    /// 读取文件失败
    #[error("读取文件失败 ({}): {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 写入文件失败
    #[error("写入文件失败 ({}): {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// JSON 结构不合法
    #[error("JSON 解析失败 ({}): {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// JSON 序列化失败
    #[error("JSON 序列化失败 ({}): {source}", path.display())]
    SerializeFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 标签页资源池错误
#[derive(Debug, Error)]
pub enum PoolError {
    /// 初始化后没有任何可用标签页
    #[error("没有可用的标签页 (浏览器 {browsers} 个, 每个 {tabs_per_browser} 个标签页全部初始化失败)")]
    NoTabs {
        browsers: usize,
        tabs_per_browser: usize,
    },
    /// 资源池已关闭
    #[error("资源池已关闭")]
    Closed,
}

/// 单个剧集的提取错误
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// 导航失败
    #[error("导航到 {url} 失败: {reason}")]
    NavigationFailed { url: String, reason: String },
    /// 等待超时
    #[error("等待 {url} 超时 ({seconds} 秒)")]
    Timeout { url: String, seconds: u64 },
    /// 执行脚本失败
    #[error("执行脚本失败: {reason}")]
    ScriptFailed { reason: String },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建文件读取错误
    pub fn file_read_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建导航错误
    pub fn navigation_failed(url: impl Into<String>, reason: impl ToString) -> Self {
        AppError::Extraction(ExtractionError::NavigationFailed {
            url: url.into(),
            reason: reason.to_string(),
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
