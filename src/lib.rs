//! # Iframe Harvester
//!
//! 多实例、多浏览器并发提取剧集播放器 iframe 地址的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 在标签页上执行 JS，只暴露能力
//! - `browser/` - 用 chromiumoxide 启动无头浏览器、打开标签页
//! - `pool/` - 标签页资源池，借出即租约，离开作用域自动归还
//!
//! ### ② 业务能力层（Extraction / Services）
//! - `extraction/` - 对单个剧集 URL 提取 iframe 地址
//! - `services/` - 失败记录（JSON Lines）
//!
//! ### ③ 协调层（Coordination）
//! - `coordination/` - 跨进程锁文件、过期回收、进程内待处理列表
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 单个文件分波处理并写检查点
//! - `orchestrator/worker` - 实例工作循环
//! - `orchestrator/app` - 启动实例、监控进度、优雅停止
//!
//! ### 横切关注点
//! - `progress/` - 共享计数器和只读进度汇总
//! - `models/` - 文件数据结构与持久化
//! - `config` / `error` / `utils::logging`
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod coordination;
pub mod error;
pub mod extraction;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod services;
pub mod utils;

// 重新导出常用类型
pub use config::Config;
pub use coordination::{Backlog, ClaimMode, LockCoordinator};
pub use error::{AppError, AppResult};
pub use extraction::{Extractor, IframeExtractor};
pub use models::{Episode, ItemId, WorkItem};
pub use orchestrator::{App, BatchProcessor, WorkerLoop};
pub use pool::{TabFactory, TabPool};
pub use progress::ProgressAggregator;
