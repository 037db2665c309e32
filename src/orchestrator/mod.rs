//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责实例调度和批量处理，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `app` - 应用主结构
//! - 预扫描待处理文件，准备共享资源
//! - 按间隔启动多个实例，启动进度监控
//! - Ctrl-C 优雅停止，输出最终统计
//!
//! ### `worker` - 实例工作循环
//! - 扫描 → 认领 → 处理 → 释放 → … → 空闲等待 → 退出
//! - 随机选择可用文件，分散实例之间的竞争
//!
//! ### `batch_processor` - 单个文件的批处理器
//! - 按资源池容量分波并发处理剧集
//! - 每波结束后写回文件（检查点）
//!
//! ### `retry` / `shutdown`
//! - 重试次数与退避时间
//! - 进程内共享的停止信号
//!
//! ## 层次关系
//!
//! ```text
//! app (N 个实例)
//!     ↓
//! worker (处理 Vec<ItemId>)
//!     ↓
//! batch_processor (处理一个文件的 Vec<Episode>)
//!     ↓
//! extraction (处理单个剧集) + pool (标签页)
//!     ↓
//! infrastructure (基础设施：JsExecutor)
//! ```

pub mod app;
pub mod batch_processor;
pub mod retry;
pub mod shutdown;
pub mod worker;

// 重新导出主要类型
pub use app::App;
pub use batch_processor::{BatchOutcome, BatchProcessor, Pending, NO_RESULT_REASON};
pub use retry::RetryPolicy;
pub use shutdown::ShutdownSignal;
pub use worker::{holder_id, instance_id, WorkerLoop, WorkerReport, WorkerSettings};
