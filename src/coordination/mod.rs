//! 协调层（Coordination）
//!
//! - `lock_store` - 跨进程共享的锁文件存储
//! - `lock_coordinator` - 基于锁文件的文件认领与释放，负责过期回收
//! - `backlog` - 进程内共享的待处理列表（已结清 / 退避中）

pub mod backlog;
pub mod lock_coordinator;
pub mod lock_store;

pub use backlog::{Backlog, Candidates};
pub use lock_coordinator::{ClaimMode, LockCoordinator};
pub use lock_store::{FsLockStore, LockStore, MemoryLockStore};
