use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// 工作循环状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Scanning,
    Claimed,
    Processing,
    Releasing,
    IdleWait,
    Terminated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Starting => "STARTING",
            WorkerState::Scanning => "SCANNING",
            WorkerState::Claimed => "CLAIMED",
            WorkerState::Processing => "PROCESSING",
            WorkerState::Releasing => "RELEASING",
            WorkerState::IdleWait => "IDLE_WAIT",
            WorkerState::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

/// 当前文件的处理进度
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileProgress {
    pub file_name: String,
    pub total_episodes: usize,
    /// 本轮新提取成功的数量
    pub processed: usize,
    /// 之前已完成、跳过的数量
    pub skipped: usize,
    pub remaining: usize,
}

impl FileProgress {
    pub fn percent(&self) -> f64 {
        percent(self.processed + self.skipped, self.total_episodes)
    }
}

/// 单个实例的统计（启动以来累计）
#[derive(Debug)]
pub struct InstanceStats {
    id: String,
    capacity: AtomicUsize,
    resolved: AtomicUsize,
    errors: AtomicUsize,
    files_done: AtomicUsize,
    active_tasks: AtomicUsize,
    state: Mutex<WorkerState>,
    current: Mutex<Option<FileProgress>>,
}

/// 实例统计快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSnapshot {
    pub id: String,
    pub state: WorkerState,
    pub capacity: usize,
    pub resolved: usize,
    pub errors: usize,
    pub files_done: usize,
    pub active_tasks: usize,
    pub current: Option<FileProgress>,
}

impl InstanceStats {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capacity: AtomicUsize::new(0),
            resolved: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            files_done: AtomicUsize::new(0),
            active_tasks: AtomicUsize::new(0),
            state: Mutex::new(WorkerState::Starting),
            current: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn lock_state(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<FileProgress>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> WorkerState {
        *self.lock_state()
    }

    pub fn set_state(&self, state: WorkerState) {
        *self.lock_state() = state;
    }

    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    pub fn task_started(&self) {
        self.active_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_finished(&self) {
        self.active_tasks.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_resolved(&self) {
        self.resolved.fetch_add(1, Ordering::Relaxed);
        if let Some(progress) = self.lock_current().as_mut() {
            progress.processed += 1;
            progress.remaining = progress.remaining.saturating_sub(1);
        }
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        if let Some(progress) = self.lock_current().as_mut() {
            progress.remaining = progress.remaining.saturating_sub(1);
        }
    }

    pub fn record_file_done(&self) {
        self.files_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn begin_file(&self, progress: FileProgress) {
        *self.lock_current() = Some(progress);
    }

    pub fn end_file(&self) {
        *self.lock_current() = None;
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            id: self.id.clone(),
            state: self.state(),
            capacity: self.capacity.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            files_done: self.files_done.load(Ordering::Relaxed),
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            current: self.lock_current().clone(),
        }
    }
}

pub(crate) fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        done as f64 / total as f64 * 100.0
    }
}
