use std::time::Instant;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Upload,
    Download,
    FolderUpload,
    FolderDownload,
    Delete,
    Mkdir,
    Rename,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Upload => "upload",
            TaskKind::Download => "download",
            TaskKind::FolderUpload => "folder_upload",
            TaskKind::FolderDownload => "folder_download",
            TaskKind::Delete => "delete",
            TaskKind::Mkdir => "mkdir",
            TaskKind::Rename => "rename",
        }
    }

    /// Transfer kinds contribute transfer metrics on completion or failure.
    pub fn is_transfer(self) -> bool {
        matches!(
            self,
            TaskKind::Upload | TaskKind::Download | TaskKind::FolderUpload | TaskKind::FolderDownload
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineKind {
    #[default]
    Sftp,
    Parallel,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Sftp => "sftp",
            EngineKind::Parallel => "parallel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Done,
    Failed,
    Canceled,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
            TaskStatus::Skipped => "skipped",
        }
    }

    /// Terminal states can only be left through `restart` (which resets the
    /// task back to `Pending` outside the transition table).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Canceled | TaskStatus::Skipped
        )
    }

    /// 状态机合法迁移表；表外迁移视为编程错误。
    pub fn can_transition(self, target: TaskStatus) -> bool {
        use TaskStatus::*;
        match self {
            Pending => matches!(target, Running | Canceled),
            Running => matches!(target, Done | Failed | Paused | Canceled | Skipped),
            Paused => matches!(target, Running | Canceled | Pending),
            Done | Failed | Canceled | Skipped => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of work tracked by the scheduler. The scheduler owns every task and
/// guards all mutable fields with its single lock; engines only see progress
/// callbacks and the `interrupted`/`paused` flags, never the task itself.
#[derive(Debug, Clone)]
pub struct Task {
    pub task_id: String,
    pub kind: TaskKind,
    pub engine: EngineKind,
    pub src: String,
    pub dst: String,

    pub bytes_total: u64,
    pub bytes_done: u64,
    /// Instantaneous speed in bytes/s as reported by the progress callback
    /// (cumulative average since start, see design notes).
    pub speed: f64,
    pub start_time: Option<Instant>,
    pub end_time: Option<Instant>,

    // Folder aggregation
    pub subtask_count: u64,
    pub subtask_done: u64,
    pub current_file: String,

    // Control flags, polled cooperatively by workers
    pub interrupted: bool,
    pub paused: bool,
    pub skipped: bool,

    pub status: TaskStatus,
    pub error_code: Option<ErrorKind>,
    pub error_message: Option<String>,
}

impl Task {
    pub fn new(kind: TaskKind, engine: EngineKind, src: impl Into<String>, dst: impl Into<String>, bytes_total: u64) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            kind,
            engine,
            src: src.into(),
            dst: dst.into(),
            bytes_total,
            bytes_done: 0,
            speed: 0.0,
            start_time: None,
            end_time: None,
            subtask_count: 0,
            subtask_done: 0,
            current_file: String::new(),
            interrupted: false,
            paused: false,
            skipped: false,
            status: TaskStatus::Pending,
            error_code: None,
            error_message: None,
        }
    }

    pub fn progress_percent(&self) -> f64 {
        if self.bytes_total == 0 {
            return 0.0;
        }
        (self.bytes_done as f64 / self.bytes_total as f64) * 100.0
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Reset performed by `restart_task`: progress, outcome and control flags
    /// are cleared so the task can run again from scratch.
    pub fn reset_for_restart(&mut self) {
        self.status = TaskStatus::Pending;
        self.bytes_done = 0;
        self.speed = 0.0;
        self.start_time = None;
        self.end_time = None;
        self.subtask_done = 0;
        self.current_file.clear();
        self.interrupted = false;
        self.paused = false;
        self.skipped = false;
        self.error_code = None;
        self.error_message = None;
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id8 = &self.task_id[..self.task_id.len().min(8)];
        write!(f, "Task({}, {}, {}, {:.1}%)", id8, self.kind.as_str(), self.status, self.progress_percent())
    }
}
