use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use crate::engine::{
    ParallelSftpEngine, Preset, SftpEngine, TransferPlan, parallel::PARALLEL_THRESHOLD, plan_transfer,
};
use crate::error::{FerryError, TaskAbort, translate_io};
use crate::events::{Event, EventBus};
use crate::logging::log_task_event;
use crate::metrics::{MetricsCollector, TransferRecord};
use crate::paths::join_remote_path;
use crate::site::SiteConfig;
use crate::task::{EngineKind, Task, TaskKind, TaskStatus};

const DEFAULT_MAX_WORKERS: usize = 3;
const DISPATCH_POLL: Duration = Duration::from_millis(200);

/// Map and queue state guarded together: one mutex covers the task map, all
/// task fields, and the queued-id set, so status transitions are linearized.
struct TaskTable {
    tasks: HashMap<String, Task>,
    queued: HashSet<String>,
}

struct SchedulerInner {
    site: SiteConfig,
    table: Mutex<TaskTable>,
    queue_tx: Sender<String>,
    queue_rx: Receiver<String>,
    exec_tx: Sender<String>,
    exec_rx: Receiver<String>,
    running: AtomicBool,
    events: Arc<EventBus>,
    metrics: Mutex<MetricsCollector>,
    upload_preset: Mutex<Preset>,
    download_preset: Mutex<Preset>,
}

/// 任务调度器：任务表 + FIFO 队列 + 有界工作线程池。
///
/// 一个调度器面向一个站点。控制操作（cancel/pause/resume/restart）全部是
/// 协作式的：运行中的任务只打标记，由工作线程在下一个轮询点完成状态迁移。
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
    max_workers: usize,
    handles: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(site: SiteConfig, events: Arc<EventBus>, metrics: MetricsCollector) -> Self {
        Self::with_workers(site, events, metrics, DEFAULT_MAX_WORKERS)
    }

    pub fn with_workers(
        site: SiteConfig,
        events: Arc<EventBus>,
        metrics: MetricsCollector,
        max_workers: usize,
    ) -> Self {
        let (queue_tx, queue_rx) = unbounded();
        let (exec_tx, exec_rx) = unbounded();
        Self {
            inner: Arc::new(SchedulerInner {
                site,
                table: Mutex::new(TaskTable { tasks: HashMap::new(), queued: HashSet::new() }),
                queue_tx,
                queue_rx,
                exec_tx,
                exec_rx,
                running: AtomicBool::new(false),
                events,
                metrics: Mutex::new(metrics),
                upload_preset: Mutex::new(Preset::Medium),
                download_preset: Mutex::new(Preset::High),
            }),
            max_workers: max_workers.max(1),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.inner.events.clone()
    }

    pub fn site(&self) -> &SiteConfig {
        &self.inner.site
    }

    pub fn set_upload_preset(&self, preset: Preset) {
        *self.inner.upload_preset.lock().expect("preset lock") = preset;
    }

    pub fn set_download_preset(&self, preset: Preset) {
        *self.inner.download_preset.lock().expect("preset lock") = preset;
    }

    pub fn upload_preset(&self) -> Preset {
        *self.inner.upload_preset.lock().expect("preset lock")
    }

    pub fn download_preset(&self) -> Preset {
        *self.inner.download_preset.lock().expect("preset lock")
    }

    /// Consult the metrics history for the preset to use next.
    pub fn recommended_preset(&self) -> Preset {
        let name = self.inner.metrics.lock().expect("metrics lock").recommended_preset();
        Preset::parse(&name).unwrap_or(Preset::Low)
    }

    /// Start the dispatcher and the worker pool. Idempotent.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut handles = self.handles.lock().expect("handles lock");
        let dispatcher = self.inner.clone();
        handles.push(std::thread::spawn(move || dispatcher_loop(dispatcher)));
        for _ in 0..self.max_workers {
            let worker = self.inner.clone();
            handles.push(std::thread::spawn(move || worker_loop(worker)));
        }
        tracing::info!("task scheduler started with {} workers", self.max_workers);
    }

    /// Stop accepting dispatches and join all threads. Running tasks finish
    /// their current poll interval first (cooperative shutdown).
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut handles = self.handles.lock().expect("handles lock");
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        tracing::info!("task scheduler stopped");
    }

    /// Insert a task and enqueue it (once) for execution. Returns the id.
    pub fn add_task(&self, task: Task) -> String {
        let task_id = task.task_id.clone();
        let snapshot = {
            let mut table = self.inner.table.lock().expect("scheduler lock poisoned");
            let snapshot = task.clone();
            table.tasks.insert(task_id.clone(), task);
            if table.queued.insert(task_id.clone()) {
                let _ = self.inner.queue_tx.send(task_id.clone());
            }
            snapshot
        };
        tracing::info!(
            "added task {}: {} {} -> {}",
            &task_id[..8.min(task_id.len())],
            snapshot.kind.as_str(),
            snapshot.src,
            snapshot.dst
        );
        self.inner.events.emit(Event::TaskAdded(snapshot));
        task_id
    }

    pub fn get_task(&self, task_id: &str) -> Option<Task> {
        self.inner.table.lock().expect("scheduler lock poisoned").tasks.get(task_id).cloned()
    }

    pub fn all_tasks(&self) -> Vec<Task> {
        self.inner.table.lock().expect("scheduler lock poisoned").tasks.values().cloned().collect()
    }

    /// Cancel: pending/paused flip immediately; running tasks get the
    /// interrupted flag and transition at their next poll.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        let (changed, finished_snapshot) = {
            let mut table = self.inner.table.lock().expect("scheduler lock poisoned");
            let Some(task) = table.tasks.get_mut(task_id) else {
                return false;
            };
            match task.status {
                TaskStatus::Pending | TaskStatus::Paused => {
                    set_status(task, TaskStatus::Canceled);
                    task.end_time = Some(Instant::now());
                    (true, Some(task.clone()))
                }
                TaskStatus::Running => {
                    task.interrupted = true;
                    (true, None)
                }
                _ => (false, None),
            }
        };
        if let Some(snapshot) = finished_snapshot {
            log_task_event(&snapshot, None);
            self.inner.events.emit(Event::TaskFinished(snapshot));
        }
        changed
    }

    /// Pause only affects running tasks; the worker observes the flag
    /// between chunks/files and parks the task as `paused`.
    pub fn pause_task(&self, task_id: &str) -> bool {
        let mut table = self.inner.table.lock().expect("scheduler lock poisoned");
        let Some(task) = table.tasks.get_mut(task_id) else {
            return false;
        };
        if task.status != TaskStatus::Running {
            return false;
        }
        task.paused = true;
        true
    }

    /// Resume re-queues a paused task as pending.
    pub fn resume_task(&self, task_id: &str) -> bool {
        let snapshot = {
            let mut table = self.inner.table.lock().expect("scheduler lock poisoned");
            let Some(task) = table.tasks.get_mut(task_id) else {
                return false;
            };
            if task.status != TaskStatus::Paused {
                return false;
            }
            set_status(task, TaskStatus::Pending);
            task.paused = false;
            task.interrupted = false;
            let snapshot = task.clone();
            if table.queued.insert(task_id.to_string()) {
                let _ = self.inner.queue_tx.send(task_id.to_string());
            }
            snapshot
        };
        self.inner.events.emit(Event::TaskUpdated(snapshot));
        true
    }

    /// Restart re-opens a terminal task: progress and outcome reset, then
    /// back onto the queue.
    pub fn restart_task(&self, task_id: &str) -> bool {
        let snapshot = {
            let mut table = self.inner.table.lock().expect("scheduler lock poisoned");
            let Some(task) = table.tasks.get_mut(task_id) else {
                return false;
            };
            if !task.status.is_terminal() {
                return false;
            }
            task.reset_for_restart();
            let snapshot = task.clone();
            if table.queued.insert(task_id.to_string()) {
                let _ = self.inner.queue_tx.send(task_id.to_string());
            }
            snapshot
        };
        self.inner.events.emit(Event::TaskUpdated(snapshot));
        true
    }

    /// Drop terminal tasks from the table; returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut table = self.inner.table.lock().expect("scheduler lock poisoned");
        let before = table.tasks.len();
        table.tasks.retain(|_, task| !task.status.is_terminal());
        before - table.tasks.len()
    }

    /// Block until the task reaches a state the queue will not move on its
    /// own (terminal or paused). Intended for one-shot CLI flows.
    pub fn wait_for(&self, task_id: &str) -> Option<Task> {
        loop {
            let task = self.get_task(task_id)?;
            if task.status.is_terminal() || task.status == TaskStatus::Paused {
                return Some(task);
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    // --- task factories -------------------------------------------------

    /// Engine auto-selection: files at or above the parallel threshold get
    /// the chunk-parallel engine.
    pub fn create_upload_task(local_path: &str, remote_path: &str, file_size: u64) -> Task {
        let engine =
            if file_size >= PARALLEL_THRESHOLD { EngineKind::Parallel } else { EngineKind::Sftp };
        Task::new(TaskKind::Upload, engine, local_path, remote_path, file_size)
    }

    pub fn create_download_task(remote_path: &str, local_path: &str, file_size: u64) -> Task {
        let engine =
            if file_size >= PARALLEL_THRESHOLD { EngineKind::Parallel } else { EngineKind::Sftp };
        Task::new(TaskKind::Download, engine, remote_path, local_path, file_size)
    }

    /// Folder tasks always run over the single-session engine; totals are
    /// filled in by the enumeration phase when the task starts.
    pub fn create_folder_upload_task(local_dir: &str, remote_dir: &str) -> Task {
        Task::new(TaskKind::FolderUpload, EngineKind::Sftp, local_dir, remote_dir, 0)
    }

    pub fn create_folder_download_task(remote_dir: &str, local_dir: &str) -> Task {
        Task::new(TaskKind::FolderDownload, EngineKind::Sftp, remote_dir, local_dir, 0)
    }

    pub fn create_delete_task(remote_path: &str) -> Task {
        Task::new(TaskKind::Delete, EngineKind::Sftp, remote_path, "", 0)
    }

    pub fn create_mkdir_task(remote_path: &str) -> Task {
        Task::new(TaskKind::Mkdir, EngineKind::Sftp, "", remote_path, 0)
    }

    pub fn create_rename_task(old_path: &str, new_path: &str) -> Task {
        Task::new(TaskKind::Rename, EngineKind::Sftp, old_path, new_path, 0)
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Transition with legality enforcement: an illegal transition is a
/// programming error, loudly logged (and fatal under debug assertions).
fn set_status(task: &mut Task, target: TaskStatus) {
    if !task.status.can_transition(target) {
        tracing::error!(
            "illegal task state transition {} -> {} for {}",
            task.status,
            target,
            task.task_id
        );
        debug_assert!(false, "illegal task state transition {} -> {}", task.status, target);
    }
    task.status = target;
}

fn dispatcher_loop(inner: Arc<SchedulerInner>) {
    while inner.running.load(Ordering::SeqCst) {
        match inner.queue_rx.recv_timeout(DISPATCH_POLL) {
            Ok(task_id) => {
                let dispatch = {
                    let mut table = inner.table.lock().expect("scheduler lock poisoned");
                    table.queued.remove(&task_id);
                    table.tasks.get(&task_id).map(|t| t.status) == Some(TaskStatus::Pending)
                };
                if dispatch {
                    let _ = inner.exec_tx.send(task_id);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn worker_loop(inner: Arc<SchedulerInner>) {
    while inner.running.load(Ordering::SeqCst) {
        match inner.exec_rx.recv_timeout(DISPATCH_POLL) {
            Ok(task_id) => inner.execute_task(&task_id),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

impl SchedulerInner {
    fn execute_task(&self, task_id: &str) {
        let snapshot = {
            let mut table = self.table.lock().expect("scheduler lock poisoned");
            let Some(task) = table.tasks.get_mut(task_id) else {
                return;
            };
            if task.status != TaskStatus::Pending {
                return;
            }
            set_status(task, TaskStatus::Running);
            task.start_time = Some(Instant::now());
            task.clone()
        };
        log_task_event(&snapshot, Some((&self.site.host, self.site.port, &self.site.username)));
        self.events.emit(Event::TaskUpdated(snapshot.clone()));

        let result = match (snapshot.kind, snapshot.engine) {
            (TaskKind::Upload, EngineKind::Parallel) => self.exec_parallel_upload(&snapshot),
            (TaskKind::Upload, EngineKind::Sftp) => self.exec_sftp_upload(&snapshot),
            (TaskKind::Download, EngineKind::Parallel) => self.exec_parallel_download(&snapshot),
            (TaskKind::Download, EngineKind::Sftp) => self.exec_sftp_download(&snapshot),
            (TaskKind::FolderUpload, _) => self.exec_folder_upload(&snapshot),
            (TaskKind::FolderDownload, _) => self.exec_folder_download(&snapshot),
            (TaskKind::Delete, _) => self.exec_delete(&snapshot),
            (TaskKind::Mkdir, _) => self.exec_mkdir(&snapshot),
            (TaskKind::Rename, _) => self.exec_rename(&snapshot),
        };

        self.settle_task(task_id, result);
    }

    /// Final status bookkeeping under the lock, then metric + event fan-out.
    fn settle_task(&self, task_id: &str, result: Result<(), TaskAbort>) {
        let snapshot = {
            let mut table = self.table.lock().expect("scheduler lock poisoned");
            let Some(task) = table.tasks.get_mut(task_id) else {
                return;
            };
            match &result {
                Ok(()) => {
                    if task.status == TaskStatus::Running {
                        if task.skipped {
                            set_status(task, TaskStatus::Skipped);
                        } else {
                            set_status(task, TaskStatus::Done);
                        }
                        task.bytes_done = task.bytes_total;
                    }
                    task.end_time = Some(Instant::now());
                }
                Err(TaskAbort::Failed(e)) => {
                    set_status(task, TaskStatus::Failed);
                    task.error_code = Some(e.kind);
                    task.error_message = Some(e.message.clone());
                    task.end_time = Some(Instant::now());
                }
                Err(TaskAbort::Interrupted) => {
                    if task.paused {
                        set_status(task, TaskStatus::Paused);
                    } else {
                        set_status(task, TaskStatus::Canceled);
                        task.end_time = Some(Instant::now());
                    }
                    task.interrupted = false;
                }
            }
            task.clone()
        };

        if snapshot.kind.is_transfer() {
            match snapshot.status {
                TaskStatus::Done | TaskStatus::Skipped => self.record_metric(&snapshot, true),
                TaskStatus::Failed => self.record_metric(&snapshot, false),
                _ => {}
            }
        }

        log_task_event(&snapshot, Some((&self.site.host, self.site.port, &self.site.username)));
        if snapshot.status.is_terminal() {
            self.events.emit(Event::TaskFinished(snapshot));
        } else {
            self.events.emit(Event::TaskUpdated(snapshot));
        }
    }

    fn metric_preset_label(&self, task: &Task) -> String {
        match (task.engine, task.kind) {
            (EngineKind::Parallel, TaskKind::Upload) => {
                self.upload_preset.lock().expect("preset lock").as_str().to_string()
            }
            (EngineKind::Parallel, TaskKind::Download) => {
                self.download_preset.lock().expect("preset lock").as_str().to_string()
            }
            _ => "sftp".to_string(),
        }
    }

    fn record_metric(&self, task: &Task, success: bool) {
        let duration = match (task.start_time, task.end_time) {
            (Some(start), Some(end)) => end.duration_since(start).as_secs_f64(),
            _ => 0.0,
        };
        let record = TransferRecord {
            preset: self.metric_preset_label(task),
            bytes_transferred: task.bytes_done,
            duration_seconds: duration.max(f64::EPSILON),
            success,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        };
        self.metrics.lock().expect("metrics lock").record(record);
    }

    // --- progress / interrupt plumbing ---------------------------------

    /// Store engine-reported progress and derive the speed figure
    /// (cumulative average since start).
    fn update_progress(&self, task_id: &str, bytes_done: u64, bytes_total: u64) {
        let snapshot = {
            let mut table = self.table.lock().expect("scheduler lock poisoned");
            let Some(task) = table.tasks.get_mut(task_id) else {
                return;
            };
            task.bytes_done = bytes_done;
            task.bytes_total = bytes_total;
            if let Some(start) = task.start_time {
                let elapsed = start.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    task.speed = bytes_done as f64 / elapsed;
                }
            }
            task.clone()
        };
        self.events.emit(Event::TaskUpdated(snapshot));
    }

    fn interrupt_requested(&self, task_id: &str) -> bool {
        let table = self.table.lock().expect("scheduler lock poisoned");
        table.tasks.get(task_id).map(|t| t.interrupted || t.paused).unwrap_or(true)
    }

    fn mark_skipped(&self, task_id: &str, total: u64) {
        let mut table = self.table.lock().expect("scheduler lock poisoned");
        if let Some(task) = table.tasks.get_mut(task_id) {
            task.skipped = true;
            task.bytes_total = total;
            task.bytes_done = total;
        }
    }

    // --- per-kind execution ---------------------------------------------

    fn exec_sftp_upload(&self, task: &Task) -> Result<(), TaskAbort> {
        let local_path = PathBuf::from(&task.src);
        let size = std::fs::metadata(&local_path)
            .map_err(|e| translate_io(e, &format!("stat local file {}", local_path.display())))?
            .len();

        let mut engine = SftpEngine::new(self.site.clone());
        engine.connect()?;

        // smart pre-check against the remote side
        let existing = engine.stat(&task.dst).ok().filter(|e| !e.is_dir).map(|e| e.size);
        let offset = match plan_transfer(size, existing) {
            TransferPlan::Skip => {
                self.mark_skipped(&task.task_id, size);
                return Ok(());
            }
            TransferPlan::Resume(offset) => offset,
            TransferPlan::Overwrite => 0,
        };

        let task_id = task.task_id.clone();
        let progress = |done: u64, total: u64| self.update_progress(&task_id, done, total);
        let interrupt = || self.interrupt_requested(&task_id);
        engine.upload_file(&local_path, &task.dst, Some(&progress), Some(&interrupt), offset)
    }

    fn exec_sftp_download(&self, task: &Task) -> Result<(), TaskAbort> {
        let local_path = PathBuf::from(&task.dst);
        let mut engine = SftpEngine::new(self.site.clone());
        engine.connect()?;

        let size = engine.stat(&task.src)?.size;
        let existing = std::fs::metadata(&local_path).ok().filter(|m| m.is_file()).map(|m| m.len());
        let offset = match plan_transfer(size, existing) {
            TransferPlan::Skip => {
                self.mark_skipped(&task.task_id, size);
                return Ok(());
            }
            TransferPlan::Resume(offset) => offset,
            TransferPlan::Overwrite => 0,
        };

        let task_id = task.task_id.clone();
        let progress = |done: u64, total: u64| self.update_progress(&task_id, done, total);
        let interrupt = || self.interrupt_requested(&task_id);
        engine.download_file(&task.src, &local_path, Some(&progress), Some(&interrupt), offset)
    }

    fn exec_parallel_upload(&self, task: &Task) -> Result<(), TaskAbort> {
        let preset = *self.upload_preset.lock().expect("preset lock");
        let engine = ParallelSftpEngine::new(self.site.clone(), preset);
        let task_id = task.task_id.clone();
        let progress = |done: u64, total: u64| self.update_progress(&task_id, done, total);
        let interrupt = || self.interrupt_requested(&task_id);
        engine.upload_file(Path::new(&task.src), &task.dst, Some(&progress), Some(&interrupt))
    }

    fn exec_parallel_download(&self, task: &Task) -> Result<(), TaskAbort> {
        let preset = *self.download_preset.lock().expect("preset lock");
        let engine = ParallelSftpEngine::new(self.site.clone(), preset);
        let task_id = task.task_id.clone();
        let progress = |done: u64, total: u64| self.update_progress(&task_id, done, total);
        let interrupt = || self.interrupt_requested(&task_id);
        engine.download_file(&task.src, Path::new(&task.dst), Some(&progress), Some(&interrupt))
    }

    /// Walk the local tree, mirror directories remotely, then move files one
    /// by one with the same pre-check/resume logic as single uploads. Control
    /// flags are honored between files and between chunks.
    fn exec_folder_upload(&self, task: &Task) -> Result<(), TaskAbort> {
        let local_root = PathBuf::from(&task.src);
        let remote_root = task.dst.clone();

        let mut files: Vec<(PathBuf, String, u64)> = Vec::new();
        let mut dirs: Vec<String> = vec![remote_root.clone()];
        for entry in walkdir::WalkDir::new(&local_root).min_depth(1) {
            let entry =
                entry.map_err(|e| FerryError::unknown(format!("walk {}: {}", task.src, e)))?;
            let rel = entry
                .path()
                .strip_prefix(&local_root)
                .map_err(|e| FerryError::unknown(format!("relative path: {}", e)))?
                .to_string_lossy()
                .replace('\\', "/");
            let remote = join_remote_path(&[&remote_root, &rel]);
            if entry.file_type().is_dir() {
                dirs.push(remote);
            } else if entry.file_type().is_file() {
                let size = entry
                    .metadata()
                    .map_err(|e| FerryError::unknown(format!("stat {}: {}", rel, e)))?
                    .len();
                files.push((entry.path().to_path_buf(), remote, size));
            }
        }

        let total: u64 = files.iter().map(|(_, _, size)| size).sum();
        {
            let mut table = self.table.lock().expect("scheduler lock poisoned");
            if let Some(t) = table.tasks.get_mut(&task.task_id) {
                t.bytes_total = total;
                t.subtask_count = files.len() as u64;
            }
        }

        let mut engine = SftpEngine::new(self.site.clone());
        engine.connect()?;

        for dir in &dirs {
            // exists-errors are expected on re-runs and ignored
            let _ = engine.mkdir(dir);
        }

        let task_id = task.task_id.clone();
        let mut completed: u64 = 0;
        for (local_file, remote_file, size) in files {
            if self.interrupt_requested(&task_id) {
                return Err(TaskAbort::Interrupted);
            }
            self.set_current_file(&task_id, &remote_file);

            let existing = engine.stat(&remote_file).ok().filter(|e| !e.is_dir).map(|e| e.size);
            match plan_transfer(size, existing) {
                TransferPlan::Skip => {}
                TransferPlan::Resume(offset) => {
                    self.transfer_folder_file(
                        &engine, &task_id, &local_file, &remote_file, completed, total, offset, true,
                    )?;
                }
                TransferPlan::Overwrite => {
                    self.transfer_folder_file(
                        &engine, &task_id, &local_file, &remote_file, completed, total, 0, true,
                    )?;
                }
            }
            completed += size;
            self.bump_subtask(&task_id, completed, total);
        }
        Ok(())
    }

    /// Mirror of folder upload, driven by recursive `list_dir`.
    fn exec_folder_download(&self, task: &Task) -> Result<(), TaskAbort> {
        let remote_root = task.src.clone();
        let local_root = PathBuf::from(&task.dst);

        let mut engine = SftpEngine::new(self.site.clone());
        engine.connect()?;

        let mut files: Vec<(String, PathBuf, u64)> = Vec::new();
        let mut pending = vec![remote_root.clone()];
        std::fs::create_dir_all(&local_root)
            .map_err(|e| translate_io(e, &format!("create local directory {}", task.dst)))?;
        while let Some(dir) = pending.pop() {
            for entry in engine.list_dir(&dir)? {
                let rel = entry
                    .path
                    .strip_prefix(&crate::paths::normalize_remote_path(&remote_root))
                    .unwrap_or(&entry.name)
                    .trim_start_matches('/')
                    .to_string();
                let local = local_root.join(&rel);
                if entry.is_dir {
                    std::fs::create_dir_all(&local).map_err(|e| {
                        translate_io(e, &format!("create local directory {}", local.display()))
                    })?;
                    pending.push(entry.path.clone());
                } else {
                    files.push((entry.path.clone(), local, entry.size));
                }
            }
        }

        let total: u64 = files.iter().map(|(_, _, size)| size).sum();
        {
            let mut table = self.table.lock().expect("scheduler lock poisoned");
            if let Some(t) = table.tasks.get_mut(&task.task_id) {
                t.bytes_total = total;
                t.subtask_count = files.len() as u64;
            }
        }

        let task_id = task.task_id.clone();
        let mut completed: u64 = 0;
        for (remote_file, local_file, size) in files {
            if self.interrupt_requested(&task_id) {
                return Err(TaskAbort::Interrupted);
            }
            self.set_current_file(&task_id, &remote_file);

            let existing =
                std::fs::metadata(&local_file).ok().filter(|m| m.is_file()).map(|m| m.len());
            match plan_transfer(size, existing) {
                TransferPlan::Skip => {}
                TransferPlan::Resume(offset) => {
                    self.transfer_folder_file(
                        &engine, &task_id, &local_file, &remote_file, completed, total, offset, false,
                    )?;
                }
                TransferPlan::Overwrite => {
                    self.transfer_folder_file(
                        &engine, &task_id, &local_file, &remote_file, completed, total, 0, false,
                    )?;
                }
            }
            completed += size;
            self.bump_subtask(&task_id, completed, total);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn transfer_folder_file(
        &self,
        engine: &SftpEngine,
        task_id: &str,
        local_file: &Path,
        remote_file: &str,
        completed_base: u64,
        total: u64,
        offset: u64,
        upload: bool,
    ) -> Result<(), TaskAbort> {
        let progress = |done: u64, _file_total: u64| {
            self.update_progress(task_id, completed_base + done, total);
        };
        let interrupt = || self.interrupt_requested(task_id);
        if upload {
            engine.upload_file(local_file, remote_file, Some(&progress), Some(&interrupt), offset)
        } else {
            engine.download_file(remote_file, local_file, Some(&progress), Some(&interrupt), offset)
        }
    }

    fn set_current_file(&self, task_id: &str, name: &str) {
        let snapshot = {
            let mut table = self.table.lock().expect("scheduler lock poisoned");
            let Some(task) = table.tasks.get_mut(task_id) else {
                return;
            };
            task.current_file = name.to_string();
            task.clone()
        };
        self.events.emit(Event::TaskUpdated(snapshot));
    }

    fn bump_subtask(&self, task_id: &str, completed_bytes: u64, total: u64) {
        let snapshot = {
            let mut table = self.table.lock().expect("scheduler lock poisoned");
            let Some(task) = table.tasks.get_mut(task_id) else {
                return;
            };
            task.subtask_done += 1;
            task.bytes_done = completed_bytes;
            task.bytes_total = total;
            task.clone()
        };
        self.events.emit(Event::TaskUpdated(snapshot));
    }

    /// Delete tries the file form first, then the (empty) directory form.
    fn exec_delete(&self, task: &Task) -> Result<(), TaskAbort> {
        let mut engine = SftpEngine::new(self.site.clone());
        engine.connect()?;
        if engine.remove_file(&task.src).is_ok() {
            return Ok(());
        }
        engine.remove_dir(&task.src)?;
        Ok(())
    }

    fn exec_mkdir(&self, task: &Task) -> Result<(), TaskAbort> {
        let mut engine = SftpEngine::new(self.site.clone());
        engine.connect()?;
        engine.mkdir(&task.dst)?;
        Ok(())
    }

    fn exec_rename(&self, task: &Task) -> Result<(), TaskAbort> {
        let mut engine = SftpEngine::new(self.site.clone());
        engine.connect()?;
        engine.rename(&task.src, &task.dst)?;
        Ok(())
    }
}
