use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, unbounded};
use ssh2::{OpenFlags, OpenType};

use crate::engine::{InterruptFn, ProgressFn, host_cap};
use crate::error::{ErrorKind, FerryError, TaskAbort, translate_io, translate_ssh2};
use crate::paths::{ensure_in_sandbox, normalize_remote_path};
use crate::site::SiteConfig;

/// Files at or above this size are worth multi-connection acceleration.
pub const PARALLEL_THRESHOLD: u64 = 50 * 1024 * 1024;

/// How long a worker waits on the chunk queue before re-checking abort state.
const QUEUE_POLL: Duration = Duration::from_millis(500);

/// Named (workers, chunk size) tuples. The ladder is fixed at three rungs;
/// the metrics collector moves along it one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preset {
    #[default]
    Low,
    Medium,
    High,
}

impl Preset {
    pub fn workers(self) -> usize {
        match self {
            Preset::Low => 4,
            Preset::Medium => 10,
            Preset::High => 16,
        }
    }

    pub fn chunk_size(self) -> u64 {
        match self {
            Preset::Low => 2 * 1024 * 1024,
            Preset::Medium => 4 * 1024 * 1024,
            Preset::High => 8 * 1024 * 1024,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Preset::Low => "low",
            Preset::Medium => "medium",
            Preset::High => "high",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "low" => Some(Preset::Low),
            "medium" => Some(Preset::Medium),
            "high" => Some(Preset::High),
            _ => None,
        }
    }
}

/// Effective knob set for one engine instance: a preset expanded to concrete
/// values, then overridden by `SSHFERRY_PARALLEL_*` environment variables
/// (clamped to sane minimums).
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    pub workers: usize,
    pub chunk_size: u64,
    pub warmup_batch: usize,
    pub warmup_delay: Duration,
    pub max_chunk_retries: u32,
    pub connect_retries: u32,
    pub connect_backoff: Duration,
}

impl ParallelConfig {
    pub fn from_preset(preset: Preset) -> Self {
        Self {
            workers: preset.workers(),
            chunk_size: preset.chunk_size(),
            warmup_batch: 4,
            warmup_delay: Duration::from_millis(300),
            max_chunk_retries: 4,
            connect_retries: 3,
            connect_backoff: Duration::from_secs(1),
        }
    }

    /// Apply overrides through a lookup function (tests inject a map; the
    /// engine passes `std::env::var`). Unparseable values are ignored,
    /// out-of-range values clamp to the documented minimums.
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("SSHFERRY_PARALLEL_WORKERS").and_then(|s| s.parse::<usize>().ok()) {
            self.workers = v.max(1);
        }
        if let Some(v) = lookup("SSHFERRY_PARALLEL_CHUNK_BYTES").and_then(|s| s.parse::<u64>().ok()) {
            self.chunk_size = v.max(65536);
        }
        if let Some(v) = lookup("SSHFERRY_PARALLEL_WARMUP_BATCH").and_then(|s| s.parse::<usize>().ok()) {
            self.warmup_batch = v.max(1);
        }
        if let Some(v) = lookup("SSHFERRY_PARALLEL_WARMUP_DELAY").and_then(|s| s.parse::<f64>().ok())
            && v >= 0.0
        {
            self.warmup_delay = Duration::from_secs_f64(v);
        }
        if let Some(v) =
            lookup("SSHFERRY_PARALLEL_MAX_CHUNK_RETRIES").and_then(|s| s.parse::<u32>().ok())
        {
            self.max_chunk_retries = v;
        }
        self
    }

    pub fn from_env(preset: Preset) -> Self {
        Self::from_preset(preset).apply_overrides(|name| std::env::var(name).ok())
    }
}

/// Fixed-size chunk plan covering `[0, size)`; the final chunk may be short.
pub fn plan_chunks(size: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    let mut chunks = Vec::new();
    let mut offset = 0u64;
    while offset < size {
        let length = chunk_size.min(size - offset);
        chunks.push((offset, length));
        offset += length;
    }
    chunks
}

#[derive(Clone, Copy)]
enum Direction {
    Upload,
    Download,
}

// 各 worker 共享的传输状态；进度计数在一把锁下单调推进。
struct SharedState<'a> {
    total: u64,
    chunk_size: u64,
    num_chunks: u64,
    progress: Mutex<ProgressCounters>,
    retries: Mutex<HashMap<u64, u32>>,
    abort: AtomicBool,
    interrupted: AtomicBool,
    last_error: Mutex<Option<String>>,
    connect_failures: AtomicUsize,
    completed: AtomicU64,
    on_progress: Option<ProgressFn<'a>>,
    check_interrupt: Option<InterruptFn<'a>>,
}

struct ProgressCounters {
    bytes_transferred: u64,
    completed_chunks: u64,
    last_reported: u64,
}

impl SharedState<'_> {
    fn record_chunk_done(&self, length: u64) {
        let mut counters = self.progress.lock().expect("progress lock poisoned");
        counters.bytes_transferred += length;
        counters.completed_chunks += 1;
        self.completed.store(counters.completed_chunks, Ordering::SeqCst);
        // report on completion, or after at least one chunk of new progress
        let should_report = counters.bytes_transferred == self.total
            || counters.bytes_transferred - counters.last_reported >= self.chunk_size;
        if should_report {
            counters.last_reported = counters.bytes_transferred;
            if let Some(report) = self.on_progress {
                report(counters.bytes_transferred, self.total);
            }
        }
    }

    fn interrupted_by_caller(&self) -> bool {
        if let Some(check) = self.check_interrupt
            && check()
        {
            self.interrupted.store(true, Ordering::SeqCst);
            self.abort.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    fn fail(&self, message: String) {
        let mut slot = self.last_error.lock().expect("error lock poisoned");
        *slot = Some(message);
        self.abort.store(true, Ordering::SeqCst);
    }
}

/// Chunk-parallel transfer engine. Splits a large file into fixed-size
/// chunks and moves them concurrently over N independent SSH sessions; each
/// worker owns its session outright. Small files fall through to the
/// single-session engine.
pub struct ParallelSftpEngine {
    site: SiteConfig,
    preset: Preset,
    config: ParallelConfig,
}

impl ParallelSftpEngine {
    pub fn new(site: SiteConfig, preset: Preset) -> Self {
        let config = ParallelConfig::from_env(preset);
        Self { site, preset, config }
    }

    pub fn with_config(site: SiteConfig, preset: Preset, config: ParallelConfig) -> Self {
        Self { site, preset, config }
    }

    pub fn preset(&self) -> Preset {
        self.preset
    }

    pub fn config(&self) -> &ParallelConfig {
        &self.config
    }

    pub fn upload_file(
        &self,
        local_path: &Path,
        remote_path: &str,
        progress: Option<ProgressFn>,
        interrupt: Option<InterruptFn>,
    ) -> Result<(), TaskAbort> {
        ensure_in_sandbox(remote_path, &self.site.remote_root)?;
        let remote = normalize_remote_path(remote_path);
        let size = std::fs::metadata(local_path)
            .map_err(|e| translate_io(e, &format!("stat local file {}", local_path.display())))?
            .len();

        if size < self.config.chunk_size {
            return self.delegate_single(Direction::Upload, local_path, &remote, progress, interrupt);
        }

        // Pre-allocate the remote file to its final size over one initial
        // session, so chunk writers only ever seek within existing extents.
        {
            let init = super::session::connect_session(&self.site)?;
            let sftp = init
                .sftp()
                .map_err(|e| translate_ssh2(e, &format!("open sftp subsystem on {}", self.site.addr())))?;
            let mut file = sftp
                .open_mode(
                    Path::new(&remote),
                    OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                    0o644,
                    OpenType::File,
                )
                .map_err(|e| translate_ssh2(e, &format!("create remote file {}", remote)))?;
            let stat = ssh2::FileStat {
                size: Some(size),
                uid: None,
                gid: None,
                perm: None,
                atime: None,
                mtime: None,
            };
            // best effort: some servers refuse fsetstat on open handles
            let _ = file.setstat(stat);
        }

        self.run_chunked(Direction::Upload, local_path, &remote, size, progress, interrupt)
    }

    pub fn download_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        progress: Option<ProgressFn>,
        interrupt: Option<InterruptFn>,
    ) -> Result<(), TaskAbort> {
        ensure_in_sandbox(remote_path, &self.site.remote_root)?;
        let remote = normalize_remote_path(remote_path);

        let size = {
            let init = super::session::connect_session(&self.site)?;
            let sftp = init
                .sftp()
                .map_err(|e| translate_ssh2(e, &format!("open sftp subsystem on {}", self.site.addr())))?;
            sftp.stat(Path::new(&remote))
                .map_err(|e| translate_ssh2(e, &format!("stat {}", remote)))?
                .size
                .unwrap_or(0)
        };

        if size < self.config.chunk_size {
            return self.delegate_single(Direction::Download, local_path, &remote, progress, interrupt);
        }

        if let Some(parent) = local_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| translate_io(e, &format!("create local directory {}", parent.display())))?;
        }
        let local = std::fs::File::create(local_path)
            .map_err(|e| translate_io(e, &format!("create local file {}", local_path.display())))?;
        local
            .set_len(size)
            .map_err(|e| translate_io(e, &format!("pre-allocate {}", local_path.display())))?;
        drop(local);

        self.run_chunked(Direction::Download, local_path, &remote, size, progress, interrupt)
    }

    fn delegate_single(
        &self,
        direction: Direction,
        local_path: &Path,
        remote: &str,
        progress: Option<ProgressFn>,
        interrupt: Option<InterruptFn>,
    ) -> Result<(), TaskAbort> {
        let mut engine = super::sftp::SftpEngine::new(self.site.clone());
        engine.connect()?;
        let result = match direction {
            Direction::Upload => engine.upload_file(local_path, remote, progress, interrupt, 0),
            Direction::Download => engine.download_file(remote, local_path, progress, interrupt, 0),
        };
        engine.disconnect();
        result
    }

    fn run_chunked(
        &self,
        direction: Direction,
        local_path: &Path,
        remote: &str,
        size: u64,
        progress: Option<ProgressFn>,
        interrupt: Option<InterruptFn>,
    ) -> Result<(), TaskAbort> {
        let chunks = plan_chunks(size, self.config.chunk_size);
        let num_chunks = chunks.len() as u64;
        let endpoint = self.site.endpoint();

        let target_workers =
            host_cap::effective_workers(&endpoint, self.config.workers).min(chunks.len()).max(1);
        tracing::info!(
            "parallel {} {}: size={} chunks={} workers={} chunk_size={}",
            match direction {
                Direction::Upload => "upload",
                Direction::Download => "download",
            },
            remote,
            size,
            num_chunks,
            target_workers,
            self.config.chunk_size
        );

        let (tx, rx) = unbounded::<(u64, u64)>();
        for chunk in chunks {
            let _ = tx.send(chunk);
        }

        let shared = SharedState {
            total: size,
            chunk_size: self.config.chunk_size,
            num_chunks,
            progress: Mutex::new(ProgressCounters {
                bytes_transferred: 0,
                completed_chunks: 0,
                last_reported: 0,
            }),
            retries: Mutex::new(HashMap::new()),
            abort: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            last_error: Mutex::new(None),
            connect_failures: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            on_progress: progress,
            check_interrupt: interrupt,
        };

        let ctx = WorkerCtx {
            direction,
            site: &self.site,
            config: &self.config,
            shared: &shared,
            target_workers,
            endpoint: endpoint.as_str(),
            local_path,
            remote,
        };
        std::thread::scope(|scope| {
            // 预热分批启动，避免瞬时 SSH 握手风暴触发服务端限流
            let mut launched = 0usize;
            while launched < target_workers && !shared.abort.load(Ordering::SeqCst) {
                let batch = self.config.warmup_batch.min(target_workers - launched);
                for _ in 0..batch {
                    let rx = rx.clone();
                    let tx = tx.clone();
                    scope.spawn(move || chunk_worker(ctx, rx, tx));
                }
                launched += batch;
                if launched < target_workers {
                    std::thread::sleep(self.config.warmup_delay);
                }
            }
            drop(tx);
        });

        self.finalize(&shared)
    }

    fn finalize(&self, shared: &SharedState<'_>) -> Result<(), TaskAbort> {
        let saved_error = shared.last_error.lock().expect("error lock poisoned").take();
        if let Some(message) = saved_error {
            return Err(FerryError::new(ErrorKind::TransferFailed, message).into());
        }
        if shared.interrupted.load(Ordering::SeqCst) {
            return Err(TaskAbort::Interrupted);
        }
        let counters = shared.progress.lock().expect("progress lock poisoned");
        if counters.bytes_transferred < shared.total || counters.completed_chunks < shared.num_chunks
        {
            return Err(FerryError::new(
                ErrorKind::TransferFailed,
                format!(
                    "parallel transfer incomplete: {}/{} bytes, {}/{} chunks",
                    counters.bytes_transferred, shared.total, counters.completed_chunks, shared.num_chunks
                ),
            )
            .into());
        }
        Ok(())
    }
}

/// Borrowed context shared by every chunk worker of one transfer.
#[derive(Clone, Copy)]
struct WorkerCtx<'scope, 'cb> {
    direction: Direction,
    site: &'scope SiteConfig,
    config: &'scope ParallelConfig,
    shared: &'scope SharedState<'cb>,
    target_workers: usize,
    endpoint: &'scope str,
    local_path: &'scope Path,
    remote: &'scope str,
}

/// Worker session plus the two file handles it keeps open across chunks.
struct WorkerIo {
    _session: ssh2::Session,
    remote_file: ssh2::File,
    local_file: std::fs::File,
}

fn open_worker_io(
    direction: Direction,
    site: &SiteConfig,
    local_path: &Path,
    remote: &str,
) -> Result<WorkerIo, FerryError> {
    let session = super::session::connect_session(site)?;
    let sftp = session
        .sftp()
        .map_err(|e| translate_ssh2(e, &format!("open sftp subsystem on {}", site.addr())))?;
    let (remote_file, local_file) = match direction {
        Direction::Upload => {
            let remote_file = sftp
                .open_mode(Path::new(remote), OpenFlags::WRITE, 0o644, OpenType::File)
                .map_err(|e| translate_ssh2(e, &format!("open remote file {}", remote)))?;
            let local_file = std::fs::File::open(local_path)
                .map_err(|e| translate_io(e, &format!("open local file {}", local_path.display())))?;
            (remote_file, local_file)
        }
        Direction::Download => {
            let remote_file = sftp
                .open(Path::new(remote))
                .map_err(|e| translate_ssh2(e, &format!("open remote file {}", remote)))?;
            let local_file = std::fs::OpenOptions::new()
                .write(true)
                .truncate(false)
                .open(local_path)
                .map_err(|e| translate_io(e, &format!("open local file {}", local_path.display())))?;
            (remote_file, local_file)
        }
    };
    Ok(WorkerIo { _session: session, remote_file, local_file })
}

/// Connect with exponential backoff. On final failure bumps the shared
/// counter and, if the warm-up failure threshold is hit while the transfer
/// targets more than the floor, degrades the host cap for future transfers.
fn connect_with_retries(ctx: WorkerCtx<'_, '_>) -> Option<WorkerIo> {
    let mut backoff = ctx.config.connect_backoff;
    let attempts = ctx.config.connect_retries.max(1);
    for attempt in 0..attempts {
        if ctx.shared.abort.load(Ordering::SeqCst) {
            return None;
        }
        match open_worker_io(ctx.direction, ctx.site, ctx.local_path, ctx.remote) {
            Ok(io) => return Some(io),
            Err(e) => {
                tracing::debug!("worker connect attempt {} failed: {}", attempt + 1, e);
                if attempt + 1 < attempts {
                    std::thread::sleep(backoff);
                    backoff *= 2;
                }
            }
        }
    }
    let failures = ctx.shared.connect_failures.fetch_add(1, Ordering::SeqCst) + 1;
    if failures >= host_cap::DEGRADE_AFTER_FAILURES && ctx.target_workers > host_cap::MIN_WORKERS {
        host_cap::degrade(ctx.endpoint, ctx.target_workers);
    }
    None
}

fn chunk_worker(
    ctx: WorkerCtx<'_, '_>,
    rx: crossbeam_channel::Receiver<(u64, u64)>,
    tx: Sender<(u64, u64)>,
) {
    let Some(mut io) = connect_with_retries(ctx) else {
        return;
    };
    let shared = ctx.shared;

    let mut buf = vec![0u8; ctx.config.chunk_size as usize];
    loop {
        if shared.abort.load(Ordering::SeqCst) {
            return;
        }
        if shared.interrupted_by_caller() {
            return;
        }
        let (offset, length) = match rx.recv_timeout(QUEUE_POLL) {
            Ok(chunk) => chunk,
            Err(RecvTimeoutError::Timeout) => {
                if shared.completed.load(Ordering::SeqCst) >= shared.num_chunks {
                    return;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => return,
        };

        match transfer_chunk(ctx.direction, &mut io, &mut buf, offset, length) {
            Ok(()) => shared.record_chunk_done(length),
            Err(e) => {
                let mut retries = shared.retries.lock().expect("retry lock poisoned");
                let count = retries.entry(offset).or_insert(0);
                if *count < ctx.config.max_chunk_retries {
                    *count += 1;
                    tracing::debug!(
                        "chunk at offset {} failed (attempt {}): {}; re-queueing",
                        offset,
                        count,
                        e
                    );
                    drop(retries);
                    let _ = tx.send((offset, length));
                } else {
                    drop(retries);
                    shared.fail(e.to_string());
                    return;
                }
            }
        }
    }
}

fn transfer_chunk(
    direction: Direction,
    io: &mut WorkerIo,
    buf: &mut [u8],
    offset: u64,
    length: u64,
) -> Result<(), FerryError> {
    let slice = &mut buf[..length as usize];
    match direction {
        Direction::Upload => {
            io.local_file
                .seek(SeekFrom::Start(offset))
                .map_err(|e| translate_io(e, "seek local file"))?;
            io.local_file
                .read_exact(slice)
                .map_err(|e| translate_io(e, "read local chunk"))?;
            io.remote_file
                .seek(SeekFrom::Start(offset))
                .map_err(|e| translate_io(e, "seek remote file"))?;
            io.remote_file
                .write_all(slice)
                .map_err(|e| translate_io(e, "write remote chunk"))?;
        }
        Direction::Download => {
            io.remote_file
                .seek(SeekFrom::Start(offset))
                .map_err(|e| translate_io(e, "seek remote file"))?;
            io.remote_file
                .read_exact(slice)
                .map_err(|e| translate_io(e, "read remote chunk"))?;
            io.local_file
                .seek(SeekFrom::Start(offset))
                .map_err(|e| translate_io(e, "seek local file"))?;
            io.local_file
                .write_all(slice)
                .map_err(|e| translate_io(e, "write local chunk"))?;
        }
    }
    Ok(())
}
