use std::fs::OpenOptions;

use tracing_appender::non_blocking;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::task::Task;

/// Keys that must never appear in emitted log lines. Event formatting only
/// ever writes whitelisted fields, so this list is enforced by construction
/// and pinned by tests rather than by scrubbing.
pub const SENSITIVE_KEYS: [&str; 6] =
    ["password", "passphrase", "key", "private_key", "secret", "token"];

/// 用户名脱敏：只保留前 3 个字符。
pub fn redact_user(user: &str) -> String {
    if user.chars().count() > 3 {
        let head: String = user.chars().take(3).collect();
        format!("{}***", head)
    } else {
        "***".to_string()
    }
}

/// Build one structured `key=value | key=value` line for a task event.
/// Optional remote context adds `remote=` and a redacted `user=` field.
pub fn format_task_event(task: &Task, remote: Option<(&str, u16, &str)>) -> String {
    let id8 = &task.task_id[..task.task_id.len().min(8)];
    let mut parts = vec![
        format!("task_id={}", id8),
        format!("engine={}", task.engine.as_str()),
        format!("kind={}", task.kind.as_str()),
        format!("status={}", task.status),
    ];

    if let Some((host, port, user)) = remote {
        parts.push(format!("remote={}:{}", host, port));
        parts.push(format!("user={}", redact_user(user)));
    }
    if !task.src.is_empty() {
        parts.push(format!("src={}", task.src));
    }
    if !task.dst.is_empty() {
        parts.push(format!("dst={}", task.dst));
    }
    if task.bytes_total > 0 {
        parts.push(format!("progress={:.1}%", task.progress_percent()));
    }
    if task.speed > 0.0 {
        parts.push(format!("speed={:.2}MB/s", task.speed / (1024.0 * 1024.0)));
    }
    if let Some(code) = task.error_code {
        parts.push(format!("error={}", code.as_str()));
    }
    if let Some(msg) = &task.error_message {
        parts.push(format!("msg={}", msg));
    }

    parts.join(" | ")
}

/// Emit the structured line at a level matching the outcome.
pub fn log_task_event(task: &Task, remote: Option<(&str, u16, &str)>) {
    let line = format_task_event(task, remote);
    if task.status == crate::task::TaskStatus::Failed || task.error_code.is_some() {
        tracing::error!("{}", line);
    } else if task.status.is_terminal() {
        tracing::info!("{}", line);
    } else {
        tracing::debug!("{}", line);
    }
}

/// 初始化 tracing：所有输出写入 `<config>/logs/debug.log`（不挂控制台
/// layer，避免污染进度条）。文件打不开时仅提示一次并放弃 tracing。
pub fn init_tracing(debug: bool) {
    let logs_dir = crate::config::logs_dir();
    let _ = std::fs::create_dir_all(&logs_dir);
    let log_path = logs_dir.join("debug.log");
    let level_str = if debug { "debug" } else { "warn" };

    match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => {
            let (non_blocking_writer, guard) = non_blocking(file);
            // Keep the background writer thread alive for the process lifetime.
            let _ = Box::leak(Box::new(guard));
            let file_layer = fmt::layer()
                .with_writer(non_blocking_writer)
                .with_ansi(false)
                .with_filter(EnvFilter::new(level_str));
            tracing_subscriber::registry().with(file_layer).init();
        }
        Err(e) => {
            eprintln!("warning: could not open debug log at {}: {}", log_path.display(), e);
        }
    }
}
