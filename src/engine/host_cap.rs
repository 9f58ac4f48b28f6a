use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};

/// Adaptive cap never degrades below this many workers.
pub const MIN_WORKERS: usize = 2;

/// Warm-up connect failures tolerated before the cap is halved.
pub const DEGRADE_AFTER_FAILURES: usize = 2;

// 进程级 per-host 上限表，key 为 `user@host:port`。只在进程内生效，
// 重启进程即复位；只降不升。
static HOST_CAPS: LazyLock<Mutex<HashMap<String, usize>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Clamp a requested worker count by the current cap for this endpoint.
pub fn effective_workers(endpoint: &str, requested: usize) -> usize {
    let caps = HOST_CAPS.lock().expect("host cap lock poisoned");
    match caps.get(endpoint) {
        Some(cap) => requested.min(*cap),
        None => requested,
    }
}

/// Halve the cap for an endpoint (floor `MIN_WORKERS`), based on the worker
/// count the failing transfer was targeting. Future transfers to the same
/// host start at the lowered cap. Returns the new cap.
pub fn degrade(endpoint: &str, target_workers: usize) -> usize {
    let mut caps = HOST_CAPS.lock().expect("host cap lock poisoned");
    let current = caps.get(endpoint).copied().unwrap_or(target_workers);
    let lowered = (current / 2).max(MIN_WORKERS);
    let new_cap = lowered.min(current);
    caps.insert(endpoint.to_string(), new_cap);
    tracing::warn!("degraded worker cap for {} to {}", endpoint, new_cap);
    new_cap
}
