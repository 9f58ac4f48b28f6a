use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub const MAX_RECORDS: usize = 100;
pub const SAMPLE_WINDOW: usize = 10;
pub const FAILURE_THRESHOLD: f64 = 0.20;
pub const SUCCESS_THRESHOLD: f64 = 0.95;
pub const COOLDOWN_SECONDS: f64 = 300.0;

/// 预设阶梯固定为三档，推荐算法一次只移动一档。
pub const PRESET_ORDER: [&str; 3] = ["low", "medium", "high"];

/// One transfer outcome sample. `preset` is the parallel preset name, or
/// `"sftp"` for single-session transfers (those never match the ladder and
/// therefore never steer recommendations).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TransferRecord {
    pub preset: String,
    pub bytes_transferred: u64,
    pub duration_seconds: f64,
    pub success: bool,
    /// Unix timestamp, seconds.
    pub timestamp: f64,
}

impl TransferRecord {
    pub fn speed_mbps(&self) -> f64 {
        if self.duration_seconds <= 0.0 {
            return 0.0;
        }
        (self.bytes_transferred as f64 / (1024.0 * 1024.0)) / self.duration_seconds
    }
}

/// Aggregated statistics for a single preset.
#[derive(Debug, Clone, Default)]
pub struct PresetStats {
    pub preset: String,
    pub total_transfers: usize,
    pub successful_transfers: usize,
    pub total_bytes: u64,
    pub total_duration: f64,
}

impl PresetStats {
    /// Success rate as a percentage (0-100).
    pub fn success_rate(&self) -> f64 {
        if self.total_transfers == 0 {
            return 0.0;
        }
        (self.successful_transfers as f64 / self.total_transfers as f64) * 100.0
    }

    pub fn avg_speed_mbps(&self) -> f64 {
        if self.total_duration <= 0.0 {
            return 0.0;
        }
        (self.total_bytes as f64 / (1024.0 * 1024.0)) / self.total_duration
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct MetricsFile {
    #[serde(default)]
    records: Vec<TransferRecord>,
    #[serde(default = "default_preset")]
    current_preset: String,
    #[serde(default)]
    last_preset_change: f64,
}

fn default_preset() -> String {
    "low".to_string()
}

fn now_unix() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

/// Collects transfer outcomes and recommends a parallel preset. All access
/// goes through one instance (callers wrap it in a mutex); persistence is a
/// bounded full rewrite via rename-over, and a broken file on load simply
/// starts an empty history.
pub struct MetricsCollector {
    path: PathBuf,
    pub records: Vec<TransferRecord>,
    pub current_preset: String,
    pub last_preset_change: f64,
}

impl MetricsCollector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let mut collector = Self {
            path: path.into(),
            records: Vec::new(),
            current_preset: default_preset(),
            last_preset_change: 0.0,
        };
        collector.load();
        collector
    }

    pub fn default_location() -> Self {
        Self::new(crate::config::metrics_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, record: TransferRecord) {
        tracing::debug!(
            "recorded transfer: preset={} bytes={} success={}",
            record.preset,
            record.bytes_transferred,
            record.success
        );
        self.records.push(record);
        if self.records.len() > MAX_RECORDS {
            let excess = self.records.len() - MAX_RECORDS;
            self.records.drain(..excess);
        }
        self.save();
    }

    /// 推荐算法（按需调用；只有在换档时才改动并持久化状态）：
    /// 无记录 → low；冷却期内 → 当前档；取最近窗口内与当前档相同的样本，
    /// 不足 3 条 → 当前档；失败率越界降一档，成功率达标升一档。
    pub fn recommended_preset(&mut self) -> String {
        self.recommended_preset_at(now_unix())
    }

    /// Decision with an explicit clock, so the cooldown is testable.
    pub fn recommended_preset_at(&mut self, now: f64) -> String {
        if self.records.is_empty() {
            return "low".to_string();
        }

        if now - self.last_preset_change < COOLDOWN_SECONDS {
            return self.current_preset.clone();
        }

        let window_start = self.records.len().saturating_sub(SAMPLE_WINDOW);
        let recent: Vec<&TransferRecord> = self.records[window_start..]
            .iter()
            .filter(|r| r.preset == self.current_preset)
            .collect();

        if recent.len() < 3 {
            return self.current_preset.clone();
        }

        let success_count = recent.iter().filter(|r| r.success).count();
        let success_rate = success_count as f64 / recent.len() as f64;

        let Some(current_idx) = PRESET_ORDER.iter().position(|p| *p == self.current_preset) else {
            return self.current_preset.clone();
        };

        if success_rate < 1.0 - FAILURE_THRESHOLD && current_idx > 0 {
            let new_preset = PRESET_ORDER[current_idx - 1].to_string();
            tracing::info!(
                "adaptive: downgrading preset to {} (success rate {:.0}%)",
                new_preset,
                success_rate * 100.0
            );
            self.current_preset = new_preset.clone();
            self.last_preset_change = now;
            self.save();
            return new_preset;
        }

        if success_rate >= SUCCESS_THRESHOLD && current_idx < PRESET_ORDER.len() - 1 {
            let new_preset = PRESET_ORDER[current_idx + 1].to_string();
            tracing::info!(
                "adaptive: upgrading preset to {} (success rate {:.0}%)",
                new_preset,
                success_rate * 100.0
            );
            self.current_preset = new_preset.clone();
            self.last_preset_change = now;
            self.save();
            return new_preset;
        }

        self.current_preset.clone()
    }

    /// Per-preset aggregation over the retained history.
    pub fn stats(&self) -> Vec<PresetStats> {
        PRESET_ORDER
            .iter()
            .map(|preset| {
                let mut stats = PresetStats { preset: (*preset).to_string(), ..Default::default() };
                for r in self.records.iter().filter(|r| r.preset == *preset) {
                    stats.total_transfers += 1;
                    if r.success {
                        stats.successful_transfers += 1;
                    }
                    stats.total_bytes += r.bytes_transferred;
                    stats.total_duration += r.duration_seconds;
                }
                stats
            })
            .collect()
    }

    fn load(&mut self) {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(_) => return,
        };
        match serde_json::from_str::<MetricsFile>(&raw) {
            Ok(file) => {
                self.records = file.records;
                self.current_preset = file.current_preset;
                self.last_preset_change = file.last_preset_change;
                tracing::info!(
                    "loaded {} metric records from {}",
                    self.records.len(),
                    self.path.display()
                );
            }
            Err(e) => {
                // start over with an empty history rather than propagating
                tracing::warn!("failed to load metrics from {}: {}", self.path.display(), e);
                self.records.clear();
            }
        }
    }

    fn save(&self) {
        let file = MetricsFile {
            records: self.records.clone(),
            current_preset: self.current_preset.clone(),
            last_preset_change: self.last_preset_change,
        };
        match serde_json::to_string_pretty(&file) {
            Ok(json) => {
                if let Err(e) = crate::config::write_atomic(&self.path, &json) {
                    tracing::error!("failed to save metrics: {}", e);
                }
            }
            Err(e) => tracing::error!("failed to serialize metrics: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_collector(tag: &str) -> MetricsCollector {
        let dir = std::env::temp_dir().join(format!("sshferry-metrics-{}-{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        MetricsCollector::new(dir.join("metrics.json"))
    }

    fn rec(preset: &str, bytes: u64, success: bool) -> TransferRecord {
        TransferRecord {
            preset: preset.to_string(),
            bytes_transferred: bytes,
            duration_seconds: 1.0,
            success,
            timestamp: now_unix(),
        }
    }

    #[test]
    fn stats_aggregate_per_preset() {
        let mut c = temp_collector("stats");
        c.record(rec("low", 1024 * 1024, true));
        c.record(rec("low", 2 * 1024 * 1024, true));
        let stats = c.stats();
        let low = stats.iter().find(|s| s.preset == "low").unwrap();
        assert_eq!(low.total_transfers, 2);
        assert_eq!(low.successful_transfers, 2);
        assert_eq!(low.total_bytes, 3 * 1024 * 1024);
        assert_eq!(low.avg_speed_mbps(), 1.5);
        assert_eq!(low.success_rate(), 100.0);
    }

    #[test]
    fn empty_history_recommends_low() {
        let mut c = temp_collector("empty");
        assert_eq!(c.recommended_preset(), "low");
    }

    #[test]
    fn downgrade_on_failures() {
        let mut c = temp_collector("down");
        c.current_preset = "medium".into();
        for _ in 0..5 {
            c.record(rec("medium", 0, false));
        }
        assert_eq!(c.recommended_preset(), "low");
        assert_eq!(c.current_preset, "low");
        assert!(c.last_preset_change > 0.0);
    }

    #[test]
    fn upgrade_on_success() {
        let mut c = temp_collector("up");
        for _ in 0..5 {
            c.record(rec("low", 1024 * 1024, true));
        }
        assert_eq!(c.recommended_preset(), "medium");
        assert_eq!(c.current_preset, "medium");
    }

    #[test]
    fn cooldown_blocks_change_and_mutation() {
        let mut c = temp_collector("cooldown");
        c.current_preset = "medium".into();
        for _ in 0..5 {
            c.record(rec("medium", 0, false));
        }
        let now = now_unix();
        c.last_preset_change = now;
        assert_eq!(c.recommended_preset_at(now + 10.0), "medium");
        assert_eq!(c.current_preset, "medium");
        assert_eq!(c.last_preset_change, now);
    }

    #[test]
    fn too_few_matching_samples_holds() {
        let mut c = temp_collector("few");
        c.current_preset = "medium".into();
        c.record(rec("medium", 0, false));
        c.record(rec("medium", 0, false));
        // plenty of other-preset noise in the window
        for _ in 0..6 {
            c.record(rec("sftp", 1, true));
        }
        assert_eq!(c.recommended_preset(), "medium");
    }

    #[test]
    fn high_cannot_upgrade_low_cannot_downgrade() {
        let mut c = temp_collector("edges");
        c.current_preset = "high".into();
        for _ in 0..5 {
            c.record(rec("high", 1, true));
        }
        assert_eq!(c.recommended_preset(), "high");

        let mut c2 = temp_collector("edges2");
        for _ in 0..5 {
            c2.record(rec("low", 0, false));
        }
        assert_eq!(c2.recommended_preset(), "low");
    }

    #[test]
    fn eviction_caps_history() {
        let mut c = temp_collector("evict");
        for i in 0..(MAX_RECORDS + 20) {
            c.record(rec("low", i as u64, true));
        }
        assert_eq!(c.records.len(), MAX_RECORDS);
        // oldest evicted first
        assert_eq!(c.records[0].bytes_transferred, 20);
    }

    #[test]
    fn persistence_round_trip() {
        let mut c = temp_collector("persist");
        c.current_preset = "medium".into();
        c.record(rec("medium", 42, true));
        let path = c.path().to_path_buf();
        let reloaded = MetricsCollector::new(path);
        assert_eq!(reloaded.records.len(), 1);
        assert_eq!(reloaded.current_preset, "medium");
        assert_eq!(reloaded.records[0].bytes_transferred, 42);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let c0 = temp_collector("corrupt");
        crate::config::write_atomic(c0.path(), "][").unwrap();
        let c = MetricsCollector::new(c0.path().to_path_buf());
        assert!(c.records.is_empty());
        assert_eq!(c.current_preset, "low");
    }

    #[test]
    fn speed_mbps_guards_zero_duration() {
        let r = TransferRecord {
            preset: "low".into(),
            bytes_transferred: 100,
            duration_seconds: 0.0,
            success: true,
            timestamp: 0.0,
        };
        assert_eq!(r.speed_mbps(), 0.0);
    }
}
