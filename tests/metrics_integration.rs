use std::time::{SystemTime, UNIX_EPOCH};

use sshferry::metrics::{COOLDOWN_SECONDS, MetricsCollector, TransferRecord};

fn now() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs_f64()
}

fn collector(tag: &str) -> MetricsCollector {
    let dir =
        std::env::temp_dir().join(format!("sshferry-it-metrics-{}-{}", tag, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    MetricsCollector::new(dir.join("metrics.json"))
}

fn failure(preset: &str) -> TransferRecord {
    TransferRecord {
        preset: preset.into(),
        bytes_transferred: 0,
        duration_seconds: 1.0,
        success: false,
        timestamp: now(),
    }
}

#[test]
fn adaptive_downgrade_scenario() {
    // preset medium, five failures recorded past cooldown: recommend low
    let mut c = collector("downgrade");
    c.current_preset = "medium".into();
    c.last_preset_change = now() - COOLDOWN_SECONDS - 10.0;
    for _ in 0..5 {
        c.record(failure("medium"));
    }
    assert_eq!(c.recommended_preset(), "low");
    assert_eq!(c.current_preset, "low");
    assert!(c.last_preset_change >= now() - 5.0);
}

#[test]
fn cooldown_never_mutates_state() {
    let mut c = collector("cooldown");
    c.current_preset = "medium".into();
    for _ in 0..5 {
        c.record(failure("medium"));
    }
    let change_stamp = now();
    c.last_preset_change = change_stamp;
    let before_records = c.records.len();
    assert_eq!(c.recommended_preset(), "medium");
    assert_eq!(c.current_preset, "medium");
    assert_eq!(c.last_preset_change, change_stamp);
    assert_eq!(c.records.len(), before_records);
}

#[test]
fn persisted_file_shape_matches_contract() {
    let mut c = collector("shape");
    c.record(TransferRecord {
        preset: "high".into(),
        bytes_transferred: 1024,
        duration_seconds: 0.5,
        success: true,
        timestamp: now(),
    });
    let raw = std::fs::read_to_string(c.path()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let obj = value.as_object().unwrap();
    assert!(obj.contains_key("records"));
    assert!(obj.contains_key("current_preset"));
    assert!(obj.contains_key("last_preset_change"));
    let record = &obj["records"].as_array().unwrap()[0];
    for key in ["preset", "bytes_transferred", "duration_seconds", "success", "timestamp"] {
        assert!(record.get(key).is_some(), "missing key {key}");
    }
}

#[test]
fn history_reload_survives_process_restart() {
    let mut c = collector("reload");
    c.current_preset = "high".into();
    for i in 0..7 {
        c.record(TransferRecord {
            preset: "high".into(),
            bytes_transferred: i,
            duration_seconds: 1.0,
            success: true,
            timestamp: now(),
        });
    }
    let path = c.path().to_path_buf();
    drop(c);
    let reloaded = MetricsCollector::new(path);
    assert_eq!(reloaded.records.len(), 7);
    assert_eq!(reloaded.current_preset, "high");
}
