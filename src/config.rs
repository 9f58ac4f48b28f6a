use std::path::PathBuf;

/// 配置目录：平台用户配置目录下的 `sshferry` 子目录；没有可用的平台目录时
/// 退回 `~/.sshferry`，再退回当前目录（极端情况）。
pub fn app_config_dir() -> PathBuf {
    if let Some(base) = dirs::config_local_dir() {
        return base.join("sshferry");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".sshferry");
    }
    PathBuf::from(".sshferry")
}

pub fn sites_path() -> PathBuf {
    app_config_dir().join("sites.json")
}

pub fn metrics_path() -> PathBuf {
    app_config_dir().join("metrics.json")
}

pub fn logs_dir() -> PathBuf {
    app_config_dir().join("logs")
}

/// Atomic full-file rewrite: write to a sibling temp file, then rename over
/// the target. Small state files (sites, metrics) always go through here so a
/// crash mid-write can never leave a truncated file behind.
pub fn write_atomic(path: &std::path::Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}
