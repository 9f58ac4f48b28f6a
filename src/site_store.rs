use std::path::{Path, PathBuf};

use crate::site::SiteConfig;

/// File-backed site list. Persists a JSON array of `SiteConfig` records;
/// runtime secrets are `#[serde(skip)]` on the model so they are structurally
/// absent from disk no matter what callers put into the structs.
pub struct SiteStore {
    path: PathBuf,
}

impl SiteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default platform location (`<config>/sshferry/sites.json`).
    pub fn default_location() -> Self {
        Self::new(crate::config::sites_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取失败（文件缺失、损坏）一律返回空列表，只记日志不向上抛：
    /// 站点列表丢失应当可用空库继续，而不是让应用起不来。
    pub fn load(&self) -> Vec<SiteConfig> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str::<Vec<SiteConfig>>(&raw) {
            Ok(mut sites) => {
                for site in &mut sites {
                    if site.remote_root.trim().is_empty() {
                        site.remote_root = "/".to_string();
                    }
                }
                tracing::info!("loaded {} sites from {}", sites.len(), self.path.display());
                sites
            }
            Err(e) => {
                tracing::warn!("failed to parse {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    pub fn save(&self, sites: &[SiteConfig]) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(sites)?;
        crate::config::write_atomic(&self.path, &json)?;
        tracing::info!("saved {} sites to {}", sites.len(), self.path.display());
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<SiteConfig> {
        self.load().into_iter().find(|s| s.name == name)
    }

    /// Insert or replace by name, then persist.
    pub fn upsert(&self, site: SiteConfig) -> anyhow::Result<()> {
        let mut sites = self.load();
        match sites.iter_mut().find(|s| s.name == site.name) {
            Some(slot) => *slot = site,
            None => sites.push(site),
        }
        self.save(&sites)
    }

    /// Remove by name; returns whether something was removed.
    pub fn remove(&self, name: &str) -> anyhow::Result<bool> {
        let mut sites = self.load();
        let before = sites.len();
        sites.retain(|s| s.name != name);
        let removed = sites.len() != before;
        if removed {
            self.save(&sites)?;
        }
        Ok(removed)
    }
}
