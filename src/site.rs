use serde::{Deserialize, Serialize};

use crate::error::FerryError;

/// How a site authenticates. Key auth additionally requires `key_path` to be
/// present at connect time (enforced by `SiteConfig::validate_for_connect`).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    Password,
    Key,
}

impl AuthMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthMethod::Password => "password",
            AuthMethod::Key => "key",
        }
    }
}

fn default_port() -> u16 {
    22
}

fn default_remote_root() -> String {
    "/".to_string()
}

/// 站点配置。密码与私钥口令仅存在于运行时，serde 序列化时直接跳过，
/// 因此它们在结构上就不可能落盘。
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SiteConfig {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub auth_method: AuthMethod,
    /// Sandbox root: no remote operation may touch anything outside it.
    #[serde(default = "default_remote_root")]
    pub remote_root: String,

    // Runtime-only credentials, never persisted.
    #[serde(skip)]
    pub password: Option<String>,
    #[serde(skip)]
    pub key_passphrase: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub proxy_jump: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ssh_config_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_options: Vec<String>,
}

impl SiteConfig {
    pub fn new(name: impl Into<String>, host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: 22,
            username: username.into(),
            auth_method: AuthMethod::Password,
            remote_root: "/".to_string(),
            password: None,
            key_passphrase: None,
            key_path: None,
            proxy_jump: None,
            ssh_config_path: None,
            ssh_options: Vec::new(),
        }
    }

    /// `user@host:port` 形式的地址，用于自适应并发上限的键与日志。
    pub fn endpoint(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Structural validation, independent of credentials.
    pub fn validate(&self) -> Result<(), FerryError> {
        if self.name.trim().is_empty() {
            return Err(FerryError::validation("site name must not be empty"));
        }
        if self.host.trim().is_empty() {
            return Err(FerryError::validation("host must not be empty"));
        }
        if self.port == 0 {
            return Err(FerryError::validation(format!("invalid port: {}", self.port)));
        }
        Ok(())
    }

    /// Validation required before opening a connection: key auth without a
    /// key path cannot possibly succeed, fail early instead of at handshake.
    pub fn validate_for_connect(&self) -> Result<(), FerryError> {
        self.validate()?;
        if self.auth_method == AuthMethod::Key && self.key_path.is_none() {
            return Err(FerryError::validation(format!(
                "site '{}' uses key auth but no key_path was supplied",
                self.name
            )));
        }
        Ok(())
    }
}

/// One remote directory item as returned by list/stat operations. Ephemeral;
/// ordering of listings is unspecified and left to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    pub name: String,
    /// Absolute, normalized remote path.
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    /// Modification time, seconds since the epoch.
    pub mtime: u64,
    pub mode: Option<u32>,
}

impl RemoteEntry {
    /// POSIX file-type bits: directory iff `(mode & 0o170000) == 0o040000`.
    pub fn mode_is_dir(mode: u32) -> bool {
        (mode & 0o170000) == 0o040000
    }
}

impl std::fmt::Display for RemoteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_dir { "DIR" } else { "FILE" };
        write!(f, "{} {} ({} bytes)", kind, self.name, self.size)
    }
}
