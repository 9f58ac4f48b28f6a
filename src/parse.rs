use regex::Regex;

use crate::error::FerryError;

/// Result of importing a pasted SSH command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshCommandParts {
    pub username: Option<String>,
    pub host: String,
    pub port: u16,
}

/// 解析粘贴的 SSH 命令：`ssh [-p <port>] [<user>@]<host>`，其余选项忽略。
/// Port defaults to 22, username stays optional so the caller can fall back
/// to the site's configured user.
pub fn parse_ssh_command(command: &str) -> Result<SshCommandParts, FerryError> {
    let re = Regex::new(r"ssh\s+(?:-p\s+(\d+)\s+)?(?:(\w+)@)?([^\s]+)")
        .expect("ssh import pattern is valid");
    let caps = re
        .captures(command.trim())
        .ok_or_else(|| FerryError::validation(format!("not an ssh command: '{}'", command)))?;

    let port = match caps.get(1) {
        Some(m) => m
            .as_str()
            .parse::<u16>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| FerryError::validation(format!("invalid port: {}", m.as_str())))?,
        None => 22,
    };
    let username = caps.get(2).map(|m| m.as_str().to_string());
    let host = caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default();
    if host.is_empty() {
        return Err(FerryError::validation("missing host in ssh command"));
    }

    Ok(SshCommandParts { username, host, port })
}

/// `user@host[:port]` 形式解析，用于 `sfy site add`。
pub fn parse_user_host(input: &str) -> Result<(String, String, u16), FerryError> {
    let at_pos = input
        .find('@')
        .ok_or_else(|| FerryError::validation("missing username, expected user@host[:port]"))?;
    let (user, host_port) = (&input[..at_pos], &input[at_pos + 1..]);
    if user.is_empty() || host_port.is_empty() {
        return Err(FerryError::validation("empty username or host"));
    }

    let (host, port) = match host_port.rfind(':') {
        Some(colon) => {
            let (h, p_str) = (&host_port[..colon], &host_port[colon + 1..]);
            let p: u16 = p_str
                .parse()
                .map_err(|_| FerryError::validation(format!("invalid port: {}", p_str)))?;
            (h.to_string(), p)
        }
        None => (host_port.to_string(), 22),
    };

    Ok((user.to_string(), host, port))
}
