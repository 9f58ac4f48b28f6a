use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::engine::SftpEngine;
use crate::site::SiteConfig;

/// Result of a single connection probe.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub message: String,
}

impl CheckResult {
    fn pass(name: &'static str, message: impl Into<String>) -> Self {
        Self { name, passed: true, message: message.into() }
    }

    fn fail(name: &'static str, message: impl Into<String>) -> Self {
        Self { name, passed: false, message: message.into() }
    }
}

/// 连接自检：按依赖顺序逐项探测，前三项（TCP / SSH / SFTP）任一失败即
/// 停止，后两项检查沙箱根目录的可读写性。
pub struct ConnectionChecker {
    site: SiteConfig,
}

impl ConnectionChecker {
    pub fn new(site: SiteConfig) -> Self {
        Self { site }
    }

    pub fn run_all_checks(&self) -> Vec<CheckResult> {
        let mut results = Vec::new();

        results.push(self.check_tcp());
        if !results[results.len() - 1].passed {
            return results;
        }

        results.push(self.check_ssh());
        if !results[results.len() - 1].passed {
            return results;
        }

        results.push(self.check_sftp());
        if !results[results.len() - 1].passed {
            return results;
        }

        results.push(self.check_root_readable());
        results.push(self.check_root_writable());
        results
    }

    pub fn all_passed(results: &[CheckResult]) -> bool {
        !results.is_empty() && results.iter().all(|r| r.passed)
    }

    fn check_tcp(&self) -> CheckResult {
        const NAME: &str = "TCP Connection";
        let addr = self.site.addr();
        let sock = match addr.to_socket_addrs().ok().and_then(|mut a| a.next()) {
            Some(sock) => sock,
            None => return CheckResult::fail(NAME, format!("cannot resolve {}", addr)),
        };
        match TcpStream::connect_timeout(&sock, Duration::from_secs(5)) {
            Ok(_) => CheckResult::pass(NAME, format!("successfully connected to {}", addr)),
            Err(e) => CheckResult::fail(NAME, format!("failed to connect: {}", e)),
        }
    }

    fn check_ssh(&self) -> CheckResult {
        const NAME: &str = "SSH Handshake";
        match crate::engine::session::connect_session(&self.site) {
            Ok(_) => CheckResult::pass(NAME, "SSH authentication successful"),
            Err(e) => CheckResult::fail(NAME, format!("SSH error: {}", e)),
        }
    }

    fn check_sftp(&self) -> CheckResult {
        const NAME: &str = "SFTP Subsystem";
        let mut engine = SftpEngine::new(self.site.clone());
        match engine.connect() {
            Ok(()) => {
                engine.disconnect();
                CheckResult::pass(NAME, "SFTP subsystem is available")
            }
            Err(e) => CheckResult::fail(NAME, format!("SFTP error: {}", e)),
        }
    }

    fn check_root_readable(&self) -> CheckResult {
        const NAME: &str = "Remote Root Readable";
        let root = self.site.remote_root.clone();
        let mut engine = SftpEngine::new(self.site.clone());
        if let Err(e) = engine.connect() {
            return CheckResult::fail(NAME, format!("error checking readability: {}", e));
        }
        if engine.check_path_readable(&root) {
            CheckResult::pass(NAME, format!("can read {}", root))
        } else {
            CheckResult::fail(NAME, format!("cannot read {}", root))
        }
    }

    fn check_root_writable(&self) -> CheckResult {
        const NAME: &str = "Remote Root Writable";
        let root = self.site.remote_root.clone();
        let mut engine = SftpEngine::new(self.site.clone());
        if let Err(e) = engine.connect() {
            return CheckResult::fail(NAME, format!("error checking writability: {}", e));
        }
        if engine.check_path_writable(&root) {
            CheckResult::pass(NAME, format!("can write to {}", root))
        } else {
            CheckResult::fail(NAME, format!("cannot write to {}", root))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_host_stops_after_first_check() {
        // reserved TEST-NET address, nothing listens there
        let mut site = SiteConfig::new("t", "192.0.2.1", "user");
        site.port = 2222;
        let checker = ConnectionChecker::new(site);
        let results = checker.run_all_checks();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "TCP Connection");
        assert!(!results[0].passed);
        assert!(!ConnectionChecker::all_passed(&results));
    }

    #[test]
    fn unresolvable_host_fails_cleanly() {
        let site = SiteConfig::new("t", "definitely-not-a-real-host.invalid", "user");
        let checker = ConnectionChecker::new(site);
        let results = checker.run_all_checks();
        assert_eq!(results.len(), 1);
        assert!(!results[0].passed);
    }

    #[test]
    fn all_passed_requires_nonempty() {
        assert!(!ConnectionChecker::all_passed(&[]));
    }
}
