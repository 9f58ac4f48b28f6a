use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use ssh2::{OpenFlags, OpenType};

use crate::engine::{IO_BUF_SIZE, InterruptFn, ProgressFn};
use crate::error::{ErrorKind, FerryError, TaskAbort, translate_io, translate_ssh2};
use crate::paths::{ensure_in_sandbox, normalize_remote_path, remote_basename};
use crate::site::{RemoteEntry, SiteConfig};

/// Per-connection SFTP engine. One instance owns one SSH session plus one
/// SFTP channel and must only be used by one logical caller at a time;
/// parallel transfers hold N engines, never share one.
///
/// Every path that reaches the wire is first normalized and checked against
/// the site's sandbox root.
pub struct SftpEngine {
    site: SiteConfig,
    session: Option<ssh2::Session>,
    sftp: Option<ssh2::Sftp>,
}

impl SftpEngine {
    pub fn new(site: SiteConfig) -> Self {
        Self { site, session: None, sftp: None }
    }

    pub fn site(&self) -> &SiteConfig {
        &self.site
    }

    pub fn connect(&mut self) -> Result<(), FerryError> {
        let session = super::session::connect_session(&self.site)?;
        let sftp = session
            .sftp()
            .map_err(|e| translate_ssh2(e, &format!("open sftp subsystem on {}", self.site.addr())))?;
        self.session = Some(session);
        self.sftp = Some(sftp);
        tracing::info!("connected to {}", self.site.addr());
        Ok(())
    }

    /// 幂等释放：断开后可以再次 connect。
    pub fn disconnect(&mut self) {
        if self.session.is_some() {
            tracing::info!("disconnected from {}", self.site.addr());
        }
        self.sftp = None;
        self.session = None;
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some() && self.sftp.is_some()
    }

    fn sftp(&self) -> Result<&ssh2::Sftp, FerryError> {
        self.sftp
            .as_ref()
            .ok_or_else(|| FerryError::new(ErrorKind::RemoteDisconnect, "not connected"))
    }

    fn session(&self) -> Result<&ssh2::Session, FerryError> {
        self.session
            .as_ref()
            .ok_or_else(|| FerryError::new(ErrorKind::RemoteDisconnect, "not connected"))
    }

    /// Sandbox check + normalization for one remote path argument.
    fn checked(&self, path: &str) -> Result<String, FerryError> {
        ensure_in_sandbox(path, &self.site.remote_root)?;
        Ok(normalize_remote_path(path))
    }

    /// List a remote directory. Ordering is whatever the server returns;
    /// callers sort.
    pub fn list_dir(&self, remote_path: &str) -> Result<Vec<RemoteEntry>, FerryError> {
        let dir = self.checked(remote_path)?;
        let sftp = self.sftp()?;
        let listing = sftp
            .readdir(Path::new(&dir))
            .map_err(|e| translate_ssh2(e, &format!("list directory {}", dir)))?;

        let mut entries = Vec::with_capacity(listing.len());
        for (path, stat) in listing {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let full = normalize_remote_path(&format!("{}/{}", dir, name));
            entries.push(RemoteEntry {
                is_dir: stat.perm.map(RemoteEntry::mode_is_dir).unwrap_or(stat.is_dir()),
                name,
                path: full,
                size: stat.size.unwrap_or(0),
                mtime: stat.mtime.unwrap_or(0),
                mode: stat.perm,
            });
        }
        Ok(entries)
    }

    pub fn stat(&self, remote_path: &str) -> Result<RemoteEntry, FerryError> {
        let path = self.checked(remote_path)?;
        let sftp = self.sftp()?;
        let stat = sftp
            .stat(Path::new(&path))
            .map_err(|e| translate_ssh2(e, &format!("stat {}", path)))?;
        Ok(RemoteEntry {
            name: remote_basename(&path),
            is_dir: stat.perm.map(RemoteEntry::mode_is_dir).unwrap_or(stat.is_dir()),
            path,
            size: stat.size.unwrap_or(0),
            mtime: stat.mtime.unwrap_or(0),
            mode: stat.perm,
        })
    }

    /// Create a directory; fails if it already exists.
    pub fn mkdir(&self, remote_path: &str) -> Result<(), FerryError> {
        let path = self.checked(remote_path)?;
        let sftp = self.sftp()?;
        sftp.mkdir(Path::new(&path), 0o755)
            .map_err(|e| translate_ssh2(e, &format!("create directory {}", path)))?;
        tracing::info!("created directory {}", path);
        Ok(())
    }

    pub fn remove_file(&self, remote_path: &str) -> Result<(), FerryError> {
        let path = self.checked(remote_path)?;
        let sftp = self.sftp()?;
        sftp.unlink(Path::new(&path))
            .map_err(|e| translate_ssh2(e, &format!("remove file {}", path)))?;
        tracing::info!("removed file {}", path);
        Ok(())
    }

    /// Remove an empty directory.
    pub fn remove_dir(&self, remote_path: &str) -> Result<(), FerryError> {
        let path = self.checked(remote_path)?;
        let sftp = self.sftp()?;
        sftp.rmdir(Path::new(&path))
            .map_err(|e| translate_ssh2(e, &format!("remove directory {}", path)))?;
        tracing::info!("removed directory {}", path);
        Ok(())
    }

    /// Delete a subtree with `rm -rf` over the exec channel. The safety gate
    /// rejects `/` and the sandbox root itself before anything touches the
    /// wire. Known weakness: the path is single-quoted as-is, so a literal
    /// `'` in the path corrupts the command.
    pub fn remove_dir_recursive(&self, remote_path: &str) -> Result<(), FerryError> {
        let path = normalize_remote_path(remote_path);
        let root = normalize_remote_path(&self.site.remote_root);
        if path == "/" || path == root {
            return Err(FerryError::validation(format!(
                "refusing recursive delete of protected path '{}'",
                path
            )));
        }
        ensure_in_sandbox(remote_path, &self.site.remote_root)?;

        let session = self.session()?;
        let mut channel = session
            .channel_session()
            .map_err(|e| translate_ssh2(e, "open exec channel"))?;
        let command = format!("rm -rf '{}'", path);
        channel
            .exec(&command)
            .map_err(|e| translate_ssh2(e, &format!("exec '{}'", command)))?;

        let mut stderr = String::new();
        let _ = channel.stderr().read_to_string(&mut stderr);
        let _ = channel.wait_close();
        let status = channel
            .exit_status()
            .map_err(|e| translate_ssh2(e, "read exec exit status"))?;
        if status != 0 {
            return Err(FerryError::unknown(format!(
                "recursive delete failed (exit {}): {}",
                status,
                stderr.trim()
            )));
        }
        tracing::info!("recursively removed {}", path);
        Ok(())
    }

    /// Rename/move; both endpoints must sit inside the sandbox.
    pub fn rename(&self, old_path: &str, new_path: &str) -> Result<(), FerryError> {
        let old = self.checked(old_path)?;
        let new = self.checked(new_path)?;
        let sftp = self.sftp()?;
        sftp.rename(Path::new(&old), Path::new(&new), None)
            .map_err(|e| translate_ssh2(e, &format!("rename {} -> {}", old, new)))?;
        tracing::info!("renamed {} -> {}", old, new);
        Ok(())
    }

    /// Upload a local file. `offset > 0` resumes: both ends are positioned at
    /// `offset` and existing remote bytes before it are preserved.
    pub fn upload_file(
        &self,
        local_path: &Path,
        remote_path: &str,
        progress: Option<ProgressFn>,
        interrupt: Option<InterruptFn>,
        offset: u64,
    ) -> Result<(), TaskAbort> {
        let remote = self.checked(remote_path)?;
        let sftp = self.sftp()?;

        let mut local = std::fs::File::open(local_path)
            .map_err(|e| translate_io(e, &format!("open local file {}", local_path.display())))?;
        let total = local
            .metadata()
            .map_err(|e| translate_io(e, &format!("stat local file {}", local_path.display())))?
            .len();
        local
            .seek(SeekFrom::Start(offset))
            .map_err(|e| translate_io(e, "seek local file"))?;

        let flags = if offset > 0 {
            OpenFlags::WRITE | OpenFlags::CREATE
        } else {
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE
        };
        let mut remote_file = sftp
            .open_mode(Path::new(&remote), flags, 0o644, OpenType::File)
            .map_err(|e| translate_ssh2(e, &format!("open remote file {}", remote)))?;
        if offset > 0 {
            remote_file
                .seek(SeekFrom::Start(offset))
                .map_err(|e| translate_io(e, "seek remote file"))?;
        }

        let mut buf = vec![0u8; IO_BUF_SIZE];
        let mut bytes_done = offset;
        loop {
            if let Some(check) = interrupt
                && check()
            {
                return Err(TaskAbort::Interrupted);
            }
            let n = local
                .read(&mut buf)
                .map_err(|e| translate_io(e, &format!("read local file {}", local_path.display())))?;
            if n == 0 {
                break;
            }
            remote_file
                .write_all(&buf[..n])
                .map_err(|e| translate_io(e, &format!("write remote file {}", remote)))?;
            bytes_done += n as u64;
            if let Some(report) = progress {
                report(bytes_done, total);
            }
        }
        // fires even for empty transfers (resume at EOF, zero-byte files)
        if let Some(report) = progress {
            report(bytes_done, total);
        }
        tracing::info!("uploaded {} -> {}", local_path.display(), remote);
        Ok(())
    }

    /// Download a remote file, creating local parent directories as needed.
    /// Resume semantics mirror `upload_file`.
    pub fn download_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        progress: Option<ProgressFn>,
        interrupt: Option<InterruptFn>,
        offset: u64,
    ) -> Result<(), TaskAbort> {
        let remote = self.checked(remote_path)?;
        let sftp = self.sftp()?;

        let stat = sftp
            .stat(Path::new(&remote))
            .map_err(|e| translate_ssh2(e, &format!("stat {}", remote)))?;
        let total = stat.size.unwrap_or(0);

        if let Some(parent) = local_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| translate_io(e, &format!("create local directory {}", parent.display())))?;
        }

        let mut local = if offset > 0 {
            let mut f = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(local_path)
                .map_err(|e| translate_io(e, &format!("open local file {}", local_path.display())))?;
            f.seek(SeekFrom::Start(offset)).map_err(|e| translate_io(e, "seek local file"))?;
            f
        } else {
            std::fs::File::create(local_path)
                .map_err(|e| translate_io(e, &format!("create local file {}", local_path.display())))?
        };

        let mut remote_file = sftp
            .open(Path::new(&remote))
            .map_err(|e| translate_ssh2(e, &format!("open remote file {}", remote)))?;
        if offset > 0 {
            remote_file
                .seek(SeekFrom::Start(offset))
                .map_err(|e| translate_io(e, "seek remote file"))?;
        }

        let mut buf = vec![0u8; IO_BUF_SIZE];
        let mut bytes_done = offset;
        loop {
            if let Some(check) = interrupt
                && check()
            {
                return Err(TaskAbort::Interrupted);
            }
            let n = remote_file
                .read(&mut buf)
                .map_err(|e| translate_io(e, &format!("read remote file {}", remote)))?;
            if n == 0 {
                break;
            }
            local
                .write_all(&buf[..n])
                .map_err(|e| translate_io(e, &format!("write local file {}", local_path.display())))?;
            bytes_done += n as u64;
            if let Some(report) = progress {
                report(bytes_done, total);
            }
        }
        if let Some(report) = progress {
            report(bytes_done, total);
        }
        tracing::info!("downloaded {} -> {}", remote, local_path.display());
        Ok(())
    }

    /// Non-throwing probe: can the path be stat'ed?
    pub fn check_path_readable(&self, remote_path: &str) -> bool {
        self.stat(remote_path).is_ok()
    }

    /// Non-throwing probe: create-and-delete a test file under the path.
    pub fn check_path_writable(&self, remote_path: &str) -> bool {
        let test_file = format!("{}/.sshferry_write_test", remote_path.trim_end_matches('/'));
        let Ok(path) = self.checked(&test_file) else {
            return false;
        };
        let Ok(sftp) = self.sftp() else {
            return false;
        };
        if sftp.create(Path::new(&path)).is_err() {
            return false;
        }
        sftp.unlink(Path::new(&path)).is_ok()
    }
}

impl Drop for SftpEngine {
    fn drop(&mut self) {
        self.disconnect();
    }
}
