use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use crate::error::{ErrorKind, FerryError, translate_ssh2};
use crate::site::{AuthMethod, SiteConfig};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const IO_TIMEOUT: Duration = Duration::from_secs(30);

fn create_tcp_connection(site: &SiteConfig) -> Result<TcpStream, FerryError> {
    let addr = site.addr();
    let mut addrs = addr
        .to_socket_addrs()
        .map_err(|e| FerryError::with_source(ErrorKind::NetworkTimeout, format!("cannot resolve {}", addr), e))?;
    let sock = addrs
        .next()
        .ok_or_else(|| FerryError::new(ErrorKind::NetworkTimeout, format!("no address for {}", addr)))?;
    let tcp = TcpStream::connect_timeout(&sock, HANDSHAKE_TIMEOUT).map_err(|e| {
        let kind = if e.kind() == std::io::ErrorKind::TimedOut {
            ErrorKind::NetworkTimeout
        } else {
            ErrorKind::RemoteDisconnect
        };
        FerryError::with_source(kind, format!("tcp connect to {} failed", addr), e)
    })?;
    let _ = tcp.set_read_timeout(Some(IO_TIMEOUT));
    let _ = tcp.set_write_timeout(Some(IO_TIMEOUT));
    Ok(tcp)
}

fn authenticate(sess: &mut ssh2::Session, site: &SiteConfig) -> Result<(), FerryError> {
    match site.auth_method {
        AuthMethod::Password => {
            let password = site.password.as_deref().unwrap_or("");
            sess.userauth_password(&site.username, password).map_err(|e| {
                FerryError::with_source(
                    ErrorKind::AuthFailed,
                    format!("password authentication failed for {}", site.endpoint()),
                    e,
                )
            })?;
        }
        AuthMethod::Key => {
            // validate_for_connect guarantees key_path is present here
            let key_path = site.key_path.as_deref().unwrap_or_default();
            sess.userauth_pubkey_file(
                &site.username,
                None,
                Path::new(key_path),
                site.key_passphrase.as_deref(),
            )
            .map_err(|e| {
                FerryError::with_source(
                    ErrorKind::AuthFailed,
                    format!("key authentication failed for {} ({})", site.endpoint(), key_path),
                    e,
                )
            })?;
        }
    }
    if sess.authenticated() {
        Ok(())
    } else {
        Err(FerryError::new(
            ErrorKind::AuthFailed,
            format!("authentication rejected for {}", site.endpoint()),
        ))
    }
}

/// Open and authenticate one SSH session for `site`. TCP connect and the
/// handshake are bounded by a 10 s timeout. The host key is accepted as
/// presented: no known-hosts verification happens here, tighten before
/// exposing to untrusted networks.
pub fn connect_session(site: &SiteConfig) -> Result<ssh2::Session, FerryError> {
    site.validate_for_connect()?;
    let tcp = create_tcp_connection(site)?;
    let mut sess = ssh2::Session::new()
        .map_err(|e| translate_ssh2(e, &format!("create session for {}", site.addr())))?;
    sess.set_tcp_stream(tcp);
    sess.handshake()
        .map_err(|e| translate_ssh2(e, &format!("ssh handshake with {}", site.addr())))?;
    authenticate(&mut sess, site)?;
    Ok(sess)
}
