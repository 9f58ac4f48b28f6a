/// Closed set of user-visible error kinds. Engines translate transport errors
/// into one of these at their boundary; nothing outside this set escapes the
/// library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AuthFailed,
    HostkeyUnknown,
    HostkeyChanged,
    PermissionDenied,
    PathNotFound,
    NetworkTimeout,
    RemoteDisconnect,
    ValidationFailed,
    TransferFailed,
    UnknownError,
}

impl ErrorKind {
    /// Stable identifier used in structured log lines and persisted task state.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AuthFailed => "AUTH_FAILED",
            ErrorKind::HostkeyUnknown => "HOSTKEY_UNKNOWN",
            ErrorKind::HostkeyChanged => "HOSTKEY_CHANGED",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::PathNotFound => "PATH_NOT_FOUND",
            ErrorKind::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorKind::RemoteDisconnect => "REMOTE_DISCONNECT",
            ErrorKind::ValidationFailed => "VALIDATION_FAILED",
            ErrorKind::TransferFailed => "TRANSFER_FAILED",
            ErrorKind::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 结构化错误：kind + 人类可读消息 + 可选底层原因。
#[derive(Debug)]
pub struct FerryError {
    pub kind: ErrorKind,
    pub message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl FerryError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), source: None }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self { kind, message: message.into(), source: Some(Box::new(source)) }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailed, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PathNotFound, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownError, message)
    }
}

impl std::fmt::Display for FerryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for FerryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Why a transfer path stopped. `Interrupted` is deliberately distinct from
/// the error taxonomy: it is the cooperative-cancellation channel, and the
/// scheduler maps it to `paused` or `canceled` depending on which control
/// flag was raised.
#[derive(Debug)]
pub enum TaskAbort {
    Failed(FerryError),
    Interrupted,
}

impl From<FerryError> for TaskAbort {
    fn from(err: FerryError) -> Self {
        TaskAbort::Failed(err)
    }
}

impl std::fmt::Display for TaskAbort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskAbort::Failed(e) => write!(f, "{}", e),
            TaskAbort::Interrupted => write!(f, "transfer interrupted"),
        }
    }
}

/// Map an `ssh2::Error` into the taxonomy, preserving the library message.
/// libssh2 does not distinguish every case we care about, so classification
/// leans on the session error code first and falls back to `UnknownError`.
pub fn translate_ssh2(err: ssh2::Error, context: &str) -> FerryError {
    use ssh2::ErrorCode;
    let kind = match err.code() {
        ErrorCode::Session(code) => match code {
            // LIBSSH2_ERROR_AUTHENTICATION_FAILED / PUBLICKEY_UNVERIFIED
            -18 | -19 => ErrorKind::AuthFailed,
            // LIBSSH2_ERROR_TIMEOUT
            -9 => ErrorKind::NetworkTimeout,
            // LIBSSH2_ERROR_SOCKET_DISCONNECT / SOCKET_SEND / SOCKET_RECV
            -13 | -7 | -43 => ErrorKind::RemoteDisconnect,
            _ => ErrorKind::UnknownError,
        },
        ErrorCode::SFTP(code) => match code {
            // SSH_FX_NO_SUCH_FILE / NO_SUCH_PATH
            2 | 10 => ErrorKind::PathNotFound,
            // SSH_FX_PERMISSION_DENIED / WRITE_PROTECT
            3 | 12 => ErrorKind::PermissionDenied,
            // SSH_FX_CONNECTION_LOST / NO_CONNECTION
            6 | 7 => ErrorKind::RemoteDisconnect,
            _ => ErrorKind::UnknownError,
        },
    };
    FerryError::with_source(kind, format!("{}: {}", context, err), err)
}

/// Map a local I/O error (file open/read/write during transfers).
pub fn translate_io(err: std::io::Error, context: &str) -> FerryError {
    let kind = match err.kind() {
        std::io::ErrorKind::NotFound => ErrorKind::PathNotFound,
        std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
        std::io::ErrorKind::TimedOut => ErrorKind::NetworkTimeout,
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::BrokenPipe => ErrorKind::RemoteDisconnect,
        _ => ErrorKind::UnknownError,
    };
    FerryError::with_source(kind, format!("{}: {}", context, err), err)
}
