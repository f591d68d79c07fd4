//! Error types shared across the daemon and the control client.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all local failure modes.
///
/// Errors that travel back to an IPC client are not represented here; see
/// [`crate::ipc::protocol::ServiceError`] for the wire-level taxonomy.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// IPC channel setup or transport failure.
    Ipc(String),
    /// Malformed frame on the control channel.
    Protocol(String),
    /// The peer closed the control channel.
    Disconnected,
    /// An external hardware service could not be opened or is not open.
    ServiceUnavailable(String),
    /// Profile store load or save failure.
    Store(String),
    /// The server answered with a non-success result code.
    Remote(u32),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::ServiceUnavailable(msg) => write!(f, "service unavailable: {msg}"),
            Self::Store(msg) => write!(f, "store: {msg}"),
            Self::Remote(code) => write!(f, "remote: result code 0x{code:x}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl AppError {
    /// Whether this error only signals that the peer went away.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::UnexpectedEof => Self::Disconnected,
            _ => Self::Io(err.to_string()),
        }
    }
}
