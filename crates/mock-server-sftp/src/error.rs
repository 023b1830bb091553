//! Error types for the SFTP gateway
//!
//! Filesystem failures are turned into SFTP STATUS replies by the router and
//! never travel past it. Transport failures only end the connection or
//! channel they belong to.

use crate::protocol::StatusCode;
use std::io::ErrorKind;
use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway error types
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error that does not map to a more specific filesystem variant
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH transport or handshake error
    #[error("SSH error: {0}")]
    Ssh(String),

    /// SFTP protocol violation or malformed packet
    #[error("SFTP protocol error: {0}")]
    Protocol(String),

    /// Credential rejected by the gate
    #[error("Authentication failed: {0}")]
    Authentication(#[from] mock_server_core::CoreError),

    /// Channel open refused because its type is not `session`
    #[error("Channel rejected: {0}")]
    ChannelRejected(String),

    /// Subsystem other than `sftp` requested
    #[error("Subsystem not supported: {0}")]
    SubsystemUnsupported(String),

    /// Method outside the fixed operation vocabulary
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Unknown or already closed file handle
    #[error("Invalid file handle: {0}")]
    InvalidHandle(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// STATUS reply carrying a code with no dedicated variant
    #[error("SFTP failure ({code:?}): {message}")]
    Status {
        /// Status code sent by the peer
        code: StatusCode,
        /// Message sent by the peer
        message: String,
    },
}

impl Error {
    /// Map an I/O error onto the filesystem taxonomy.
    ///
    /// `context` is usually the peer-supplied path; it ends up in logs, not
    /// on the wire (see [`Error::sanitized_message`]).
    pub fn from_io(err: std::io::Error, context: impl Into<String>) -> Self {
        let context = context.into();
        match err.kind() {
            ErrorKind::NotFound => Self::FileNotFound(context),
            ErrorKind::PermissionDenied => Self::PermissionDenied(context),
            ErrorKind::AlreadyExists => Self::AlreadyExists(context),
            _ => Self::Io(err),
        }
    }

    /// Rebuild an error from a STATUS reply (client side).
    pub fn from_status(code: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            StatusCode::NoSuchFile => Self::FileNotFound(message),
            StatusCode::PermissionDenied => Self::PermissionDenied(message),
            StatusCode::OpUnsupported => Self::NotSupported(message),
            StatusCode::BadMessage => Self::Protocol(message),
            StatusCode::ConnectionLost | StatusCode::NoConnection => Self::ChannelClosed(message),
            _ => Self::Status { code, message },
        }
    }

    /// Check if error was caused by the peer's request rather than the server
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::FileNotFound(_)
                | Self::PermissionDenied(_)
                | Self::AlreadyExists(_)
                | Self::InvalidHandle(_)
                | Self::NotSupported(_)
                | Self::Protocol(_)
        )
    }

    /// Check if error is worth a warning in the security log
    pub const fn is_security_event(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::PermissionDenied(_) | Self::ChannelRejected(_)
        )
    }

    /// SFTP status code for a STATUS reply
    pub const fn to_status_code(&self) -> StatusCode {
        match self {
            Self::FileNotFound(_) => StatusCode::NoSuchFile,
            Self::PermissionDenied(_) => StatusCode::PermissionDenied,
            Self::NotSupported(_) => StatusCode::OpUnsupported,
            Self::Protocol(_) => StatusCode::BadMessage,
            Self::Connection(_) | Self::ChannelClosed(_) => StatusCode::ConnectionLost,
            Self::Status { code, .. } => *code,
            _ => StatusCode::Failure,
        }
    }

    /// Message safe to put on the wire: no server paths, no config details
    pub fn sanitized_message(&self) -> String {
        match self {
            Self::Authentication(_) => "Authentication failed".to_string(),
            Self::FileNotFound(_) => "No such file".to_string(),
            Self::PermissionDenied(_) => "Permission denied".to_string(),
            Self::AlreadyExists(_) => "File already exists".to_string(),
            Self::Io(_) => "Failure".to_string(),
            Self::InvalidHandle(_) => "Invalid handle".to_string(),
            Self::Config(_) => "Server configuration error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<russh::Error> for Error {
    fn from(err: russh::Error) -> Self {
        Self::Ssh(err.to_string())
    }
}
