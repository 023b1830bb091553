use thiserror::Error;

/// Errors shared by the mock services
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The presented bearer secret is not one the gate accepts.
    #[error("Invalid credential")]
    InvalidCredential,
}

/// Result alias over [`CoreError`]
pub type Result<T> = std::result::Result<T, CoreError>;
