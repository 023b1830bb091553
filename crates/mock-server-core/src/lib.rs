//! Shared pieces of the mock backend services: the authenticated
//! [`Identity`] and the [`CredentialGate`] every service authenticates
//! peers through.

pub mod auth;
pub mod error;
pub mod types;

pub use auth::{CredentialGate, StaticCredentialGate, validate};
pub use error::{CoreError, Result};
pub use types::Identity;
