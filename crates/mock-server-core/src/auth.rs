//! Credential gate
//!
//! Turns a bearer secret into an [`Identity`]. The gate used by the mock
//! services accepts a fixed set of literal secrets; it is not backed by a
//! credential store.

use crate::error::{CoreError, Result};
use crate::types::Identity;
use tracing::{debug, warn};

/// Secrets accepted by [`StaticCredentialGate`].
pub const ACCEPTED_SECRETS: [&str; 2] = ["valid-token", "testpass"];

/// Validates a bearer secret and resolves the identity behind it.
///
/// Implementations must be pure with respect to the secret: the gate is
/// shared by every connection and called concurrently without locking.
pub trait CredentialGate: Send + Sync {
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidCredential`] when the secret is rejected.
    fn validate(&self, secret: &str) -> Result<Identity>;
}

/// Fixed-literal gate used by the test doubles.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticCredentialGate;

impl StaticCredentialGate {
    pub const fn new() -> Self {
        Self
    }

    fn identity() -> Identity {
        Identity::new("testuser", "test@example.com", ["admin", "user"])
    }
}

impl CredentialGate for StaticCredentialGate {
    fn validate(&self, secret: &str) -> Result<Identity> {
        if ACCEPTED_SECRETS.contains(&secret) {
            let identity = Self::identity();
            debug!(event = "credential_accepted", user = %identity.username, "Credential accepted");
            return Ok(identity);
        }

        // The secret itself is never logged.
        warn!(event = "credential_rejected", secret_len = secret.len(), "Credential rejected");
        Err(CoreError::InvalidCredential)
    }
}

/// Validate `secret` against the fixed-literal gate.
///
/// # Errors
///
/// Returns [`CoreError::InvalidCredential`] for every secret that is not
/// one of [`ACCEPTED_SECRETS`].
pub fn validate(secret: &str) -> Result<Identity> {
    StaticCredentialGate.validate(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_secrets_resolve_admin_identity() {
        for secret in ACCEPTED_SECRETS {
            let identity = validate(secret).unwrap();
            assert_eq!(identity.username, "testuser");
            assert_eq!(identity.email, "test@example.com");
            assert!(identity.has_role("admin"));
        }
    }

    #[test]
    fn test_other_secrets_rejected() {
        for secret in ["", "testpass ", "TESTPASS", "valid_token", "admin"] {
            assert_eq!(validate(secret), Err(CoreError::InvalidCredential));
        }
    }

    #[test]
    fn test_gate_as_trait_object() {
        let gate: Box<dyn CredentialGate> = Box::new(StaticCredentialGate::new());
        assert!(gate.validate("valid-token").is_ok());
        assert!(gate.validate("nope").is_err());
    }

    #[tokio::test]
    async fn test_concurrent_validation_results_independent() {
        let gate = std::sync::Arc::new(StaticCredentialGate::new());
        let mut tasks = tokio::task::JoinSet::new();

        for i in 0..64 {
            let gate = gate.clone();
            tasks.spawn(async move {
                let secret = if i % 2 == 0 { "testpass".to_string() } else { format!("bad-{i}") };
                (i, gate.validate(&secret))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (i, result) = joined.unwrap();
            if i % 2 == 0 {
                assert!(result.unwrap().has_role("admin"));
            } else {
                assert_eq!(result, Err(CoreError::InvalidCredential));
            }
        }
    }
}
