use serde::{Deserialize, Serialize};

/// Authenticated principal returned by a credential gate.
///
/// The identity is attached to a connection when it authenticates and is
/// only used to decide whether that connection is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Account name, used in log events
    pub username: String,
    /// Contact address of the account
    pub email: String,
    /// Role names granted to the account
    pub roles: Vec<String>,
}

impl Identity {
    /// Build an identity from its parts.
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        roles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `role` is one of the granted roles
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <{}>", self.username, self.email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_role() {
        let identity = Identity::new("testuser", "test@example.com", ["admin", "user"]);
        assert!(identity.has_role("admin"));
        assert!(identity.has_role("user"));
        assert!(!identity.has_role("root"));
    }

    #[test]
    fn test_json_field_names() {
        let identity = Identity::new("testuser", "test@example.com", ["user"]);
        let json = serde_json::to_value(&identity).unwrap();

        assert_eq!(json["username"], "testuser");
        assert_eq!(json["email"], "test@example.com");
        assert_eq!(json["roles"][0], "user");
    }
}
