//! Principal types

use super::{RecordKind, UserRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Stand-in credential carried by a [`Principal`].
///
/// The directory verifies the real password; the principal only needs to
/// look like it has a credential. The placeholder is random per instance,
/// has no string form and never matches a supplied password.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialPlaceholder(Uuid);

impl CredentialPlaceholder {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Always false: a placeholder must never authenticate anyone
    pub fn matches(&self, _supplied: &str) -> bool {
        false
    }
}

impl fmt::Debug for CredentialPlaceholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialPlaceholder(..)")
    }
}

/// Identity resolved against the directory.
///
/// Serialize-only: a principal is built from a normalized username and
/// resolved from the directory, never read back from external data.
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    username: String,
    #[serde(skip)]
    credential: CredentialPlaceholder,
    roles: Vec<String>,
    display_name: Option<String>,
    email: Option<String>,
    resolved_at: Option<DateTime<Utc>>,
}

/// Everything the directory contributes to a principal, applied in one step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryProfile {
    pub roles: Vec<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl Principal {
    /// Unresolved principal for an already canonical username
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            credential: CredentialPlaceholder::generate(),
            roles: Vec::new(),
            display_name: None,
            email: None,
            resolved_at: None,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn credential(&self) -> &CredentialPlaceholder {
        &self.credential
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Apply the directory profile and mark the principal resolved
    pub fn resolve(&mut self, profile: DirectoryProfile) {
        self.roles = profile.roles;
        self.display_name = profile.display_name;
        self.email = profile.email;
        self.resolved_at = Some(Utc::now());
    }
}

impl UserRecord for Principal {
    fn kind(&self) -> RecordKind {
        RecordKind::Directory
    }

    fn username(&self) -> &str {
        &self.username
    }

    fn roles(&self) -> &[String] {
        &self.roles
    }

    fn into_principal(self: Box<Self>) -> Option<Principal> {
        Some(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_principal_is_unresolved() {
        let principal = Principal::new("jdoe");

        assert_eq!(principal.username(), "jdoe");
        assert!(principal.roles().is_empty());
        assert!(principal.display_name().is_none());
        assert!(principal.email().is_none());
        assert!(!principal.is_resolved());
    }

    #[test]
    fn test_placeholders_are_unique_and_never_match() {
        let a = Principal::new("jdoe");
        let b = Principal::new("jdoe");

        assert_ne!(a.credential(), b.credential());
        assert!(!a.credential().matches(""));
        assert!(!a.credential().matches("hunter2"));
        assert_eq!(format!("{:?}", a.credential()), "CredentialPlaceholder(..)");
    }

    #[test]
    fn test_resolve_applies_profile() {
        let mut principal = Principal::new("jdoe");
        principal.resolve(DirectoryProfile {
            roles: vec!["ROLE_USERS".to_string()],
            display_name: Some("John Doe".to_string()),
            email: Some("jdoe@example.com".to_string()),
        });

        assert!(principal.is_resolved());
        assert!(principal.has_role("ROLE_USERS"));
        assert_eq!(principal.display_name(), Some("John Doe"));
        assert_eq!(principal.email(), Some("jdoe@example.com"));
    }

    #[test]
    fn test_serialization_skips_credential() {
        let principal = Principal::new("jdoe");
        let json = serde_json::to_value(&principal).unwrap();

        assert_eq!(json["username"], "jdoe");
        assert!(json.get("credential").is_none());
    }

    // Method resolution picks the by-value impl only when the bound holds
    struct Check<T>(std::marker::PhantomData<T>);

    trait Deserializable {
        fn is_deserializable(&self) -> bool {
            true
        }
    }
    impl<T: serde::de::DeserializeOwned> Deserializable for Check<T> {}

    trait NotDeserializable {
        fn is_deserializable(&self) -> bool {
            false
        }
    }
    impl<T> NotDeserializable for &Check<T> {}

    #[test]
    fn test_principal_cannot_be_deserialized() {
        assert!((&Check::<RecordKind>(std::marker::PhantomData)).is_deserializable());
        assert!(!(&Check::<Principal>(std::marker::PhantomData)).is_deserializable());
    }
}
