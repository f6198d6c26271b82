//! User record kinds

use super::Principal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of user record kinds an authentication framework can present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Principal resolved from the directory
    Directory,
    /// Account held by the application's own user store
    Local,
    /// Machine/service account
    Service,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Directory => "directory",
            RecordKind::Local => "local",
            RecordKind::Service => "service",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user record handed around by the surrounding authentication framework
pub trait UserRecord: fmt::Debug + Send + Sync {
    fn kind(&self) -> RecordKind;

    fn username(&self) -> &str;

    fn roles(&self) -> &[String];

    /// Recover the directory principal, if this record is one
    fn into_principal(self: Box<Self>) -> Option<Principal> {
        None
    }
}
