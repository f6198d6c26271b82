//! Error types for adauth
//!
//! Errors are structured values. Each variant exposes a stable `code()`, a
//! `message_key()` for the presentation layer's catalogue and the `params()`
//! to interpolate into it. The `Display` text is an English fallback for logs.

use crate::types::RecordKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a raw login could not be turned into a canonical username
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsernameError {
    /// The extracted, lower-cased candidate does not match the validation pattern
    #[error("Username '{username}' does not match the username rules")]
    RulesViolation { username: String },
}

impl UsernameError {
    pub fn message_key(&self) -> &'static str {
        match self {
            UsernameError::RulesViolation { .. } => "active_directory.username_not_matching_rules",
        }
    }

    pub fn params(&self) -> Vec<(&'static str, String)> {
        match self {
            UsernameError::RulesViolation { username } => vec![("username", username.clone())],
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    // Identity Errors
    #[error("Invalid login: {0}")]
    InvalidLogin(#[from] UsernameError),

    #[error("No directory record for user: {username}")]
    UserNotFound { username: String },

    // Directory Errors
    #[error("Directory authentication failed (connected: {connected}, authenticated: {authenticated})")]
    AuthenticationFailed { connected: bool, authenticated: bool },

    #[error("Directory lookup failed: {0}")]
    Directory(String),

    // Integration Errors
    #[error("Unsupported user record kind: {kind}")]
    UnsupportedRecord { kind: RecordKind },

    // Configuration Errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidLogin(_) => "InvalidLogin",
            Error::UserNotFound { .. } => "UserNotFound",
            Error::AuthenticationFailed { .. } => "AuthenticationFailed",
            Error::Directory(_) => "DirectoryError",
            Error::UnsupportedRecord { .. } => "UnsupportedRecord",
            Error::Config(_) => "ConfigError",
            Error::Io(_) => "InternalError",
            Error::Other(_) => "InternalError",
        }
    }

    /// Catalogue key the presentation layer renders for this error
    pub fn message_key(&self) -> &'static str {
        match self {
            Error::InvalidLogin(_) => "active_directory.invalid_user",
            Error::UserNotFound { .. } => "active_directory.user_not_found",
            Error::AuthenticationFailed { .. } => "active_directory.ad.bad_response",
            Error::Directory(_) => "active_directory.ad.lookup_failed",
            Error::UnsupportedRecord { .. } => "active_directory.bad_instance",
            Error::Config(_) => "active_directory.bad_configuration",
            Error::Io(_) | Error::Other(_) => "active_directory.internal_error",
        }
    }

    /// Named parameters for the message identified by `message_key()`
    pub fn params(&self) -> Vec<(&'static str, String)> {
        match self {
            Error::InvalidLogin(reason) => {
                let mut params = reason.params();
                params.push(("reason_key", reason.message_key().to_string()));
                params
            }
            Error::UserNotFound { username } => vec![("username", username.clone())],
            Error::AuthenticationFailed {
                connected,
                authenticated,
            } => vec![
                ("connection_status", connected.to_string()),
                ("is_ad", authenticated.to_string()),
            ],
            Error::Directory(detail) | Error::Config(detail) => vec![("detail", detail.clone())],
            Error::UnsupportedRecord { kind } => vec![("kind", kind.to_string())],
            Error::Io(e) => vec![("detail", e.to_string())],
            Error::Other(e) => vec![("detail", e.to_string())],
        }
    }

    /// Whether the caller should treat this error as "principal not found".
    ///
    /// Login-rule violations and missing directory records are reported the
    /// same way so a caller cannot tell which accounts exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::InvalidLogin(_) | Error::UserNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_login_is_not_found() {
        let err = Error::from(UsernameError::RulesViolation {
            username: "john doe".to_string(),
        });

        assert!(err.is_not_found());
        assert_eq!(err.code(), "InvalidLogin");
        assert!(err
            .params()
            .contains(&("username", "john doe".to_string())));
    }

    #[test]
    fn test_authentication_failure_params() {
        let err = Error::AuthenticationFailed {
            connected: true,
            authenticated: false,
        };

        assert!(!err.is_not_found());
        assert_eq!(err.message_key(), "active_directory.ad.bad_response");
        assert_eq!(
            err.params(),
            vec![
                ("connection_status", "true".to_string()),
                ("is_ad", "false".to_string()),
            ]
        );
    }

    #[test]
    fn test_unsupported_record_code() {
        let err = Error::UnsupportedRecord {
            kind: RecordKind::Local,
        };

        assert_eq!(err.code(), "UnsupportedRecord");
        assert_eq!(err.params(), vec![("kind", "local".to_string())]);
    }
}
