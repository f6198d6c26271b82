//! adauth Core Library
//!
//! Core types, configuration and errors shared by the directory principal
//! provider and its command-line tool.

pub mod config;
pub mod error;
pub mod types;

pub use config::{AdAuthConfig, ProviderSettings};
pub use error::{Error, Result, UsernameError};
pub use types::{CredentialPlaceholder, DirectoryProfile, Principal, RecordKind, UserRecord};

/// adauth version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix of every role identifier derived from a directory group
pub const ROLE_PREFIX: &str = "ROLE_";
