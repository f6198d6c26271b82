//! Directory access
//!
//! [`DirectoryClient`] is everything the resolver needs from a directory.
//! [`LdapDirectory`] implements it for Active Directory and OpenLDAP.

mod ldap;

pub use ldap::{
    domain_root, escape_binary_filter_value, escape_filter_value, group_name_from_dn,
    primary_group_sid, LdapDirectory,
};

use adauth_core::Result;
use async_trait::async_trait;
use secrecy::SecretString;

/// Attributes read from a user's directory entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryUser {
    /// Distinguished name of the entry
    pub dn: String,
    pub display_name: Option<String>,
    pub mail: Option<String>,
}

/// Session against a directory service.
///
/// One instance serves one resolution. `connect` and `authenticate` report
/// plain success flags so the caller can carry both into its error; lookups
/// after a successful bind report transport failures as errors.
#[async_trait]
pub trait DirectoryClient: Send {
    /// Establish the session
    async fn connect(&mut self) -> bool;

    /// Bind as `username` with `credential`
    async fn authenticate(&mut self, username: &str, credential: &SecretString) -> bool;

    /// Single-entry lookup; `None` when the directory has no such user
    async fn user_info(&mut self, username: &str) -> Result<Option<DirectoryUser>>;

    /// Names of the groups `username` belongs to, nested ones too when `recursive`
    async fn user_groups(&mut self, username: &str, recursive: bool) -> Result<Vec<String>>;
}
