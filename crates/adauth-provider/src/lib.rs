//! Active Directory principal provider
//!
//! Turns a login and password into an authenticated [`Principal`] whose
//! roles come from directory group membership:
//! - login normalization and validation
//! - directory bind and user/group lookup
//! - group to role mapping
//!
//! [`Principal`]: adauth_core::Principal

pub mod directory;
pub mod resolver;
pub mod roles;
pub mod username;

pub use directory::{DirectoryClient, DirectoryUser, LdapDirectory};
pub use resolver::{FetchOutcome, PrincipalResolver, SUPPORTED_KINDS};
pub use roles::{map_roles, role_for_group};
pub use username::normalize;
