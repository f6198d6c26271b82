//! Principal resolution
//!
//! Normalizes the login, drives the directory session and builds the
//! principal's authorization profile.

use crate::directory::DirectoryClient;
use crate::roles::map_roles;
use crate::username::normalize;
use adauth_core::config::ProviderConfig;
use adauth_core::{
    DirectoryProfile, Error, Principal, ProviderSettings, RecordKind, Result, UserRecord,
    UsernameError,
};
use secrecy::SecretString;
use tracing::{debug, info, warn};

/// Record kinds this resolver can refresh
pub const SUPPORTED_KINDS: &[RecordKind] = &[RecordKind::Directory];

/// Non-error results of a directory fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum FetchOutcome {
    /// Roles and attributes were applied; the principal is resolved
    Resolved,
    /// The bind succeeded but the directory has no entry for the user.
    /// The principal is left untouched and unresolved.
    NoRecord,
}

/// Resolves principals against a directory
#[derive(Debug, Clone, Default)]
pub struct PrincipalResolver {
    settings: ProviderSettings,
}

impl PrincipalResolver {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Ok(Self::new(config.compile()?))
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Canonical username for a raw login
    pub fn normalize_username(&self, raw: &str) -> std::result::Result<String, UsernameError> {
        normalize(
            raw,
            &self.settings.username_patterns,
            &self.settings.username_validation,
        )
    }

    /// Build an unresolved principal for a raw login.
    ///
    /// Failures are [`Error::InvalidLogin`], which callers report as
    /// "principal not found".
    pub fn resolve_identity(&self, raw_login: &str) -> Result<Principal> {
        let username = self.normalize_username(raw_login).map_err(|e| {
                debug!("Rejected login: {}", e);
                Error::InvalidLogin(e)
            })?;

        Ok(Principal::new(username))
    }

    /// Authenticate `principal` against the directory and load its profile.
    ///
    /// Connection and bind are both attempted before either failure is
    /// reported, so [`Error::AuthenticationFailed`] carries both statuses.
    /// Profile changes are applied in one step after every lookup succeeded.
    pub async fn fetch_directory_data<D>(
        &self,
        principal: &mut Principal,
        credential: &SecretString,
        client: &mut D,
    ) -> Result<FetchOutcome>
    where
        D: DirectoryClient + ?Sized,
    {
        let username = principal.username().to_string();

        let connected = client.connect().await;
        let authenticated = client.authenticate(&username, credential).await;

        if !connected || !authenticated {
            warn!(
                "Directory authentication failed for {} (connected: {}, authenticated: {})",
                username, connected, authenticated
            );
            return Err(Error::AuthenticationFailed {
                connected,
                authenticated,
            });
        }

        let Some(user) = client.user_info(&username).await? else {
            info!("No directory record for authenticated user: {}", username);
            return Ok(FetchOutcome::NoRecord);
        };

        let groups = client
            .user_groups(&username, self.settings.recursive_grouproles)
            .await?;

        let roles = map_roles(&groups);
        debug!("Mapped {} groups to roles {:?} for {}", groups.len(), roles, username);

        principal.resolve(DirectoryProfile {
            roles,
            display_name: user.display_name,
            email: user.mail,
        });

        info!("Resolved principal: {}", username);
        Ok(FetchOutcome::Resolved)
    }

    /// One-shot login: resolve the identity, then fetch its directory data.
    ///
    /// Always yields a resolved principal or an error; a missing directory
    /// record becomes [`Error::UserNotFound`].
    pub async fn authenticate<D>(
        &self,
        raw_login: &str,
        credential: &SecretString,
        client: &mut D,
    ) -> Result<Principal>
    where
        D: DirectoryClient + ?Sized,
    {
        let mut principal = self.resolve_identity(raw_login)?;

        match self
            .fetch_directory_data(&mut principal, credential, client)
            .await?
        {
            FetchOutcome::Resolved => Ok(principal),
            FetchOutcome::NoRecord => Err(Error::UserNotFound {
                username: principal.username().to_string(),
            }),
        }
    }

    pub fn supports_record(&self, kind: RecordKind) -> bool {
        SUPPORTED_KINDS.contains(&kind)
    }

    /// Hand back a principal this resolver produced; nothing is re-fetched
    pub fn refresh(&self, record: Box<dyn UserRecord>) -> Result<Principal> {
        let kind = record.kind();
        if !self.supports_record(kind) {
            return Err(Error::UnsupportedRecord { kind });
        }

        record
            .into_principal()
            .ok_or(Error::UnsupportedRecord { kind })
    }
}
