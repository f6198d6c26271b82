//! LDAP directory client
//!
//! Handles the connection, the user bind and the user/group queries against
//! Active Directory or OpenLDAP. Supports LDAP, LDAPS and STARTTLS.

use super::{DirectoryClient, DirectoryUser};
use adauth_core::config::LdapConfig;
use adauth_core::{Error, Result};
use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Active Directory LDAP_MATCHING_RULE_IN_CHAIN, walks nested membership
const IN_CHAIN_RULE: &str = "1.2.840.113556.1.4.1941";

const PRIMARY_GROUP_ID_ATTR: &str = "primaryGroupID";
const OBJECT_SID_ATTR: &str = "objectSid";

/// LDAP-backed [`DirectoryClient`]; one instance per resolution
pub struct LdapDirectory {
    config: LdapConfig,
    ldap: Option<Ldap>,
}

impl LdapDirectory {
    pub fn new(config: LdapConfig) -> Self {
        Self { config, ldap: None }
    }

    pub fn is_connected(&self) -> bool {
        self.ldap.is_some()
    }

    /// Close the session, if any
    pub async fn disconnect(&mut self) {
        if let Some(mut ldap) = self.ldap.take() {
            let _ = ldap.unbind().await;
        }
    }

    /// Create LDAP connection with proper TLS settings
    async fn create_connection(&self) -> Result<(LdapConnAsync, Ldap)> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(Duration::from_secs(self.config.timeout_seconds))
            .set_starttls(self.config.start_tls)
            .set_no_tls_verify(self.config.skip_tls_verify);

        debug!("Connecting to LDAP server: {}", self.config.server_url);

        LdapConnAsync::with_settings(settings, &self.config.server_url)
            .await
            .map_err(|e| Error::Directory(format!("Failed to connect to LDAP server: {}", e)))
    }

    /// Bind as the configured service account, if there is one
    async fn bind_service_account(&mut self) -> Result<bool> {
        let Some(bind_dn) = self.config.bind_dn.as_deref() else {
            return Ok(false);
        };
        let ldap = session(&mut self.ldap)?;

        let result = ldap
            .simple_bind(bind_dn, self.config.bind_password.expose_secret())
            .await
            .map_err(|e| Error::Directory(format!("Service bind failed: {}", e)))?;

        if result.rc != 0 {
            return Err(Error::Directory(format!(
                "Service account bind failed with code: {}",
                result.rc
            )));
        }

        Ok(true)
    }

    /// DN to bind as when verifying `username`'s password
    async fn user_bind_dn(&mut self, username: &str) -> Result<Option<String>> {
        if let Some(suffix) = &self.config.account_suffix {
            return Ok(Some(format!("{}{}", username, suffix)));
        }

        self.bind_service_account().await?;
        Ok(self
            .find_user_entry(username, vec!["1.1".to_string()])
            .await?
            .map(|entry| entry.dn))
    }

    async fn find_user_entry(
        &mut self,
        username: &str,
        attrs: Vec<String>,
    ) -> Result<Option<SearchEntry>> {
        let filter = self
            .config
            .build_user_filter(&escape_filter_value(username));
        let ldap = session(&mut self.ldap)?;

        debug!("Searching for user with filter: {}", filter);

        let (rs, _res) = ldap
            .search(&self.config.user_base_dn, Scope::Subtree, &filter, attrs)
            .await
            .map_err(|e| Error::Directory(format!("User search failed: {}", e)))?
            .success()
            .map_err(|e| Error::Directory(format!("User search error: {}", e)))?;

        Ok(rs.into_iter().next().map(SearchEntry::construct))
    }

    async fn nested_groups(&mut self, user_dn: &str) -> Result<Vec<String>> {
        let filter = format!(
            "(&(objectClass=group)(member:{}:={}))",
            IN_CHAIN_RULE,
            escape_filter_value(user_dn)
        );
        let group_attr = self.config.attribute_mappings.group_name.clone();
        let ldap = session(&mut self.ldap)?;

        debug!("Searching groups with filter: {}", filter);

        let (rs, _res) = ldap
            .search(
                self.config.group_search_base(),
                Scope::Subtree,
                &filter,
                vec![group_attr.as_str()],
            )
            .await
            .map_err(|e| Error::Directory(format!("Group search failed: {}", e)))?
            .success()
            .map_err(|e| Error::Directory(format!("Group search error: {}", e)))?;

        let mut groups = Vec::new();
        for result in rs {
            let entry = SearchEntry::construct(result);
            if let Some(name) = get_first_attr(&entry, &group_attr) {
                groups.push(name);
            }
        }

        Ok(groups)
    }

    /// Name of the user's primary group, which AD never lists in `memberOf`
    async fn primary_group(&mut self, entry: &SearchEntry) -> Result<Option<String>> {
        let Some(filter) = primary_group_filter(entry) else {
            return Ok(None);
        };
        let base = domain_root(&entry.dn)
            .unwrap_or_else(|| self.config.group_search_base().to_string());
        let group_attr = self.config.attribute_mappings.group_name.clone();
        let ldap = session(&mut self.ldap)?;

        debug!("Searching primary group with filter: {}", filter);

        let (rs, _res) = ldap
            .search(&base, Scope::Subtree, &filter, vec![group_attr.as_str()])
            .await
            .map_err(|e| Error::Directory(format!("Primary group search failed: {}", e)))?
            .success()
            .map_err(|e| Error::Directory(format!("Primary group search error: {}", e)))?;

        Ok(rs
            .into_iter()
            .next()
            .map(SearchEntry::construct)
            .and_then(|group| get_first_attr(&group, &group_attr)))
    }
}

#[async_trait]
impl DirectoryClient for LdapDirectory {
    async fn connect(&mut self) -> bool {
        match self.create_connection().await {
            Ok((conn, ldap)) => {
                ldap3::drive!(conn);
                self.ldap = Some(ldap);
                true
            }
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    async fn authenticate(&mut self, username: &str, credential: &SecretString) -> bool {
        if self.ldap.is_none() {
            return false;
        }

        // An empty simple bind is an anonymous bind and always succeeds
        if credential.expose_secret().is_empty() {
            debug!("Refusing empty credential for: {}", username);
            return false;
        }

        let user_dn = match self.user_bind_dn(username).await {
            Ok(Some(dn)) => dn,
            Ok(None) => {
                debug!("No directory entry to bind as for: {}", username);
                return false;
            }
            Err(e) => {
                warn!("{}", e);
                return false;
            }
        };

        let Ok(ldap) = session(&mut self.ldap) else {
            return false;
        };
        let rc = match ldap.simple_bind(&user_dn, credential.expose_secret()).await {
            Ok(result) => result.rc,
            Err(e) => {
                warn!("User bind failed: {}", e);
                return false;
            }
        };

        if rc != 0 {
            // 49 = invalid credentials, 53 = account disabled/locked
            debug!("User bind for {} rejected with code: {}", username, rc);
            return false;
        }

        info!("Directory bind succeeded for: {}", username);

        // Lookups run as the service account when one is configured
        if let Err(e) = self.bind_service_account().await {
            warn!("{}; continuing with the user's own bind", e);
        }

        true
    }

    async fn user_info(&mut self, username: &str) -> Result<Option<DirectoryUser>> {
        let mappings = &self.config.attribute_mappings;
        let attrs = vec![mappings.display_name.clone(), mappings.email.clone()];

        let Some(entry) = self.find_user_entry(username, attrs).await? else {
            return Ok(None);
        };

        let mappings = &self.config.attribute_mappings;
        Ok(Some(DirectoryUser {
            display_name: get_first_attr(&entry, &mappings.display_name),
            mail: get_first_attr(&entry, &mappings.email),
            dn: entry.dn,
        }))
    }

    async fn user_groups(&mut self, username: &str, recursive: bool) -> Result<Vec<String>> {
        let member_of = self.config.attribute_mappings.member_of.clone();
        let is_ad = self.config.server_type.supports_in_chain();

        let mut attrs = vec![member_of.clone()];
        if is_ad {
            attrs.push(PRIMARY_GROUP_ID_ATTR.to_string());
            attrs.push(OBJECT_SID_ATTR.to_string());
        }

        let Some(entry) = self.find_user_entry(username, attrs).await? else {
            return Ok(Vec::new());
        };

        let mut groups: Vec<String> = if recursive && is_ad {
            self.nested_groups(&entry.dn).await?
        } else {
            if recursive {
                warn!("Recursive group lookup is only supported on Active Directory; using direct membership");
            }
            entry
                .attrs
                .get(&member_of)
                .map(|dns| dns.iter().filter_map(|dn| group_name_from_dn(dn)).collect())
                .unwrap_or_default()
        };

        if is_ad {
            if let Some(primary) = self.primary_group(&entry).await? {
                if !groups.contains(&primary) {
                    groups.push(primary);
                }
            }
        }

        debug!(
            "Found {} groups{} for {}",
            groups.len(),
            if recursive && is_ad { " (recursive)" } else { "" },
            username
        );
        Ok(groups)
    }
}

fn session(ldap: &mut Option<Ldap>) -> Result<&mut Ldap> {
    ldap.as_mut()
        .ok_or_else(|| Error::Directory("Not connected to LDAP server".to_string()))
}

/// Helper to get first attribute value from LDAP entry
fn get_first_attr(entry: &SearchEntry, attr: &str) -> Option<String> {
    entry.attrs.get(attr).and_then(|v| v.first().cloned())
}

/// First value of an attribute as raw bytes. Values that happen to be
/// valid UTF-8 end up in `attrs` rather than `bin_attrs`.
fn get_first_binary_attr<'a>(entry: &'a SearchEntry, attr: &str) -> Option<&'a [u8]> {
    entry
        .bin_attrs
        .get(attr)
        .and_then(|v| v.first())
        .map(Vec::as_slice)
        .or_else(|| {
            entry
                .attrs
                .get(attr)
                .and_then(|v| v.first())
                .map(String::as_bytes)
        })
}

/// `(objectSid=...)` filter for the primary group of a user entry carrying
/// `primaryGroupID` and `objectSid`
fn primary_group_filter(entry: &SearchEntry) -> Option<String> {
    let rid = get_first_attr(entry, PRIMARY_GROUP_ID_ATTR)?.parse::<u32>().ok()?;
    let user_sid = get_first_binary_attr(entry, OBJECT_SID_ATTR)?;
    let group_sid = primary_group_sid(user_sid, rid)?;

    Some(format!(
        "({}={})",
        OBJECT_SID_ATTR,
        escape_binary_filter_value(&group_sid)
    ))
}

/// Binary SID of a group in the same domain as `user_sid`: the last
/// sub-authority (the user's RID) is replaced by `rid`.
///
/// Layout: revision, sub-authority count, 6-byte authority, then
/// little-endian u32 sub-authorities.
pub fn primary_group_sid(user_sid: &[u8], rid: u32) -> Option<Vec<u8>> {
    let count = usize::from(*user_sid.get(1)?);
    let len = 8 + 4 * count;
    if count == 0 || user_sid.len() != len {
        return None;
    }

    let mut sid = user_sid.to_vec();
    sid[len - 4..].copy_from_slice(&rid.to_le_bytes());
    Some(sid)
}

/// Escape every byte of a binary value as `\xx` for a search filter
pub fn escape_binary_filter_value(value: &[u8]) -> String {
    value.iter().map(|byte| format!("\\{:02x}", byte)).collect()
}

/// The `DC=` components of a DN: `CN=jdoe,OU=Users,DC=example,DC=com` gives
/// `DC=example,DC=com`
pub fn domain_root(dn: &str) -> Option<String> {
    let parts: Vec<&str> = dn
        .split(',')
        .map(str::trim)
        .filter(|rdn| rdn.get(..3).is_some_and(|key| key.eq_ignore_ascii_case("dc=")))
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(","))
    }
}

/// Escape a value for use inside an LDAP search filter (RFC 4515)
pub fn escape_filter_value(value: &str) -> String {
    ldap3::ldap_escape(value).into_owned()
}

/// Value of the first RDN of a DN: `CN=Domain Admins,OU=Groups,...` gives
/// `Domain Admins`. Handles `\,` style and `\2C` style escapes.
pub fn group_name_from_dn(dn: &str) -> Option<String> {
    let (_, rest) = dn.split_once('=')?;
    let bytes = rest.as_bytes();
    let mut value = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' if i + 1 < bytes.len() => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .and_then(|pair| std::str::from_utf8(pair).ok())
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok());
                match hex {
                    Some(byte) => {
                        value.push(byte);
                        i += 3;
                    }
                    None => {
                        value.push(bytes[i + 1]);
                        i += 2;
                    }
                }
            }
            b',' | b'+' => break,
            byte => {
                value.push(byte);
                i += 1;
            }
        }
    }

    let name = String::from_utf8_lossy(&value).trim().to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_group_name_from_dn() {
        assert_eq!(
            group_name_from_dn("CN=Domain Admins,OU=Groups,DC=example,DC=com").as_deref(),
            Some("Domain Admins")
        );
        assert_eq!(
            group_name_from_dn("cn=VPN Users,dc=example,dc=com").as_deref(),
            Some("VPN Users")
        );
    }

    #[test]
    fn test_group_name_with_escapes() {
        assert_eq!(
            group_name_from_dn(r"CN=Sales\, EMEA,OU=Groups,DC=example,DC=com").as_deref(),
            Some("Sales, EMEA")
        );
        assert_eq!(
            group_name_from_dn(r"CN=R\26D,DC=example,DC=com").as_deref(),
            Some("R&D")
        );
    }

    #[test]
    fn test_group_name_from_malformed_dn() {
        assert_eq!(group_name_from_dn("not a dn"), None);
        assert_eq!(group_name_from_dn("CN=,DC=example"), None);
    }

    #[test]
    fn test_filter_escaping() {
        assert_eq!(escape_filter_value("jdoe"), "jdoe");

        let escaped = escape_filter_value("*)(cn=*");
        assert!(!escaped.contains(&['*', '(', ')'][..]));
    }

    // S-1-5-21-1-2-3-1104
    const USER_SID: [u8; 28] = [
        1, 5, 0, 0, 0, 0, 0, 5, 21, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 0x50, 0x04, 0,
        0,
    ];

    fn user_entry(primary_group_id: &str, sid: &[u8]) -> SearchEntry {
        SearchEntry {
            dn: "CN=John Doe,OU=Users,DC=example,DC=com".to_string(),
            attrs: HashMap::from([(
                PRIMARY_GROUP_ID_ATTR.to_string(),
                vec![primary_group_id.to_string()],
            )]),
            bin_attrs: HashMap::from([(OBJECT_SID_ATTR.to_string(), vec![sid.to_vec()])]),
        }
    }

    #[test]
    fn test_primary_group_sid_replaces_rid() {
        let sid = primary_group_sid(&USER_SID, 513).unwrap();

        assert_eq!(&sid[..24], &USER_SID[..24]);
        assert_eq!(&sid[24..], &[0x01, 0x02, 0, 0]);
    }

    #[test]
    fn test_primary_group_sid_rejects_malformed_sid() {
        assert_eq!(primary_group_sid(&[], 513), None);
        assert_eq!(primary_group_sid(&USER_SID[..20], 513), None);
        assert_eq!(primary_group_sid(&[1, 0, 0, 0, 0, 0, 0, 5], 513), None);
    }

    #[test]
    fn test_primary_group_filter() {
        let filter = primary_group_filter(&user_entry("513", &USER_SID)).unwrap();

        assert_eq!(
            filter,
            r"(objectSid=\01\05\00\00\00\00\00\05\15\00\00\00\01\00\00\00\02\00\00\00\03\00\00\00\01\02\00\00)"
        );
    }

    #[test]
    fn test_primary_group_filter_needs_both_attributes() {
        assert_eq!(primary_group_filter(&user_entry("not-a-rid", &USER_SID)), None);

        let mut entry = user_entry("513", &USER_SID);
        entry.bin_attrs.clear();
        assert_eq!(primary_group_filter(&entry), None);
    }

    #[test]
    fn test_domain_root() {
        assert_eq!(
            domain_root("CN=John Doe,OU=Users,DC=example,DC=com").as_deref(),
            Some("DC=example,DC=com")
        );
        assert_eq!(
            domain_root(r"cn=Sales\, EMEA,dc=corp, dc=local").as_deref(),
            Some("dc=corp,dc=local")
        );
        assert_eq!(domain_root("uid=jdoe,ou=people,o=example"), None);
    }

    #[test]
    fn test_new_directory_is_disconnected() {
        let directory = LdapDirectory::new(LdapConfig::default());
        assert!(!directory.is_connected());
    }

    #[tokio::test]
    async fn test_authenticate_without_connection_fails() {
        let mut directory = LdapDirectory::new(LdapConfig::default());
        let credential = SecretString::from("password".to_string());

        assert!(!directory.authenticate("jdoe", &credential).await);
    }

    #[tokio::test]
    async fn test_lookup_without_connection_is_directory_error() {
        let mut directory = LdapDirectory::new(LdapConfig {
            user_base_dn: "dc=example,dc=com".to_string(),
            ..Default::default()
        });

        let err = directory.user_info("jdoe").await.unwrap_err();
        assert_eq!(err.code(), "DirectoryError");
    }
}
