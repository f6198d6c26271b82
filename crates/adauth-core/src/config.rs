//! Configuration for adauth
//!
//! Loaded once at startup from a TOML file and/or `ADAUTH_*` environment
//! variables, then compiled into immutable settings. Regexes are compiled and
//! checked at load time so a bad pattern never reaches a login request.

use regex::Regex;
use secrecy::SecretString;
use serde::Deserialize;
use tracing::warn;

/// Default username validation pattern: ASCII letters, digits, hyphen and dot
pub const DEFAULT_USERNAME_VALIDATION_PATTERN: &str = r"(?i-u)^[a-z0-9.-]+$";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdAuthConfig {
    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub ldap: LdapConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AdAuthConfig {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Overlay `ADAUTH_*` environment variables on top of this configuration
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(flag) = lookup("ADAUTH_RECURSIVE_GROUPROLES") {
            match parse_bool(&flag) {
                Some(v) => self.provider.recursive_grouproles = v,
                None => warn!("Ignoring ADAUTH_RECURSIVE_GROUPROLES={}: not a boolean", flag),
            }
        }
        if let Some(patterns) = lookup("ADAUTH_USERNAME_PATTERNS") {
            // JSON array, since regexes may contain any separator
            match serde_json::from_str::<Vec<String>>(&patterns) {
                Ok(list) => self.provider.username_patterns = list,
                Err(e) => warn!("Ignoring ADAUTH_USERNAME_PATTERNS: {}", e),
            }
        }
        if let Some(pattern) = lookup("ADAUTH_USERNAME_VALIDATION_PATTERN") {
            self.provider.username_validation_pattern = pattern;
        }

        if let Some(url) = lookup("ADAUTH_LDAP_URL") {
            self.ldap.server_url = url;
        }
        if let Some(flag) = lookup("ADAUTH_LDAP_START_TLS") {
            match parse_bool(&flag) {
                Some(v) => self.ldap.start_tls = v,
                None => warn!("Ignoring ADAUTH_LDAP_START_TLS={}: not a boolean", flag),
            }
        }
        if let Some(dn) = lookup("ADAUTH_LDAP_BIND_DN") {
            self.ldap.bind_dn = Some(dn);
        }
        if let Some(password) = lookup("ADAUTH_LDAP_BIND_PASSWORD") {
            self.ldap.bind_password = SecretString::from(password);
        }
        if let Some(suffix) = lookup("ADAUTH_LDAP_ACCOUNT_SUFFIX") {
            self.ldap.account_suffix = Some(suffix);
        }
        if let Some(base) = lookup("ADAUTH_LDAP_USER_BASE_DN") {
            self.ldap.user_base_dn = base;
        }
        if let Some(base) = lookup("ADAUTH_LDAP_GROUP_BASE_DN") {
            self.ldap.group_base_dn = Some(base);
        }
        if let Some(secs) = lookup("ADAUTH_LDAP_TIMEOUT") {
            match secs.parse() {
                Ok(v) => self.ldap.timeout_seconds = v,
                Err(_) => warn!("Ignoring ADAUTH_LDAP_TIMEOUT={}: not a number", secs),
            }
        }

        if let Some(level) = lookup("ADAUTH_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("ADAUTH_LOG_FORMAT") {
            self.logging.format = format;
        }

        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.provider.compile()?;
        self.ldap.validate()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Username and role rules, as written in the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Expand nested group membership when fetching groups
    #[serde(default)]
    pub recursive_grouproles: bool,

    /// Ordered extraction patterns; the first capture group of the first
    /// matching pattern becomes the username
    /// Example: `'^[^\\]+\\(.+)$'` for `DOMAIN\user`
    #[serde(default)]
    pub username_patterns: Vec<String>,

    /// Pattern the lower-cased username must match
    #[serde(default = "default_validation_pattern")]
    pub username_validation_pattern: String,
}

fn default_validation_pattern() -> String {
    DEFAULT_USERNAME_VALIDATION_PATTERN.to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            recursive_grouproles: false,
            username_patterns: Vec::new(),
            username_validation_pattern: default_validation_pattern(),
        }
    }
}

impl ProviderConfig {
    /// Compile the patterns into immutable [`ProviderSettings`]
    pub fn compile(&self) -> crate::Result<ProviderSettings> {
        let mut username_patterns = Vec::with_capacity(self.username_patterns.len());
        for pattern in &self.username_patterns {
            let re = Regex::new(pattern).map_err(|e| {
                crate::Error::Config(format!("Invalid username pattern '{}': {}", pattern, e))
            })?;
            // captures_len counts the implicit whole-match group
            if re.captures_len() < 2 {
                return Err(crate::Error::Config(format!(
                    "Username pattern '{}' has no capture group",
                    pattern
                )));
            }
            username_patterns.push(re);
        }

        let username_validation = Regex::new(&self.username_validation_pattern).map_err(|e| {
            crate::Error::Config(format!(
                "Invalid username validation pattern '{}': {}",
                self.username_validation_pattern, e
            ))
        })?;

        Ok(ProviderSettings {
            recursive_grouproles: self.recursive_grouproles,
            username_patterns,
            username_validation,
        })
    }
}

/// Compiled, read-only provider settings
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub recursive_grouproles: bool,
    pub username_patterns: Vec<Regex>,
    pub username_validation: Regex,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            recursive_grouproles: false,
            username_patterns: Vec::new(),
            username_validation: Regex::new(DEFAULT_USERNAME_VALIDATION_PATTERN)
                .expect("default validation pattern compiles"),
        }
    }
}

// ============================================================================
// LDAP Configuration
// ============================================================================

/// LDAP server configuration.
///
/// `user_filter` and `attribute_mappings` default per `server_type` when
/// the file leaves them out.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "LdapConfigFile")]
pub struct LdapConfig {
    /// LDAP server URL (ldap:// or ldaps://)
    /// Example: "ldaps://dc1.example.com:636"
    pub server_url: String,

    /// Use STARTTLS for connection upgrade
    pub start_tls: bool,

    /// Skip TLS certificate verification (not recommended for production)
    pub skip_tls_verify: bool,

    /// Service account used for lookups
    /// Example: "cn=svc-auth,ou=service,dc=example,dc=com"
    pub bind_dn: Option<String>,

    /// Service account password
    pub bind_password: SecretString,

    /// Suffix appended to the username for a direct user bind
    /// Example: "@example.com"
    pub account_suffix: Option<String>,

    /// Base DN for user searches
    /// Example: "ou=users,dc=example,dc=com"
    pub user_base_dn: String,

    /// User search filter
    /// Use {username} as placeholder
    pub user_filter: String,

    /// Base DN for recursive group searches (defaults to the user base DN)
    pub group_base_dn: Option<String>,

    /// LDAP attribute mappings
    pub attribute_mappings: AttributeMappings,

    /// Connection timeout in seconds
    pub timeout_seconds: u64,

    /// LDAP server type hint
    pub server_type: LdapServerType,
}

/// `[ldap]` section as written in the file, before server-type defaults
#[derive(Deserialize)]
#[serde(default, rename_all = "snake_case")]
struct LdapConfigFile {
    server_url: String,
    start_tls: bool,
    skip_tls_verify: bool,
    bind_dn: Option<String>,
    bind_password: SecretString,
    account_suffix: Option<String>,
    user_base_dn: String,
    user_filter: Option<String>,
    group_base_dn: Option<String>,
    attribute_mappings: AttributeMappingsFile,
    timeout_seconds: u64,
    server_type: LdapServerType,
}

impl Default for LdapConfigFile {
    fn default() -> Self {
        Self {
            server_url: default_ldap_url(),
            start_tls: false,
            skip_tls_verify: false,
            bind_dn: None,
            bind_password: empty_secret(),
            account_suffix: None,
            user_base_dn: String::new(),
            user_filter: None,
            group_base_dn: None,
            attribute_mappings: AttributeMappingsFile::default(),
            timeout_seconds: default_timeout(),
            server_type: LdapServerType::default(),
        }
    }
}

impl From<LdapConfigFile> for LdapConfig {
    fn from(file: LdapConfigFile) -> Self {
        let user_filter = file
            .user_filter
            .unwrap_or_else(|| file.server_type.default_user_filter().to_string());
        let attribute_mappings = file
            .attribute_mappings
            .over(AttributeMappings::for_server_type(file.server_type));

        Self {
            server_url: file.server_url,
            start_tls: file.start_tls,
            skip_tls_verify: file.skip_tls_verify,
            bind_dn: file.bind_dn,
            bind_password: file.bind_password,
            account_suffix: file.account_suffix,
            user_base_dn: file.user_base_dn,
            user_filter,
            group_base_dn: file.group_base_dn,
            attribute_mappings,
            timeout_seconds: file.timeout_seconds,
            server_type: file.server_type,
        }
    }
}

fn default_ldap_url() -> String {
    "ldap://localhost:389".to_string()
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

fn default_timeout() -> u64 {
    10
}

impl Default for LdapConfig {
    fn default() -> Self {
        LdapConfigFile::default().into()
    }
}

impl LdapConfig {
    /// Create configuration from server type with sensible defaults
    pub fn from_server_type(server_type: LdapServerType, server_url: &str) -> Self {
        LdapConfigFile {
            server_url: server_url.to_string(),
            server_type,
            ..Default::default()
        }
        .into()
    }

    /// Build user search filter; `username` must already be filter-escaped
    pub fn build_user_filter(&self, username: &str) -> String {
        self.user_filter.replace("{username}", username)
    }

    /// Base DN for group searches
    pub fn group_search_base(&self) -> &str {
        self.group_base_dn.as_deref().unwrap_or(&self.user_base_dn)
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.server_url.is_empty() {
            return Err(crate::Error::Config("Server URL is required".into()));
        }

        if !self.server_url.starts_with("ldap://") && !self.server_url.starts_with("ldaps://") {
            return Err(crate::Error::Config(
                "Server URL must start with ldap:// or ldaps://".into(),
            ));
        }

        if self.user_base_dn.is_empty() {
            return Err(crate::Error::Config("User base DN is required".into()));
        }

        if !self.user_filter.contains("{username}") {
            return Err(crate::Error::Config(
                "User filter must contain {username} placeholder".into(),
            ));
        }

        if self.bind_dn.is_none() && self.account_suffix.is_none() {
            return Err(crate::Error::Config(
                "Either bind_dn or account_suffix is required".into(),
            ));
        }

        Ok(())
    }
}

/// LDAP server type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LdapServerType {
    /// Microsoft Active Directory
    #[default]
    ActiveDirectory,
    /// OpenLDAP and other RFC 2307 directories
    OpenLdap,
}

impl LdapServerType {
    /// Get default user filter for this server type
    pub fn default_user_filter(&self) -> &'static str {
        match self {
            LdapServerType::ActiveDirectory => "(sAMAccountName={username})",
            LdapServerType::OpenLdap => "(uid={username})",
        }
    }

    /// Whether the server understands the in-chain matching rule
    pub fn supports_in_chain(&self) -> bool {
        matches!(self, LdapServerType::ActiveDirectory)
    }
}

/// LDAP attribute mappings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMappings {
    /// Email attribute
    pub email: String,

    /// Display name attribute
    pub display_name: String,

    /// Group name attribute
    pub group_name: String,

    /// Attribute listing the DNs of the groups a user belongs to
    pub member_of: String,
}

impl Default for AttributeMappings {
    fn default() -> Self {
        Self::active_directory()
    }
}

impl AttributeMappings {
    /// Get Active Directory default mappings
    pub fn active_directory() -> Self {
        Self {
            email: "mail".to_string(),
            display_name: "displayName".to_string(),
            group_name: "cn".to_string(),
            member_of: "memberOf".to_string(),
        }
    }

    /// Get OpenLDAP default mappings
    pub fn openldap() -> Self {
        Self {
            email: "mail".to_string(),
            display_name: "cn".to_string(),
            group_name: "cn".to_string(),
            member_of: "memberOf".to_string(),
        }
    }

    pub fn for_server_type(server_type: LdapServerType) -> Self {
        match server_type {
            LdapServerType::ActiveDirectory => Self::active_directory(),
            LdapServerType::OpenLdap => Self::openldap(),
        }
    }
}

/// `[ldap.attribute_mappings]` as written; unset entries fall back per server type
#[derive(Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
struct AttributeMappingsFile {
    email: Option<String>,
    display_name: Option<String>,
    group_name: Option<String>,
    member_of: Option<String>,
}

impl AttributeMappingsFile {
    fn over(self, defaults: AttributeMappings) -> AttributeMappings {
        AttributeMappings {
            email: self.email.unwrap_or(defaults.email),
            display_name: self.display_name.unwrap_or(defaults.display_name),
            group_name: self.group_name.unwrap_or(defaults.group_name),
            member_of: self.member_of.unwrap_or(defaults.member_of),
        }
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AdAuthConfig::default();

        assert!(!config.provider.recursive_grouproles);
        assert!(config.provider.username_patterns.is_empty());
        assert_eq!(
            config.provider.username_validation_pattern,
            DEFAULT_USERNAME_VALIDATION_PATTERN
        );
        assert_eq!(config.ldap.user_filter, "(sAMAccountName={username})");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_toml() {
        let config = AdAuthConfig::from_toml(
            r#"
            [provider]
            recursive_grouproles = true
            username_patterns = ['^[^\\]+\\(.+)$', '^([^@]+)@']

            [ldap]
            server_url = "ldaps://dc1.example.com:636"
            account_suffix = "@example.com"
            user_base_dn = "dc=example,dc=com"
            bind_password = "s3cret"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert!(config.provider.recursive_grouproles);
        assert_eq!(config.provider.username_patterns.len(), 2);
        assert_eq!(config.ldap.account_suffix.as_deref(), Some("@example.com"));
        assert_eq!(config.ldap.bind_password.expose_secret(), "s3cret");
        assert_eq!(config.logging.format, "json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml_rejects_garbage() {
        let err = AdAuthConfig::from_toml("[provider\nrecursive_grouproles = ").unwrap_err();
        assert_eq!(err.code(), "ConfigError");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ADAUTH_RECURSIVE_GROUPROLES", "yes"),
            ("ADAUTH_USERNAME_PATTERNS", r#"["^([^@]+)@example\\.com$"]"#),
            ("ADAUTH_LDAP_URL", "ldap://dc2.example.com"),
            ("ADAUTH_LDAP_TIMEOUT", "not-a-number"),
            ("ADAUTH_LOG_LEVEL", "debug"),
        ]);

        let config = AdAuthConfig::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert!(config.provider.recursive_grouproles);
        assert_eq!(
            config.provider.username_patterns,
            vec![r"^([^@]+)@example\.com$".to_string()]
        );
        assert_eq!(config.ldap.server_url, "ldap://dc2.example.com");
        assert_eq!(config.ldap.timeout_seconds, 10);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_compile_rejects_pattern_without_capture_group() {
        let config = ProviderConfig {
            username_patterns: vec![r"^[^@]+@example\.com$".to_string()],
            ..Default::default()
        };

        let err = config.compile().unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_compile_rejects_invalid_regex() {
        let config = ProviderConfig {
            username_validation_pattern: "^[a-z".to_string(),
            ..Default::default()
        };

        assert!(config.compile().is_err());
    }

    #[test]
    fn test_ldap_validation() {
        let mut config = LdapConfig::default();

        // Should fail - no user base DN
        assert!(config.validate().is_err());

        config.user_base_dn = "ou=users,dc=example,dc=com".to_string();
        // Should fail - no way to bind
        assert!(config.validate().is_err());

        config.bind_dn = Some("cn=svc,dc=example,dc=com".to_string());
        assert!(config.validate().is_ok());

        config.server_url = "http://dc.example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_openldap_defaults() {
        let config = LdapConfig::from_server_type(LdapServerType::OpenLdap, "ldap://ldap:389");

        assert_eq!(config.user_filter, "(uid={username})");
        assert_eq!(config.attribute_mappings.display_name, "cn");
        assert!(!config.server_type.supports_in_chain());
        assert_eq!(config.build_user_filter("jdoe"), "(uid=jdoe)");
    }

    #[test]
    fn test_server_type_in_toml_sets_ldap_defaults() {
        let config = AdAuthConfig::from_toml(
            r#"
            [ldap]
            server_type = "open_ldap"
            server_url = "ldap://ldap.example.com"
            user_base_dn = "ou=people,dc=example,dc=com"
            bind_dn = "cn=svc,dc=example,dc=com"
            "#,
        )
        .unwrap();

        assert_eq!(config.ldap.server_type, LdapServerType::OpenLdap);
        assert_eq!(config.ldap.user_filter, "(uid={username})");
        assert_eq!(config.ldap.attribute_mappings, AttributeMappings::openldap());
        assert_eq!(config.ldap.timeout_seconds, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_ldap_settings_win_over_server_type() {
        let config = AdAuthConfig::from_toml(
            r#"
            [ldap]
            server_type = "open_ldap"
            user_filter = "(mail={username})"

            [ldap.attribute_mappings]
            display_name = "displayName"
            "#,
        )
        .unwrap();

        assert_eq!(config.ldap.user_filter, "(mail={username})");
        assert_eq!(config.ldap.attribute_mappings.display_name, "displayName");
        assert_eq!(config.ldap.attribute_mappings.group_name, "cn");
        assert_eq!(config.ldap.attribute_mappings.email, "mail");
    }
}
