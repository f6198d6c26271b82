//! adauth - Active Directory principal provider tool
//!
//! Checks logins against the username rules, previews group to role
//! mapping and runs full logins against a live directory.

use adauth_core::config::AdAuthConfig;
use adauth_core::{Error, Principal};
use adauth_provider::{map_roles, LdapDirectory, PrincipalResolver};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use serde_json::json;
use std::io::BufRead;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "adauth")]
#[command(author = "adauth Team")]
#[command(version = adauth_core::VERSION)]
#[command(about = "Active Directory principal provider", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "ADAUTH_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "ADAUTH_LOG_LEVEL")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize a login and check it against the username rules
    Check {
        /// Raw login, e.g. DOMAIN\jdoe or jdoe@example.com
        login: String,
    },

    /// Show the roles a list of directory groups maps to
    Roles {
        /// Group names, in membership order
        groups: Vec<String>,
    },

    /// Authenticate against the directory and print the resolved principal
    Login {
        /// Raw login
        login: String,

        /// Password; read from the first line of stdin when omitted
        #[arg(long, env = "ADAUTH_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Validate the configuration
    Validate,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Load or create config
    let config = match &cli.config {
        Some(path) => AdAuthConfig::from_file(path).map(AdAuthConfig::with_env_overrides),
        None => Ok(AdAuthConfig::from_env()),
    };

    let result = match config {
        Ok(config) => {
            init_logging(&config, cli.log_level.as_deref());
            run(cli.command, &config).await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}", serde_json::to_string_pretty(&error_json(&e))?);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn init_logging(config: &AdAuthConfig, level: Option<&str>) {
    let level = level.unwrap_or(&config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so stdout stays machine-readable
    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

/// Execute one subcommand; every failure comes back as a structured error
async fn run(command: Commands, config: &AdAuthConfig) -> adauth_core::Result<serde_json::Value> {
    let resolver = PrincipalResolver::from_config(&config.provider)?;

    match command {
        Commands::Check { login } => resolver
            .resolve_identity(&login)
            .map(|principal| json!({ "username": principal.username() })),
        Commands::Roles { groups } => Ok(json!({ "roles": map_roles(&groups) })),
        Commands::Login { login, password } => {
            let password = match password {
                Some(password) => password,
                None => read_password()?,
            };
            login_command(&resolver, config, &login, SecretString::from(password)).await
        }
        Commands::Validate => config
            .validate()
            .map(|_| json!({ "valid": true, "server_url": config.ldap.server_url })),
        Commands::Version => Ok(json!({ "version": adauth_core::VERSION })),
    }
}

fn read_password() -> std::io::Result<String> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
}

async fn login_command(
    resolver: &PrincipalResolver,
    config: &AdAuthConfig,
    login: &str,
    password: SecretString,
) -> adauth_core::Result<serde_json::Value> {
    config.ldap.validate()?;

    let mut directory = LdapDirectory::new(config.ldap.clone());
    let result = resolver.authenticate(login, &password, &mut directory).await;
    directory.disconnect().await;

    let principal = result?;
    info!("Login succeeded for {}", principal.username());
    Ok(principal_json(&principal))
}

fn principal_json(principal: &Principal) -> serde_json::Value {
    json!({
        "username": principal.username(),
        "display_name": principal.display_name(),
        "email": principal.email(),
        "roles": principal.roles(),
        "resolved_at": principal.resolved_at().map(|t| t.to_rfc3339()),
    })
}

/// Structured error output; rendering to prose is left to the caller
fn error_json(error: &Error) -> serde_json::Value {
    let params: serde_json::Map<String, serde_json::Value> = error
        .params()
        .into_iter()
        .map(|(name, value)| (name.to_string(), json!(value)))
        .collect();

    json!({
        "code": error.code(),
        "message_key": error.message_key(),
        "params": params,
        "not_found": error.is_not_found(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use adauth_core::UsernameError;

    #[test]
    fn test_error_json_is_structured() {
        let error = Error::InvalidLogin(UsernameError::RulesViolation {
            username: "john doe".to_string(),
        });

        let output = error_json(&error);

        assert_eq!(output["code"], "InvalidLogin");
        assert_eq!(output["message_key"], "active_directory.invalid_user");
        assert_eq!(output["params"]["username"], "john doe");
        assert_eq!(output["not_found"], true);
    }

    #[tokio::test]
    async fn test_bad_username_pattern_is_a_structured_error() {
        let mut config = AdAuthConfig::default();
        config.provider.username_patterns = vec!["^[^\\\\]+\\\\.+$".to_string()];

        let error = run(
            Commands::Check {
                login: "DOMAIN\\jdoe".to_string(),
            },
            &config,
        )
        .await
        .unwrap_err();
        let output = error_json(&error);

        assert!(matches!(error, Error::Config(_)));
        assert_eq!(output["code"], error.code());
        assert_eq!(output["not_found"], false);
    }

    #[tokio::test]
    async fn test_roles_command_output() {
        let output = run(
            Commands::Roles {
                groups: vec!["Domain Admins".to_string(), "Users".to_string()],
            },
            &AdAuthConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(output["roles"], json!(["ROLE_DOMAIN_ADMINS", "ROLE_USERS"]));
    }

    #[test]
    fn test_principal_json_for_unresolved_principal() {
        let output = principal_json(&Principal::new("jdoe"));

        assert_eq!(output["username"], "jdoe");
        assert!(output["display_name"].is_null());
        assert!(output["resolved_at"].is_null());
        assert_eq!(output["roles"], json!([]));
    }
}
