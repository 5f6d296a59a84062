use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Deployment environment. Development-only conveniences (demo seeding,
/// CSRF opt-out) are refused in production.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OAuth2Config {
    /// Authorization code lifetime in seconds
    #[serde(default = "default_code_lifetime")]
    pub authorization_code_lifetime: i64,
    /// Access token lifetime in seconds
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_lifetime: i64,
    /// Identity token lifetime in seconds
    #[serde(default = "default_identity_token_lifetime")]
    pub identity_token_lifetime: i64,
    /// Refresh token lifetime in seconds
    #[serde(default = "default_refresh_token_lifetime")]
    pub refresh_token_lifetime: i64,
    /// Tolerated clock skew when verifying token expiry, in seconds
    #[serde(default = "default_clock_skew")]
    pub clock_skew: i64,
    /// PKCS#8 PEM file holding the Ed25519 signing key
    #[serde(default)]
    pub signing_key_path: Option<PathBuf>,
    /// Generate an ephemeral signing key when no key file is configured.
    /// Tokens signed with it do not survive a restart.
    #[serde(default)]
    pub generate_signing_key: bool,
    /// `kid` header advertised for the signing key
    #[serde(default = "default_key_id")]
    pub key_id: String,
    /// Seconds between purges of expired codes and refresh tokens
    #[serde(default = "default_purge_interval")]
    pub purge_interval: u64,
}

impl Default for OAuth2Config {
    fn default() -> Self {
        Self {
            authorization_code_lifetime: default_code_lifetime(),
            access_token_lifetime: default_access_token_lifetime(),
            identity_token_lifetime: default_identity_token_lifetime(),
            refresh_token_lifetime: default_refresh_token_lifetime(),
            clock_skew: default_clock_skew(),
            signing_key_path: None,
            generate_signing_key: false,
            key_id: default_key_id(),
            purge_interval: default_purge_interval(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SecurityConfig {
    /// Accept plain HTTP issuer/redirect URIs and drop the `Secure` cookie flag.
    #[serde(default)]
    pub allow_insecure_http: bool,
    /// Skip the login form CSRF check. Refused in production.
    #[serde(default)]
    pub disable_csrf: bool,
    /// HMAC secret for session cookies
    pub session_secret: String,
    /// Session cookie lifetime in seconds
    #[serde(default = "default_session_lifetime")]
    pub session_lifetime: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LockoutConfig {
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: i32,
    /// Lockout duration in seconds
    #[serde(default = "default_lockout_duration")]
    pub lockout_duration: i64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_failed_attempts(),
            lockout_duration: default_lockout_duration(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct BootstrapConfig {
    /// Seed the demo client and admin user on startup (development only)
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Issuer identifier, also the public base URL of the server
    pub issuer_url: String,
    #[serde(default)]
    pub environment: Environment,
    /// Apply pending migrations at startup
    #[serde(default)]
    pub auto_migrate: bool,
    #[serde(default)]
    pub oauth2: OAuth2Config,
    pub security: SecurityConfig,
    #[serde(default)]
    pub lockout: LockoutConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

/// Ten years; keeps every computed expiry well inside the representable range.
const MAX_LIFETIME_SECONDS: i64 = 10 * 365 * 86400;
const MAX_CLOCK_SKEW_SECONDS: i64 = 3600;

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_code_lifetime() -> i64 {
    60
}

fn default_access_token_lifetime() -> i64 {
    3600
}

fn default_identity_token_lifetime() -> i64 {
    3600
}

fn default_refresh_token_lifetime() -> i64 {
    86400 * 14
}

fn default_clock_skew() -> i64 {
    60
}

fn default_key_id() -> String {
    "fortress-id-1".to_string()
}

fn default_purge_interval() -> u64 {
    3600
}

fn default_session_lifetime() -> i64 {
    8 * 3600
}

fn default_max_failed_attempts() -> i32 {
    5
}

fn default_lockout_duration() -> i64 {
    300
}

impl AppConfig {
    /// Check cross-field invariants. Insecure settings must be opted into
    /// explicitly, and some are never allowed in production.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.session_secret.len() < 32 {
            return Err(ConfigError::Validation(
                "security.session_secret must be at least 32 bytes".into(),
            ));
        }

        let issuer = url::Url::parse(&self.issuer_url)
            .map_err(|e| ConfigError::Validation(format!("issuer_url is not a URL: {e}")))?;
        if issuer.scheme() != "https" && !self.security.allow_insecure_http {
            return Err(ConfigError::Validation(
                "issuer_url must use https unless security.allow_insecure_http is set".into(),
            ));
        }
        if issuer.query().is_some() || issuer.fragment().is_some() {
            return Err(ConfigError::Validation(
                "issuer_url must not contain a query or fragment".into(),
            ));
        }

        if self.security.disable_csrf && self.environment == Environment::Production {
            return Err(ConfigError::Validation(
                "security.disable_csrf is not allowed in production".into(),
            ));
        }
        if self.security.allow_insecure_http && self.environment == Environment::Production {
            return Err(ConfigError::Validation(
                "security.allow_insecure_http is not allowed in production".into(),
            ));
        }

        let oauth2 = &self.oauth2;
        for (name, value) in [
            ("oauth2.authorization_code_lifetime", oauth2.authorization_code_lifetime),
            ("oauth2.access_token_lifetime", oauth2.access_token_lifetime),
            ("oauth2.identity_token_lifetime", oauth2.identity_token_lifetime),
            ("oauth2.refresh_token_lifetime", oauth2.refresh_token_lifetime),
            ("security.session_lifetime", self.security.session_lifetime),
            ("lockout.lockout_duration", self.lockout.lockout_duration),
        ] {
            if value <= 0 {
                return Err(ConfigError::Validation(format!("{name} must be > 0")));
            }
            if value > MAX_LIFETIME_SECONDS {
                return Err(ConfigError::Validation(format!(
                    "{name} must not exceed {MAX_LIFETIME_SECONDS} seconds"
                )));
            }
        }
        if !(0..=MAX_CLOCK_SKEW_SECONDS).contains(&oauth2.clock_skew) {
            return Err(ConfigError::Validation(format!(
                "oauth2.clock_skew must be between 0 and {MAX_CLOCK_SKEW_SECONDS} seconds"
            )));
        }
        if oauth2.signing_key_path.is_none() && !oauth2.generate_signing_key {
            return Err(ConfigError::Validation(
                "either oauth2.signing_key_path or oauth2.generate_signing_key must be set".into(),
            ));
        }
        if self.lockout.max_failed_attempts <= 0 {
            return Err(ConfigError::Validation(
                "lockout.max_failed_attempts must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Issuer without a trailing slash, used to build endpoint URLs.
    pub fn issuer(&self) -> &str {
        self.issuer_url.trim_end_matches('/')
    }
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Any environment variable matching the key path separated by double
/// underscores (e.g. `SECURITY__SESSION_SECRET`) overrides the file value.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment as EnvSource, File};
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml").required(false))
        .add_source(EnvSource::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}
