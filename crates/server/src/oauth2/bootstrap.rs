//! Development seeding: a demo client and an administrator account.
//!
//! Idempotent; existing records are left untouched. Never runs outside the
//! development environment.

use crate::config::{AppConfig, Environment};
use crate::entity::oauth2_client::{GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN};
use crate::error::{BootstrapError, RegistryError};
use crate::oauth2::directory::{DbUserDirectory, UserDirectory};
use crate::oauth2::registry::{ClientRegistry, NewClient};

pub const DEMO_CLIENT_ID: &str = "postman";
pub const DEMO_CLIENT_SECRET: &str = "postman-secret";
pub const DEMO_REDIRECT_URI: &str = "https://oauth.pstmn.io/v1/callback";
pub const DEMO_SCOPES: [&str; 4] = ["openid", "email", "profile", "roles"];
pub const ADMIN_EMAIL: &str = "admin@fortress.local";
pub const ADMIN_PASSWORD: &str = "Fortress@2025!";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapReport {
    pub client_created: bool,
    pub admin_created: bool,
}

/// Seed the demo data when enabled and running in development.
pub async fn run(
    config: &AppConfig,
    registry: &ClientRegistry,
    directory: &DbUserDirectory,
) -> Result<BootstrapReport, BootstrapError> {
    if !config.bootstrap.enabled {
        return Ok(BootstrapReport::default());
    }
    if config.environment != Environment::Development {
        tracing::warn!("bootstrap.enabled is ignored outside the development environment");
        return Ok(BootstrapReport::default());
    }

    let mut report = BootstrapReport::default();

    if registry.lookup(DEMO_CLIENT_ID).await?.is_none() {
        tracing::info!(client_id = DEMO_CLIENT_ID, "Registering demo OAuth2 client");
        let client = NewClient {
            client_id: DEMO_CLIENT_ID.to_string(),
            name: "Postman Client".to_string(),
            secret: Some(DEMO_CLIENT_SECRET.to_string()),
            redirect_uris: vec![DEMO_REDIRECT_URI.to_string()],
            grant_types: vec![
                GRANT_AUTHORIZATION_CODE.to_string(),
                GRANT_REFRESH_TOKEN.to_string(),
            ],
            scopes: DEMO_SCOPES.iter().map(|s| s.to_string()).collect(),
        };
        match registry.register(client).await {
            Ok(_) => report.client_created = true,
            Err(RegistryError::AlreadyExists(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    if directory.find_by_email(ADMIN_EMAIL).await?.is_none() {
        directory
            .create_user(ADMIN_EMAIL, ADMIN_EMAIL, ADMIN_PASSWORD, true)
            .await?;
        report.admin_created = true;
        tracing::warn!(
            email = ADMIN_EMAIL,
            "Created administrator with default credentials. Change them before exposing this server"
        );
    }

    Ok(report)
}
