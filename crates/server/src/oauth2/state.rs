//! Shared state for the authorization server's HTTP handlers.

use crate::config::AppConfig;
use crate::oauth2::authorization::AuthorizationEngine;
use crate::oauth2::codec::TokenCodec;
use crate::oauth2::directory::{DbUserDirectory, UserDirectory};
use crate::oauth2::exchange::TokenExchangeEngine;
use crate::oauth2::grant_store::GrantStore;
use crate::oauth2::registry::ClientRegistry;
use crate::oauth2::session::SessionManager;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use time::Duration;

#[derive(Clone)]
pub struct OAuth2State {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub registry: ClientRegistry,
    pub store: GrantStore,
    pub codec: TokenCodec,
    pub authorization: AuthorizationEngine,
    pub exchange: TokenExchangeEngine,
    pub directory: Arc<dyn UserDirectory>,
    pub sessions: SessionManager,
}

impl OAuth2State {
    /// Wire the components together over one database connection.
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<AppConfig>, codec: TokenCodec) -> Self {
        let registry = ClientRegistry::new(db.clone(), config.security.allow_insecure_http);
        let store = GrantStore::new(db.clone());
        let authorization = AuthorizationEngine::new(
            registry.clone(),
            store.clone(),
            Duration::seconds(config.oauth2.authorization_code_lifetime),
        );
        let exchange =
            TokenExchangeEngine::new(registry.clone(), store.clone(), codec.clone(), &config.oauth2);
        let directory: Arc<dyn UserDirectory> =
            Arc::new(DbUserDirectory::new(db.clone(), config.lockout.clone()));
        let sessions = SessionManager::new(
            &config.security.session_secret,
            Duration::seconds(config.security.session_lifetime),
            !config.security.allow_insecure_http,
        );

        Self {
            db,
            config,
            registry,
            store,
            codec,
            authorization,
            exchange,
            directory,
            sessions,
        }
    }

    /// Public URL of an endpoint under the issuer.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}{}", self.config.issuer(), path)
    }
}
