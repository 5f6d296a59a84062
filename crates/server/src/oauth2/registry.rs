//! Database-backed OAuth2 client registry.
//!
//! Lookups are served from a short-lived cache; registration and admin
//! updates are serialized per `client_id` and invalidate the cache entry.

use crate::cache::ClientCache;
use crate::entity::oauth2_client;
use crate::error::RegistryError;
use crate::oauth2::password::{hash_password, verify_password};
use dashmap::DashMap;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DatabaseConnection, EntityTrait, SqlErr};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;

/// Registration request for a client application.
#[derive(Debug, Clone)]
pub struct NewClient {
    pub client_id: String,
    pub name: String,
    /// Plain-text secret; `None` registers a public client.
    pub secret: Option<String>,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub scopes: Vec<String>,
}

#[derive(Clone)]
pub struct ClientRegistry {
    db: Arc<DatabaseConnection>,
    cache: ClientCache,
    allow_insecure_http: bool,
    write_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ClientRegistry {
    pub fn new(db: Arc<DatabaseConnection>, allow_insecure_http: bool) -> Self {
        Self {
            db,
            cache: ClientCache::default(),
            allow_insecure_http,
            write_locks: Arc::new(DashMap::new()),
        }
    }

    fn write_lock(&self, client_id: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(client_id.to_string())
            .or_default()
            .clone()
    }

    fn build_model(&self, client: &NewClient) -> Result<oauth2_client::ActiveModel, RegistryError> {
        if client.client_id.trim().is_empty() {
            return Err(RegistryError::InvalidRedirectUri(
                "client_id must not be empty".into(),
            ));
        }
        if client.redirect_uris.is_empty() {
            return Err(RegistryError::InvalidRedirectUri(
                "at least one redirect URI is required".into(),
            ));
        }
        let redirect_uris = client
            .redirect_uris
            .iter()
            .map(|uri| canonicalize_redirect_uri(uri, self.allow_insecure_http))
            .collect::<Result<Vec<_>, _>>()?;

        let secret_hash = client
            .secret
            .as_deref()
            .map(hash_password)
            .transpose()
            .map_err(|e| RegistryError::Hashing(e.to_string()))?;

        let now = OffsetDateTime::now_utc();
        Ok(oauth2_client::ActiveModel {
            id: Set(client.client_id.clone()),
            secret_hash: Set(secret_hash),
            name: Set(client.name.clone()),
            redirect_uris: Set(serde_json::to_string(&redirect_uris)
                .map_err(|e| RegistryError::InvalidRedirectUri(e.to_string()))?),
            grant_types: Set(client.grant_types.join(" ")),
            scopes: Set(client.scopes.join(" ")),
            created_at: Set(now),
            updated_at: Set(now),
        })
    }

    /// Register a new client. Redirect URIs are canonicalized once, here.
    #[tracing::instrument(skip(self, client), fields(client_id = %client.client_id))]
    pub async fn register(&self, client: NewClient) -> Result<String, RegistryError> {
        let lock = self.write_lock(&client.client_id);
        let _guard = lock.lock().await;

        let model = self.build_model(&client)?;
        match model.insert(self.db.as_ref()).await {
            Ok(inserted) => {
                tracing::info!(client_id = %inserted.id, public = inserted.is_public(), "Registered OAuth2 client");
                self.cache.invalidate(&inserted.id);
                Ok(inserted.id)
            }
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Err(RegistryError::AlreadyExists(client.client_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace an existing client's registration.
    #[tracing::instrument(skip(self, client), fields(client_id = %client.client_id))]
    pub async fn update(&self, client: NewClient) -> Result<(), RegistryError> {
        let lock = self.write_lock(&client.client_id);
        let _guard = lock.lock().await;

        let existing = oauth2_client::Entity::find_by_id(&client.client_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(RegistryError::ClientNotFound)?;

        let mut model = self.build_model(&client)?;
        model.created_at = Set(existing.created_at);
        model.update(self.db.as_ref()).await?;
        self.cache.invalidate(&client.client_id);
        tracing::info!("Updated OAuth2 client");
        Ok(())
    }

    pub async fn lookup(&self, client_id: &str) -> Result<Option<oauth2_client::Model>, RegistryError> {
        if let Some(client) = self.cache.get(&client_id.to_string()) {
            return Ok(Some(client));
        }
        let client = oauth2_client::Entity::find_by_id(client_id)
            .one(self.db.as_ref())
            .await?;
        if let Some(ref c) = client {
            self.cache.insert(c.id.clone(), c.clone());
        }
        Ok(client)
    }

    /// Resolve and authenticate a client at the token endpoint.
    pub async fn authenticate(
        &self,
        client_id: &str,
        secret: Option<&str>,
    ) -> Result<oauth2_client::Model, RegistryError> {
        let client = self
            .lookup(client_id)
            .await?
            .ok_or(RegistryError::ClientNotFound)?;
        Self::verify_secret(&client, secret)?;
        Ok(client)
    }

    /// Exact string match; canonicalization happened at registration.
    pub fn validate_redirect_uri(client: &oauth2_client::Model, uri: &str) -> bool {
        client.is_redirect_uri_allowed(uri)
    }

    /// Public clients pass without a secret. Confidential clients must
    /// present one matching the stored hash.
    pub fn verify_secret(
        client: &oauth2_client::Model,
        provided: Option<&str>,
    ) -> Result<(), RegistryError> {
        match (&client.secret_hash, provided) {
            (None, _) => Ok(()),
            (Some(hash), Some(secret)) if verify_password(secret, hash) => Ok(()),
            _ => Err(RegistryError::InvalidSecret),
        }
    }
}

fn is_loopback_host(url: &url::Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(d)) => d.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Canonicalize a redirect URI for storage: lowercase scheme and host,
/// explicit path, no fragment. `http` is only accepted for loopback hosts
/// unless insecure transport is allowed; private-use schemes (containing a
/// dot, e.g. `com.example.app`) are accepted for native apps.
pub fn canonicalize_redirect_uri(uri: &str, allow_insecure_http: bool) -> Result<String, RegistryError> {
    let parsed = url::Url::parse(uri)
        .map_err(|e| RegistryError::InvalidRedirectUri(format!("{uri}: {e}")))?;

    if parsed.fragment().is_some() {
        return Err(RegistryError::InvalidRedirectUri(format!(
            "{uri}: fragments are not allowed"
        )));
    }

    match parsed.scheme() {
        "https" => {}
        "http" if allow_insecure_http || is_loopback_host(&parsed) => {}
        "http" => {
            return Err(RegistryError::InvalidRedirectUri(format!(
                "{uri}: plain http is only allowed for loopback hosts"
            )));
        }
        scheme if scheme.contains('.') => {}
        scheme => {
            return Err(RegistryError::InvalidRedirectUri(format!(
                "{uri}: unsupported scheme {scheme}"
            )));
        }
    }

    Ok(parsed.to_string())
}
