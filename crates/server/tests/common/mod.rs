//! Shared fixtures for integration tests.
#![allow(dead_code)]

use fortress_id::config::{
    AppConfig, BootstrapConfig, Environment, LockoutConfig, OAuth2Config, SecurityConfig,
};
use fortress_id::entity::oauth2_client::{GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN};
use fortress_id::oauth2::OAuth2State;
use fortress_id::oauth2::authorization::{AuthorizationRequest, RESPONSE_TYPE_CODE};
use fortress_id::oauth2::codec::{TokenCodec, generate_signing_key};
use fortress_id::oauth2::directory::Principal;
use fortress_id::oauth2::exchange::ClientCredentials;
use fortress_id::oauth2::pkce::{METHOD_S256, challenge_for};
use fortress_id::oauth2::registry::NewClient;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::sync::Arc;

pub const ISSUER: &str = "https://id.test";
pub const CLIENT_ID: &str = "c1";
pub const CLIENT_SECRET: &str = "c1-secret-value";
pub const REDIRECT_URI: &str = "https://app/cb";
/// RFC 7636 appendix B verifier.
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
pub const SUBJECT: &str = "u1";

/// Fresh in-memory database with all migrations applied. A single pooled
/// connection keeps every query on the same in-memory database.
pub async fn test_db() -> Arc<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await.expect("connect");
    Migrator::up(&db, None).await.expect("migrate");
    Arc::new(db)
}

/// File-backed SQLite database served by several pooled connections, so
/// concurrent tasks run overlapping transactions. The database file lives
/// as long as this value.
pub struct PooledDb {
    pub db: Arc<DatabaseConnection>,
    _dir: tempfile::TempDir,
}

pub async fn pooled_test_db() -> PooledDb {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("fortress.db").display());
    let mut options = ConnectOptions::new(url);
    options
        .max_connections(4)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await.expect("connect");
    db.execute_unprepared("PRAGMA journal_mode = WAL")
        .await
        .expect("enable WAL");
    Migrator::up(&db, None).await.expect("migrate");
    PooledDb {
        db: Arc::new(db),
        _dir: dir,
    }
}

/// State over a [`PooledDb`]; keep the returned database alive for the
/// whole test.
pub async fn pooled_test_state() -> (OAuth2State, PooledDb) {
    let pooled = pooled_test_db().await;
    let config = test_config();
    let codec = test_codec(&config);
    let state = OAuth2State::new(pooled.db.clone(), Arc::new(config), codec);
    (state, pooled)
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        listen_addr: "127.0.0.1:0".into(),
        issuer_url: ISSUER.into(),
        environment: Environment::Development,
        auto_migrate: true,
        oauth2: OAuth2Config {
            generate_signing_key: true,
            ..OAuth2Config::default()
        },
        security: SecurityConfig {
            allow_insecure_http: false,
            disable_csrf: false,
            session_secret: "test-session-secret-0123456789abcdef".into(),
            session_lifetime: 3600,
        },
        lockout: LockoutConfig {
            max_failed_attempts: 3,
            lockout_duration: 300,
        },
        bootstrap: BootstrapConfig::default(),
    }
}

pub fn test_codec(config: &AppConfig) -> TokenCodec {
    let key = generate_signing_key().expect("key");
    TokenCodec::new(
        &key,
        config.issuer(),
        "test-key",
        time::Duration::seconds(config.oauth2.clock_skew),
    )
    .expect("codec")
}

pub async fn test_state() -> OAuth2State {
    test_state_with(test_config()).await
}

pub async fn test_state_with(config: AppConfig) -> OAuth2State {
    let db = test_db().await;
    let codec = test_codec(&config);
    OAuth2State::new(db, Arc::new(config), codec)
}

pub fn confidential_client() -> NewClient {
    NewClient {
        client_id: CLIENT_ID.into(),
        name: "Test App".into(),
        secret: Some(CLIENT_SECRET.into()),
        redirect_uris: vec![REDIRECT_URI.into()],
        grant_types: vec![GRANT_AUTHORIZATION_CODE.into(), GRANT_REFRESH_TOKEN.into()],
        scopes: vec!["openid".into(), "profile".into(), "email".into()],
    }
}

pub async fn register_c1(state: &OAuth2State) {
    state
        .registry
        .register(confidential_client())
        .await
        .expect("register c1");
}

pub fn credentials() -> ClientCredentials {
    ClientCredentials {
        client_id: CLIENT_ID.into(),
        client_secret: Some(CLIENT_SECRET.into()),
    }
}

pub fn principal() -> Principal {
    Principal::new(SUBJECT, "Alice")
}

pub fn authorization_request(scope: &str) -> AuthorizationRequest {
    AuthorizationRequest {
        response_type: RESPONSE_TYPE_CODE.into(),
        client_id: CLIENT_ID.into(),
        redirect_uri: Some(REDIRECT_URI.into()),
        scope: Some(scope.into()),
        state: Some("xyz".into()),
        nonce: Some("n-0S6_WzA2Mj".into()),
        code_challenge: Some(challenge_for(VERIFIER)),
        code_challenge_method: Some(METHOD_S256.into()),
    }
}
