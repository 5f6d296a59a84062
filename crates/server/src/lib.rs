//! An OAuth2 authorization server.
//!
//! Implements the Authorization Code grant with mandatory PKCE (S256),
//! Ed25519-signed JWT access and identity tokens, and single-use refresh
//! tokens whose reuse revokes the whole token family.

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::AppConfig;

pub mod api;
pub mod cache;
pub mod config;
pub mod entity;
pub mod error;
pub mod oauth2;

#[derive(Clone, Debug)]
pub struct AppResources {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
}
