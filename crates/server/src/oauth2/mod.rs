//! OAuth2 Authorization Server module.
//!
//! A from-scratch Authorization Code + PKCE server with refresh-token
//! rotation, split into the components below.
//!
//! ## Components
//!
//! - [`registry`] - Client Registry (registered applications, secrets, redirect URIs)
//! - [`grant_store`] - Grant Store (authorization codes, refresh-token families)
//! - [`codec`] - Token Codec (Ed25519-signed access and identity tokens)
//! - [`authorization`] - Authorization Engine (`/connect/authorize`)
//! - [`exchange`] - Token Exchange Engine (`/connect/token`, `/connect/revoke`)
//!
//! ## Endpoints
//!
//! - `GET|POST /connect/authorize` - Authorization endpoint
//! - `POST /connect/token` - Token endpoint
//! - `POST /connect/revoke` - Token revocation
//! - `GET|POST /account/login` - Login form
//! - `GET /.well-known/openid-configuration` - OpenID Connect Discovery
//! - `GET /.well-known/jwks.json` - Verification keys

pub mod authorization;
pub mod bootstrap;
pub mod codec;
pub mod directory;
pub mod endpoints;
pub mod exchange;
pub mod grant_store;
pub mod login;
pub mod password;
pub mod pkce;
pub mod registry;
pub mod session;
mod state;

pub use endpoints::router;
pub use password::{hash_password, verify_password};
pub use state::OAuth2State;

/// OpenAPI tag for OAuth2 endpoints
pub const OAUTH2_TAG: &str = "OAuth2";

/// OpenAPI tag for account endpoints
pub const ACCOUNT_TAG: &str = "Account";
