//! API module providing the HTTP surface of the authorization server.
//!
//! This module is organized into submodules:
//! - `health` - Health check endpoint (/healthz)
//! - `secret` - Protected demo resource (/api/secret)
//! - `openapi` - OpenAPI/Utoipa configuration
//!
//! The OAuth2 endpoints themselves live in [`crate::oauth2`].

pub mod health;
pub mod openapi;
pub mod secret;

pub use health::MISC_TAG;
pub use secret::VAULT_TAG;

use crate::AppResources;
use crate::oauth2::{self, OAuth2State};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_redoc::{Redoc, Servable};

/// Assemble every route, the middleware stack and the API docs.
pub fn build_router(state: OAuth2State, app_resources: AppResources) -> axum::Router {
    let (router, api) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .merge(oauth2::router(state.clone()))
        .merge(secret::router(state))
        .routes(routes!(health::health))
        .layer(axum::Extension(app_resources))
        .layer(TraceLayer::new_for_http())
        .split_for_parts();

    router.merge(Redoc::with_url("/api-docs", api))
}

/// Starts the web server with all configured routes.
#[tracing::instrument(skip(state, app_resources))]
pub async fn start_webserver(
    state: OAuth2State,
    app_resources: AppResources,
) -> color_eyre::Result<()> {
    let addr = app_resources.config.listen_addr.clone();
    let router = build_router(state, app_resources);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Server running");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;

    Ok(())
}
