//! OpenAPI/Utoipa configuration.

use crate::api::{health::MISC_TAG, secret::VAULT_TAG};
use crate::oauth2::endpoints::SUPPORTED_SCOPES;
use crate::oauth2::{ACCOUNT_TAG, OAUTH2_TAG};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, OAuth2, Scopes, SecurityScheme},
};

/// Security addon for OpenAPI documentation.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    #[tracing::instrument(skip(self, openapi))]
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            let bearer = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .bearer_format("JWT")
                .description(Some(
                    "Access token obtained from `/connect/token`.",
                ))
                .build();
            components.add_security_scheme("Authorization", SecurityScheme::Http(bearer));

            let oauth2 = OAuth2::new([utoipa::openapi::security::Flow::AuthorizationCode(
                utoipa::openapi::security::AuthorizationCode::new(
                    "/connect/authorize",
                    "/connect/token",
                    Scopes::from_iter(
                        SUPPORTED_SCOPES
                            .iter()
                            .map(|scope| (scope.to_string(), format!("{scope} scope"))),
                    ),
                ),
            )]);
            components.add_security_scheme("OAuth2", SecurityScheme::OAuth2(oauth2));
        }
    }
}

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Fortress ID API",
        version = "1.0.0",
        description = "OAuth2 Authorization Code + PKCE authorization server with refresh-token rotation."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = OAUTH2_TAG, description = "OAuth2 and OpenID Connect endpoints"),
        (name = ACCOUNT_TAG, description = "Account login"),
        (name = VAULT_TAG, description = "Protected demo resource")
    )
)]
pub struct ApiDoc;
