//! SeaORM entities for the authorization server's persisted state.

pub mod oauth2_authorization;
pub mod oauth2_client;
pub mod oauth2_refresh_token;
pub mod oauth2_token_family;
pub mod oauth2_user;

/// Split a space-separated scope string into its members.
pub(crate) fn split_scopes(scope: &str) -> Vec<String> {
    scope.split_whitespace().map(String::from).collect()
}
