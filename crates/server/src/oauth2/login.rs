//! Account login endpoints.
//!
//! Authenticates users against the [`UserDirectory`] and establishes the
//! session cookie that `/connect/authorize` reads as the principal.

use crate::error::DirectoryError;
use crate::oauth2::directory::{Principal, UserDirectory};
use crate::oauth2::password::generate_token;
use crate::oauth2::session::{CSRF_COOKIE, csrf_matches};
use crate::oauth2::state::OAuth2State;
use askama::Template;
use axum::{
    Form,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

const INVALID_CREDENTIALS: &str = "Invalid email or password.";
const LOCKED_OUT: &str = "This account is temporarily locked. Try again later.";
const CSRF_FAILED: &str = "Your session expired. Please try again.";

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    return_url: String,
    email: String,
    csrf_token: String,
    error: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoginQuery {
    /// Local path to continue to after signing in
    #[serde(alias = "ReturnUrl")]
    pub return_url: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    pub return_url: Option<String>,
    pub csrf_token: Option<String>,
}

/// Result of checking credentials against the directory.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    Success(Principal),
    InvalidCredentials,
    LockedOut,
}

/// Check an email and password, applying the directory's lockout policy.
pub async fn authenticate(
    directory: &dyn UserDirectory,
    email: &str,
    password: &str,
    now: OffsetDateTime,
) -> Result<LoginOutcome, DirectoryError> {
    let Some(user) = directory.find_by_email(email.trim()).await? else {
        tracing::warn!("Failed login: unknown email");
        return Ok(LoginOutcome::InvalidCredentials);
    };

    if directory.is_locked_out(&user, now) {
        tracing::warn!(user_id = %user.id, "Login attempt on locked account");
        return Ok(LoginOutcome::LockedOut);
    }

    if !directory.verify_password(&user, password) {
        tracing::warn!(user_id = %user.id, "Failed login: wrong password");
        if directory.record_failed_attempt(&user, now).await? {
            return Ok(LoginOutcome::LockedOut);
        }
        return Ok(LoginOutcome::InvalidCredentials);
    }

    directory.record_successful_login(&user, now).await?;
    tracing::info!(user_id = %user.id, "Login succeeded");
    Ok(LoginOutcome::Success(Principal::from(&user)))
}

/// Only same-origin paths are accepted as a post-login destination.
pub fn local_return_url(raw: Option<&str>) -> String {
    match raw {
        Some(url) if url.starts_with('/') && !url.starts_with("//") && !url.starts_with("/\\") => {
            url.to_string()
        }
        _ => "/".to_string(),
    }
}

pub fn router() -> OpenApiRouter<OAuth2State> {
    OpenApiRouter::new()
        .routes(routes!(login_page))
        .routes(routes!(login_submit))
}

fn render_form(
    state: &OAuth2State,
    jar: CookieJar,
    status: StatusCode,
    return_url: String,
    email: String,
    error: Option<&str>,
) -> Response {
    let csrf_token = match generate_token() {
        Ok(token) => token,
        Err(e) => {
            tracing::error!(error = %e, "Failed to generate CSRF token");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
        }
    };

    let template = LoginTemplate {
        return_url,
        email,
        csrf_token: csrf_token.clone(),
        error: error.map(String::from),
    };

    match template.render() {
        Ok(html) => (status, jar.add(state.sessions.csrf_cookie(csrf_token)), Html(html)).into_response(),
        Err(e) => {
            tracing::error!("Failed to render login template: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

/// Display the login form.
#[tracing::instrument(skip(state, jar))]
#[utoipa::path(
    get,
    path = "/account/login",
    tag = super::ACCOUNT_TAG,
    operation_id = "Login Page",
    summary = "Display the login form",
    description = "Renders the email/password form. `/connect/authorize` redirects here when no session \
                   is present, passing the original authorization request as `return_url`.",
    params(LoginQuery),
    responses(
        (status = 200, description = "Login page HTML"),
        (status = 500, description = "Internal server error"),
    )
)]
async fn login_page(
    State(state): State<OAuth2State>,
    jar: CookieJar,
    Query(query): Query<LoginQuery>,
) -> Response {
    let return_url = local_return_url(query.return_url.as_deref());
    render_form(&state, jar, StatusCode::OK, return_url, String::new(), None)
}

/// Handle login form submission.
#[tracing::instrument(skip(state, jar, form))]
#[utoipa::path(
    post,
    path = "/account/login",
    tag = super::ACCOUNT_TAG,
    operation_id = "Login Submit",
    summary = "Submit login credentials",
    description = "Checks the credentials, sets the session cookie and redirects to `return_url`. \
                   Failures re-render the form with a generic message; repeated failures lock the account.",
    request_body(
        content = LoginForm,
        content_type = "application/x-www-form-urlencoded",
    ),
    responses(
        (status = 303, description = "Signed in, redirect to the return URL"),
        (status = 400, description = "CSRF token missing or invalid"),
        (status = 401, description = "Invalid credentials"),
        (status = 423, description = "Account locked"),
        (status = 503, description = "User directory unavailable"),
    )
)]
async fn login_submit(
    State(state): State<OAuth2State>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    let return_url = local_return_url(form.return_url.as_deref());

    if !state.config.security.disable_csrf {
        let cookie = jar.get(CSRF_COOKIE).map(|c| c.value().to_owned());
        if !csrf_matches(cookie.as_deref(), form.csrf_token.as_deref()) {
            tracing::warn!("Login rejected: CSRF token mismatch");
            return render_form(
                &state,
                jar,
                StatusCode::BAD_REQUEST,
                return_url,
                form.email,
                Some(CSRF_FAILED),
            );
        }
    }

    let now = OffsetDateTime::now_utc();
    let outcome = match authenticate(state.directory.as_ref(), &form.email, &form.password, now).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "User directory error during login");
            return (StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable").into_response();
        }
    };

    match outcome {
        LoginOutcome::Success(principal) => match state.sessions.issue(&principal, now) {
            Ok(token) => (jar.add(state.sessions.session_cookie(token)), Redirect::to(&return_url))
                .into_response(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to sign session");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        },
        LoginOutcome::InvalidCredentials => render_form(
            &state,
            jar,
            StatusCode::UNAUTHORIZED,
            return_url,
            form.email,
            Some(INVALID_CREDENTIALS),
        ),
        LoginOutcome::LockedOut => {
            render_form(&state, jar, StatusCode::LOCKED, return_url, form.email, Some(LOCKED_OUT))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_url_must_be_local() {
        assert_eq!(
            local_return_url(Some("/connect/authorize?client_id=c1")),
            "/connect/authorize?client_id=c1"
        );
        assert_eq!(local_return_url(Some("https://evil.example/")), "/");
        assert_eq!(local_return_url(Some("//evil.example/")), "/");
        assert_eq!(local_return_url(Some("/\\evil.example/")), "/");
        assert_eq!(local_return_url(None), "/");
    }
}
