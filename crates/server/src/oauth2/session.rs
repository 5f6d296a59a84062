//! Login session and CSRF cookies.
//!
//! The session cookie is an HS256 JWT carrying the authenticated
//! [`Principal`]. The login form is protected with a double-submit token:
//! the same random value is sent as a cookie and as a hidden form field.

use crate::oauth2::directory::Principal;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;
use time::{Duration, OffsetDateTime};

pub const SESSION_COOKIE: &str = "fortress_session";
pub const CSRF_COOKIE: &str = "fortress_csrf";

/// Lifetime of the CSRF cookie in seconds.
const CSRF_MAX_AGE: i64 = 3600;

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    name: String,
    #[serde(default)]
    claims: Map<String, Value>,
    iat: i64,
    exp: i64,
}

#[derive(Clone)]
pub struct SessionManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime: Duration,
    secure: bool,
}

impl SessionManager {
    pub fn new(secret: &str, lifetime: Duration, secure: bool) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            lifetime,
            secure,
        }
    }

    pub fn issue(&self, principal: &Principal, now: OffsetDateTime) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = SessionClaims {
            sub: principal.subject.clone(),
            name: principal.username.clone(),
            claims: principal.claims.clone(),
            iat: now.unix_timestamp(),
            exp: (now + self.lifetime).unix_timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    /// Decode a session token. Invalid or expired sessions yield `None`.
    pub fn principal_from_token(&self, token: &str) -> Option<Principal> {
        let validation = Validation::new(Algorithm::HS256);
        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &validation)
            .inspect_err(|e| tracing::debug!(error = %e, "Ignoring invalid session cookie"))
            .ok()?;
        Some(Principal {
            subject: data.claims.sub,
            username: data.claims.name,
            claims: data.claims.claims,
        })
    }

    pub fn principal_from_jar(&self, jar: &CookieJar) -> Option<Principal> {
        jar.get(SESSION_COOKIE)
            .and_then(|cookie| self.principal_from_token(cookie.value()))
    }

    /// Cookie carrying a new session.
    pub fn session_cookie(&self, token: String) -> Cookie<'static> {
        self.cookie(SESSION_COOKIE, token, self.lifetime)
    }

    /// Cookie carrying a CSRF token.
    pub fn csrf_cookie(&self, token: String) -> Cookie<'static> {
        self.cookie(CSRF_COOKIE, token, Duration::seconds(CSRF_MAX_AGE))
    }

    fn cookie(&self, name: &'static str, value: String, max_age: Duration) -> Cookie<'static> {
        Cookie::build((name, value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(max_age)
            .secure(self.secure)
            .build()
    }
}

/// Double-submit check: the form token must equal the cookie token.
pub fn csrf_matches(cookie: Option<&str>, submitted: Option<&str>) -> bool {
    match (cookie, submitted) {
        (Some(cookie), Some(submitted)) if !cookie.is_empty() => {
            cookie.as_bytes().ct_eq(submitted.as_bytes()).into()
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue, header};

    fn manager(secure: bool) -> SessionManager {
        SessionManager::new("0123456789abcdef0123456789abcdef", Duration::hours(8), secure)
    }

    #[test]
    fn session_round_trip() {
        let sessions = manager(true);
        let principal = Principal::new("user-1", "admin");
        let token = sessions.issue(&principal, OffsetDateTime::now_utc()).unwrap();
        assert_eq!(sessions.principal_from_token(&token), Some(principal));
    }

    #[test]
    fn rejects_expired_and_foreign_sessions() {
        let sessions = manager(true);
        let principal = Principal::new("user-1", "admin");
        let stale = sessions
            .issue(&principal, OffsetDateTime::now_utc() - Duration::days(2))
            .unwrap();
        assert_eq!(sessions.principal_from_token(&stale), None);

        let other = SessionManager::new("another-secret-another-secret-xx", Duration::hours(8), true);
        let foreign = other.issue(&principal, OffsetDateTime::now_utc()).unwrap();
        assert_eq!(sessions.principal_from_token(&foreign), None);
    }

    #[test]
    fn cookie_flags_follow_transport_setting() {
        let secure = manager(true).session_cookie("t".into());
        assert_eq!(secure.secure(), Some(true));
        assert_eq!(secure.http_only(), Some(true));
        assert_eq!(secure.same_site(), Some(SameSite::Lax));
        assert_eq!(secure.max_age(), Some(Duration::hours(8)));

        let insecure = manager(false).session_cookie("t".into());
        assert_ne!(insecure.secure(), Some(true));
        assert_eq!(insecure.http_only(), Some(true));
    }

    #[test]
    fn reads_session_from_jar() {
        let sessions = manager(true);
        let principal = Principal::new("user-1", "admin");
        let token = sessions.issue(&principal, OffsetDateTime::now_utc()).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("a=1; {SESSION_COOKIE}={token}; b=2")).unwrap(),
        );
        let jar = CookieJar::from_headers(&headers);
        assert_eq!(sessions.principal_from_jar(&jar), Some(principal));
        assert_eq!(sessions.principal_from_jar(&CookieJar::new()), None);
    }

    #[test]
    fn csrf_requires_matching_tokens() {
        assert!(csrf_matches(Some("abc"), Some("abc")));
        assert!(!csrf_matches(Some("abc"), Some("abd")));
        assert!(!csrf_matches(None, Some("abc")));
        assert!(!csrf_matches(Some(""), Some("")));
    }
}
