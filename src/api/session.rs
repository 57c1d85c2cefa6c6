//! Session cookie handling, request authentication and CSRF checks.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::CookieJar;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::client::client_ip;
use super::error::ApiError;
use crate::auth::{authorize, Action, Resource, Session};
use crate::error::{Error, Result};
use crate::users::Actor;
use crate::AppState;

pub const SESSION_COOKIE: &str = "session";
pub const CSRF_HEADER: &str = "x-csrf-token";

/// A request that carried a valid session cookie.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub session: Session,
    pub token: String,
    pub ip: String,
}

impl Authenticated {
    pub fn username(&self) -> &str {
        &self.session.username
    }

    pub fn actor(&self) -> Actor<'_> {
        Actor {
            username: &self.session.username,
            ip: &self.ip,
        }
    }

    /// Fail with `Forbidden` unless the policy allows `action`.
    pub fn require(&self, action: Action, resource: &Resource<'_>) -> Result<()> {
        if authorize(&self.session, action, resource).is_allowed() {
            return Ok(());
        }
        tracing::warn!(
            username = %self.session.username,
            role = %self.session.role,
            action = ?action,
            "Access denied"
        );
        Err(Error::Forbidden)
    }

    /// The submitted token must byte-match the session's CSRF token.
    pub fn verify_csrf(&self, submitted: Option<&str>, enforce: bool) -> Result<()> {
        if !enforce {
            return Ok(());
        }
        let expected = self.session.csrf_token.as_bytes();
        match submitted {
            Some(token)
                if token.len() == expected.len()
                    && bool::from(token.as_bytes().ct_eq(expected)) =>
            {
                Ok(())
            }
            _ => {
                tracing::warn!(username = %self.session.username, "CSRF token mismatch");
                Err(Error::Forbidden)
            }
        }
    }
}

/// Session token from the request cookies, if any.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolve the session cookie of a request.
pub async fn authenticate(state: &AppState, parts: &Parts) -> Result<Authenticated> {
    let token = session_token(&parts.headers).ok_or(Error::Unauthenticated)?;
    let session = state.sessions.resolve(&token).await?.into_session()?;
    Ok(Authenticated {
        session,
        token,
        ip: client_ip(
            &parts.headers,
            &parts.extensions,
            &state.config.server.trusted_proxies,
        )
        .to_string(),
    })
}

/// Session cookie carrying a freshly issued token.
pub fn session_cookie(token: String, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::seconds(max_age_secs))
        .secure(secure)
        .build()
}

/// Cookie to hand to `CookieJar::remove`; path must match the one issued.
pub fn expired_session_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .secure(secure)
        .build()
}

/// Session extractor for JSON endpoints; rejects with a 401 envelope.
pub struct ApiSession(pub Authenticated);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ApiSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(ApiSession(authenticate(state, parts).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Role, UserStatus};
    use axum::http::HeaderValue;

    fn authenticated(csrf: &str) -> Authenticated {
        Authenticated {
            session: Session {
                username: "bjmathis".into(),
                role: Role::Driver,
                status: UserStatus::Active,
                csrf_token: csrf.into(),
                created_at: String::new(),
                expires_at: String::new(),
                ip_address: String::new(),
                user_agent: String::new(),
            },
            token: "t".into(),
            ip: "127.0.0.1".into(),
        }
    }

    #[test]
    fn test_csrf_must_match_exactly() {
        let auth = authenticated("abc123");
        assert!(auth.verify_csrf(Some("abc123"), true).is_ok());
        assert!(matches!(
            auth.verify_csrf(Some("abc124"), true),
            Err(Error::Forbidden)
        ));
        assert!(matches!(
            auth.verify_csrf(Some("abc"), true),
            Err(Error::Forbidden)
        ));
        assert!(matches!(auth.verify_csrf(None, true), Err(Error::Forbidden)));
        assert!(auth.verify_csrf(None, false).is_ok());
    }

    #[test]
    fn test_require_uses_policy() {
        let auth = authenticated("x");
        assert!(auth
            .require(Action::ViewOwnDashboard, &Resource::owned_by("bjmathis"))
            .is_ok());
        assert!(matches!(
            auth.require(Action::ManageUsers, &Resource::management()),
            Err(Error::Forbidden)
        ));
    }

    #[test]
    fn test_cookie_attributes() {
        let value = session_cookie("tok".into(), 28800, true).to_string();
        assert!(value.starts_with("session=tok"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("SameSite=Lax"));
        assert!(value.contains("Path=/"));
        assert!(value.contains("Max-Age=28800"));
        assert!(value.contains("Secure"));
        assert!(!session_cookie("tok".into(), 60, false)
            .to_string()
            .contains("Secure"));
    }

    #[test]
    fn test_removal_expires_cookie_on_same_path() {
        use axum::response::IntoResponse;

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("session=abc"),
        );
        let response = CookieJar::from_headers(&headers)
            .remove(expired_session_cookie(false))
            .into_response();
        let value = response
            .headers()
            .get(axum::http::header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(value.starts_with("session=;"));
        assert!(value.contains("Max-Age=0"));
        assert!(value.contains("Path=/"));
        assert!(value.contains("HttpOnly"));
    }

    #[test]
    fn test_session_token_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("theme=dark; session=abc"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("abc"));
        assert_eq!(session_token(&HeaderMap::new()), None);
    }
}
