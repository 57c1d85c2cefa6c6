//! Login, logout, self-registration and password changes.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Form,
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    layout, outcome, render_page, ChangePasswordTemplate, Flash, Layout, LoginTemplate,
    PageResult, PageSession, RegisterTemplate,
};
use crate::api::client::ClientMeta;
use crate::api::session::{
    expired_session_cookie, session_cookie, session_token, Authenticated, SESSION_COOKIE,
};
use crate::auth::{Action, Registration, Resolution, Resource};
use crate::db::Role;
use crate::error::{Error, Result};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    #[serde(default)]
    pub registered: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CsrfForm {
    #[serde(default)]
    pub csrf_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordForm {
    #[serde(default)]
    pub csrf_token: Option<String>,
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
    #[serde(default)]
    pub confirm_password: String,
}

fn login_form(status: StatusCode, flash: Flash, username: String) -> Response {
    render_page(
        status,
        LoginTemplate {
            layout: Layout::public("Sign in"),
            flash,
            username,
        },
    )
}

/// GET /
pub async fn login_page(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
) -> Response {
    // Already signed in: go straight to the dashboard.
    if let Some(token) = session_token(&headers) {
        if let Ok(Resolution::Valid(session)) = state.sessions.resolve(&token).await {
            return Redirect::to(session.role.dashboard_path()).into_response();
        }
    }

    let flash = if query.registered.is_some() {
        Flash::notice("Registration received. A manager must approve your account before you can sign in.")
    } else {
        Flash::default()
    };
    login_form(StatusCode::OK, flash, String::new())
}

/// POST /
///
/// Failures re-render the form with a single banner and status 200; only
/// infrastructure failures change the status.
pub async fn login_submit(
    State(state): State<Arc<AppState>>,
    client: ClientMeta,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    let username = form.username.trim().to_string();
    if !username.is_empty() {
        if let Err(retry_after) = state.rate_limiter.check_account(&username) {
            warn!(username = %username, ip = %client.ip, retry_after, "Sign-in budget exhausted for account");
            let e = Error::RateLimited { retry_after };
            return login_form(e.status_code(), Flash::error(e.user_message()), username);
        }
    }
    match state
        .auth
        .login(&username, &form.password, &client.ip, &client.user_agent)
        .await
    {
        Ok(success) => {
            let cookie = session_cookie(
                success.session_token,
                state.sessions.lifetime_secs(),
                state.config.server.secure_cookies,
            );
            (jar.add(cookie), Redirect::to(success.role.dashboard_path())).into_response()
        }
        Err(e) if e.is_infrastructure() => {
            let reference = e.report();
            let message = match reference {
                Some(id) => format!("{} (reference {})", e.user_message(), id),
                None => e.user_message(),
            };
            login_form(e.status_code(), Flash::error(message), username)
        }
        Err(e) => {
            info!(username = %username, ip = %client.ip, reason = e.kind(), "Login failed");
            login_form(StatusCode::OK, Flash::error(e.user_message()), username)
        }
    }
}

/// POST /logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<CsrfForm>,
) -> PageResult {
    let secure = state.config.server.secure_cookies;
    let token = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty());
    if let Some(token) = token {
        if let Resolution::Valid(session) = state.sessions.resolve(&token).await? {
            let auth = Authenticated {
                session,
                token: token.clone(),
                ip: String::new(),
            };
            auth.verify_csrf(form.csrf_token.as_deref(), state.config.auth.csrf_enforce)?;
            state.auth.logout(&token).await?;
            info!(username = %auth.session.username, "Signed out");
        }
    }
    let jar = jar.remove(expired_session_cookie(secure));
    Ok((jar, Redirect::to("/")).into_response())
}

/// GET /register
pub async fn register_page() -> Response {
    render_page(
        StatusCode::OK,
        RegisterTemplate {
            layout: Layout::public("Register"),
            flash: Flash::default(),
            username: String::new(),
            email: String::new(),
            display_name: String::new(),
        },
    )
}

/// POST /register
pub async fn register_submit(
    State(state): State<Arc<AppState>>,
    client: ClientMeta,
    Form(form): Form<RegisterForm>,
) -> PageResult {
    let result = register(&state, &client, &form).await;
    match result {
        Ok(()) => Ok(Redirect::to("/?registered=1").into_response()),
        Err(e) if e.is_infrastructure() => Err(e.into()),
        Err(e) => Ok(render_page(
            e.status_code(),
            RegisterTemplate {
                layout: Layout::public("Register"),
                flash: Flash::error(e.user_message()),
                username: form.username,
                email: form.email,
                display_name: form.display_name,
            },
        )),
    }
}

async fn register(state: &AppState, client: &ClientMeta, form: &RegisterForm) -> Result<()> {
    if form.password != form.confirm_password {
        return Err(Error::invalid("passwords do not match"));
    }
    let role_request = match form.role.as_deref().map(str::trim) {
        None | Some("") => Role::Driver,
        Some(role) => role.parse()?,
    };
    state
        .auth
        .register(
            Registration {
                username: form.username.trim().to_string(),
                password: form.password.clone(),
                email: form.email.trim().to_string(),
                display_name: form.display_name.trim().to_string(),
                role_request,
            },
            &client.ip,
        )
        .await?;
    Ok(())
}

/// GET /change-password
pub async fn change_password_page(PageSession(auth): PageSession) -> PageResult {
    auth.require(
        Action::ChangeOwnPassword,
        &Resource::account(auth.username(), auth.session.status),
    )?;
    Ok(render_page(
        StatusCode::OK,
        ChangePasswordTemplate {
            layout: layout(&auth, "Change password"),
            flash: Flash::default(),
        },
    ))
}

/// POST /change-password
pub async fn change_password_submit(
    State(state): State<Arc<AppState>>,
    PageSession(auth): PageSession,
    Form(form): Form<ChangePasswordForm>,
) -> PageResult {
    auth.require(
        Action::ChangeOwnPassword,
        &Resource::account(auth.username(), auth.session.status),
    )?;
    auth.verify_csrf(form.csrf_token.as_deref(), state.config.auth.csrf_enforce)?;

    let result = state
        .auth
        .change_password(
            auth.username(),
            &auth.token,
            &form.current_password,
            &form.new_password,
            &form.confirm_password,
        )
        .await;
    let (status, flash) = outcome(result, StatusCode::OK, |_| {
        "Your password has been changed.".to_string()
    })?;
    Ok(render_page(
        status,
        ChangePasswordTemplate {
            layout: layout(&auth, "Change password"),
            flash,
        },
    ))
}
