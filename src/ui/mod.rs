// Server-rendered pages for managers and drivers.
// Uses Askama templates; every mutation carries the session's CSRF token in
// a hidden form field.

mod account;
mod driver;
mod manager;
mod templates;

use askama::Template;
use axum::{
    async_trait,
    extract::FromRequestParts,
    handler::Handler,
    http::{request::Parts, StatusCode},
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::api::rate_limit::rate_limit_auth;
use crate::api::session::{authenticate, Authenticated};
use crate::db::Role;
use crate::error::{Error, Result};
use crate::AppState;

pub use templates::*;

pub fn create_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let limited = || middleware::from_fn_with_state(state.clone(), rate_limit_auth);

    Router::new()
        // Public routes
        .route(
            "/",
            get(account::login_page).post(account::login_submit.layer(limited())),
        )
        .route(
            "/register",
            get(account::register_page).post(account::register_submit.layer(limited())),
        )
        .route("/logout", post(account::logout))
        // Any signed-in user
        .route(
            "/change-password",
            get(account::change_password_page).post(account::change_password_submit),
        )
        .route("/driver-dashboard", get(driver::dashboard))
        // Managers
        .route("/manager-dashboard", get(manager::dashboard))
        .route(
            "/approve-users",
            get(manager::approve_users_page).post(manager::approve_users_submit),
        )
        .route(
            "/manage-users",
            get(manager::manage_users_page).post(manager::manage_users_submit),
        )
        .route(
            "/assign-routes",
            get(manager::assign_routes_page).post(manager::assign_routes_submit),
        )
        .route(
            "/fleet",
            get(manager::fleet_page).post(manager::fleet_submit),
        )
}

// Helper to render templates and handle errors
fn render_page<T: Template>(status: StatusCode, template: T) -> Response {
    match template.render() {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Template render failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
        }
    }
}

fn layout(auth: &Authenticated, title: &'static str) -> Layout {
    Layout {
        title,
        username: Some(auth.session.username.clone()),
        role: auth.session.role.to_string(),
        dashboard: auth.session.role.dashboard_path(),
        csrf_token: auth.session.csrf_token.clone(),
        is_manager: auth.session.role == Role::Manager,
    }
}

/// Split the result of a form action into the status and banner of the
/// re-rendered page. Infrastructure failures go to the error page instead.
fn outcome<T>(
    result: Result<T>,
    success: StatusCode,
    message: impl FnOnce(T) -> String,
) -> std::result::Result<(StatusCode, Flash), PageError> {
    match result {
        Ok(value) => Ok((success, Flash::notice(message(value)))),
        Err(e) if e.is_infrastructure() || matches!(e, Error::Forbidden) => Err(e.into()),
        Err(e) => Ok((e.status_code(), Flash::error(e.user_message()))),
    }
}

/// A failure that replaces the whole page.
pub struct PageError(Error);

impl From<Error> for PageError {
    fn from(err: Error) -> Self {
        PageError(err)
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        match self.0 {
            Error::Unauthenticated => Redirect::to("/").into_response(),
            err => {
                let status = err.status_code();
                let reference = err.report();
                render_page(
                    status,
                    ErrorTemplate {
                        layout: Layout::public("Error"),
                        status: status.as_u16(),
                        message: err.user_message(),
                        reference,
                    },
                )
            }
        }
    }
}

type PageResult = std::result::Result<Response, PageError>;

/// Session extractor for pages: no valid session redirects to the login form.
pub struct PageSession(pub Authenticated);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for PageSession {
    type Rejection = PageError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(PageSession(authenticate(state, parts).await?))
    }
}
