//! Driver landing page.

use axum::{extract::State, http::StatusCode};
use std::sync::Arc;

use super::{layout, render_page, DriverDashboardTemplate, Flash, PageResult, PageSession};
use crate::auth::{Action, Resource};
use crate::db::{self, AssignmentFilter};
use crate::AppState;

/// GET /driver-dashboard
///
/// Shows only the caller's own assignments and the students riding those
/// routes.
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    PageSession(auth): PageSession,
) -> PageResult {
    let username = auth.username().to_string();
    auth.require(Action::ViewOwnDashboard, &Resource::owned_by(&username))?;

    let assignments = state
        .assignments
        .list(&AssignmentFilter::for_driver(username.as_str()))
        .await?;

    auth.require(Action::ViewOwnStudents, &Resource::owned_by(&username))?;
    let mut route_ids: Vec<String> = assignments.iter().map(|a| a.route_id.clone()).collect();
    route_ids.sort();
    route_ids.dedup();
    let students = state.fleet.students_on(&route_ids).await?;

    let display_name = state
        .store
        .deadline(db::find_user(state.store.pool(), &username))
        .await?
        .map(|u| u.display_name)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| username.clone());

    Ok(render_page(
        StatusCode::OK,
        DriverDashboardTemplate {
            layout: layout(&auth, "My routes"),
            flash: Flash::default(),
            display_name,
            assignments,
            students,
        },
    ))
}
