//! Route assignment JSON API.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::ApiError;
use super::session::{ApiSession, Authenticated, CSRF_HEADER};
use crate::assignments::{AssignmentInput, AssignmentRequest};
use crate::auth::{Action, Resource};
use crate::db::{Assignment, AssignmentFilter, Period, VehicleKind, VehicleRef};
use crate::error::Result;
use crate::validation;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub driver: Option<String>,
    pub route_id: Option<String>,
    pub period: Option<String>,
    pub vehicle_kind: Option<String>,
    pub vehicle_id: Option<String>,
}

impl ListQuery {
    fn into_filter(self) -> Result<AssignmentFilter> {
        let period = validation::non_empty(self.period)
            .map(|p| p.parse::<Period>())
            .transpose()?;
        let vehicle = match validation::non_empty(self.vehicle_id) {
            Some(id) => {
                let kind = validation::non_empty(self.vehicle_kind)
                    .map(|k| k.parse::<VehicleKind>())
                    .transpose()?
                    .unwrap_or(VehicleKind::Bus);
                Some(VehicleRef::new(kind, id))
            }
            None => None,
        };
        Ok(AssignmentFilter {
            driver: validation::non_empty(self.driver),
            route_id: validation::non_empty(self.route_id),
            period,
            vehicle,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ListAssignmentsResponse {
    pub assignments: Vec<Assignment>,
    pub total: usize,
}

/// Mutations need the manager role and the session's CSRF token in the
/// `X-CSRF-Token` header.
fn require_manager(auth: &Authenticated, headers: &HeaderMap, state: &AppState) -> Result<()> {
    auth.require(Action::ManageAssignments, &Resource::management())?;
    let submitted = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok());
    auth.verify_csrf(submitted, state.config.auth.csrf_enforce)
}

/// GET /api/route-assignments
pub async fn list_assignments(
    State(state): State<Arc<AppState>>,
    ApiSession(auth): ApiSession,
    Query(query): Query<ListQuery>,
) -> std::result::Result<Json<ListAssignmentsResponse>, ApiError> {
    auth.require(Action::ViewAssignments, &Resource::management())?;
    let assignments = state.assignments.list(&query.into_filter()?).await?;
    Ok(Json(ListAssignmentsResponse {
        total: assignments.len(),
        assignments,
    }))
}

/// POST /api/route-assignments
pub async fn create_assignment(
    State(state): State<Arc<AppState>>,
    ApiSession(auth): ApiSession,
    headers: HeaderMap,
    Json(input): Json<AssignmentInput>,
) -> std::result::Result<(StatusCode, Json<Assignment>), ApiError> {
    require_manager(&auth, &headers, &state)?;
    let request = AssignmentRequest::try_from(input)?;
    let created = state.assignments.create(auth.actor(), request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// PUT /api/route-assignments/:id
pub async fn update_assignment(
    State(state): State<Arc<AppState>>,
    ApiSession(auth): ApiSession,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(input): Json<AssignmentInput>,
) -> std::result::Result<Json<Assignment>, ApiError> {
    require_manager(&auth, &headers, &state)?;
    let request = AssignmentRequest::try_from(input)?;
    let updated = state.assignments.update(auth.actor(), id, request).await?;
    Ok(Json(updated))
}

/// DELETE /api/route-assignments/:id
pub async fn delete_assignment(
    State(state): State<Arc<AppState>>,
    ApiSession(auth): ApiSession,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> std::result::Result<StatusCode, ApiError> {
    require_manager(&auth, &headers, &state)?;
    state.assignments.delete(auth.actor(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
