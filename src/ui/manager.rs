//! Manager pages: dashboard, approvals, user administration, route
//! assignments and fleet status.

use axum::{extract::State, http::StatusCode, Form};
use serde::Deserialize;
use std::sync::Arc;

use super::{
    layout, outcome, render_page, ApproveUsersTemplate, AssignRoutesTemplate, Flash,
    FleetTemplate, ManageUsersTemplate, ManagerDashboardTemplate, ManagerStats, PageResult,
    PageSession,
};
use crate::api::session::Authenticated;
use crate::assignments::{AssignmentInput, AssignmentRequest};
use crate::auth::{Action, Resource};
use crate::db::{
    self, Assignment, AssignmentFilter, Role, UserProfile, UserStatus, VehicleKind, VehicleRef,
    VehicleStatus,
};
use crate::error::{Error, Result};
use crate::users::CreateUser;
use crate::validation;
use crate::AppState;

const RECENT_ACTIVITY: i64 = 10;

/// GET /manager-dashboard
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    PageSession(auth): PageSession,
) -> PageResult {
    auth.require(Action::ViewManagerDashboard, &Resource::management())?;

    let store = &state.store;
    let stats = ManagerStats {
        pending_users: store
            .deadline(db::count_users_by_status(store.pool(), UserStatus::Pending))
            .await?,
        active_drivers: state.users.active_drivers().await?.len(),
        assignments: store.deadline(db::count_assignments(store.pool())).await?,
        active_buses: store.deadline(db::count_active_buses(store.pool())).await?,
    };
    let recent_activity = store
        .deadline(db::list_recent_audit_logs(store.pool(), RECENT_ACTIVITY))
        .await?;

    Ok(render_page(
        StatusCode::OK,
        ManagerDashboardTemplate {
            layout: layout(&auth, "Dashboard"),
            flash: Flash::default(),
            stats,
            recent_activity,
        },
    ))
}

// ============================================================================
// Approvals
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApproveForm {
    #[serde(default)]
    pub csrf_token: Option<String>,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub username: String,
}

async fn approve_users_view(
    state: &AppState,
    auth: &Authenticated,
    status: StatusCode,
    flash: Flash,
) -> PageResult {
    let pending = state.users.list_pending().await?;
    Ok(render_page(
        status,
        ApproveUsersTemplate {
            layout: layout(auth, "Approve users"),
            flash,
            pending,
        },
    ))
}

/// GET /approve-users
pub async fn approve_users_page(
    State(state): State<Arc<AppState>>,
    PageSession(auth): PageSession,
) -> PageResult {
    auth.require(Action::ApproveUsers, &Resource::management())?;
    approve_users_view(&state, &auth, StatusCode::OK, Flash::default()).await
}

/// POST /approve-users
pub async fn approve_users_submit(
    State(state): State<Arc<AppState>>,
    PageSession(auth): PageSession,
    Form(form): Form<ApproveForm>,
) -> PageResult {
    auth.require(Action::ApproveUsers, &Resource::management())?;
    auth.verify_csrf(form.csrf_token.as_deref(), state.config.auth.csrf_enforce)?;

    let username = form.username.trim();
    let result = match form.action.as_str() {
        "approve" => state
            .users
            .approve(auth.actor(), username)
            .await
            .map(|()| format!("{} can now sign in.", username)),
        "reject" => state
            .users
            .reject(auth.actor(), username)
            .await
            .map(|()| format!("Registration for {} was rejected.", username)),
        other => Err(unknown_action(other)),
    };
    let (status, flash) = outcome(result, StatusCode::OK, |message| message)?;
    approve_users_view(&state, &auth, status, flash).await
}

// ============================================================================
// User administration
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ManageUserForm {
    #[serde(default)]
    pub csrf_token: Option<String>,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
    /// Checkbox: present when ticked.
    #[serde(default)]
    pub has_cdl: Option<String>,
    #[serde(default)]
    pub cdl_expiry: Option<String>,
    #[serde(default)]
    pub password: String,
}

impl ManageUserForm {
    fn role(&self) -> Result<Role> {
        match self.role.as_deref().map(str::trim) {
            None | Some("") => Ok(Role::Driver),
            Some(role) => Ok(role.parse()?),
        }
    }

    fn has_cdl(&self) -> bool {
        self.has_cdl.is_some()
    }
}

async fn manage_users_view(
    state: &AppState,
    auth: &Authenticated,
    status: StatusCode,
    flash: Flash,
) -> PageResult {
    let users = state.users.list(None).await?;
    Ok(render_page(
        status,
        ManageUsersTemplate {
            layout: layout(auth, "Users"),
            flash,
            users,
        },
    ))
}

/// GET /manage-users
pub async fn manage_users_page(
    State(state): State<Arc<AppState>>,
    PageSession(auth): PageSession,
) -> PageResult {
    auth.require(Action::ManageUsers, &Resource::management())?;
    manage_users_view(&state, &auth, StatusCode::OK, Flash::default()).await
}

/// POST /manage-users
pub async fn manage_users_submit(
    State(state): State<Arc<AppState>>,
    PageSession(auth): PageSession,
    Form(form): Form<ManageUserForm>,
) -> PageResult {
    auth.require(Action::ManageUsers, &Resource::management())?;
    auth.verify_csrf(form.csrf_token.as_deref(), state.config.auth.csrf_enforce)?;

    let success = if form.action == "create" {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let result = apply_user_action(&state, &auth, form).await;
    let (status, flash) = outcome(result, success, |message| message)?;
    manage_users_view(&state, &auth, status, flash).await
}

async fn apply_user_action(
    state: &AppState,
    auth: &Authenticated,
    form: ManageUserForm,
) -> Result<String> {
    let actor = auth.actor();
    let username = form.username.trim().to_string();
    match form.action.as_str() {
        "create" => {
            let created = state
                .users
                .create(
                    actor,
                    CreateUser {
                        username: username.clone(),
                        password: form.password.clone(),
                        display_name: form.display_name.trim().to_string(),
                        email: form.email.trim().to_string(),
                        role: form.role()?,
                        has_cdl: form.has_cdl(),
                        cdl_expiry: validation::non_empty(form.cdl_expiry.clone()),
                    },
                )
                .await?;
            Ok(format!("Created {} ({}).", created.username, created.role))
        }
        "update" => {
            let profile = UserProfile {
                display_name: form.display_name.trim().to_string(),
                email: form.email.trim().to_string(),
                role: form.role()?,
                has_cdl: form.has_cdl(),
                cdl_expiry: validation::non_empty(form.cdl_expiry.clone()),
            };
            let updated = state.users.update(actor, &username, profile).await?;
            Ok(format!("Updated {}.", updated.username))
        }
        "suspend" => {
            state.users.suspend(actor, &username).await?;
            Ok(format!("{} is suspended and has been signed out.", username))
        }
        "activate" => {
            state.users.activate(actor, &username).await?;
            Ok(format!("{} is active again.", username))
        }
        "reset_password" => {
            state
                .users
                .reset_password(actor, &username, &form.password)
                .await?;
            Ok(format!("Password for {} has been reset.", username))
        }
        "delete" => {
            state.users.delete(actor, &username).await?;
            Ok(format!("Deleted {}.", username))
        }
        other => Err(unknown_action(other)),
    }
}

// ============================================================================
// Route assignments
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AssignForm {
    #[serde(default)]
    pub csrf_token: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub bus_id: Option<String>,
    #[serde(default)]
    pub vehicle_id: Option<String>,
    #[serde(default)]
    pub route_id: String,
    #[serde(default)]
    pub period: String,
    #[serde(default)]
    pub assigned_date: Option<String>,
}

impl AssignForm {
    fn request(&self) -> Result<AssignmentRequest> {
        AssignmentRequest::try_from(AssignmentInput {
            driver: self.driver.clone(),
            bus_id: self.bus_id.clone(),
            vehicle_id: self.vehicle_id.clone(),
            route_id: self.route_id.clone(),
            period: self.period.clone(),
            assigned_date: self.assigned_date.clone(),
        })
    }
}

async fn assign_routes_view(
    state: &AppState,
    auth: &Authenticated,
    status: StatusCode,
    flash: Flash,
) -> PageResult {
    let assignments = state
        .assignments
        .list(&AssignmentFilter::default())
        .await?;
    let drivers = state.users.active_drivers().await?;
    let buses = state.fleet.buses().await?;
    let vehicles = state.fleet.vehicles().await?;
    let routes = state.fleet.routes().await?;
    Ok(render_page(
        status,
        AssignRoutesTemplate {
            layout: layout(auth, "Route assignments"),
            flash,
            assignments,
            drivers,
            buses,
            vehicles,
            routes,
        },
    ))
}

/// GET /assign-routes
pub async fn assign_routes_page(
    State(state): State<Arc<AppState>>,
    PageSession(auth): PageSession,
) -> PageResult {
    auth.require(Action::ViewAssignments, &Resource::management())?;
    assign_routes_view(&state, &auth, StatusCode::OK, Flash::default()).await
}

/// POST /assign-routes
///
/// A rejected mutation re-renders the page with the conflict's status code
/// and leaves the table untouched.
pub async fn assign_routes_submit(
    State(state): State<Arc<AppState>>,
    PageSession(auth): PageSession,
    Form(form): Form<AssignForm>,
) -> PageResult {
    auth.require(Action::ManageAssignments, &Resource::management())?;
    auth.verify_csrf(form.csrf_token.as_deref(), state.config.auth.csrf_enforce)?;

    let action = validation::non_empty(form.action.clone()).unwrap_or_else(|| "create".into());
    let success = if action == "create" {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let result = apply_assignment_action(&state, &auth, &action, form).await;
    let (status, flash) = outcome(result, success, |message| message)?;
    assign_routes_view(&state, &auth, status, flash).await
}

fn parse_id(id: Option<String>) -> Result<i64> {
    let id = validation::non_empty(id).ok_or_else(|| Error::invalid("assignment number is required"))?;
    id.parse()
        .map_err(|_| Error::invalid(format!("'{}' is not an assignment number", id)))
}

fn describe(assignment: &Assignment) -> String {
    format!(
        "{} on route {} ({}) with {}",
        assignment.driver, assignment.route_id, assignment.period, assignment.vehicle
    )
}

async fn apply_assignment_action(
    state: &AppState,
    auth: &Authenticated,
    action: &str,
    form: AssignForm,
) -> Result<String> {
    let engine = &state.assignments;
    match action {
        "create" => {
            let request = form.request()?;
            let created = engine.create(auth.actor(), request).await?;
            Ok(format!("Assigned {}.", describe(&created)))
        }
        "update" => {
            let id = parse_id(form.id.clone())?;
            let request = form.request()?;
            let updated = engine.update(auth.actor(), id, request).await?;
            Ok(format!("Assignment #{} is now {}.", id, describe(&updated)))
        }
        "delete" => {
            let id = parse_id(form.id)?;
            let deleted = engine.delete(auth.actor(), id).await?;
            Ok(format!("Removed {}.", describe(&deleted)))
        }
        other => Err(unknown_action(other)),
    }
}

// ============================================================================
// Fleet
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct FleetForm {
    #[serde(default)]
    pub csrf_token: Option<String>,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub vehicle_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

async fn fleet_view(
    state: &AppState,
    auth: &Authenticated,
    status: StatusCode,
    flash: Flash,
) -> PageResult {
    let buses = state.fleet.buses().await?;
    let vehicles = state.fleet.vehicles().await?;
    Ok(render_page(
        status,
        FleetTemplate {
            layout: layout(auth, "Fleet"),
            flash,
            buses,
            vehicles,
        },
    ))
}

/// GET /fleet
pub async fn fleet_page(
    State(state): State<Arc<AppState>>,
    PageSession(auth): PageSession,
) -> PageResult {
    auth.require(Action::ManageFleet, &Resource::management())?;
    fleet_view(&state, &auth, StatusCode::OK, Flash::default()).await
}

/// POST /fleet
pub async fn fleet_submit(
    State(state): State<Arc<AppState>>,
    PageSession(auth): PageSession,
    Form(form): Form<FleetForm>,
) -> PageResult {
    auth.require(Action::ManageFleet, &Resource::management())?;
    auth.verify_csrf(form.csrf_token.as_deref(), state.config.auth.csrf_enforce)?;

    let result = apply_fleet_action(&state, &auth, form).await;
    let (status, flash) = outcome(result, StatusCode::OK, |message| message)?;
    fleet_view(&state, &auth, status, flash).await
}

async fn apply_fleet_action(
    state: &AppState,
    auth: &Authenticated,
    form: FleetForm,
) -> Result<String> {
    let kind: VehicleKind = form.kind.trim().parse()?;
    let id = form.vehicle_id.trim();
    if id.is_empty() {
        return Err(Error::invalid("vehicle id is required"));
    }
    let vehicle = VehicleRef::new(kind, id);
    match form.action.as_str() {
        "set_status" => {
            let status: VehicleStatus = form.status.as_deref().unwrap_or_default().parse()?;
            state.fleet.set_status(auth.actor(), &vehicle, status).await?;
            Ok(format!("{} is now {}.", vehicle, status))
        }
        "delete" => {
            let removed = state.fleet.delete_vehicle(auth.actor(), &vehicle).await?;
            Ok(format!(
                "Deleted {} and {} assignment(s) that used it.",
                vehicle, removed
            ))
        }
        other => Err(unknown_action(other)),
    }
}

fn unknown_action(action: &str) -> Error {
    Error::invalid(format!("unknown action '{}'", action))
}
