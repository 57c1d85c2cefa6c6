//! Route assignment engine.
//!
//! Every mutation runs in one transaction whose first statement is a write,
//! so SQLite hands the transaction the database write lock before any
//! invariant is read. Two racing creations are therefore serialized: the
//! second one re-reads after the first commits and gets the precise
//! conflict rather than a constraint error.
//!
//! Invariants, checked in this order:
//! 1. no identical (driver, vehicle, route) row
//! 2. one row per (driver, route, period)
//! 3. a vehicle is held by at most one driver per period
//!
//! A driver may hold any number of routes. The audit row of a change is
//! written in the same transaction, so an unaudited change never commits.

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::db::{
    self, audit::actions, audit::target_types, delete_assignment, find_assignment,
    find_driver_route_period, find_identical, find_route, find_user, find_vehicle_holder,
    insert_assignment, list_assignments, lock_route, vehicle_status, Assignment,
    AssignmentFilter, AssignmentRecord, AuditRecord, Period, Store, VehicleRef, VehicleStatus,
};
use crate::error::{Error, Result};
use crate::users::Actor;
use crate::validation;

/// Everything needed to place one driver on one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentRequest {
    pub driver: String,
    pub vehicle: VehicleRef,
    pub route_id: String,
    pub period: Period,
    pub assigned_date: NaiveDate,
}

impl AssignmentRequest {
    pub fn new(
        driver: impl Into<String>,
        vehicle: VehicleRef,
        route_id: impl Into<String>,
        period: Period,
    ) -> Self {
        Self {
            driver: driver.into(),
            vehicle,
            route_id: route_id.into(),
            period,
            assigned_date: Utc::now().date_naive(),
        }
    }

    fn validate(&self) -> Result<()> {
        validation::validate_username(&self.driver)?;
        validation::validate_identifier("Route", &self.route_id)?;
        validation::validate_identifier(
            match self.vehicle.kind {
                db::VehicleKind::Bus => "Bus",
                db::VehicleKind::Vehicle => "Vehicle",
            },
            &self.vehicle.id,
        )?;
        Ok(())
    }
}

/// Assignment fields as submitted by a form or a JSON body. Exactly one of
/// `bus_id` and `vehicle_id` must be set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssignmentInput {
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

impl TryFrom<AssignmentInput> for AssignmentRequest {
    type Error = Error;

    fn try_from(input: AssignmentInput) -> Result<Self> {
        let vehicle = match (
            validation::non_empty(input.bus_id),
            validation::non_empty(input.vehicle_id),
        ) {
            (Some(bus), None) => VehicleRef::bus(bus),
            (None, Some(vehicle)) => VehicleRef::vehicle(vehicle),
            (Some(_), Some(_)) => {
                return Err(Error::invalid("choose either a bus or a vehicle, not both"))
            }
            (None, None) => return Err(Error::invalid("a bus or vehicle is required")),
        };
        let period: Period = input.period.parse()?;
        let mut request = AssignmentRequest::new(
            input.driver.trim(),
            vehicle,
            input.route_id.trim(),
            period,
        );
        if let Some(date) = validation::non_empty(input.assigned_date) {
            request.assigned_date = validation::parse_date("Assigned date", &date)?;
        }
        Ok(request)
    }
}

#[derive(Clone)]
pub struct AssignmentEngine {
    store: Store,
}

impl AssignmentEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn create(&self, actor: Actor<'_>, request: AssignmentRequest) -> Result<Assignment> {
        request.validate()?;
        let audit = actor.audit(actions::ASSIGNMENT_CREATE, target_types::ASSIGNMENT, "");
        let result = self
            .store
            .transaction(move |conn| {
                Box::pin(async move {
                    lock_route(&mut *conn, &request.route_id).await?;
                    check_references(conn, &request).await?;
                    check_invariants(conn, &request).await?;
                    let created = insert(conn, &request, None, db::now_timestamp()).await?;
                    audited(conn, audit, created).await
                })
            })
            .await;
        record("create", &result);
        result
    }

    /// Replace an assignment in place. The old row is removed first so the
    /// new values are checked only against the other rows; `id` and
    /// `created_at` are preserved.
    pub async fn update(
        &self,
        actor: Actor<'_>,
        id: i64,
        request: AssignmentRequest,
    ) -> Result<Assignment> {
        request.validate()?;
        let audit = actor.audit(actions::ASSIGNMENT_UPDATE, target_types::ASSIGNMENT, "");
        let result = self
            .store
            .transaction(move |conn| {
                Box::pin(async move {
                    lock_route(&mut *conn, &request.route_id).await?;
                    let existing = find_assignment(&mut *conn, id)
                        .await?
                        .ok_or_else(|| Error::NotFound(format!("assignment {}", id)))?;
                    delete_assignment(&mut *conn, id).await?;
                    check_references(conn, &request).await?;
                    check_invariants(conn, &request).await?;
                    let updated = insert(conn, &request, Some(id), existing.created_at).await?;
                    audited(conn, audit, updated).await
                })
            })
            .await;
        record("update", &result);
        result
    }

    pub async fn delete(&self, actor: Actor<'_>, id: i64) -> Result<Assignment> {
        let audit = actor.audit(actions::ASSIGNMENT_DELETE, target_types::ASSIGNMENT, "");
        let result = self
            .store
            .transaction(move |conn| {
                Box::pin(async move {
                    let existing = find_assignment(&mut *conn, id)
                        .await?
                        .ok_or_else(|| Error::NotFound(format!("assignment {}", id)))?;
                    delete_assignment(&mut *conn, id).await?;
                    audited(conn, audit, existing).await
                })
            })
            .await;
        record("delete", &result);
        result
    }

    pub async fn get(&self, id: i64) -> Result<Assignment> {
        self.store
            .deadline(find_assignment(self.store.pool(), id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("assignment {}", id)))
    }

    pub async fn list(&self, filter: &AssignmentFilter) -> Result<Vec<Assignment>> {
        self.store
            .deadline(list_assignments(self.store.pool(), filter))
            .await
    }
}

/// Write the audit row for `assignment` on the transaction's connection.
async fn audited(
    conn: &mut SqliteConnection,
    mut audit: AuditRecord,
    assignment: Assignment,
) -> Result<Assignment> {
    audit.target_id = assignment.id.to_string();
    audit.details = serde_json::to_value(&assignment).ok();
    audit.write(&mut *conn).await?;
    Ok(assignment)
}

/// Driver, vehicle and route must exist and be active.
async fn check_references(conn: &mut SqliteConnection, request: &AssignmentRequest) -> Result<()> {
    let driver = find_user(&mut *conn, &request.driver)
        .await?
        .ok_or_else(|| Error::DriverMissing(request.driver.clone()))?;
    if !driver.is_active_driver() {
        return Err(Error::DriverInactive(request.driver.clone()));
    }

    match vehicle_status(&mut *conn, &request.vehicle).await? {
        None => return Err(Error::VehicleMissing(request.vehicle.clone())),
        Some(VehicleStatus::Active) => {}
        Some(_) => return Err(Error::VehicleInactive(request.vehicle.clone())),
    }

    if find_route(&mut *conn, &request.route_id).await?.is_none() {
        return Err(Error::RouteMissing(request.route_id.clone()));
    }
    Ok(())
}

async fn check_invariants(conn: &mut SqliteConnection, request: &AssignmentRequest) -> Result<()> {
    if find_identical(
        &mut *conn,
        &request.driver,
        &request.vehicle,
        &request.route_id,
    )
    .await?
    .is_some()
    {
        return Err(Error::DuplicateAssignment {
            driver: request.driver.clone(),
            vehicle: request.vehicle.clone(),
            route_id: request.route_id.clone(),
        });
    }

    if find_driver_route_period(&mut *conn, &request.driver, &request.route_id, request.period)
        .await?
        .is_some()
    {
        return Err(Error::DriverRouteConflict {
            driver: request.driver.clone(),
            route_id: request.route_id.clone(),
            period: request.period,
        });
    }

    if let Some(holder) =
        find_vehicle_holder(&mut *conn, &request.vehicle, request.period, &request.driver).await?
    {
        return Err(Error::VehicleDoubleBooked {
            vehicle: request.vehicle.clone(),
            route_id: holder.route_id,
            period: request.period,
            holder: holder.driver,
        });
    }
    Ok(())
}

async fn insert(
    conn: &mut SqliteConnection,
    request: &AssignmentRequest,
    id: Option<i64>,
    created_at: String,
) -> Result<Assignment> {
    let record = AssignmentRecord {
        id,
        driver: request.driver.clone(),
        vehicle: request.vehicle.clone(),
        route_id: request.route_id.clone(),
        period: request.period,
        assigned_date: request.assigned_date.format("%Y-%m-%d").to_string(),
        created_at,
    };
    let new_id = insert_assignment(&mut *conn, &record)
        .await
        .map_err(|e| constraint_conflict(e, request))?;

    Ok(Assignment {
        id: new_id,
        driver: record.driver,
        vehicle: record.vehicle,
        route_id: record.route_id,
        period: record.period,
        assigned_date: record.assigned_date,
        created_at: record.created_at,
    })
}

/// Name the invariant behind a unique-index violation. Only reachable if a
/// writer bypassed the engine's lock.
fn constraint_conflict(err: sqlx::Error, request: &AssignmentRequest) -> Error {
    let is_unique = matches!(&err, sqlx::Error::Database(db_err) if db_err.is_unique_violation());
    if !is_unique {
        return err.into();
    }
    let message = err.to_string();
    if message.contains("route_assignments.period") {
        Error::DriverRouteConflict {
            driver: request.driver.clone(),
            route_id: request.route_id.clone(),
            period: request.period,
        }
    } else {
        Error::DuplicateAssignment {
            driver: request.driver.clone(),
            vehicle: request.vehicle.clone(),
            route_id: request.route_id.clone(),
        }
    }
}

fn record(op: &'static str, result: &Result<Assignment>) {
    let outcome = match result {
        Ok(assignment) => {
            info!(
                op,
                id = assignment.id,
                driver = %assignment.driver,
                vehicle = %assignment.vehicle,
                route_id = %assignment.route_id,
                period = %assignment.period,
                "Route assignment changed"
            );
            "success"
        }
        Err(e) => {
            if e.status_code() == axum::http::StatusCode::CONFLICT {
                warn!(op, kind = e.kind(), reason = %e, "Route assignment rejected");
            }
            e.kind()
        }
    };
    metrics::counter!("assignment_mutations_total", "op" => op, "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests;
