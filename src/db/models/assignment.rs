//! Route assignments: one driver, one vehicle, one route, one period.

use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteExecutor};

use super::{Period, VehicleRef};

#[derive(Debug, Clone, FromRow)]
pub struct AssignmentRow {
    pub id: i64,
    pub driver: String,
    pub vehicle_kind: String,
    pub vehicle_id: String,
    pub route_id: String,
    pub period: String,
    pub assigned_date: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub id: i64,
    pub driver: String,
    pub vehicle: VehicleRef,
    pub route_id: String,
    pub period: Period,
    pub assigned_date: String,
    pub created_at: String,
}

impl TryFrom<AssignmentRow> for Assignment {
    type Error = sqlx::Error;

    fn try_from(row: AssignmentRow) -> Result<Self, Self::Error> {
        let kind = row
            .vehicle_kind
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?;
        let period = row
            .period
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?;
        Ok(Self {
            id: row.id,
            driver: row.driver,
            vehicle: VehicleRef::new(kind, row.vehicle_id),
            route_id: row.route_id,
            period,
            assigned_date: row.assigned_date,
            created_at: row.created_at,
        })
    }
}

fn decode(row: Option<AssignmentRow>) -> Result<Option<Assignment>, sqlx::Error> {
    row.map(Assignment::try_from).transpose()
}

/// Row to insert. `id` and `created_at` are carried over when an update
/// re-inserts an existing assignment.
#[derive(Debug, Clone)]
pub struct AssignmentRecord {
    pub id: Option<i64>,
    pub driver: String,
    pub vehicle: VehicleRef,
    pub route_id: String,
    pub period: Period,
    pub assigned_date: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct AssignmentFilter {
    pub driver: Option<String>,
    pub route_id: Option<String>,
    pub period: Option<Period>,
    pub vehicle: Option<VehicleRef>,
}

impl AssignmentFilter {
    pub fn for_driver(driver: impl Into<String>) -> Self {
        Self {
            driver: Some(driver.into()),
            ..Self::default()
        }
    }
}

pub async fn find_assignment(
    db: impl SqliteExecutor<'_>,
    id: i64,
) -> Result<Option<Assignment>, sqlx::Error> {
    let row = sqlx::query_as::<_, AssignmentRow>("SELECT * FROM route_assignments WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    decode(row)
}

/// Identical (driver, vehicle, route) triple.
pub async fn find_identical(
    db: impl SqliteExecutor<'_>,
    driver: &str,
    vehicle: &VehicleRef,
    route_id: &str,
) -> Result<Option<Assignment>, sqlx::Error> {
    let row = sqlx::query_as::<_, AssignmentRow>(
        r#"
        SELECT * FROM route_assignments
        WHERE driver = ? AND vehicle_kind = ? AND vehicle_id = ? AND route_id = ?
        LIMIT 1
        "#,
    )
    .bind(driver)
    .bind(vehicle.kind.as_str())
    .bind(&vehicle.id)
    .bind(route_id)
    .fetch_optional(db)
    .await?;
    decode(row)
}

pub async fn find_driver_route_period(
    db: impl SqliteExecutor<'_>,
    driver: &str,
    route_id: &str,
    period: Period,
) -> Result<Option<Assignment>, sqlx::Error> {
    let row = sqlx::query_as::<_, AssignmentRow>(
        r#"
        SELECT * FROM route_assignments
        WHERE driver = ? AND route_id = ? AND period = ?
        LIMIT 1
        "#,
    )
    .bind(driver)
    .bind(route_id)
    .bind(period.as_str())
    .fetch_optional(db)
    .await?;
    decode(row)
}

/// An assignment holding `vehicle` in `period` for a driver other than
/// `driver`.
pub async fn find_vehicle_holder(
    db: impl SqliteExecutor<'_>,
    vehicle: &VehicleRef,
    period: Period,
    driver: &str,
) -> Result<Option<Assignment>, sqlx::Error> {
    let row = sqlx::query_as::<_, AssignmentRow>(
        r#"
        SELECT * FROM route_assignments
        WHERE vehicle_kind = ? AND vehicle_id = ? AND period = ? AND driver != ?
        ORDER BY id
        LIMIT 1
        "#,
    )
    .bind(vehicle.kind.as_str())
    .bind(&vehicle.id)
    .bind(period.as_str())
    .bind(driver)
    .fetch_optional(db)
    .await?;
    decode(row)
}

pub async fn insert_assignment(
    db: impl SqliteExecutor<'_>,
    record: &AssignmentRecord,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO route_assignments (id, driver, vehicle_kind, vehicle_id, route_id, period,
                                       assigned_date, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id)
    .bind(&record.driver)
    .bind(record.vehicle.kind.as_str())
    .bind(&record.vehicle.id)
    .bind(&record.route_id)
    .bind(record.period.as_str())
    .bind(&record.assigned_date)
    .bind(&record.created_at)
    .execute(db)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn delete_assignment(db: impl SqliteExecutor<'_>, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM route_assignments WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_for_driver(
    db: impl SqliteExecutor<'_>,
    driver: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM route_assignments WHERE driver = ?")
        .bind(driver)
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete_for_vehicle(
    db: impl SqliteExecutor<'_>,
    vehicle: &VehicleRef,
) -> Result<u64, sqlx::Error> {
    let result =
        sqlx::query("DELETE FROM route_assignments WHERE vehicle_kind = ? AND vehicle_id = ?")
            .bind(vehicle.kind.as_str())
            .bind(&vehicle.id)
            .execute(db)
            .await?;
    Ok(result.rows_affected())
}

pub async fn list_assignments(
    db: impl SqliteExecutor<'_>,
    filter: &AssignmentFilter,
) -> Result<Vec<Assignment>, sqlx::Error> {
    let mut query: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT * FROM route_assignments WHERE 1 = 1");
    if let Some(driver) = &filter.driver {
        query.push(" AND driver = ").push_bind(driver.clone());
    }
    if let Some(route_id) = &filter.route_id {
        query.push(" AND route_id = ").push_bind(route_id.clone());
    }
    if let Some(period) = filter.period {
        query.push(" AND period = ").push_bind(period.as_str());
    }
    if let Some(vehicle) = &filter.vehicle {
        query
            .push(" AND vehicle_kind = ")
            .push_bind(vehicle.kind.as_str())
            .push(" AND vehicle_id = ")
            .push_bind(vehicle.id.clone());
    }
    query.push(" ORDER BY driver, period, route_id, id");

    query
        .build_query_as::<AssignmentRow>()
        .fetch_all(db)
        .await?
        .into_iter()
        .map(Assignment::try_from)
        .collect()
}

pub async fn count_assignments(db: impl SqliteExecutor<'_>) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM route_assignments")
        .fetch_one(db)
        .await?;
    Ok(count)
}
