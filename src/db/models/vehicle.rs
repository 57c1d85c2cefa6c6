//! Buses and other fleet vehicles.

use serde::Serialize;
use sqlx::{FromRow, SqliteExecutor};

use super::{VehicleKind, VehicleRef, VehicleStatus};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Bus {
    pub bus_id: String,
    pub status: String,
    pub model: Option<String>,
    pub capacity: i64,
    pub oil_status: Option<String>,
    pub tire_status: Option<String>,
    pub maintenance_notes: Option<String>,
    pub current_mileage: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct OtherVehicle {
    pub vehicle_id: String,
    pub vehicle_type: String,
    pub status: String,
    pub model: Option<String>,
    pub license: Option<String>,
    pub oil_status: Option<String>,
    pub tire_status: Option<String>,
    pub maintenance_notes: Option<String>,
    pub current_mileage: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewBus {
    pub bus_id: String,
    pub model: Option<String>,
    pub capacity: i64,
    pub status: VehicleStatus,
}

#[derive(Debug, Clone)]
pub struct NewVehicle {
    pub vehicle_id: String,
    pub vehicle_type: String,
    pub model: Option<String>,
    pub license: Option<String>,
    pub status: VehicleStatus,
}

pub const VEHICLE_TYPES: [&str; 4] = ["van", "car", "truck", "suv"];

/// Current status of the referenced vehicle, or `None` if it does not exist.
/// Unknown status strings read as out-of-service.
pub async fn vehicle_status(
    db: impl SqliteExecutor<'_>,
    vehicle: &VehicleRef,
) -> Result<Option<VehicleStatus>, sqlx::Error> {
    let sql = match vehicle.kind {
        VehicleKind::Bus => "SELECT status FROM buses WHERE bus_id = ?",
        VehicleKind::Vehicle => "SELECT status FROM vehicles WHERE vehicle_id = ?",
    };
    let row: Option<(String,)> = sqlx::query_as(sql)
        .bind(&vehicle.id)
        .fetch_optional(db)
        .await?;
    Ok(row.map(|(status,)| status.parse().unwrap_or(VehicleStatus::OutOfService)))
}

pub async fn list_buses(db: impl SqliteExecutor<'_>) -> Result<Vec<Bus>, sqlx::Error> {
    sqlx::query_as::<_, Bus>("SELECT * FROM buses ORDER BY bus_id")
        .fetch_all(db)
        .await
}

pub async fn list_vehicles(db: impl SqliteExecutor<'_>) -> Result<Vec<OtherVehicle>, sqlx::Error> {
    sqlx::query_as::<_, OtherVehicle>("SELECT * FROM vehicles ORDER BY vehicle_id")
        .fetch_all(db)
        .await
}

pub async fn insert_bus(
    db: impl SqliteExecutor<'_>,
    bus: &NewBus,
    now: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO buses (bus_id, status, model, capacity, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&bus.bus_id)
    .bind(bus.status.as_str())
    .bind(&bus.model)
    .bind(bus.capacity)
    .bind(now)
    .bind(now)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn insert_vehicle(
    db: impl SqliteExecutor<'_>,
    vehicle: &NewVehicle,
    now: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO vehicles (vehicle_id, vehicle_type, status, model, license, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&vehicle.vehicle_id)
    .bind(&vehicle.vehicle_type)
    .bind(vehicle.status.as_str())
    .bind(&vehicle.model)
    .bind(&vehicle.license)
    .bind(now)
    .bind(now)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn set_vehicle_status(
    db: impl SqliteExecutor<'_>,
    vehicle: &VehicleRef,
    status: VehicleStatus,
    now: &str,
) -> Result<bool, sqlx::Error> {
    let sql = match vehicle.kind {
        VehicleKind::Bus => "UPDATE buses SET status = ?, updated_at = ? WHERE bus_id = ?",
        VehicleKind::Vehicle => {
            "UPDATE vehicles SET status = ?, updated_at = ? WHERE vehicle_id = ?"
        }
    };
    let result = sqlx::query(sql)
        .bind(status.as_str())
        .bind(now)
        .bind(&vehicle.id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_vehicle(
    db: impl SqliteExecutor<'_>,
    vehicle: &VehicleRef,
) -> Result<bool, sqlx::Error> {
    let sql = match vehicle.kind {
        VehicleKind::Bus => "DELETE FROM buses WHERE bus_id = ?",
        VehicleKind::Vehicle => "DELETE FROM vehicles WHERE vehicle_id = ?",
    };
    let result = sqlx::query(sql).bind(&vehicle.id).execute(db).await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count_active_buses(db: impl SqliteExecutor<'_>) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM buses WHERE status = 'active'")
        .fetch_one(db)
        .await?;
    Ok(count)
}
