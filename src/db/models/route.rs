use serde::Serialize;
use sqlx::{FromRow, SqliteExecutor};

use super::Period;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Route {
    pub route_id: String,
    pub route_name: String,
    pub period: String,
    pub start_time: String,
    pub end_time: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewRoute {
    pub route_id: String,
    pub route_name: String,
    pub period: Period,
    pub start_time: String,
    pub end_time: String,
}

pub async fn find_route(
    db: impl SqliteExecutor<'_>,
    route_id: &str,
) -> Result<Option<Route>, sqlx::Error> {
    sqlx::query_as::<_, Route>("SELECT * FROM routes WHERE route_id = ?")
        .bind(route_id)
        .fetch_optional(db)
        .await
}

pub async fn list_routes(db: impl SqliteExecutor<'_>) -> Result<Vec<Route>, sqlx::Error> {
    sqlx::query_as::<_, Route>("SELECT * FROM routes ORDER BY route_id")
        .fetch_all(db)
        .await
}

pub async fn insert_route(
    db: impl SqliteExecutor<'_>,
    route: &NewRoute,
    now: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO routes (route_id, route_name, period, start_time, end_time, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&route.route_id)
    .bind(&route.route_name)
    .bind(route.period.as_str())
    .bind(&route.start_time)
    .bind(&route.end_time)
    .bind(now)
    .bind(now)
    .execute(db)
    .await?;
    Ok(())
}

/// Take the database write lock on behalf of the current transaction by
/// issuing a no-op write against the route row.
pub async fn lock_route(db: impl SqliteExecutor<'_>, route_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE routes SET updated_at = updated_at WHERE route_id = ?")
        .bind(route_id)
        .execute(db)
        .await?;
    Ok(())
}
