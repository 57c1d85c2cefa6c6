mod models;

pub use models::*;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::SqlitePool;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::error::Error;

pub type DbPool = SqlitePool;

/// Fixed-width UTC format; lexical order of stored values equals time order.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub fn timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn now_timestamp() -> String {
    timestamp(Utc::now())
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Database handle given to every component at construction.
///
/// Wraps the pool together with the per-operation deadline so callers never
/// issue a query without one.
#[derive(Clone)]
pub struct Store {
    pool: DbPool,
    timeout: Duration,
}

impl Store {
    pub fn new(pool: DbPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a single database operation under the configured deadline.
    pub async fn deadline<T, F>(&self, operation: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Run `work` inside one transaction.
    ///
    /// Commits when `work` returns `Ok`. Returning `Err`, panicking, being
    /// cancelled or exceeding the deadline all drop the open transaction,
    /// which rolls it back.
    pub async fn transaction<T, F>(&self, work: F) -> Result<T, Error>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, Error>> + Send,
    {
        match tokio::time::timeout(self.timeout, self.run_transaction(work)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn run_transaction<T, F>(&self, work: F) -> Result<T, Error>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, Error>> + Send,
    {
        let mut tx = self.pool.begin().await?;
        match work(&mut *tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Transaction rollback failed");
                }
                Err(err)
            }
        }
    }
}

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(conn: &mut SqliteConnection, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(&mut *conn).await?;
        }
    }
    Ok(())
}

pub async fn init(config: &DatabaseConfig) -> Result<Store> {
    info!(url = %config.url, "Initializing database");

    let options = SqliteConnectOptions::from_str(&config.url)
        .with_context(|| format!("Invalid database url: {}", config.url))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(config.operation_timeout());

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_open)
        .min_connections(config.max_idle.min(config.max_open))
        .max_lifetime(config.max_lifetime())
        .acquire_timeout(config.operation_timeout())
        .connect_with(options)
        .await
        .context("Failed to open database")?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(Store::new(pool, config.operation_timeout()))
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");
    let mut conn = pool.acquire().await?;

    // Migration 001: Initial schema
    execute_sql(&mut conn, include_str!("../../migrations/001_initial.sql"))
        .await
        .context("migration 001 failed")?;

    // Migration 002: Drop named single-column driver indexes
    execute_sql(
        &mut conn,
        include_str!("../../migrations/002_assignment_constraints.sql"),
    )
    .await
    .context("migration 002 failed")?;

    // Migration 003: Audit trail
    execute_sql(&mut conn, include_str!("../../migrations/003_audit_logs.sql"))
        .await
        .context("migration 003 failed")?;
    drop(conn);

    // Migration 004: Remove a UNIQUE(driver) that survived 002
    remove_legacy_driver_constraint(pool)
        .await
        .context("migration 004 failed")?;

    info!("Migrations completed");
    Ok(())
}

/// Drop or rebuild around a unique constraint on `route_assignments(driver)`.
///
/// A table-level constraint cannot be dropped in place, so the table is
/// renamed, recreated and copied. All of it happens in one transaction: on
/// failure the original table is left exactly as it was.
async fn remove_legacy_driver_constraint(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;
    let Some(index) = legacy_driver_unique_index(&mut tx).await? else {
        return Ok(());
    };

    if index.origin == "c" {
        info!(index = %index.name, "Dropping legacy unique index on route_assignments(driver)");
        sqlx::query(&format!("DROP INDEX IF EXISTS \"{}\"", index.name.replace('"', "")))
            .execute(&mut *tx)
            .await?;
    } else {
        info!("Rebuilding route_assignments without UNIQUE(driver)");
        execute_sql(
            &mut tx,
            include_str!("../../migrations/004_rebuild_route_assignments.sql"),
        )
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

struct LegacyIndex {
    name: String,
    origin: String,
}

/// Find a unique index covering exactly `route_assignments(driver)`.
async fn legacy_driver_unique_index(conn: &mut SqliteConnection) -> Result<Option<LegacyIndex>> {
    let indexes: Vec<(String, i64, String)> = sqlx::query_as(
        "SELECT name, \"unique\", origin FROM pragma_index_list('route_assignments')",
    )
    .fetch_all(&mut *conn)
    .await?;

    for (name, unique, origin) in indexes {
        if unique == 0 || origin == "pk" {
            continue;
        }
        let columns: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM pragma_index_info(?)")
                .bind(&name)
                .fetch_all(&mut *conn)
                .await?;
        if columns.len() == 1 && columns[0].0 == "driver" {
            return Ok(Some(LegacyIndex { name, origin }));
        }
    }
    Ok(None)
}


#[cfg(test)]
mod tests {
    use super::testing::temp_store;
    use super::*;

    #[test]
    fn test_timestamp_is_fixed_width_and_parses() {
        let at = DateTime::parse_from_rfc3339("2026-03-01T07:05:09Z")
            .unwrap()
            .with_timezone(&Utc);
        let formatted = timestamp(at);
        assert_eq!(formatted, "2026-03-01T07:05:09.000Z");
        assert_eq!(parse_timestamp(&formatted), Some(at));
        assert!(parse_timestamp("yesterday").is_none());
    }

    async fn has_legacy_index(pool: &SqlitePool) -> bool {
        let mut conn = pool.acquire().await.unwrap();
        legacy_driver_unique_index(&mut conn).await.unwrap().is_some()
    }

    /// Replace route_assignments with the old shape that had UNIQUE(driver).
    async fn install_legacy_table(pool: &SqlitePool) {
        sqlx::query("DROP TABLE route_assignments")
            .execute(pool)
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE route_assignments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                driver TEXT NOT NULL UNIQUE,
                vehicle_kind TEXT NOT NULL,
                vehicle_id TEXT NOT NULL,
                route_id TEXT NOT NULL,
                period TEXT NOT NULL,
                assigned_date TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await
        .unwrap();
        let now = now_timestamp();
        insert_user(
            pool,
            &NewUser {
                username: "bjmathis".into(),
                display_name: "B. J. Mathis".into(),
                email: String::new(),
                password_hash: "x".into(),
                role: Role::Driver,
                status: UserStatus::Active,
                has_cdl: true,
                cdl_expiry: None,
            },
            &now,
        )
        .await
        .unwrap();
        for route in ["NELC-1", "NELC-2"] {
            insert_route(
                pool,
                &NewRoute {
                    route_id: route.into(),
                    route_name: route.into(),
                    period: Period::Am,
                    start_time: String::new(),
                    end_time: String::new(),
                },
                &now,
            )
            .await
            .unwrap();
        }
    }

    async fn legacy_row(pool: &SqlitePool, id: i64, route: &str, period: &str) {
        sqlx::query(
            "INSERT INTO route_assignments
                (id, driver, vehicle_kind, vehicle_id, route_id, period, assigned_date, created_at)
             VALUES (?, 'bjmathis', 'bus', '24', ?, ?, '2026-08-24', '2026-08-24T06:00:00.000Z')",
        )
        .bind(id)
        .bind(route)
        .bind(period)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn table_names(pool: &SqlitePool) -> Vec<String> {
        sqlx::query_as::<_, (String,)>(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'route_assignments%'",
        )
        .fetch_all(pool)
        .await
        .unwrap()
        .into_iter()
        .map(|(name,)| name)
        .collect()
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let (store, _dir) = temp_store().await;
        run_migrations(store.pool()).await.unwrap();
        run_migrations(store.pool()).await.unwrap();
        assert!(!has_legacy_index(store.pool()).await);
    }

    #[tokio::test]
    async fn test_legacy_driver_constraint_is_removed() {
        let (store, _dir) = temp_store().await;
        let pool = store.pool();
        install_legacy_table(pool).await;
        legacy_row(pool, 7, "NELC-1", "AM").await;
        assert!(has_legacy_index(pool).await);

        run_migrations(pool).await.unwrap();
        assert!(!has_legacy_index(pool).await);
        assert_eq!(table_names(pool).await, vec!["route_assignments".to_string()]);

        // Existing rows survive with their ids and a second route is now allowed.
        let ids: Vec<(i64,)> = sqlx::query_as("SELECT id FROM route_assignments")
            .fetch_all(pool)
            .await
            .unwrap();
        assert_eq!(ids, vec![(7,)]);
        legacy_row(pool, 8, "NELC-2", "AM").await;
        assert_eq!(count_assignments(pool).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_legacy_table() {
        let (store, _dir) = temp_store().await;
        let pool = store.pool();
        install_legacy_table(pool).await;
        // Lower-case period fails the CHECK of the rebuilt table.
        legacy_row(pool, 7, "NELC-1", "am").await;

        assert!(run_migrations(pool).await.is_err());
        assert_eq!(table_names(pool).await, vec!["route_assignments".to_string()]);
        assert!(has_legacy_index(pool).await);
        assert_eq!(count_assignments(pool).await.unwrap(), 1);
    }

    const INSERT_ROUTE: &str = "INSERT INTO routes (route_id, route_name, period, created_at, updated_at)
         VALUES ('R-9', 'Late', 'PM', '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z')";

    #[tokio::test]
    async fn test_deadline_expires_while_writer_holds_lock() {
        let (store, _dir) = temp_store().await;
        // SQLite's busy wait is the full operation timeout; the store's
        // deadline here is much shorter, so it fires first.
        let impatient = Store::new(store.pool().clone(), Duration::from_millis(100));

        let mut holder = store.pool().acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *holder)
            .await
            .unwrap();

        let result: Result<(), Error> = impatient
            .transaction(|conn| {
                Box::pin(async move {
                    sqlx::query(INSERT_ROUTE).execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .await;
        assert!(matches!(result, Err(Error::Timeout)));

        sqlx::query("ROLLBACK").execute(&mut *holder).await.unwrap();
        drop(holder);

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM routes WHERE route_id = 'R-9'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 0);

        // The pool is still usable once the lock is gone.
        store
            .transaction(|conn| {
                Box::pin(async move {
                    sqlx::query(INSERT_ROUTE).execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let (store, _dir) = temp_store().await;
        let result: Result<(), Error> = store
            .transaction(|conn| {
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO routes (route_id, route_name, period, created_at, updated_at)
                         VALUES ('R-1', 'Test', 'AM', '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z')",
                    )
                    .execute(&mut *conn)
                    .await?;
                    Err(Error::invalid("abort"))
                })
            })
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM routes")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn test_transaction_commits_on_ok() {
        let (store, _dir) = temp_store().await;
        store
            .transaction(|conn| {
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO routes (route_id, route_name, period, created_at, updated_at)
                         VALUES ('R-1', 'Test', 'AM', '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z')",
                    )
                    .execute(&mut *conn)
                    .await?;
                    Ok(())
                })
            })
            .await
            .unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM routes")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }
}
