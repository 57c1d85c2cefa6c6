//! Stored sessions. Only the SHA-256 of the bearer token is persisted.

use sqlx::{FromRow, SqliteExecutor};

/// A session row joined with its owner's role and status.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub token_hash: String,
    pub username: String,
    pub csrf_token: String,
    pub created_at: String,
    pub expires_at: String,
    pub renewed_at: String,
    pub ip_address: String,
    pub user_agent: String,
    pub role: String,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct NewSession<'a> {
    pub token_hash: &'a str,
    pub username: &'a str,
    pub csrf_token: &'a str,
    pub created_at: &'a str,
    pub expires_at: &'a str,
    pub ip_address: &'a str,
    pub user_agent: &'a str,
}

pub async fn insert_session(
    db: impl SqliteExecutor<'_>,
    session: &NewSession<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO sessions (token_hash, username, csrf_token, created_at, expires_at,
                              renewed_at, ip_address, user_agent)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(session.token_hash)
    .bind(session.username)
    .bind(session.csrf_token)
    .bind(session.created_at)
    .bind(session.expires_at)
    .bind(session.created_at)
    .bind(session.ip_address)
    .bind(session.user_agent)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn find_session(
    db: impl SqliteExecutor<'_>,
    token_hash: &str,
) -> Result<Option<SessionRow>, sqlx::Error> {
    sqlx::query_as::<_, SessionRow>(
        r#"
        SELECT s.token_hash, s.username, s.csrf_token, s.created_at, s.expires_at,
               s.renewed_at, s.ip_address, s.user_agent, u.role, u.status
        FROM sessions s
        JOIN users u ON u.username = s.username
        WHERE s.token_hash = ?
        "#,
    )
    .bind(token_hash)
    .fetch_optional(db)
    .await
}

/// Extend a session. Returns false when the row no longer exists, so a
/// renewal can never resurrect a revoked session.
pub async fn renew_session(
    db: impl SqliteExecutor<'_>,
    token_hash: &str,
    expires_at: &str,
    renewed_at: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE sessions SET expires_at = ?, renewed_at = ? WHERE token_hash = ?",
    )
    .bind(expires_at)
    .bind(renewed_at)
    .bind(token_hash)
    .execute(db)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_session(
    db: impl SqliteExecutor<'_>,
    token_hash: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
        .bind(token_hash)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Delete every session of `username` except the one hashed as `keep`.
pub async fn delete_user_sessions(
    db: impl SqliteExecutor<'_>,
    username: &str,
    keep: Option<&str>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM sessions WHERE username = ? AND token_hash != COALESCE(?, '')",
    )
    .bind(username)
    .bind(keep)
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}

pub async fn delete_expired_sessions(
    db: impl SqliteExecutor<'_>,
    now: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(now)
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}
