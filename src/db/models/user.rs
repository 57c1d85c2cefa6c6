//! User accounts: roles, approval status and typed queries.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor};
use std::fmt;
use std::str::FromStr;

/// Account role. Only drivers may be the subject of route assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Manager,
    Driver,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Manager => "manager",
            Role::Driver => "driver",
        }
    }

    /// Landing page after login.
    pub fn dashboard_path(&self) -> &'static str {
        match self {
            Role::Manager => "/manager-dashboard",
            Role::Driver => "/driver-dashboard",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manager" => Ok(Role::Manager),
            "driver" => Ok(Role::Driver),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Pending,
    Active,
    Suspended,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Pending => "pending",
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UserStatus::Pending),
            "active" => Ok(UserStatus::Active),
            "suspended" => Ok(UserStatus::Suspended),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub status: String,
    pub has_cdl: bool,
    pub cdl_expiry: Option<String>,
    pub last_login: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    /// Unknown role strings read as driver, the least privileged role.
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or(Role::Driver)
    }

    /// Unknown status strings read as suspended so they cannot authenticate.
    pub fn status(&self) -> UserStatus {
        self.status.parse().unwrap_or(UserStatus::Suspended)
    }

    pub fn is_active(&self) -> bool {
        self.status() == UserStatus::Active
    }

    pub fn is_active_driver(&self) -> bool {
        self.is_active() && self.role() == Role::Driver
    }
}

/// User view without the password hash, for templates and JSON.
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub role: Role,
    pub status: UserStatus,
    pub has_cdl: bool,
    pub cdl_expiry: Option<String>,
    pub last_login: Option<String>,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            role: user.role(),
            status: user.status(),
            username: user.username,
            display_name: user.display_name,
            email: user.email,
            has_cdl: user.has_cdl,
            cdl_expiry: user.cdl_expiry,
            last_login: user.last_login,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub status: UserStatus,
    pub has_cdl: bool,
    pub cdl_expiry: Option<String>,
}

/// Editable profile fields.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub display_name: String,
    pub email: String,
    pub role: Role,
    pub has_cdl: bool,
    pub cdl_expiry: Option<String>,
}

pub async fn find_user(
    db: impl SqliteExecutor<'_>,
    username: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(db)
        .await
}

pub async fn insert_user(
    db: impl SqliteExecutor<'_>,
    user: &NewUser,
    now: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO users (username, display_name, email, password_hash, role, status,
                           has_cdl, cdl_expiry, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.username)
    .bind(&user.display_name)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.role.as_str())
    .bind(user.status.as_str())
    .bind(user.has_cdl)
    .bind(&user.cdl_expiry)
    .bind(now)
    .bind(now)
    .execute(db)
    .await?;
    Ok(())
}

/// List users, optionally restricted to one status, oldest first.
pub async fn list_users(
    db: impl SqliteExecutor<'_>,
    status: Option<UserStatus>,
) -> Result<Vec<User>, sqlx::Error> {
    match status {
        Some(status) => {
            sqlx::query_as::<_, User>(
                "SELECT * FROM users WHERE status = ? ORDER BY created_at, username",
            )
            .bind(status.as_str())
            .fetch_all(db)
            .await
        }
        None => {
            sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY role, username")
                .fetch_all(db)
                .await
        }
    }
}

pub async fn list_active_drivers(db: impl SqliteExecutor<'_>) -> Result<Vec<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE role = 'driver' AND status = 'active' ORDER BY username",
    )
    .fetch_all(db)
    .await
}

/// Move a user from one status to another. Returns false when the user
/// does not exist or is not currently in `from`.
pub async fn transition_status(
    db: impl SqliteExecutor<'_>,
    username: &str,
    from: UserStatus,
    to: UserStatus,
    now: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE users SET status = ?, updated_at = ? WHERE username = ? AND status = ?",
    )
    .bind(to.as_str())
    .bind(now)
    .bind(username)
    .bind(from.as_str())
    .execute(db)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn update_profile(
    db: impl SqliteExecutor<'_>,
    username: &str,
    profile: &UserProfile,
    now: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET display_name = ?, email = ?, role = ?, has_cdl = ?, cdl_expiry = ?, updated_at = ?
        WHERE username = ?
        "#,
    )
    .bind(&profile.display_name)
    .bind(&profile.email)
    .bind(profile.role.as_str())
    .bind(profile.has_cdl)
    .bind(&profile.cdl_expiry)
    .bind(now)
    .bind(username)
    .execute(db)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn update_password_hash(
    db: impl SqliteExecutor<'_>,
    username: &str,
    password_hash: &str,
    now: &str,
) -> Result<bool, sqlx::Error> {
    let result =
        sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE username = ?")
            .bind(password_hash)
            .bind(now)
            .bind(username)
            .execute(db)
            .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn touch_last_login(
    db: impl SqliteExecutor<'_>,
    username: &str,
    now: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET last_login = ? WHERE username = ?")
        .bind(now)
        .bind(username)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn delete_user(
    db: impl SqliteExecutor<'_>,
    username: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM users WHERE username = ?")
        .bind(username)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count_users_by_status(
    db: impl SqliteExecutor<'_>,
    status: UserStatus,
) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE status = ?")
        .bind(status.as_str())
        .fetch_one(db)
        .await?;
    Ok(count)
}
