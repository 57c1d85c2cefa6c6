//! Domain error taxonomy shared by every component.
//!
//! Each variant knows its machine-readable kind, the HTTP status it maps to,
//! and the label a user is allowed to see. Infrastructure failures never
//! expose database text; they are logged under a correlation id instead.

use axum::http::StatusCode;

use crate::db::{Period, VehicleRef};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Input
    #[error("please check your input: {0}")]
    InvalidInput(String),

    // Authentication
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("account is pending approval")]
    PendingApproval,
    #[error("account is suspended")]
    Suspended,
    #[error("too many attempts")]
    Locked,
    #[error("username is already taken")]
    UsernameTaken,
    #[error("authentication required")]
    Unauthenticated,
    #[error("stored credential is corrupt")]
    CredentialCorrupt,
    #[error("rate limit exceeded, retry in {retry_after}s")]
    RateLimited { retry_after: u64 },

    // Authorization
    #[error("you do not have access to this page")]
    Forbidden,

    // Assignment conflicts
    #[error("{driver} already has {vehicle} on {route_id}")]
    DuplicateAssignment {
        driver: String,
        vehicle: VehicleRef,
        route_id: String,
    },
    #[error("{driver} is already assigned to {route_id} for the {period} period")]
    DriverRouteConflict {
        driver: String,
        route_id: String,
        period: Period,
    },
    #[error("{vehicle} is already assigned to {route_id} for the {period} period")]
    VehicleDoubleBooked {
        vehicle: VehicleRef,
        route_id: String,
        period: Period,
        holder: String,
    },
    #[error("driver {0} does not exist")]
    DriverMissing(String),
    #[error("{0} is not an active driver")]
    DriverInactive(String),
    #[error("{0} does not exist")]
    VehicleMissing(VehicleRef),
    #[error("{0} is not in active service")]
    VehicleInactive(VehicleRef),
    #[error("route {0} does not exist")]
    RouteMissing(String),

    // Integrity
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),

    // Infrastructure
    #[error("operation timed out")]
    Timeout,
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidInput(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }

    /// Machine-readable code used in JSON bodies, logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::InvalidCredentials => "invalid_credentials",
            Error::PendingApproval => "pending_approval",
            Error::Suspended => "suspended",
            Error::Locked => "locked",
            Error::UsernameTaken => "username_taken",
            Error::Unauthenticated => "unauthenticated",
            Error::CredentialCorrupt => "credential_corrupt",
            Error::RateLimited { .. } => "rate_limited",
            Error::Forbidden => "forbidden",
            Error::DuplicateAssignment { .. } => "duplicate_assignment",
            Error::DriverRouteConflict { .. } => "driver_route_conflict",
            Error::VehicleDoubleBooked { .. } => "vehicle_double_booked",
            Error::DriverMissing(_) => "driver_missing",
            Error::DriverInactive(_) => "driver_inactive",
            Error::VehicleMissing(_) => "vehicle_missing",
            Error::VehicleInactive(_) => "vehicle_inactive",
            Error::RouteMissing(_) => "route_missing",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Timeout => "timeout",
            Error::Unavailable(_) => "unavailable",
            Error::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidInput(_)
            | Error::DriverMissing(_)
            | Error::VehicleMissing(_)
            | Error::RouteMissing(_) => StatusCode::BAD_REQUEST,
            Error::InvalidCredentials
            | Error::PendingApproval
            | Error::Suspended
            | Error::Locked
            | Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::UsernameTaken
            | Error::DuplicateAssignment { .. }
            | Error::DriverRouteConflict { .. }
            | Error::VehicleDoubleBooked { .. }
            | Error::DriverInactive(_)
            | Error::VehicleInactive(_)
            | Error::Conflict(_) => StatusCode::CONFLICT,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Timeout | Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::CredentialCorrupt | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for failures the user cannot act on; these are logged, not shown.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Error::Timeout | Error::Unavailable(_) | Error::Internal(_) | Error::CredentialCorrupt
        )
    }

    /// The label a user may see. Suspended accounts read the same as bad
    /// credentials so that status is not disclosed before approval.
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidInput(detail) => format!("Please check your input: {}", detail),
            Error::InvalidCredentials | Error::Suspended => {
                "Invalid username or password.".to_string()
            }
            Error::PendingApproval => {
                "Your account is pending approval by a manager.".to_string()
            }
            Error::Locked => "Too many attempts. Please try again later.".to_string(),
            Error::UsernameTaken => "That username is already taken.".to_string(),
            Error::Unauthenticated => "Please sign in to continue.".to_string(),
            Error::RateLimited { retry_after } => format!(
                "Too many requests. Please try again in {} seconds.",
                retry_after
            ),
            Error::Forbidden => "You do not have access to this page.".to_string(),
            e if e.is_infrastructure() => "Temporary failure, please try again.".to_string(),
            other => capitalize(&other.to_string()),
        }
    }

    /// Log infrastructure failures under a fresh correlation id and return it.
    pub fn report(&self) -> Option<String> {
        if !self.is_infrastructure() {
            return None;
        }
        let correlation_id = uuid::Uuid::new_v4().to_string();
        tracing::error!(
            correlation_id = %correlation_id,
            kind = self.kind(),
            error = %self,
            "Request failed"
        );
        Some(correlation_id)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Error::NotFound("record".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Error::Unavailable(err.to_string())
            }
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    Error::Conflict("a record with this identifier already exists".to_string())
                } else {
                    let msg = db_err.message();
                    if msg.contains("database is locked") || msg.contains("busy") {
                        Error::Unavailable(msg.to_string())
                    } else {
                        Error::Internal(msg.to_string())
                    }
                }
            }
            _ => Error::Internal(err.to_string()),
        }
    }
}

/// Validator messages become `InvalidInput`.
impl From<String> for Error {
    fn from(message: String) -> Self {
        Error::InvalidInput(message)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("background task failed: {}", err))
    }
}
