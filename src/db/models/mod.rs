//! Typed rows and parameterized queries, one module per table family.

pub mod assignment;
pub mod audit;
pub mod common;
pub mod login_attempt;
pub mod route;
pub mod session;
pub mod student;
pub mod user;
pub mod vehicle;

pub use assignment::*;
pub use audit::{list_recent_audit_logs, log_audit, AuditEntry, AuditLog, AuditRecord};
pub use common::*;
pub use route::*;
pub use student::*;
pub use user::*;
pub use vehicle::*;
