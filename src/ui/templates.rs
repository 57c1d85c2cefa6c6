// Askama template definitions

use askama::Template;

use crate::db::{
    Assignment, AuditLog, Bus, OtherVehicle, Route, Student, UserResponse,
};

/// Custom filters for Askama templates
mod filters {
    /// `2026-08-24T07:05:09.000Z` -> `2026-08-24 07:05`
    pub fn short_time<T: std::fmt::Display>(s: T) -> ::askama::Result<String> {
        let s = s.to_string();
        Ok(match s.get(..16) {
            Some(prefix) => prefix.replace('T', " "),
            None => s,
        })
    }
}

/// Header data shared by every page.
pub struct Layout {
    pub title: &'static str,
    pub username: Option<String>,
    pub role: String,
    pub dashboard: &'static str,
    pub csrf_token: String,
    pub is_manager: bool,
}

impl Layout {
    pub fn public(title: &'static str) -> Self {
        Self {
            title,
            username: None,
            role: String::new(),
            dashboard: "/",
            csrf_token: String::new(),
            is_manager: false,
        }
    }
}

/// Banner shown above a page's content.
#[derive(Default)]
pub struct Flash {
    pub notice: Option<String>,
    pub error: Option<String>,
}

impl Flash {
    pub fn notice(message: impl Into<String>) -> Self {
        Self {
            notice: Some(message.into()),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            notice: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub layout: Layout,
    pub flash: Flash,
    pub username: String,
}

#[derive(Template)]
#[template(path = "register.html")]
pub struct RegisterTemplate {
    pub layout: Layout,
    pub flash: Flash,
    pub username: String,
    pub email: String,
    pub display_name: String,
}

pub struct ManagerStats {
    pub pending_users: i64,
    pub active_drivers: usize,
    pub assignments: i64,
    pub active_buses: i64,
}

#[derive(Template)]
#[template(path = "manager_dashboard.html")]
pub struct ManagerDashboardTemplate {
    pub layout: Layout,
    pub flash: Flash,
    pub stats: ManagerStats,
    pub recent_activity: Vec<AuditLog>,
}

#[derive(Template)]
#[template(path = "driver_dashboard.html")]
pub struct DriverDashboardTemplate {
    pub layout: Layout,
    pub flash: Flash,
    pub display_name: String,
    pub assignments: Vec<Assignment>,
    pub students: Vec<Student>,
}

#[derive(Template)]
#[template(path = "approve_users.html")]
pub struct ApproveUsersTemplate {
    pub layout: Layout,
    pub flash: Flash,
    pub pending: Vec<UserResponse>,
}

#[derive(Template)]
#[template(path = "manage_users.html")]
pub struct ManageUsersTemplate {
    pub layout: Layout,
    pub flash: Flash,
    pub users: Vec<UserResponse>,
}

#[derive(Template)]
#[template(path = "assign_routes.html")]
pub struct AssignRoutesTemplate {
    pub layout: Layout,
    pub flash: Flash,
    pub assignments: Vec<Assignment>,
    pub drivers: Vec<UserResponse>,
    pub buses: Vec<Bus>,
    pub vehicles: Vec<OtherVehicle>,
    pub routes: Vec<Route>,
}

#[derive(Template)]
#[template(path = "fleet.html")]
pub struct FleetTemplate {
    pub layout: Layout,
    pub flash: Flash,
    pub buses: Vec<Bus>,
    pub vehicles: Vec<OtherVehicle>,
}

#[derive(Template)]
#[template(path = "change_password.html")]
pub struct ChangePasswordTemplate {
    pub layout: Layout,
    pub flash: Flash,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub layout: Layout,
    pub status: u16,
    pub message: String,
    pub reference: Option<String>,
}
