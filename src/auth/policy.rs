//! Role-based access rules.
//!
//! `authorize` is a pure function of the session, the action and the
//! resource. Rules are evaluated in order and the first match wins.

use super::session::Session;
use crate::db::{Role, UserStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ViewManagerDashboard,
    ManageUsers,
    ApproveUsers,
    ManageAssignments,
    ViewAssignments,
    ManageFleet,
    ViewOwnDashboard,
    ViewOwnStudents,
    ViewOwnRoute,
    PostDriverLog,
    ChangeOwnPassword,
}

impl Action {
    /// Actions a driver may take on resources they own.
    fn is_driver_self_service(&self) -> bool {
        matches!(
            self,
            Action::ViewOwnDashboard
                | Action::ViewOwnStudents
                | Action::ViewOwnRoute
                | Action::PostDriverLog
                | Action::ChangeOwnPassword
        )
    }
}

/// What an action is performed on. `owner` is the driver a resource belongs
/// to; `subject_status` is set when the resource is a user account.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resource<'a> {
    pub owner: Option<&'a str>,
    pub subject_status: Option<UserStatus>,
}

impl<'a> Resource<'a> {
    /// The management surface as a whole.
    pub fn management() -> Self {
        Self::default()
    }

    pub fn owned_by(owner: &'a str) -> Self {
        Self {
            owner: Some(owner),
            subject_status: None,
        }
    }

    pub fn account(username: &'a str, status: UserStatus) -> Self {
        Self {
            owner: Some(username),
            subject_status: Some(status),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

pub fn authorize(session: &Session, action: Action, resource: &Resource<'_>) -> Decision {
    if session.role == Role::Manager {
        return Decision::Allow;
    }

    // Self-service never reaches an account that is not active.
    if matches!(
        resource.subject_status,
        Some(UserStatus::Pending) | Some(UserStatus::Suspended)
    ) {
        return Decision::Deny;
    }

    if session.role == Role::Driver
        && action.is_driver_self_service()
        && resource.owner == Some(session.username.as_str())
    {
        return Decision::Allow;
    }

    Decision::Deny
}
