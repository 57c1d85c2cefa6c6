//! Manager-side account administration.

use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::CredentialStore;
use crate::db::{
    self, audit::actions, audit::target_types, delete_for_driver, find_user, insert_user,
    list_users, transition_status, update_password_hash, update_profile, AuditRecord, NewUser,
    Role, Store, User, UserProfile, UserResponse, UserStatus,
};
use crate::error::{Error, Result};
use crate::validation;

/// Who is performing an administrative action.
#[derive(Debug, Clone, Copy)]
pub struct Actor<'a> {
    pub username: &'a str,
    pub ip: &'a str,
}

#[derive(Debug, Clone)]
pub struct CreateUser {
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub email: String,
    pub role: Role,
    pub has_cdl: bool,
    pub cdl_expiry: Option<String>,
}

#[derive(Clone)]
pub struct UserAdmin {
    store: Store,
    credentials: Arc<CredentialStore>,
}

impl UserAdmin {
    pub fn new(store: Store, credentials: Arc<CredentialStore>) -> Self {
        Self { store, credentials }
    }

    pub async fn list(&self, status: Option<UserStatus>) -> Result<Vec<UserResponse>> {
        let users = self
            .store
            .deadline(list_users(self.store.pool(), status))
            .await?;
        Ok(users.into_iter().map(UserResponse::from).collect())
    }

    pub async fn list_pending(&self) -> Result<Vec<UserResponse>> {
        self.list(Some(UserStatus::Pending)).await
    }

    pub async fn active_drivers(&self) -> Result<Vec<UserResponse>> {
        let users = self
            .store
            .deadline(db::list_active_drivers(self.store.pool()))
            .await?;
        Ok(users.into_iter().map(UserResponse::from).collect())
    }

    async fn require(&self, username: &str) -> Result<User> {
        self.store
            .deadline(find_user(self.store.pool(), username))
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {}", username)))
    }

    /// Create an account that is active immediately.
    pub async fn create(&self, actor: Actor<'_>, request: CreateUser) -> Result<UserResponse> {
        validation::validate_username(&request.username)?;
        validation::validate_password(&request.password)?;
        validation::validate_email(&request.email)?;
        validation::validate_display_name(&request.display_name)?;
        if let Some(expiry) = &request.cdl_expiry {
            validation::parse_date("CDL expiry", expiry)?;
        }

        let password_hash = self.credentials.hash(&request.password).await?;
        let display_name = if request.display_name.is_empty() {
            request.username.clone()
        } else {
            request.display_name.clone()
        };
        let new_user = NewUser {
            username: request.username.clone(),
            display_name,
            email: request.email,
            password_hash,
            role: request.role,
            status: UserStatus::Active,
            has_cdl: request.has_cdl,
            cdl_expiry: request.cdl_expiry,
        };
        let audit = actor.audit(actions::USER_CREATE, target_types::USER, &request.username);
        let result = self
            .store
            .transaction(move |conn| {
                Box::pin(async move {
                    insert_user(&mut *conn, &new_user, &db::now_timestamp()).await?;
                    audit.write(&mut *conn).await?;
                    Ok(())
                })
            })
            .await;
        match result {
            Ok(()) => {}
            Err(Error::Conflict(_)) => return Err(Error::UsernameTaken),
            Err(e) => return Err(e),
        }

        info!(username = %request.username, role = %request.role, by = %actor.username, "User created");
        Ok(self.require(&request.username).await?.into())
    }

    /// Change profile fields and role. Demoting a driver drops their
    /// assignments in the same transaction.
    pub async fn update(
        &self,
        actor: Actor<'_>,
        username: &str,
        profile: UserProfile,
    ) -> Result<UserResponse> {
        validation::validate_email(&profile.email)?;
        validation::validate_display_name(&profile.display_name)?;
        if let Some(expiry) = &profile.cdl_expiry {
            validation::parse_date("CDL expiry", expiry)?;
        }

        let target = username.to_string();
        let is_self = username == actor.username;
        let audit = actor
            .audit(actions::USER_UPDATE, target_types::USER, username)
            .with_details(serde_json::json!({ "role": profile.role.as_str() }));
        let removed = self
            .store
            .transaction(move |conn| {
                Box::pin(async move {
                    let existing = find_user(&mut *conn, &target)
                        .await?
                        .ok_or_else(|| Error::NotFound(format!("user {}", target)))?;
                    if is_self && profile.role != existing.role() {
                        return Err(Error::invalid("you cannot change your own role"));
                    }
                    update_profile(&mut *conn, &target, &profile, &db::now_timestamp()).await?;
                    let removed = if existing.role() == Role::Driver && profile.role != Role::Driver {
                        delete_for_driver(&mut *conn, &target).await?
                    } else {
                        0
                    };
                    audit.write(&mut *conn).await?;
                    Ok(removed)
                })
            })
            .await?;

        if removed > 0 {
            info!(username = %username, removed, "Removed assignments after role change");
        }
        Ok(self.require(username).await?.into())
    }

    /// pending -> active
    pub async fn approve(&self, actor: Actor<'_>, username: &str) -> Result<()> {
        self.transition(
            actor.audit(actions::USER_APPROVE, target_types::USER, username),
            UserStatus::Pending,
            UserStatus::Active,
        )
        .await?;
        info!(username = %username, by = %actor.username, "User approved");
        Ok(())
    }

    /// Discard a pending registration.
    pub async fn reject(&self, actor: Actor<'_>, username: &str) -> Result<()> {
        let target = username.to_string();
        let audit = actor.audit(actions::USER_REJECT, target_types::USER, username);
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    let user = find_user(&mut *conn, &target)
                        .await?
                        .ok_or_else(|| Error::NotFound(format!("user {}", target)))?;
                    if user.status() != UserStatus::Pending {
                        return Err(Error::invalid(format!("{} is not pending approval", target)));
                    }
                    db::delete_user(&mut *conn, &target).await?;
                    audit.write(&mut *conn).await?;
                    Ok(())
                })
            })
            .await?;
        info!(username = %username, by = %actor.username, "Registration rejected");
        Ok(())
    }

    /// active -> suspended. Every session of the user is revoked.
    pub async fn suspend(&self, actor: Actor<'_>, username: &str) -> Result<()> {
        if username == actor.username {
            return Err(Error::invalid("you cannot suspend your own account"));
        }
        let revoked = self
            .transition(
                actor.audit(actions::USER_SUSPEND, target_types::USER, username),
                UserStatus::Active,
                UserStatus::Suspended,
            )
            .await?;
        warn!(username = %username, by = %actor.username, sessions_revoked = revoked, "User suspended");
        Ok(())
    }

    /// suspended -> active
    pub async fn activate(&self, actor: Actor<'_>, username: &str) -> Result<()> {
        self.transition(
            actor.audit(actions::USER_ACTIVATE, target_types::USER, username),
            UserStatus::Suspended,
            UserStatus::Active,
        )
        .await?;
        info!(username = %username, by = %actor.username, "User reactivated");
        Ok(())
    }

    /// Set a new password on someone else's account and sign them out.
    pub async fn reset_password(
        &self,
        actor: Actor<'_>,
        username: &str,
        new_password: &str,
    ) -> Result<()> {
        validation::validate_password(new_password)?;
        self.require(username).await?;
        let hash = self.credentials.hash(new_password).await?;
        let target = username.to_string();
        let audit = actor.audit(actions::USER_RESET_PASSWORD, target_types::USER, username);
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    if !update_password_hash(&mut *conn, &target, &hash, &db::now_timestamp())
                        .await?
                    {
                        return Err(Error::NotFound(format!("user {}", target)));
                    }
                    db::session::delete_user_sessions(&mut *conn, &target, None).await?;
                    audit.write(&mut *conn).await?;
                    Ok(())
                })
            })
            .await?;
        info!(username = %username, by = %actor.username, "Password reset");
        Ok(())
    }

    /// Remove a user together with their sessions and route assignments.
    pub async fn delete(&self, actor: Actor<'_>, username: &str) -> Result<()> {
        if username == actor.username {
            return Err(Error::invalid("you cannot delete your own account"));
        }
        let target = username.to_string();
        let audit = actor.audit(actions::USER_DELETE, target_types::USER, username);
        let removed = self
            .store
            .transaction(move |conn| {
                Box::pin(async move {
                    let assignments = delete_for_driver(&mut *conn, &target).await?;
                    db::session::delete_user_sessions(&mut *conn, &target, None).await?;
                    if !db::delete_user(&mut *conn, &target).await? {
                        return Err(Error::NotFound(format!("user {}", target)));
                    }
                    audit
                        .with_details(serde_json::json!({ "assignments_removed": assignments }))
                        .write(&mut *conn)
                        .await?;
                    Ok(assignments)
                })
            })
            .await?;
        warn!(username = %username, by = %actor.username, assignments_removed = removed, "User deleted");
        Ok(())
    }

    /// Move the audited user between statuses. Leaving `Active` also ends
    /// their sessions; returns how many were ended.
    async fn transition(&self, audit: AuditRecord, from: UserStatus, to: UserStatus) -> Result<u64> {
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    let username = audit.target_id.clone();
                    if !transition_status(&mut *conn, &username, from, to, &db::now_timestamp())
                        .await?
                    {
                        let user = find_user(&mut *conn, &username)
                            .await?
                            .ok_or_else(|| Error::NotFound(format!("user {}", username)))?;
                        return Err(Error::invalid(format!(
                            "{} is {}, expected {}",
                            username,
                            user.status(),
                            from
                        )));
                    }
                    let revoked = if from == UserStatus::Active {
                        db::session::delete_user_sessions(&mut *conn, &username, None).await?
                    } else {
                        0
                    };
                    audit.write(&mut *conn).await?;
                    Ok(revoked)
                })
            })
            .await
    }
}

impl Actor<'_> {
    /// Audit event attributed to this actor.
    pub fn audit(&self, action: &'static str, target_type: &'static str, target_id: &str) -> AuditRecord {
        AuditRecord {
            actor: self.username.to_string(),
            action,
            target_type,
            target_id: target_id.to_string(),
            ip_address: self.ip.to_string(),
            details: None,
        }
    }
}

/// Seed the first manager account if it does not exist yet.
pub async fn ensure_admin_user(admin: &UserAdmin, username: &str, password: &str) -> Result<bool> {
    if admin
        .store
        .deadline(find_user(admin.store.pool(), username))
        .await?
        .is_some()
    {
        return Ok(false);
    }
    if password == DEVELOPMENT_ADMIN_PASSWORD {
        warn!(
            username = %username,
            "Seeding admin with the development password; change it before production use"
        );
    }
    admin
        .create(
            Actor {
                username: "system",
                ip: "",
            },
            CreateUser {
                username: username.to_string(),
                password: password.to_string(),
                display_name: "Administrator".to_string(),
                email: String::new(),
                role: Role::Manager,
                has_cdl: false,
                cdl_expiry: None,
            },
        )
        .await?;
    info!(username = %username, "Admin user created");
    Ok(true)
}

/// Well-known seed password of development databases.
pub const DEVELOPMENT_ADMIN_PASSWORD: &str = "Headstart1";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::test_policy;
    use crate::auth::{Resolution, SessionManager};
    use crate::db::testing::temp_store;
    use tempfile::TempDir;

    const ADMIN: Actor<'static> = Actor {
        username: "admin",
        ip: "127.0.0.1",
    };

    async fn fixture() -> (UserAdmin, SessionManager, Store, TempDir) {
        let (store, dir) = temp_store().await;
        let credentials = Arc::new(CredentialStore::new(test_policy(), Some(2)).unwrap());
        let sessions = SessionManager::new(
            store.clone(),
            std::time::Duration::from_secs(3600),
            std::time::Duration::from_secs(300),
        );
        let admin = UserAdmin::new(store.clone(), credentials);
        ensure_admin_user(&admin, "admin", "Headstart1").await.unwrap();
        (admin, sessions, store, dir)
    }

    fn driver(username: &str) -> CreateUser {
        CreateUser {
            username: username.to_string(),
            password: "Passw0rd!".to_string(),
            display_name: String::new(),
            email: String::new(),
            role: Role::Driver,
            has_cdl: true,
            cdl_expiry: Some("2027-06-30".to_string()),
        }
    }

    async fn insert_pending(store: &Store, username: &str) {
        insert_user(
            store.pool(),
            &NewUser {
                username: username.to_string(),
                display_name: username.to_string(),
                email: String::new(),
                password_hash: "x".to_string(),
                role: Role::Driver,
                status: UserStatus::Pending,
                has_cdl: false,
                cdl_expiry: None,
            },
            &db::now_timestamp(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let (admin, _sessions, _store, _dir) = fixture().await;
        assert!(!ensure_admin_user(&admin, "admin", "Headstart1").await.unwrap());
        let users = admin.list(None).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].role, Role::Manager);
        assert_eq!(users[0].status, UserStatus::Active);
    }

    #[tokio::test]
    async fn test_create_is_active_and_unique() {
        let (admin, _sessions, _store, _dir) = fixture().await;
        let user = admin.create(ADMIN, driver("bjmathis")).await.unwrap();
        assert_eq!(user.status, UserStatus::Active);
        assert!(user.has_cdl);
        assert!(matches!(
            admin.create(ADMIN, driver("bjmathis")).await,
            Err(Error::UsernameTaken)
        ));
    }

    #[tokio::test]
    async fn test_approve_and_reject() {
        let (admin, _sessions, store, _dir) = fixture().await;
        insert_pending(&store, "driver9").await;
        insert_pending(&store, "driver10").await;
        assert_eq!(admin.list_pending().await.unwrap().len(), 2);

        admin.approve(ADMIN, "driver9").await.unwrap();
        admin.reject(ADMIN, "driver10").await.unwrap();
        assert!(admin.list_pending().await.unwrap().is_empty());

        // Approving twice is an input error, not a silent success.
        assert!(matches!(
            admin.approve(ADMIN, "driver9").await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            admin.reject(ADMIN, "driver9").await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            admin.approve(ADMIN, "ghost").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_suspend_revokes_sessions() {
        let (admin, sessions, _store, _dir) = fixture().await;
        admin.create(ADMIN, driver("bsmith")).await.unwrap();
        let issued = sessions.create("bsmith", "", "").await.unwrap();

        admin.suspend(ADMIN, "bsmith").await.unwrap();
        assert_eq!(
            sessions.resolve(&issued.token).await.unwrap(),
            Resolution::NotFound
        );

        admin.activate(ADMIN, "bsmith").await.unwrap();
        assert_eq!(
            sessions.resolve(&issued.token).await.unwrap(),
            Resolution::NotFound
        );
    }

    #[tokio::test]
    async fn test_cannot_act_on_self() {
        let (admin, _sessions, _store, _dir) = fixture().await;
        assert!(matches!(
            admin.suspend(ADMIN, "admin").await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            admin.delete(ADMIN, "admin").await,
            Err(Error::InvalidInput(_))
        ));
        let demote = UserProfile {
            display_name: "Administrator".into(),
            email: String::new(),
            role: Role::Driver,
            has_cdl: false,
            cdl_expiry: None,
        };
        assert!(matches!(
            admin.update(ADMIN, "admin", demote).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (admin, sessions, store, _dir) = fixture().await;
        admin.create(ADMIN, driver("bjmathis")).await.unwrap();
        let issued = sessions.create("bjmathis", "", "").await.unwrap();
        db::insert_route(
            store.pool(),
            &db::NewRoute {
                route_id: "NELC-1".into(),
                route_name: "Northeast 1".into(),
                period: db::Period::Am,
                start_time: String::new(),
                end_time: String::new(),
            },
            &db::now_timestamp(),
        )
        .await
        .unwrap();
        db::insert_assignment(
            store.pool(),
            &db::AssignmentRecord {
                id: None,
                driver: "bjmathis".into(),
                vehicle: db::VehicleRef::bus("24"),
                route_id: "NELC-1".into(),
                period: db::Period::Am,
                assigned_date: "2026-08-24".into(),
                created_at: db::now_timestamp(),
            },
        )
        .await
        .unwrap();

        admin.delete(ADMIN, "bjmathis").await.unwrap();
        assert_eq!(db::count_assignments(store.pool()).await.unwrap(), 0);
        assert_eq!(
            sessions.resolve(&issued.token).await.unwrap(),
            Resolution::NotFound
        );
        assert!(matches!(
            admin.delete(ADMIN, "bjmathis").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_password() {
        let (admin, sessions, store, _dir) = fixture().await;
        admin.create(ADMIN, driver("bjmathis")).await.unwrap();
        let issued = sessions.create("bjmathis", "", "").await.unwrap();
        let before = find_user(store.pool(), "bjmathis").await.unwrap().unwrap();

        admin
            .reset_password(ADMIN, "bjmathis", "Fresh-Start-2")
            .await
            .unwrap();
        let after = find_user(store.pool(), "bjmathis").await.unwrap().unwrap();
        assert_ne!(before.password_hash, after.password_hash);
        assert_eq!(
            sessions.resolve(&issued.token).await.unwrap(),
            Resolution::NotFound
        );
    }

    async fn assign_route(store: &Store, driver: &str) {
        db::insert_route(
            store.pool(),
            &db::NewRoute {
                route_id: "NELC-2".into(),
                route_name: "Northeast 2".into(),
                period: db::Period::Pm,
                start_time: String::new(),
                end_time: String::new(),
            },
            &db::now_timestamp(),
        )
        .await
        .unwrap();
        db::insert_assignment(
            store.pool(),
            &db::AssignmentRecord {
                id: None,
                driver: driver.into(),
                vehicle: db::VehicleRef::bus("30"),
                route_id: "NELC-2".into(),
                period: db::Period::Pm,
                assigned_date: "2026-08-24".into(),
                created_at: db::now_timestamp(),
            },
        )
        .await
        .unwrap();
    }

    fn promotion() -> UserProfile {
        UserProfile {
            display_name: "B. Smith".into(),
            email: String::new(),
            role: Role::Manager,
            has_cdl: true,
            cdl_expiry: None,
        }
    }

    #[tokio::test]
    async fn test_demotion_drops_assignments_and_is_audited() {
        let (admin, _sessions, store, _dir) = fixture().await;
        admin.create(ADMIN, driver("bsmith")).await.unwrap();
        assign_route(&store, "bsmith").await;

        let updated = admin.update(ADMIN, "bsmith", promotion()).await.unwrap();
        assert_eq!(updated.role, Role::Manager);
        assert_eq!(db::count_assignments(store.pool()).await.unwrap(), 0);
        let logs = db::list_recent_audit_logs(store.pool(), 10).await.unwrap();
        assert!(logs
            .iter()
            .any(|log| log.action == actions::USER_UPDATE
                && log.target_id.as_deref() == Some("bsmith")));
    }

    #[tokio::test]
    async fn test_failed_audit_leaves_account_untouched() {
        let (admin, sessions, store, _dir) = fixture().await;
        admin.create(ADMIN, driver("bsmith")).await.unwrap();
        assign_route(&store, "bsmith").await;
        let issued = sessions.create("bsmith", "", "").await.unwrap();
        sqlx::query("DROP TABLE audit_logs")
            .execute(store.pool())
            .await
            .unwrap();

        assert!(admin.update(ADMIN, "bsmith", promotion()).await.is_err());
        let user = find_user(store.pool(), "bsmith").await.unwrap().unwrap();
        assert_eq!(user.role(), Role::Driver);
        assert_eq!(user.display_name, "bsmith");
        assert_eq!(db::count_assignments(store.pool()).await.unwrap(), 1);

        assert!(admin.suspend(ADMIN, "bsmith").await.is_err());
        let user = find_user(store.pool(), "bsmith").await.unwrap().unwrap();
        assert_eq!(user.status(), UserStatus::Active);
        assert!(matches!(
            sessions.resolve(&issued.token).await.unwrap(),
            Resolution::Valid(_)
        ));

        assert!(admin.delete(ADMIN, "bsmith").await.is_err());
        assert!(find_user(store.pool(), "bsmith").await.unwrap().is_some());
        assert_eq!(db::count_assignments(store.pool()).await.unwrap(), 1);

        assert!(admin.create(ADMIN, driver("bjmathis")).await.is_err());
        assert!(find_user(store.pool(), "bjmathis").await.unwrap().is_none());
    }
}
