use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::credentials::CredentialStore;
use super::session::SessionManager;
use crate::config::AuthConfig;
use crate::db::{
    self, audit::actions, audit::target_types, find_user, insert_user, log_audit,
    login_attempt, update_password_hash, AuditEntry, NewUser, Role, Store, UserResponse,
    UserStatus,
};
use crate::error::{Error, Result};
use crate::validation;

/// Consecutive failures tolerated per username or IP inside the window.
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub threshold: u32,
    pub window: Duration,
}

impl LockoutPolicy {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            threshold: config.lockout_threshold,
            window: Duration::seconds(config.lockout_window_secs as i64),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub username: String,
    pub session_token: String,
    pub csrf_token: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub password: String,
    pub email: String,
    pub display_name: String,
    pub role_request: Role,
}

#[derive(Clone)]
pub struct AuthService {
    store: Store,
    credentials: Arc<CredentialStore>,
    sessions: SessionManager,
    lockout: LockoutPolicy,
}

impl AuthService {
    pub fn new(
        store: Store,
        credentials: Arc<CredentialStore>,
        sessions: SessionManager,
        lockout: LockoutPolicy,
    ) -> Self {
        Self {
            store,
            credentials,
            sessions,
            lockout,
        }
    }

    /// Authenticate and open a session.
    ///
    /// Every call is logged as an attempt before anything else happens. The
    /// error distinguishes pending and suspended accounts only after the
    /// password has been verified.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        ip: &str,
        user_agent: &str,
    ) -> Result<LoginSuccess> {
        let result = self.try_login(username, password, ip, user_agent).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::counter!("login_attempts_total", "outcome" => outcome).increment(1);
        result
    }

    async fn try_login(
        &self,
        username: &str,
        password: &str,
        ip: &str,
        user_agent: &str,
    ) -> Result<LoginSuccess> {
        if username.is_empty() || password.is_empty() {
            return Err(Error::invalid("username and password are required"));
        }

        let now = Utc::now();
        let pool = self.store.pool();
        let attempt_id = self
            .store
            .deadline(login_attempt::record_attempt(
                pool,
                username,
                ip,
                user_agent,
                &db::timestamp(now),
            ))
            .await?;

        if self.is_locked(username, ip, attempt_id, now).await? {
            warn!(username = %username, ip = %ip, "Login refused: too many failed attempts");
            return Err(Error::Locked);
        }

        let user = match self.store.deadline(find_user(pool, username)).await? {
            Some(user) => user,
            None => {
                self.credentials.dummy_verify(password).await;
                info!(username = %username, ip = %ip, "Login failed: unknown user");
                return Err(Error::InvalidCredentials);
            }
        };

        let verification = match self.credentials.verify(password, &user.password_hash).await {
            Ok(verification) => verification,
            Err(Error::CredentialCorrupt) => {
                error!(username = %username, "Stored password hash is corrupt");
                return Err(Error::InvalidCredentials);
            }
            Err(e) => return Err(e),
        };
        if !verification.ok {
            info!(username = %username, ip = %ip, "Login failed: wrong password");
            return Err(Error::InvalidCredentials);
        }

        match user.status() {
            UserStatus::Pending => return Err(Error::PendingApproval),
            UserStatus::Suspended => return Err(Error::Suspended),
            UserStatus::Active => {}
        }

        let at = db::now_timestamp();
        self.store
            .deadline(login_attempt::mark_success(pool, attempt_id))
            .await?;
        self.store
            .deadline(db::touch_last_login(pool, username, &at))
            .await?;

        if verification.needs_rehash {
            // A failed upgrade must not fail the login.
            match self.credentials.hash(password).await {
                Ok(new_hash) => {
                    self.store
                        .deadline(update_password_hash(pool, username, &new_hash, &at))
                        .await?;
                    info!(username = %username, "Password hash upgraded");
                }
                Err(e) => warn!(username = %username, error = %e, "Password rehash failed"),
            }
        }

        let issued = self.sessions.create(username, ip, user_agent).await?;
        info!(username = %username, role = %user.role(), "Login succeeded");

        Ok(LoginSuccess {
            username: user.username.clone(),
            session_token: issued.token,
            csrf_token: issued.csrf_token,
            role: user.role(),
        })
    }

    /// Locked iff the last `threshold` attempts for this username or IP
    /// inside the window, not counting the current one, all failed.
    async fn is_locked(
        &self,
        username: &str,
        ip: &str,
        attempt_id: i64,
        now: chrono::DateTime<Utc>,
    ) -> Result<bool> {
        let since = db::timestamp(now - self.lockout.window);
        let outcomes = self
            .store
            .deadline(login_attempt::recent_outcomes(
                self.store.pool(),
                username,
                ip,
                &since,
                attempt_id,
                self.lockout.threshold,
            ))
            .await?;
        Ok(outcomes.len() >= self.lockout.threshold as usize
            && outcomes.iter().all(|success| !success))
    }

    /// Idempotent.
    pub async fn logout(&self, session_token: &str) -> Result<()> {
        self.sessions.revoke(session_token).await
    }

    /// Self-signup. The account stays pending until a manager approves it.
    pub async fn register(&self, registration: Registration, ip: &str) -> Result<UserResponse> {
        validation::validate_username(&registration.username)?;
        validation::validate_password(&registration.password)?;
        validation::validate_email(&registration.email)?;
        validation::validate_display_name(&registration.display_name)?;

        let pool = self.store.pool();
        if self
            .store
            .deadline(find_user(pool, &registration.username))
            .await?
            .is_some()
        {
            return Err(Error::UsernameTaken);
        }

        let password_hash = self.credentials.hash(&registration.password).await?;
        let display_name = if registration.display_name.is_empty() {
            registration.username.clone()
        } else {
            registration.display_name.clone()
        };
        let new_user = NewUser {
            username: registration.username.clone(),
            display_name,
            email: registration.email.clone(),
            password_hash,
            role: registration.role_request,
            status: UserStatus::Pending,
            has_cdl: false,
            cdl_expiry: None,
        };

        let now = db::now_timestamp();
        match self.store.deadline(insert_user(pool, &new_user, &now)).await {
            Ok(()) => {}
            // Lost a race with a concurrent signup for the same name.
            Err(Error::Conflict(_)) => return Err(Error::UsernameTaken),
            Err(e) => return Err(e),
        }

        self.store
            .deadline(log_audit(
                pool,
                &AuditEntry {
                    actor: Some(&registration.username),
                    action: actions::USER_REGISTER,
                    target_type: target_types::USER,
                    target_id: Some(&registration.username),
                    ip_address: Some(ip),
                    details: Some(serde_json::json!({
                        "role_request": registration.role_request.as_str(),
                    })),
                },
                &now,
            ))
            .await?;

        info!(
            username = %registration.username,
            role_request = %registration.role_request,
            "Registration received, pending approval"
        );

        let user = self
            .store
            .deadline(find_user(pool, &registration.username))
            .await?
            .ok_or_else(|| Error::internal("registered user vanished"))?;
        Ok(user.into())
    }

    /// Change the caller's own password. Other sessions of the user are
    /// revoked; the session holding `session_token` survives.
    pub async fn change_password(
        &self,
        username: &str,
        session_token: &str,
        current: &str,
        new: &str,
        confirm: &str,
    ) -> Result<()> {
        if current.is_empty() {
            return Err(Error::invalid("current password is required"));
        }
        validation::validate_password(new)?;
        if new != confirm {
            return Err(Error::invalid("new passwords do not match"));
        }
        if new == current {
            return Err(Error::invalid(
                "new password must differ from the current password",
            ));
        }

        let pool = self.store.pool();
        let user = self
            .store
            .deadline(find_user(pool, username))
            .await?
            .ok_or(Error::Unauthenticated)?;

        let verification = self
            .credentials
            .verify(current, &user.password_hash)
            .await
            .map_err(|e| match e {
                Error::CredentialCorrupt => {
                    error!(username = %username, "Stored password hash is corrupt");
                    Error::invalid("current password is incorrect")
                }
                other => other,
            })?;
        if !verification.ok {
            return Err(Error::invalid("current password is incorrect"));
        }

        let new_hash = self.credentials.hash(new).await?;
        let now = db::now_timestamp();
        self.store
            .deadline(update_password_hash(pool, username, &new_hash, &now))
            .await?;
        let revoked = self.sessions.revoke_others(username, session_token).await?;

        self.store
            .deadline(log_audit(
                pool,
                &AuditEntry {
                    actor: Some(username),
                    action: actions::PASSWORD_CHANGE,
                    target_type: target_types::USER,
                    target_id: Some(username),
                    ..AuditEntry::default()
                },
                &now,
            ))
            .await?;

        info!(username = %username, revoked_sessions = revoked, "Password changed");
        Ok(())
    }

    /// Drop login attempts older than `retention`.
    pub async fn purge_attempts(&self, retention: Duration) -> Result<u64> {
        let cutoff = db::timestamp(Utc::now() - retention);
        self.store
            .deadline(login_attempt::purge_before(self.store.pool(), &cutoff))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::test_policy;
    use crate::auth::session::Resolution;
    use crate::db::testing::temp_store;
    use tempfile::TempDir;

    struct Fixture {
        auth: AuthService,
        sessions: SessionManager,
        store: Store,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let (store, dir) = temp_store().await;
        let credentials = Arc::new(CredentialStore::new(test_policy(), Some(2)).unwrap());
        let sessions = SessionManager::new(
            store.clone(),
            std::time::Duration::from_secs(3600),
            std::time::Duration::from_secs(300),
        );
        let auth = AuthService::new(
            store.clone(),
            credentials,
            sessions.clone(),
            LockoutPolicy {
                threshold: 5,
                window: Duration::minutes(15),
            },
        );
        Fixture {
            auth,
            sessions,
            store,
            _dir: dir,
        }
    }

    fn registration(username: &str, password: &str) -> Registration {
        Registration {
            username: username.to_string(),
            password: password.to_string(),
            email: String::new(),
            display_name: String::new(),
            role_request: Role::Driver,
        }
    }

    async fn activate(store: &Store, username: &str) {
        sqlx::query("UPDATE users SET status = 'active' WHERE username = ?")
            .bind(username)
            .execute(store.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_register_creates_pending_user() {
        let f = fixture().await;
        let user = f
            .auth
            .register(registration("driver9", "Passw0rd!"), "127.0.0.1")
            .await
            .unwrap();
        assert_eq!(user.status, UserStatus::Pending);
        assert_eq!(user.role, Role::Driver);
        assert_eq!(user.display_name, "driver9");

        let err = f
            .auth
            .register(registration("driver9", "Different1!"), "127.0.0.1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UsernameTaken));
    }

    #[tokio::test]
    async fn test_register_rejects_bad_input() {
        let f = fixture().await;
        assert!(matches!(
            f.auth.register(registration("x", "Passw0rd!"), "").await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            f.auth.register(registration("driver9", "short"), "").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_then_approved_login() {
        let f = fixture().await;
        f.auth
            .register(registration("driver9", "Passw0rd!"), "")
            .await
            .unwrap();

        let err = f
            .auth
            .login("driver9", "Passw0rd!", "10.0.0.9", "test")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PendingApproval));

        activate(&f.store, "driver9").await;
        let success = f
            .auth
            .login("driver9", "Passw0rd!", "10.0.0.9", "test")
            .await
            .unwrap();
        assert_eq!(success.role, Role::Driver);
        assert!(matches!(
            f.sessions.resolve(&success.session_token).await.unwrap(),
            Resolution::Valid(_)
        ));
    }

    #[tokio::test]
    async fn test_wrong_password_pending_is_not_disclosed() {
        let f = fixture().await;
        f.auth
            .register(registration("driver9", "Passw0rd!"), "")
            .await
            .unwrap();
        let err = f
            .auth
            .login("driver9", "nope-nope", "10.0.0.9", "test")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_unknown_user_and_wrong_password_look_alike() {
        let f = fixture().await;
        f.auth
            .register(registration("bjmathis", "Passw0rd!"), "")
            .await
            .unwrap();
        activate(&f.store, "bjmathis").await;

        let unknown = f.auth.login("ghost", "Passw0rd!", "1.1.1.1", "").await.unwrap_err();
        let wrong = f.auth.login("bjmathis", "wrong-pass", "1.1.1.2", "").await.unwrap_err();
        assert_eq!(unknown.user_message(), wrong.user_message());
    }

    #[tokio::test]
    async fn test_suspended_user_cannot_login() {
        let f = fixture().await;
        f.auth
            .register(registration("bsmith", "Passw0rd!"), "")
            .await
            .unwrap();
        sqlx::query("UPDATE users SET status = 'suspended' WHERE username = 'bsmith'")
            .execute(f.store.pool())
            .await
            .unwrap();
        let err = f.auth.login("bsmith", "Passw0rd!", "", "").await.unwrap_err();
        assert!(matches!(err, Error::Suspended));
    }

    #[tokio::test]
    async fn test_lockout_after_threshold_failures() {
        let f = fixture().await;
        f.auth
            .register(registration("bjmathis", "Passw0rd!"), "")
            .await
            .unwrap();
        activate(&f.store, "bjmathis").await;

        for _ in 0..5 {
            let err = f
                .auth
                .login("bjmathis", "wrong-pass", "10.0.0.1", "")
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidCredentials));
        }
        // Correct password is refused while locked.
        let err = f
            .auth
            .login("bjmathis", "Passw0rd!", "10.0.0.1", "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Locked));

        // Same username from another IP is locked too.
        let err = f
            .auth
            .login("bjmathis", "Passw0rd!", "10.0.0.2", "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Locked));
    }

    #[tokio::test]
    async fn test_success_breaks_failure_streak() {
        let f = fixture().await;
        f.auth
            .register(registration("bjmathis", "Passw0rd!"), "")
            .await
            .unwrap();
        activate(&f.store, "bjmathis").await;

        for _ in 0..4 {
            let _ = f.auth.login("bjmathis", "wrong-pass", "10.0.0.1", "").await;
        }
        f.auth
            .login("bjmathis", "Passw0rd!", "10.0.0.1", "")
            .await
            .unwrap();
        let err = f
            .auth
            .login("bjmathis", "wrong-pass", "10.0.0.1", "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_corrupt_hash_reads_as_invalid_credentials() {
        let f = fixture().await;
        f.auth
            .register(registration("bjmathis", "Passw0rd!"), "")
            .await
            .unwrap();
        sqlx::query(
            "UPDATE users SET status = 'active', password_hash = 'garbage' WHERE username = 'bjmathis'",
        )
        .execute(f.store.pool())
        .await
        .unwrap();
        let err = f.auth.login("bjmathis", "Passw0rd!", "", "").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_legacy_bcrypt_login_upgrades_hash() {
        let f = fixture().await;
        f.auth
            .register(registration("bjmathis", "Passw0rd!"), "")
            .await
            .unwrap();
        let legacy = bcrypt::hash("Passw0rd!", 4).unwrap();
        sqlx::query("UPDATE users SET status = 'active', password_hash = ? WHERE username = 'bjmathis'")
            .bind(&legacy)
            .execute(f.store.pool())
            .await
            .unwrap();

        let err = f.auth.login("bjmathis", "wrong", "", "").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials));

        f.auth.login("bjmathis", "Passw0rd!", "", "").await.unwrap();
        let (stored,): (String,) =
            sqlx::query_as("SELECT password_hash FROM users WHERE username = 'bjmathis'")
                .fetch_one(f.store.pool())
                .await
                .unwrap();
        assert!(stored.starts_with("$argon2id$"));

        // The upgraded hash keeps working.
        f.auth.login("bjmathis", "Passw0rd!", "", "").await.unwrap();
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let f = fixture().await;
        f.auth
            .register(registration("bjmathis", "Passw0rd!"), "")
            .await
            .unwrap();
        activate(&f.store, "bjmathis").await;
        let success = f.auth.login("bjmathis", "Passw0rd!", "", "").await.unwrap();

        f.auth.logout(&success.session_token).await.unwrap();
        f.auth.logout(&success.session_token).await.unwrap();
        assert_eq!(
            f.sessions.resolve(&success.session_token).await.unwrap(),
            Resolution::NotFound
        );
    }

    #[tokio::test]
    async fn test_change_password_revokes_other_sessions() {
        let f = fixture().await;
        f.auth
            .register(registration("bjmathis", "Passw0rd!"), "")
            .await
            .unwrap();
        activate(&f.store, "bjmathis").await;
        let here = f.auth.login("bjmathis", "Passw0rd!", "", "").await.unwrap();
        let elsewhere = f.auth.login("bjmathis", "Passw0rd!", "", "").await.unwrap();

        assert!(matches!(
            f.auth
                .change_password("bjmathis", &here.session_token, "Passw0rd!", "NewPass99", "Other999")
                .await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            f.auth
                .change_password("bjmathis", &here.session_token, "Passw0rd!", "Passw0rd!", "Passw0rd!")
                .await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            f.auth
                .change_password("bjmathis", &here.session_token, "wrong-one", "NewPass99", "NewPass99")
                .await,
            Err(Error::InvalidInput(_))
        ));

        f.auth
            .change_password("bjmathis", &here.session_token, "Passw0rd!", "NewPass99", "NewPass99")
            .await
            .unwrap();

        assert!(matches!(
            f.sessions.resolve(&here.session_token).await.unwrap(),
            Resolution::Valid(_)
        ));
        assert_eq!(
            f.sessions.resolve(&elsewhere.session_token).await.unwrap(),
            Resolution::NotFound
        );
        assert!(f.auth.login("bjmathis", "NewPass99", "", "").await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_attempts() {
        let f = fixture().await;
        let _ = f.auth.login("ghost", "whatever", "", "").await;
        sqlx::query("UPDATE login_attempts SET attempted_at = '2020-01-01T00:00:00.000Z'")
            .execute(f.store.pool())
            .await
            .unwrap();
        assert_eq!(f.auth.purge_attempts(Duration::hours(24)).await.unwrap(), 1);
    }
}
