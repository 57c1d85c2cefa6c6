//! Session issuance, resolution and revocation.
//!
//! Tokens are 32 random bytes encoded as URL-safe base64. The database only
//! ever sees the SHA-256 of a token, so a leaked sessions table cannot be
//! replayed. Each session carries its own independent CSRF token.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::AuthConfig;
use crate::db::{self, session as store, Role, Store, UserStatus};
use crate::error::{Error, Result};

/// A validated session as seen by the rest of the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub role: Role,
    pub status: UserStatus,
    pub csrf_token: String,
    pub created_at: String,
    pub expires_at: String,
    pub ip_address: String,
    pub user_agent: String,
}

/// Freshly issued credentials. The token is only ever shown once.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub csrf_token: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Valid(Session),
    NotFound,
    Expired,
}

#[derive(Clone)]
pub struct SessionManager {
    store: Store,
    lifetime: Duration,
    renew_every: Duration,
}

/// Generate a random URL-safe token (256 bits)
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash a token for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

impl SessionManager {
    pub fn new(store: Store, lifetime: std::time::Duration, renew_every: std::time::Duration) -> Self {
        Self {
            store,
            lifetime: Duration::from_std(lifetime).unwrap_or_else(|_| Duration::hours(8)),
            renew_every: Duration::from_std(renew_every).unwrap_or_else(|_| Duration::minutes(5)),
        }
    }

    pub fn from_config(store: Store, config: &AuthConfig) -> Self {
        Self::new(
            store,
            std::time::Duration::from_secs(config.session_lifetime_secs),
            std::time::Duration::from_secs(config.session_renew_interval_secs),
        )
    }

    pub fn lifetime_secs(&self) -> i64 {
        self.lifetime.num_seconds()
    }

    pub async fn create(&self, username: &str, ip: &str, user_agent: &str) -> Result<IssuedSession> {
        let token = generate_token();
        let csrf_token = generate_token();
        let token_hash = hash_token(&token);
        let now = Utc::now();
        let created_at = db::timestamp(now);
        let expires_at = db::timestamp(now + self.lifetime);

        self.store
            .deadline(store::insert_session(
                self.store.pool(),
                &store::NewSession {
                    token_hash: &token_hash,
                    username,
                    csrf_token: &csrf_token,
                    created_at: &created_at,
                    expires_at: &expires_at,
                    ip_address: ip,
                    user_agent,
                },
            ))
            .await?;

        debug!(username = %username, "Session created");
        Ok(IssuedSession {
            token,
            csrf_token,
            expires_at,
        })
    }

    /// Look a token up. A session whose owner is no longer active reads as
    /// not found. Valid sessions slide forward, at most once per renewal
    /// interval.
    pub async fn resolve(&self, token: &str) -> Result<Resolution> {
        if token.is_empty() {
            return Ok(Resolution::NotFound);
        }
        let token_hash = hash_token(token);
        let row = match self
            .store
            .deadline(store::find_session(self.store.pool(), &token_hash))
            .await?
        {
            Some(row) => row,
            None => return Ok(Resolution::NotFound),
        };

        let now = Utc::now();
        let expires_at = db::parse_timestamp(&row.expires_at);
        if expires_at.map_or(true, |at| now >= at) {
            return Ok(Resolution::Expired);
        }

        let status: UserStatus = row.status.parse().unwrap_or(UserStatus::Suspended);
        if status != UserStatus::Active {
            return Ok(Resolution::NotFound);
        }

        let mut current_expiry = row.expires_at.clone();
        let renew_due = db::parse_timestamp(&row.renewed_at)
            .map_or(true, |renewed| now - renewed >= self.renew_every);
        if renew_due {
            let next_expiry = db::timestamp(now + self.lifetime);
            let renewed = self
                .store
                .deadline(store::renew_session(
                    self.store.pool(),
                    &token_hash,
                    &next_expiry,
                    &db::timestamp(now),
                ))
                .await?;
            if !renewed {
                // Revoked between the read and the renewal.
                return Ok(Resolution::NotFound);
            }
            current_expiry = next_expiry;
        }

        Ok(Resolution::Valid(Session {
            role: row.role.parse().unwrap_or(Role::Driver),
            status,
            username: row.username,
            csrf_token: row.csrf_token,
            created_at: row.created_at,
            expires_at: current_expiry,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
        }))
    }

    /// Idempotent.
    pub async fn revoke(&self, token: &str) -> Result<()> {
        let token_hash = hash_token(token);
        self.store
            .deadline(store::delete_session(self.store.pool(), &token_hash))
            .await?;
        Ok(())
    }

    pub async fn revoke_user(&self, username: &str) -> Result<u64> {
        let count = self
            .store
            .deadline(store::delete_user_sessions(self.store.pool(), username, None))
            .await?;
        if count > 0 {
            info!(username = %username, count, "Revoked sessions");
        }
        Ok(count)
    }

    /// Revoke every session of `username` except the one holding `keep_token`.
    pub async fn revoke_others(&self, username: &str, keep_token: &str) -> Result<u64> {
        let keep = hash_token(keep_token);
        self.store
            .deadline(store::delete_user_sessions(
                self.store.pool(),
                username,
                Some(keep.as_str()),
            ))
            .await
    }

    /// Remove expired sessions. Safe to run concurrently.
    pub async fn sweep(&self) -> Result<u64> {
        let now = db::now_timestamp();
        self.store
            .deadline(store::delete_expired_sessions(self.store.pool(), &now))
            .await
    }
}

impl Resolution {
    pub fn into_session(self) -> Result<Session> {
        match self {
            Resolution::Valid(session) => Ok(session),
            Resolution::NotFound | Resolution::Expired => Err(Error::Unauthenticated),
        }
    }
}
