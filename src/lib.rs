pub mod api;
pub mod assignments;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod fleet;
pub mod ui;
pub mod users;
pub mod validation;

pub use db::{DbPool, Store};

use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::assignments::AssignmentEngine;
use crate::auth::{AuthService, CredentialStore, LockoutPolicy, SessionManager};
use crate::fleet::Fleet;
use crate::users::UserAdmin;

pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub credentials: Arc<CredentialStore>,
    pub sessions: SessionManager,
    pub auth: AuthService,
    pub users: UserAdmin,
    pub assignments: AssignmentEngine,
    pub fleet: Fleet,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Config, store: Store) -> error::Result<Self> {
        let credentials = Arc::new(CredentialStore::from_config(&config.auth)?);
        let sessions = SessionManager::from_config(store.clone(), &config.auth);
        let auth = AuthService::new(
            store.clone(),
            credentials.clone(),
            sessions.clone(),
            LockoutPolicy::from_config(&config.auth),
        );
        let users = UserAdmin::new(store.clone(), credentials.clone());
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Ok(Self {
            assignments: AssignmentEngine::new(store.clone()),
            fleet: Fleet::new(store.clone()),
            config,
            store,
            credentials,
            sessions,
            auth,
            users,
            rate_limiter,
            metrics_handle: None,
        })
    }

    /// Set the Prometheus metrics handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
