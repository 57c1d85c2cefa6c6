//! Credentials, sessions, login and access rules.

pub mod credentials;
pub mod policy;
pub mod service;
pub mod session;
pub mod sweeper;

pub use credentials::{CredentialStore, HashPolicy, Verification};
pub use policy::{authorize, Action, Decision, Resource};
pub use service::{AuthService, LockoutPolicy, LoginSuccess, Registration};
pub use session::{generate_token, hash_token, IssuedSession, Resolution, Session, SessionManager};
pub use sweeper::spawn_sweeper;
