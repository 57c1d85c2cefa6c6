//! Password hashing with Argon2id.
//!
//! Hashes are PHC strings, so the algorithm, version, cost parameters and
//! salt travel with every stored hash. Verification re-derives with the
//! stored parameters and compares in constant time; a hash produced under
//! an older policy verifies fine but reports `needs_rehash`. bcrypt hashes
//! carried over from the previous roster system verify through the `bcrypt`
//! crate and always report `needs_rehash`.
//!
//! Hashing is CPU-bound, so it runs on the blocking pool behind a semaphore
//! sized to the worker count.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::config::AuthConfig;
use crate::error::{Error, Result};

/// Modular-crypt prefixes of bcrypt hashes.
const BCRYPT_PREFIXES: [&str; 4] = ["$2a$", "$2b$", "$2x$", "$2y$"];

fn is_bcrypt(stored: &str) -> bool {
    BCRYPT_PREFIXES.iter().any(|prefix| stored.starts_with(prefix))
}

/// Argon2 cost policy applied to new hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashPolicy {
    /// Iterations (t_cost).
    pub cost: u32,
    pub memory_kib: u32,
    pub parallelism: u32,
}

impl HashPolicy {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            cost: config.password_hash_cost,
            memory_kib: config.password_hash_memory_kib,
            parallelism: config.password_hash_parallelism,
        }
    }
}

/// Outcome of a verification against a well-formed hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub ok: bool,
    pub needs_rehash: bool,
}

#[derive(Clone)]
struct Hasher {
    params: Params,
}

impl Hasher {
    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| Error::internal(format!("password hashing failed: {}", e)))
    }

    fn verify(&self, password: &str, stored: &str) -> Result<Verification> {
        if is_bcrypt(stored) {
            let ok = bcrypt::verify(password, stored).map_err(|_| Error::CredentialCorrupt)?;
            return Ok(Verification {
                ok,
                needs_rehash: ok,
            });
        }
        let parsed = PasswordHash::new(stored).map_err(|_| Error::CredentialCorrupt)?;
        match self.argon2().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(Verification {
                ok: true,
                needs_rehash: self.is_outdated(&parsed),
            }),
            Err(argon2::password_hash::Error::Password) => Ok(Verification {
                ok: false,
                needs_rehash: false,
            }),
            Err(_) => Err(Error::CredentialCorrupt),
        }
    }

    fn is_outdated(&self, parsed: &PasswordHash<'_>) -> bool {
        if parsed.algorithm != Algorithm::Argon2id.ident() {
            return true;
        }
        if parsed.version != Some(Version::V0x13.into()) {
            return true;
        }
        match Params::try_from(parsed) {
            Ok(stored) => {
                stored.m_cost() != self.params.m_cost()
                    || stored.t_cost() != self.params.t_cost()
                    || stored.p_cost() != self.params.p_cost()
            }
            Err(_) => true,
        }
    }
}

pub struct CredentialStore {
    hasher: Hasher,
    permits: Arc<Semaphore>,
    /// Verified against when the username is unknown, to equalize timing.
    dummy_hash: String,
}

impl CredentialStore {
    pub fn new(policy: HashPolicy, max_concurrent: Option<usize>) -> Result<Self> {
        let params = Params::new(policy.memory_kib, policy.cost, policy.parallelism, None)
            .map_err(|e| Error::invalid(format!("invalid password hash policy: {}", e)))?;
        let hasher = Hasher { params };
        let dummy_hash = hasher.hash("busroster-timing-equalizer")?;

        let workers = max_concurrent.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });

        Ok(Self {
            hasher,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            dummy_hash,
        })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        Self::new(HashPolicy::from_config(config), config.max_concurrent_hashes)
    }

    pub async fn hash(&self, password: &str) -> Result<String> {
        if password.is_empty() {
            return Err(Error::invalid("password must not be empty"));
        }
        let hasher = self.hasher.clone();
        let password = password.to_string();
        self.run_blocking(move || hasher.hash(&password)).await
    }

    /// `CredentialCorrupt` when `stored` is not a parseable hash.
    pub async fn verify(&self, password: &str, stored: &str) -> Result<Verification> {
        if password.is_empty() {
            return Err(Error::invalid("password must not be empty"));
        }
        let hasher = self.hasher.clone();
        let password = password.to_string();
        let stored = stored.to_string();
        self.run_blocking(move || hasher.verify(&password, &stored))
            .await
    }

    /// Burn the same CPU as a real verification; the result is discarded.
    pub async fn dummy_verify(&self, password: &str) {
        let candidate = if password.is_empty() { "-" } else { password };
        if let Err(e) = self.verify(candidate, &self.dummy_hash).await {
            warn!(error = %e, "Dummy password verification failed");
        }
    }

    async fn run_blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::Unavailable("password hasher is shut down".to_string()))?;
        tokio::task::spawn_blocking(work).await?
    }
}

#[cfg(test)]
pub(crate) fn test_policy() -> HashPolicy {
    HashPolicy {
        cost: 1,
        memory_kib: 256,
        parallelism: 1,
    }
}
