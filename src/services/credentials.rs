//! Password hashing and credential checks.
//!
//! Hashes are argon2 PHC strings. Verification always runs a full argon2
//! computation, against a throwaway hash when the identity is unknown, so the
//! response time does not reveal whether an identifier exists.

use std::sync::OnceLock;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use constant_time_eq::constant_time_eq;

use crate::utils::AppError;

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::InternalServerError(format!("password hashing failed: {e}")))
}

/// False for a wrong password and for a malformed stored hash alike.
pub fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Stored credential hash is malformed");
            false
        }
    }
}

fn dummy_hash() -> &'static str {
    static DUMMY: OnceLock<String> = OnceLock::new();
    DUMMY.get_or_init(|| hash_password("rollcall-dummy-credential").unwrap_or_default())
}

/// Verifies against `hash`, or burns the same work and fails when there is none.
pub fn verify_or_burn(hash: Option<&str>, password: &str) -> bool {
    match hash {
        Some(hash) => verify_password(hash, password),
        None => {
            verify_password(dummy_hash(), password);
            false
        }
    }
}

/// Runs [`verify_or_burn`] off the async executor.
pub async fn verify_blocking(hash: Option<String>, password: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || verify_or_burn(hash.as_deref(), &password))
        .await
        .map_err(|e| AppError::InternalServerError(format!("credential check panicked: {e}")))
}

pub async fn hash_blocking(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AppError::InternalServerError(format!("password hashing panicked: {e}")))?
}

/// Credentials of the single main coordinator. Event coordinator and student
/// hashes live on their own records.
#[derive(Clone)]
pub struct Credentials {
    main_id: String,
    main_pass_hash: Option<String>,
}

impl Credentials {
    pub fn new(main_id: impl Into<String>, main_pass_hash: Option<String>) -> Self {
        Self {
            main_id: main_id.into(),
            main_pass_hash,
        }
    }

    /// Without a configured hash every attempt is refused.
    pub async fn verify_main(&self, id: &str, password: &str) -> Result<bool, AppError> {
        let id_matches = constant_time_eq(id.as_bytes(), self.main_id.as_bytes());
        let password_matches =
            verify_blocking(self.main_pass_hash.clone(), password.to_string()).await?;
        Ok(id_matches && password_matches)
    }
}
