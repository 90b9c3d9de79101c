use axum::extract::State;
use axum::response::Response;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::auth::check_rate;
use crate::models::user::ProfileUpdate;
use crate::models::Student;
use crate::services::credentials::{hash_blocking, verify_blocking};
use crate::state::AppState;
use crate::store::bounded;
use crate::utils::response::success;
use crate::utils::{AppError, ClientIp, JsonBody};

const MIN_NAME_LEN: usize = 2;
const MIN_PASSWORD_LEN: usize = 6;
const INVALID_LOGIN: &str = "Invalid email or password";

#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct ProfileRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub current_password: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

fn student_key(ip: &str) -> String {
    format!("student:{ip}")
}

fn validate_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.chars().count() < MIN_NAME_LEN {
        return Err(AppError::ValidationError(format!(
            "Name must be at least {MIN_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

/// Lowercased and trimmed. Requires a single `@` with a dotted domain.
fn validate_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err(AppError::ValidationError("A valid email is required".to_string()))
    }
}

fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::ValidationError(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub async fn register(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<RegisterRequest>,
) -> Result<Response, AppError> {
    let name = validate_name(&request.name)?;
    let email = validate_email(&request.email)?;
    validate_password(&request.password)?;

    let timeout = state.config.store_timeout;
    if bounded(timeout, state.store.find_user_by_email(&email)).await?.is_some() {
        return Err(AppError::Conflict("Email is already registered".to_string()));
    }

    let student = Student {
        id: Uuid::new_v4().to_string(),
        name,
        email,
        phone: None,
        college: None,
        tickets: Vec::new(),
        certificates: Vec::new(),
        pass_hash: hash_blocking(request.password).await?,
        created_at: Utc::now(),
    };
    bounded(timeout, state.store.insert_user(&student)).await?;
    info!(student_id = %student.id, "Student registered");
    Ok(success(student.to_public(), "Registration successful"))
}

pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    JsonBody(request): JsonBody<LoginRequest>,
) -> Result<Response, AppError> {
    let key = student_key(&ip);
    check_rate(&state, &key)?;

    let email = request.email.trim().to_lowercase();
    if email.is_empty() || request.password.is_empty() {
        return Err(AppError::ValidationError(
            "email and password are required".to_string(),
        ));
    }

    let student = bounded(state.config.store_timeout, state.store.find_user_by_email(&email)).await?;
    let hash = student.as_ref().map(|s| s.pass_hash.clone());
    let verified = verify_blocking(hash, request.password).await?;
    let student = match student {
        Some(student) if verified => student,
        _ => {
            warn!(ip = %ip, "Student login rejected");
            return Err(AppError::AuthError(INVALID_LOGIN.to_string()));
        }
    };

    state.limiter.reset(&key);
    info!(student_id = %student.id, "Student logged in");
    Ok(success(student.to_public(), "Login successful"))
}

/// Changes name, email or password after re-checking the current password.
pub async fn update_profile(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    JsonBody(request): JsonBody<ProfileRequest>,
) -> Result<Response, AppError> {
    let key = student_key(&ip);
    check_rate(&state, &key)?;

    let id = request.id.trim();
    if id.is_empty() || request.current_password.is_empty() {
        return Err(AppError::ValidationError(
            "id and current_password are required".to_string(),
        ));
    }

    let update = ProfileUpdate {
        name: request.name.as_deref().map(validate_name).transpose()?,
        email: request.email.as_deref().map(validate_email).transpose()?,
        pass_hash: None,
    };
    if let Some(password) = &request.password {
        validate_password(password)?;
    }
    if update.name.is_none() && update.email.is_none() && request.password.is_none() {
        return Err(AppError::ValidationError(
            "Nothing to update".to_string(),
        ));
    }

    let timeout = state.config.store_timeout;
    let student = bounded(timeout, state.store.users_by_ids(&[id.to_string()]))
        .await?
        .into_iter()
        .next();
    let hash = student.as_ref().map(|s| s.pass_hash.clone());
    if !verify_blocking(hash, request.current_password).await? || student.is_none() {
        warn!(ip = %ip, "Profile update rejected");
        return Err(AppError::AuthError("Current password is incorrect".to_string()));
    }
    state.limiter.reset(&key);

    if let Some(email) = &update.email {
        if let Some(owner) = bounded(timeout, state.store.find_user_by_email(email)).await? {
            if owner.id != id {
                return Err(AppError::Conflict("Email is already registered".to_string()));
            }
        }
    }

    let update = ProfileUpdate {
        pass_hash: match request.password {
            Some(password) => Some(hash_blocking(password).await?),
            None => None,
        },
        ..update
    };
    let updated = bounded(timeout, state.store.update_user_profile(id, &update))
        .await?
        .ok_or_else(|| AppError::NotFound("Student not found".to_string()))?;
    info!(student_id = %updated.id, "Profile updated");
    Ok(success(updated.to_public(), "Profile updated"))
}
