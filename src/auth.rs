use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::header, http::request::Parts};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{config::AppConfig, error::AppError, models::user::User, state::AppState};

const RESET_TOKEN_TTL_HOURS: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub email: String,
    pub user_type: String,
    pub exp: i64,
}

/// Identity attached to a request after the bearer token checks out.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub email: String,
    pub user_type: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(AppError::Unauthorized("missing token"))?;
        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or(AppError::Unauthorized("invalid token"))?;

        let claims = verify_token(&state.config, token)?;

        // The token may outlive the account; re-check activation on every request.
        let is_active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM users WHERE id = ?1")
            .bind(claims.sub)
            .fetch_optional(&state.db)
            .await?;
        match is_active {
            None => Err(AppError::Unauthorized("invalid token")),
            Some(false) => Err(AppError::Forbidden),
            Some(true) => Ok(AuthUser {
                id: claims.sub,
                email: claims.email,
                user_type: claims.user_type,
            }),
        }
    }
}

pub fn issue_token(config: &AppConfig, user: &User) -> Result<String, AppError> {
    let claims = Claims {
        sub: user.id,
        email: user.email.clone(),
        user_type: user.user_type.clone(),
        exp: (Utc::now() + Duration::hours(config.token_ttl_hours)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|err| AppError::Other(err.into()))
}

pub fn verify_token(config: &AppConfig, token: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|err| match err.kind() {
        ErrorKind::ExpiredSignature => AppError::Unauthorized("expired token"),
        _ => AppError::Unauthorized("invalid token"),
    })
}

pub async fn register_user(
    state: &AppState,
    name: &str,
    email: &str,
    password: &str,
) -> Result<User, AppError> {
    let name = name.trim();
    let email = email.trim().to_lowercase();
    if name.is_empty() {
        return Err(AppError::BadRequest("name must not be empty".into()));
    }
    if !email.contains('@') {
        return Err(AppError::BadRequest("invalid email address".into()));
    }
    if password.len() < 8 {
        return Err(AppError::BadRequest(
            "password must be at least 8 characters".into(),
        ));
    }

    let password_hash = hash_password(password)?;
    // The UNIQUE constraint on email is the arbiter; concurrent registrations
    // both land here instead of racing a separate existence check.
    let result = sqlx::query(
        "INSERT INTO users (name, email, password_hash, user_type, is_active, created_at)
         VALUES (?1, ?2, ?3, 'traveler', 1, ?4)",
    )
    .bind(name)
    .bind(&email)
    .bind(&password_hash)
    .bind(Utc::now())
    .execute(&state.db)
    .await;

    let user_id = match result {
        Ok(done) => done.last_insert_rowid(),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            return Err(AppError::BadRequest("email already registered".into()));
        }
        Err(err) => return Err(err.into()),
    };

    fetch_user(state, user_id).await
}

pub async fn authenticate_user(
    state: &AppState,
    email: &str,
    password: &str,
) -> Result<User, AppError> {
    let email = email.trim().to_lowercase();
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::Unauthorized("invalid credentials"))?;

    verify_password(password, &user.password_hash)?;

    if !user.is_active {
        return Err(AppError::Forbidden);
    }
    Ok(user)
}

#[derive(Debug, FromRow)]
struct ResetRow {
    id: i64,
    user_id: i64,
    expires_at: DateTime<Utc>,
}

/// Creates a single-use reset token for the account behind `email`.
pub async fn create_password_reset(state: &AppState, email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    let user_id: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;
    let user_id = user_id.ok_or(AppError::NotFound)?;

    let token = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO password_resets (user_id, token, expires_at, used, created_at)
         VALUES (?1, ?2, ?3, 0, ?4)",
    )
    .bind(user_id)
    .bind(&token)
    .bind(Utc::now() + Duration::hours(RESET_TOKEN_TTL_HOURS))
    .bind(Utc::now())
    .execute(&state.db)
    .await?;

    Ok(token)
}

pub async fn reset_password(
    state: &AppState,
    token: &str,
    new_password: &str,
) -> Result<(), AppError> {
    if new_password.len() < 8 {
        return Err(AppError::BadRequest(
            "password must be at least 8 characters".into(),
        ));
    }

    let row = sqlx::query_as::<_, ResetRow>(
        "SELECT id, user_id, expires_at FROM password_resets WHERE token = ?1 AND used = 0",
    )
    .bind(token)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::BadRequest("invalid reset token".into()))?;

    if row.expires_at < Utc::now() {
        return Err(AppError::BadRequest("expired reset token".into()));
    }

    let password_hash = hash_password(new_password)?;
    sqlx::query("UPDATE users SET password_hash = ?1 WHERE id = ?2")
        .bind(&password_hash)
        .bind(row.user_id)
        .execute(&state.db)
        .await?;
    sqlx::query("UPDATE password_resets SET used = 1 WHERE id = ?1")
        .bind(row.id)
        .execute(&state.db)
        .await?;
    Ok(())
}

pub async fn fetch_user(state: &AppState, user_id: i64) -> Result<User, AppError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?1")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound)
}

fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AppError::Other(anyhow::anyhow!("hash password: {err}")))
}

fn verify_password(password: &str, stored_hash: &str) -> Result<(), AppError> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|err| AppError::Other(anyhow::anyhow!("corrupt password hash: {err}")))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AppError::Unauthorized("invalid credentials"))
}
