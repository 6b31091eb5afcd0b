use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{self, AuthUser},
    error::AppError,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/verify", get(verify))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
}

#[derive(Deserialize)]
struct RegisterRequest {
    name: String,
    email: String,
    password: String,
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = auth::register_user(&state, &req.name, &req.email, &req.password).await?;
    let token = auth::issue_token(&state.config, &user)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "token": token, "user": user })),
    ))
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = auth::authenticate_user(&state, &req.email, &req.password).await?;
    let token = auth::issue_token(&state.config, &user)?;
    Ok(Json(json!({ "token": token, "user": user })))
}

async fn verify(user: AuthUser) -> impl IntoResponse {
    Json(json!({
        "valid": true,
        "user": { "id": user.id, "email": user.email, "user_type": user.user_type },
    }))
}

#[derive(Deserialize)]
struct ForgotPasswordRequest {
    email: String,
}

// No mailer in scope; the token comes back in the response body.
async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let token = auth::create_password_reset(&state, &req.email).await?;
    Ok(Json(json!({ "reset_token": token })))
}

#[derive(Deserialize)]
struct ResetPasswordRequest {
    token: String,
    password: String,
}

async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    auth::reset_password(&state, &req.token, &req.password).await?;
    Ok(Json(json!({ "message": "password updated" })))
}
