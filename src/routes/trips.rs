use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    auth::AuthUser,
    error::AppError,
    models::trip::{ActivityPayload, ExpensePayload, StopPayload, TripPayload},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_trips).post(create_trip))
        .route("/:id", get(get_trip).put(replace_trip).delete(delete_trip))
        .route("/:id/budget", get(budget_breakdown).patch(patch_budget))
        .route("/:id/stops", post(add_stop))
        .route("/:id/activities", post(add_activity))
        .route("/:id/expenses", get(list_expenses).post(add_expense))
        .route("/stops/:id", delete(delete_stop))
        .route("/activities/:id", delete(delete_activity))
}

async fn list_trips(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let trips = state.trips.list_trips(user.id).await?;
    Ok(Json(trips))
}

async fn create_trip(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<TripPayload>,
) -> Result<impl IntoResponse, AppError> {
    let trip = state.trips.create_trip(user.id, &payload).await?;
    Ok((StatusCode::CREATED, Json(trip)))
}

async fn get_trip(
    State(state): State<AppState>,
    user: AuthUser,
    Path(trip_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let trip = state.trips.fetch_trip(user.id, trip_id).await?;
    Ok(Json(trip))
}

async fn replace_trip(
    State(state): State<AppState>,
    user: AuthUser,
    Path(trip_id): Path<i64>,
    Json(payload): Json<TripPayload>,
) -> Result<impl IntoResponse, AppError> {
    let trip = state.trips.replace_trip(user.id, trip_id, &payload).await?;
    Ok(Json(trip))
}

#[derive(Deserialize)]
struct BudgetPatch {
    budget: f64,
}

async fn patch_budget(
    State(state): State<AppState>,
    user: AuthUser,
    Path(trip_id): Path<i64>,
    Json(patch): Json<BudgetPatch>,
) -> Result<impl IntoResponse, AppError> {
    state
        .trips
        .update_budget(user.id, trip_id, patch.budget)
        .await?;
    let trip = state.trips.fetch_trip(user.id, trip_id).await?;
    Ok(Json(trip))
}

async fn delete_trip(
    State(state): State<AppState>,
    user: AuthUser,
    Path(trip_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    state.trips.delete_trip(user.id, trip_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_stop(
    State(state): State<AppState>,
    user: AuthUser,
    Path(trip_id): Path<i64>,
    Json(payload): Json<StopPayload>,
) -> Result<impl IntoResponse, AppError> {
    let stop = state.trips.add_stop(user.id, trip_id, &payload).await?;
    Ok((StatusCode::CREATED, Json(stop)))
}

async fn delete_stop(
    State(state): State<AppState>,
    user: AuthUser,
    Path(stop_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    state.trips.delete_stop(user.id, stop_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_activity(
    State(state): State<AppState>,
    user: AuthUser,
    Path(stop_id): Path<i64>,
    Json(payload): Json<ActivityPayload>,
) -> Result<impl IntoResponse, AppError> {
    let activity = state.trips.add_activity(user.id, stop_id, &payload).await?;
    Ok((StatusCode::CREATED, Json(activity)))
}

async fn delete_activity(
    State(state): State<AppState>,
    user: AuthUser,
    Path(activity_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    state.trips.delete_activity(user.id, activity_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn budget_breakdown(
    State(state): State<AppState>,
    user: AuthUser,
    Path(trip_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let breakdown = state.trips.budget_breakdown(user.id, trip_id).await?;
    Ok(Json(breakdown))
}

async fn add_expense(
    State(state): State<AppState>,
    user: AuthUser,
    Path(trip_id): Path<i64>,
    Json(payload): Json<ExpensePayload>,
) -> Result<impl IntoResponse, AppError> {
    let expense = state.trips.add_expense(user.id, trip_id, &payload).await?;
    Ok((StatusCode::CREATED, Json(expense)))
}

async fn list_expenses(
    State(state): State<AppState>,
    user: AuthUser,
    Path(trip_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let expenses = state.trips.list_expenses(user.id, trip_id).await?;
    Ok(Json(expenses))
}
