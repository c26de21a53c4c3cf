use axum::{
    extract::{Json, Path, Query, State},
    routing::get,
    Router,
};
use rail_core::reference::{CoachTypeId, StatusId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub id: StatusId,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub coach_type_id: CoachTypeId,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub schedule_id: Uuid,
    pub coach_type_id: CoachTypeId,
    pub available_seats: i64,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/booking-statuses/{name}", get(get_status))
        .route("/v1/schedules/{id}/availability", get(get_availability))
}

async fn get_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let id = state
        .bookings
        .reference()
        .status_id(&name)
        .map_err(|_| AppError::NotFoundError(format!("Unknown booking status: {}", name)))?;
    Ok(Json(StatusResponse { id, name }))
}

async fn get_availability(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let available_seats = state
        .bookings
        .available_seats(schedule_id, query.coach_type_id)
        .await?;
    Ok(Json(AvailabilityResponse {
        schedule_id,
        coach_type_id: query.coach_type_id,
        available_seats,
    }))
}
