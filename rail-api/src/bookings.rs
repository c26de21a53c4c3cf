use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use rail_core::models::{Booking, BookingWithPassengers, CreateBookingRequest};
use rail_core::CancellationOutcome;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ConfirmRequest {
    #[serde(default)]
    pub payment_id: Option<Uuid>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking))
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/bookings/{id}/confirm", post(confirm_booking))
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
}

async fn create_booking(
    State(state): State<AppState>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingWithPassengers>), AppError> {
    info!(
        "Booking request from user {} for schedule {} ({} passenger(s))",
        req.user_id,
        req.schedule_id,
        req.passengers.len()
    );
    let created = state.bookings.create_booking_with_passengers(req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BookingWithPassengers>, AppError> {
    Ok(Json(state.bookings.get_booking(id).await?))
}

async fn confirm_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    req: Option<Json<ConfirmRequest>>,
) -> Result<Json<Booking>, AppError> {
    // A request without a JSON body confirms without touching payments
    let Json(req) = req.unwrap_or_default();
    Ok(Json(state.bookings.confirm_booking(id, req.payment_id).await?))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancellationOutcome>, AppError> {
    Ok(Json(state.bookings.cancel_booking(id).await?))
}
