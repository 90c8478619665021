use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::{error::AppError, middleware::auth::CustomerClaims, state::AppState};
use trek_booking::{AmendBookingRequest, BillingInput, CreateBookingRequest};
use trek_core::booking::Booking;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking))
        .route("/v1/bookings/{reference}", get(get_booking))
        .route("/v1/bookings/{reference}", patch(amend_booking))
        .route("/v1/bookings/{reference}/cancel", post(cancel_booking))
        .route(
            "/v1/bookings/{reference}/billing-details",
            post(upsert_billing),
        )
}

#[derive(Debug, Serialize)]
struct BookingResponse {
    reference: String,
    status: String,
    product_id: uuid::Uuid,
    party_size: i32,
    start_date: chrono::NaiveDate,
    end_date: chrono::NaiveDate,
    lead_name: String,
    lead_email: String,
    total_minor: i64,
    currency: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<Booking> for BookingResponse {
    fn from(b: Booking) -> Self {
        Self {
            reference: b.reference,
            status: b.status.as_str().to_string(),
            product_id: b.product_id,
            party_size: b.party_size,
            start_date: b.start_date,
            end_date: b.end_date,
            lead_name: b.lead_name,
            lead_email: b.lead_email,
            total_minor: b.total_minor,
            currency: b.currency,
            created_at: b.created_at,
        }
    }
}

async fn create_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingResponse>), AppError> {
    let booking = state.ledger.create(req, &claims.identity()).await?;
    Ok((StatusCode::CREATED, Json(booking.into())))
}

async fn get_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(reference): Path<String>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state.ledger.get(&reference, &claims.identity()).await?;
    Ok(Json(booking.into()))
}

async fn amend_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(reference): Path<String>,
    Json(req): Json<AmendBookingRequest>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state
        .ledger
        .amend(&reference, req, &claims.identity())
        .await?;
    Ok(Json(booking.into()))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(reference): Path<String>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state.ledger.cancel(&reference, &claims.identity()).await?;
    Ok(Json(booking.into()))
}

async fn upsert_billing(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(reference): Path<String>,
    Json(input): Json<BillingInput>,
) -> Result<Json<Value>, AppError> {
    state
        .ledger
        .upsert_billing(&reference, input, &claims.identity())
        .await?;
    Ok(Json(json!({ "status": "ok" })))
}
