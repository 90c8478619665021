use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Extension, Json, Router,
};
use serde::Serialize;

use crate::{error::AppError, middleware::auth::CustomerClaims, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/bookings/{reference}/payment-intent",
            post(create_payment_intent),
        )
        .route("/v1/bookings/{reference}/confirm", post(confirm_payment))
}

#[derive(Debug, Serialize)]
struct PaymentIntentResponse {
    provider_intent_id: String,
    client_secret: Option<String>,
}

async fn create_payment_intent(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(reference): Path<String>,
) -> Result<(StatusCode, Json<PaymentIntentResponse>), AppError> {
    let booking = state.ledger.get(&reference, &claims.identity()).await?;
    let response = state.payments.create_handle(&booking).await?;
    let status = if response.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(PaymentIntentResponse {
            provider_intent_id: response.handle.provider_intent_id,
            client_secret: response.handle.client_secret,
        }),
    ))
}

#[derive(Debug, Serialize)]
struct ConfirmResponse {
    reference: String,
    booking_status: String,
    gateway_status: String,
}

/// Pulls the current intent state from the gateway and feeds it through the
/// same reconciliation path webhooks use. Safe to call any number of times.
async fn confirm_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(reference): Path<String>,
) -> Result<Json<ConfirmResponse>, AppError> {
    let identity = claims.identity();
    let booking = state.ledger.get(&reference, &identity).await?;
    let remote = state.payments.fetch_status(&booking).await?;

    state
        .reconciler
        .apply(
            &remote.provider_intent_id,
            Some(&reference),
            remote.status,
            &remote.raw,
        )
        .await?;

    let booking = state.ledger.get(&reference, &identity).await?;
    Ok(Json(ConfirmResponse {
        reference: booking.reference.clone(),
        booking_status: booking.status.as_str().to_string(),
        gateway_status: remote.status.as_str().to_string(),
    }))
}
