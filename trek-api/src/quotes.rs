use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, middleware::auth::CustomerClaims, state::AppState};
use trek_catalog::pricing;
use trek_core::intent::{BookingIntent, IntentStatus, PriceSnapshot};
use trek_core::EngineError;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/quotes", post(create_quote))
        .route("/v1/intents", post(create_intent))
        .route("/v1/intents/{id}", get(get_intent))
}

#[derive(Debug, Deserialize)]
struct QuoteRequest {
    product_slug: String,
    party_size: i32,
    /// When set, the quote comes from the intent's price snapshot after
    /// re-validating product match and expiry.
    intent_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct QuoteResponse {
    product_slug: String,
    party_size: i32,
    unit_minor: i64,
    total_minor: i64,
    currency: String,
}

async fn create_quote(
    State(state): State<AppState>,
    Json(req): Json<QuoteRequest>,
) -> Result<Json<QuoteResponse>, AppError> {
    let product = state
        .catalog
        .product_by_slug(&req.product_slug)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("product {}", req.product_slug)))?;

    if let Some(intent_id) = req.intent_id {
        let intent = state
            .intents
            .get(intent_id)
            .await?
            .ok_or_else(|| EngineError::validation("intent_id", "unknown booking intent"))?;
        if intent.product_id != product.id {
            return Err(AppError::Engine(EngineError::validation(
                "intent_id",
                "intent does not match this product",
            )));
        }
        if intent.effective_status(Utc::now()) == IntentStatus::Expired {
            return Err(AppError::Engine(EngineError::conflict(
                "booking intent has expired".to_string(),
            )));
        }
        let unit = intent.price_snapshot.unit_minor;
        return Ok(Json(QuoteResponse {
            product_slug: req.product_slug,
            party_size: req.party_size,
            unit_minor: unit,
            total_minor: unit * i64::from(req.party_size),
            currency: intent.price_snapshot.currency.clone(),
        }));
    }

    let quote = pricing::resolve(&product, req.party_size).map_err(|e| match e {
        pricing::PricingError::PartySize => {
            EngineError::validation("party_size", "party size must be at least 1")
        }
        pricing::PricingError::Unavailable => {
            EngineError::validation("product_slug", "pricing unavailable for this product")
        }
    })?;
    Ok(Json(QuoteResponse {
        product_slug: req.product_slug,
        party_size: req.party_size,
        unit_minor: quote.unit_minor,
        total_minor: quote.total_minor,
        currency: quote.currency,
    }))
}

#[derive(Debug, Deserialize)]
struct IntentRequest {
    product_slug: String,
    departure_id: Option<Uuid>,
    party_size: i32,
    email: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, Serialize)]
struct IntentResponse {
    id: Uuid,
    product_id: Uuid,
    party_size: i32,
    unit_minor: i64,
    total_minor: i64,
    currency: String,
    status: &'static str,
    expires_at: chrono::DateTime<Utc>,
}

impl IntentResponse {
    fn from_intent(intent: &BookingIntent, status: IntentStatus) -> Self {
        Self {
            id: intent.id,
            product_id: intent.product_id,
            party_size: intent.party_size,
            unit_minor: intent.price_snapshot.unit_minor,
            total_minor: intent.price_snapshot.unit_minor * i64::from(intent.party_size),
            currency: intent.price_snapshot.currency.clone(),
            status: status.as_str(),
            expires_at: intent.expires_at,
        }
    }
}

async fn create_intent(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Json(req): Json<IntentRequest>,
) -> Result<(StatusCode, Json<IntentResponse>), AppError> {
    let product = state
        .catalog
        .product_by_slug(&req.product_slug)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("product {}", req.product_slug)))?;
    let quote = pricing::resolve(&product, req.party_size).map_err(|e| match e {
        pricing::PricingError::PartySize => {
            EngineError::validation("party_size", "party size must be at least 1")
        }
        pricing::PricingError::Unavailable => {
            EngineError::validation("product_slug", "pricing unavailable for this product")
        }
    })?;

    let mut intent = BookingIntent::new(
        product.id,
        req.departure_id,
        req.party_size,
        PriceSnapshot {
            unit_minor: quote.unit_minor,
            currency: quote.currency,
        },
        state.business.intent_ttl_seconds as i64,
    );
    intent.user_id = Some(claims.sub.clone());
    intent.email = req.email.or(claims.email);
    intent.phone = req.phone;

    state.intents.put(&intent).await?;
    let status = intent.status;
    Ok((
        StatusCode::CREATED,
        Json(IntentResponse::from_intent(&intent, status)),
    ))
}

async fn get_intent(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<IntentResponse>, AppError> {
    let intent = state
        .intents
        .get(id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("intent {}", id)))?;
    if !claims.identity().may_access(intent.user_id.as_deref()) {
        return Err(AppError::Engine(EngineError::NotFound(format!(
            "intent {}",
            id
        ))));
    }
    // Report expiry lazily; the stored status may lag the clock.
    let status = intent.effective_status(Utc::now());
    Ok(Json(IntentResponse::from_intent(&intent, status)))
}
