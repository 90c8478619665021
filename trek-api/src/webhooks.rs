use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::{info, warn};

use crate::{error::AppError, state::AppState};
use trek_core::payment::GatewayStatus;
use trek_core::EngineError;

type HmacSha256 = Hmac<Sha256>;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/payments", post(handle_payment_webhook))
}

/// Verifies a `t=<unix>,v1=<hex>` signature header over `{t}.{body}`.
/// Comparison is constant-time via the MAC itself.
pub fn verify_signature(
    secret: &str,
    header: &str,
    body: &[u8],
    now_ts: i64,
    tolerance_seconds: i64,
) -> Result<(), EngineError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<String> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = value.parse().ok();
            }
            Some(("v1", value)) => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| EngineError::Signature("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(EngineError::Signature("missing v1 signature".to_string()));
    }
    if (now_ts - timestamp).abs() > tolerance_seconds {
        return Err(EngineError::Signature(
            "timestamp outside tolerance".to_string(),
        ));
    }

    for signature in &signatures {
        let Ok(expected) = hex::decode(signature) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| EngineError::Signature("invalid signing secret".to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }
    Err(EngineError::Signature("no matching signature".to_string()))
}

/// Normalized view of a provider event.
#[derive(Debug)]
pub struct GatewayEvent {
    pub provider_intent_id: String,
    pub status: GatewayStatus,
    pub booking_ref: Option<String>,
    pub object: Value,
}

/// Pulls the intent id, status and booking reference out of a provider
/// event envelope. Returns `None` for event families we do not consume.
pub fn extract_event(payload: &Value) -> Option<GatewayEvent> {
    let event_type = payload.get("type")?.as_str()?;
    let object = payload.pointer("/data/object")?.clone();

    let (provider_intent_id, status) = if event_type.starts_with("checkout.session.") {
        // Checkout sessions reference the underlying intent and carry the
        // outcome in the event name rather than the object status.
        let intent_id = object
            .get("payment_intent")
            .and_then(Value::as_str)
            .or_else(|| object.get("id").and_then(Value::as_str))?
            .to_string();
        let status = match event_type {
            // A completed session with deferred payment settles later via
            // the async_payment_* events.
            "checkout.session.completed" => {
                match object.get("payment_status").and_then(Value::as_str) {
                    Some("paid") | None => GatewayStatus::Succeeded,
                    Some(_) => return None,
                }
            }
            "checkout.session.async_payment_succeeded" => GatewayStatus::Succeeded,
            "checkout.session.async_payment_failed" | "checkout.session.expired" => {
                GatewayStatus::Failed
            }
            _ => return None,
        };
        (intent_id, status)
    } else if event_type.starts_with("payment_intent.") {
        let intent_id = object.get("id").and_then(Value::as_str)?.to_string();
        let status = object
            .get("status")
            .and_then(Value::as_str)
            .map(GatewayStatus::from_provider)
            .unwrap_or(GatewayStatus::Unknown);
        (intent_id, status)
    } else {
        return None;
    };

    let booking_ref = object
        .pointer("/metadata/booking_ref")
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(GatewayEvent {
        provider_intent_id,
        status,
        booking_ref,
        object,
    })
}

/// POST /v1/webhooks/payments
/// Receives payment status updates from the gateway. Returns 400 only for
/// signature failures; unknown bookings are acknowledged so the provider
/// stops retrying events we can never match.
async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    // Stripe-style combined header, or the generic split-header form.
    let signature = match headers.get("stripe-signature").and_then(|h| h.to_str().ok()) {
        Some(header) => header.to_string(),
        None => {
            let timestamp = headers
                .get("x-timestamp")
                .and_then(|h| h.to_str().ok())
                .ok_or_else(|| EngineError::Signature("missing signature header".to_string()))?;
            let signature = headers
                .get("x-signature")
                .and_then(|h| h.to_str().ok())
                .ok_or_else(|| EngineError::Signature("missing signature header".to_string()))?;
            format!("t={},v1={}", timestamp, signature)
        }
    };

    verify_signature(
        &state.webhook.secret,
        &signature,
        &body,
        Utc::now().timestamp(),
        state.webhook.tolerance_seconds,
    )?;

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| EngineError::Signature(format!("unparseable event body: {}", e)))?;

    let Some(event) = extract_event(&payload) else {
        info!(
            event_type = payload.get("type").and_then(serde_json::Value::as_str).unwrap_or("?"),
            "ignoring unhandled webhook event"
        );
        return Ok(StatusCode::OK);
    };

    match state
        .reconciler
        .apply(
            &event.provider_intent_id,
            event.booking_ref.as_deref(),
            event.status,
            &event.object,
        )
        .await
    {
        Ok(outcome) => {
            info!(
                provider_intent_id = %event.provider_intent_id,
                outcome = ?outcome,
                "webhook reconciled"
            );
            Ok(StatusCode::OK)
        }
        Err(EngineError::NotFound(msg)) => {
            warn!(
                provider_intent_id = %event.provider_intent_id,
                "webhook for unknown booking: {}", msg
            );
            Ok(StatusCode::OK)
        }
        Err(err) => Err(err.into()),
    }
}
