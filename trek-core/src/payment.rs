use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::booking::BookingStatus;
use crate::error::EngineError;

/// Gateway intent status, normalised from the provider's string vocabulary.
/// Strings outside `STATUS_MAP` deserialize as `Unknown` and are treated as
/// still-pending for booking purposes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Succeeded,
    Canceled,
    Failed,
    #[serde(other)]
    Unknown,
}

/// Explicit provider-string → status mapping. Checked by
/// [`verify_status_map`] at startup rather than inferred per call.
pub const STATUS_MAP: &[(&str, GatewayStatus)] = &[
    ("requires_payment_method", GatewayStatus::RequiresPaymentMethod),
    ("requires_confirmation", GatewayStatus::RequiresConfirmation),
    ("requires_action", GatewayStatus::RequiresAction),
    ("processing", GatewayStatus::Processing),
    ("requires_capture", GatewayStatus::RequiresCapture),
    ("succeeded", GatewayStatus::Succeeded),
    ("canceled", GatewayStatus::Canceled),
    ("failed", GatewayStatus::Failed),
];

impl GatewayStatus {
    pub fn from_provider(s: &str) -> Self {
        STATUS_MAP
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, status)| *status)
            .unwrap_or(Self::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequiresPaymentMethod => "requires_payment_method",
            Self::RequiresConfirmation => "requires_confirmation",
            Self::RequiresAction => "requires_action",
            Self::Processing => "processing",
            Self::RequiresCapture => "requires_capture",
            Self::Succeeded => "succeeded",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }

    /// A payment in an actionable status can still be completed by the
    /// customer; at most one actionable payment may exist per booking.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            Self::RequiresPaymentMethod
                | Self::RequiresConfirmation
                | Self::RequiresAction
                | Self::Processing
                | Self::RequiresCapture
        )
    }

    /// Booking status this gateway status reconciles to. Anything that is
    /// not a definitive outcome keeps the booking pending.
    pub fn target_booking_status(&self) -> BookingStatus {
        match self {
            Self::Succeeded => BookingStatus::Paid,
            Self::Canceled | Self::Failed => BookingStatus::Failed,
            _ => BookingStatus::PendingPayment,
        }
    }
}

/// Sanity check on the mapping table, run once during startup.
pub fn verify_status_map() -> Result<(), EngineError> {
    for (name, status) in STATUS_MAP {
        if GatewayStatus::from_provider(name) != *status {
            return Err(EngineError::Store(format!(
                "gateway status map is inconsistent for `{}`",
                name
            )));
        }
        if status.as_str() != *name {
            return Err(EngineError::Store(format!(
                "gateway status `{}` does not round-trip",
                name
            )));
        }
    }
    Ok(())
}

/// One payment-gateway intent created for a booking. Rows accumulate over
/// retries and are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingPayment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub provider_intent_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: GatewayStatus,
    pub client_secret: Option<String>,
    /// Last raw gateway payload seen for this intent, kept for audit.
    pub raw_event: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Handle returned to the front end so it can complete the payment.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentHandle {
    pub client_secret: Option<String>,
    pub provider_intent_id: String,
}

/// Provider-side view of an intent.
#[derive(Debug, Clone)]
pub struct GatewayIntent {
    pub provider_intent_id: String,
    pub status: GatewayStatus,
    pub client_secret: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Clone)]
pub struct CreateIntentRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub receipt_email: Option<String>,
    /// Deterministic per booking; the gateway deduplicates on it.
    pub idempotency_key: String,
    pub metadata: Value,
}

/// Outbound payment-provider seam. Implementations must not assume they are
/// called under any database lock.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, req: &CreateIntentRequest) -> Result<GatewayIntent, EngineError>;

    async fn retrieve_intent(&self, provider_intent_id: &str) -> Result<GatewayIntent, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_map_is_consistent() {
        assert!(verify_status_map().is_ok());
    }

    #[test]
    fn unknown_provider_strings_stay_pending() {
        let status = GatewayStatus::from_provider("partially_funded");
        assert_eq!(status, GatewayStatus::Unknown);
        assert_eq!(status.target_booking_status(), BookingStatus::PendingPayment);
        assert!(!status.is_actionable());
    }

    #[test]
    fn definitive_statuses_map_to_terminal_targets() {
        assert_eq!(
            GatewayStatus::Succeeded.target_booking_status(),
            BookingStatus::Paid
        );
        assert_eq!(
            GatewayStatus::Canceled.target_booking_status(),
            BookingStatus::Failed
        );
        assert_eq!(
            GatewayStatus::Failed.target_booking_status(),
            BookingStatus::Failed
        );
        assert_eq!(
            GatewayStatus::Processing.target_booking_status(),
            BookingStatus::PendingPayment
        );
    }

    #[test]
    fn actionable_statuses_match_retry_window() {
        assert!(GatewayStatus::RequiresPaymentMethod.is_actionable());
        assert!(GatewayStatus::Processing.is_actionable());
        assert!(!GatewayStatus::Succeeded.is_actionable());
        assert!(!GatewayStatus::Failed.is_actionable());
        assert!(!GatewayStatus::Unknown.is_actionable());
    }
}
