use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Booking lifecycle. `Paid` and `Cancelled` are terminal; `Failed` can be
/// retried by opening a fresh payment, which moves the booking back to
/// `PendingPayment`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Draft,
    PendingPayment,
    Paid,
    Cancelled,
    Failed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingPayment => "pending_payment",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "pending_payment" => Some(Self::PendingPayment),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// No gateway event may move a booking out of these states.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Paid | Self::Cancelled)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Draft | Self::PendingPayment)
    }

    pub fn allows_amendment(&self) -> bool {
        matches!(self, Self::Draft | Self::PendingPayment)
    }
}

/// The durable reservation aggregate — the system of record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    /// Human-shareable reference, e.g. `TRK2608-4F21A9`.
    pub reference: String,
    pub product_id: Uuid,
    pub intent_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub party_size: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub lead_name: String,
    pub lead_email: String,
    pub lead_phone: Option<String>,
    /// Total in currency minor units; immutable once a payment exists.
    pub total_minor: i64,
    pub currency: String,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn update_status(&mut self, status: BookingStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn owned_by(&self, identity: &str) -> bool {
        self.user_id.as_deref() == Some(identity)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

/// Traveler-specific details, 1:1 with a booking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormDetails {
    pub booking_id: Uuid,
    pub lead_title: Option<String>,
    pub lead_first_name: Option<String>,
    pub lead_last_name: Option<String>,
    pub country: Option<String>,
    pub emergency_contact: Option<String>,
    pub dietary_requirements: Option<String>,
    pub medical_conditions: Option<String>,
    #[serde(default)]
    pub experience_level: ExperienceLevel,
    pub guide_language: Option<String>,
    pub special_requests: Option<String>,
    pub comments: Option<String>,
    pub departure_time: Option<NaiveTime>,
    pub return_time: Option<NaiveTime>,
}

impl Default for ExperienceLevel {
    fn default() -> Self {
        Self::Beginner
    }
}

impl ExperienceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
            Self::Expert => "expert",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "beginner" => Some(Self::Beginner),
            "intermediate" => Some(Self::Intermediate),
            "advanced" => Some(Self::Advanced),
            "expert" => Some(Self::Expert),
            _ => None,
        }
    }
}

/// Billing address, 1:1 with a booking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingDetails {
    pub booking_id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

/// Record of a receipt document, written exactly once per Paid transition
/// (regeneration is an idempotent overwrite).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingReceipt {
    pub booking_id: Uuid,
    pub document_ref: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            BookingStatus::Draft,
            BookingStatus::PendingPayment,
            BookingStatus::Paid,
            BookingStatus::Cancelled,
            BookingStatus::Failed,
        ] {
            assert_eq!(BookingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BookingStatus::parse("refunded"), None);
    }

    #[test]
    fn settled_states_reject_cancellation() {
        assert!(BookingStatus::Draft.can_cancel());
        assert!(BookingStatus::PendingPayment.can_cancel());
        assert!(!BookingStatus::Paid.can_cancel());
        assert!(!BookingStatus::Cancelled.can_cancel());
        assert!(!BookingStatus::Failed.can_cancel());
    }
}
