use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default soft-hold window for a freshly created intent.
pub const DEFAULT_INTENT_TTL_SECS: i64 = 2 * 60 * 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Draft,
    Held,
    Expired,
    Confirmed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Held => "held",
            Self::Expired => "expired",
            Self::Confirmed => "confirmed",
        }
    }
}

/// Unit price captured when the intent was created. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceSnapshot {
    pub unit_minor: i64,
    pub currency: String,
}

/// Short-lived, price-locked reservation placeholder. Expiry is evaluated
/// lazily on read — there is no background sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingIntent {
    pub id: Uuid,
    pub product_id: Uuid,
    pub departure_id: Option<Uuid>,
    pub party_size: i32,
    pub price_snapshot: PriceSnapshot,
    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl BookingIntent {
    pub fn new(
        product_id: Uuid,
        departure_id: Option<Uuid>,
        party_size: i32,
        price_snapshot: PriceSnapshot,
        ttl_secs: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            product_id,
            departure_id,
            party_size,
            price_snapshot,
            status: IntentStatus::Draft,
            created_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
            user_id: None,
            email: None,
            phone: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Status as observed at `now`: a Draft/Held intent past its deadline
    /// reads as Expired even before any write has recorded that fact.
    pub fn effective_status(&self, now: DateTime<Utc>) -> IntentStatus {
        match self.status {
            IntentStatus::Confirmed | IntentStatus::Expired => self.status,
            _ if self.is_expired(now) => IntentStatus::Expired,
            status => status,
        }
    }

    /// Whether a booking may still consume this intent. A `Held` intent is
    /// already attached to a booking and cannot be reused.
    pub fn is_consumable(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == IntentStatus::Draft
    }
}
