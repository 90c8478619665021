use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::booking::{BillingDetails, Booking, BookingStatus, FormDetails};
use crate::error::EngineError;
use crate::intent::{BookingIntent, IntentStatus};
use crate::payment::{BookingPayment, GatewayStatus};

/// Durable booking storage. Single-statement operations; the serialized
/// read-then-write path lives behind [`ReconciliationStore`].
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn reference_exists(&self, reference: &str) -> Result<bool, EngineError>;

    async fn insert_booking(
        &self,
        booking: &Booking,
        details: &FormDetails,
    ) -> Result<(), EngineError>;

    async fn get_by_reference(&self, reference: &str) -> Result<Option<Booking>, EngineError>;

    /// Persists the booking only while its stored status still equals
    /// `expected`; a mismatch means another writer (typically the
    /// reconciler) got there first and the caller's snapshot is stale.
    async fn update_booking(
        &self,
        booking: &Booking,
        expected: BookingStatus,
    ) -> Result<(), EngineError>;

    /// Most recently created payment for the booking, if any.
    async fn latest_payment(&self, booking_id: Uuid)
        -> Result<Option<BookingPayment>, EngineError>;

    async fn has_succeeded_payment(&self, booking_id: Uuid) -> Result<bool, EngineError>;

    async fn insert_payment(&self, payment: &BookingPayment) -> Result<(), EngineError>;

    async fn update_payment(&self, payment: &BookingPayment) -> Result<(), EngineError>;

    async fn upsert_billing_details(&self, details: &BillingDetails) -> Result<(), EngineError>;
}

/// Soft-hold storage for booking intents. Expiry is enforced lazily by the
/// callers via `BookingIntent::effective_status`.
#[async_trait]
pub trait IntentStore: Send + Sync {
    async fn put(&self, intent: &BookingIntent) -> Result<(), EngineError>;

    async fn get(&self, id: Uuid) -> Result<Option<BookingIntent>, EngineError>;

    /// Atomically marks the intent as consumed by a booking. At most one
    /// caller ever succeeds per intent; the rest get a conflict.
    async fn claim(&self, id: Uuid) -> Result<(), EngineError>;

    async fn set_status(&self, id: Uuid, status: IntentStatus) -> Result<(), EngineError>;
}

/// Seed for a payment row created lazily from webhook metadata, when an
/// event arrives before the local row exists.
#[derive(Debug, Clone)]
pub struct PaymentSeed {
    pub provider_intent_id: String,
    pub client_secret: Option<String>,
}

/// Opens the serialized reconciliation scope: a transaction holding a
/// row-level lock on exactly one booking and its payment for the given
/// provider intent. Gateway I/O must happen before `open`, never inside.
#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    /// Locks the booking owning `provider_intent_id`. When no local payment
    /// row exists yet, `booking_ref` (from event metadata) locates the
    /// booking instead and the payment can be seeded via
    /// [`ReconciliationTxn::ensure_payment`].
    async fn open(
        &self,
        provider_intent_id: &str,
        booking_ref: Option<&str>,
    ) -> Result<Box<dyn ReconciliationTxn>, EngineError>;
}

#[async_trait]
pub trait ReconciliationTxn: Send {
    fn booking(&self) -> &Booking;

    fn payment(&self) -> Option<&BookingPayment>;

    async fn ensure_payment(&mut self, seed: PaymentSeed) -> Result<(), EngineError>;

    /// Audit write: always persists `raw`, and the new status when changed.
    async fn record_event(
        &mut self,
        status: GatewayStatus,
        raw: &Value,
    ) -> Result<(), EngineError>;

    async fn set_booking_status(&mut self, status: BookingStatus) -> Result<(), EngineError>;

    async fn commit(self: Box<Self>) -> Result<(), EngineError>;
}
