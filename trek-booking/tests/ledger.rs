//! Booking lifecycle behaviour against in-memory collaborators: intent
//! consumption, declared-total checks, and writes racing the reconciler.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use trek_booking::{
    BookingLedger, CreateBookingRequest, Identity, MockGateway, PaymentFlow, TravelerDetails,
};
use trek_catalog::{CatalogStore, GroupPriceTier, Product};
use trek_core::booking::{BillingDetails, Booking, BookingStatus, FormDetails};
use trek_core::intent::{BookingIntent, IntentStatus, PriceSnapshot, DEFAULT_INTENT_TTL_SECS};
use trek_core::payment::BookingPayment;
use trek_core::repository::{BookingStore, IntentStore};
use trek_core::EngineError;
use tokio::sync::Mutex;

#[derive(Default)]
struct MemBookings {
    bookings: Mutex<HashMap<Uuid, Booking>>,
    payments: Mutex<Vec<BookingPayment>>,
    /// When set, served by `get_by_reference` instead of the committed row,
    /// standing in for a read that happened before another writer committed.
    stale: Mutex<Option<Booking>>,
}

impl MemBookings {
    async fn committed(&self, reference: &str) -> Option<Booking> {
        self.bookings
            .lock()
            .await
            .values()
            .find(|b| b.reference == reference)
            .cloned()
    }

    async fn force_status(&self, reference: &str, status: BookingStatus) {
        let mut bookings = self.bookings.lock().await;
        let booking = bookings
            .values_mut()
            .find(|b| b.reference == reference)
            .expect("booking exists");
        booking.update_status(status);
    }
}

#[async_trait]
impl BookingStore for MemBookings {
    async fn reference_exists(&self, reference: &str) -> Result<bool, EngineError> {
        Ok(self
            .bookings
            .lock()
            .await
            .values()
            .any(|b| b.reference == reference))
    }

    async fn insert_booking(
        &self,
        booking: &Booking,
        _details: &FormDetails,
    ) -> Result<(), EngineError> {
        self.bookings.lock().await.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get_by_reference(&self, reference: &str) -> Result<Option<Booking>, EngineError> {
        if let Some(stale) = self.stale.lock().await.clone() {
            if stale.reference == reference {
                return Ok(Some(stale));
            }
        }
        Ok(self.committed(reference).await)
    }

    async fn update_booking(
        &self,
        booking: &Booking,
        expected: BookingStatus,
    ) -> Result<(), EngineError> {
        let mut bookings = self.bookings.lock().await;
        let current = bookings
            .get_mut(&booking.id)
            .ok_or_else(|| EngineError::NotFound(format!("booking {}", booking.reference)))?;
        if current.status != expected {
            return Err(EngineError::conflict(format!(
                "booking {} changed concurrently; re-read and retry",
                booking.reference
            )));
        }
        *current = booking.clone();
        Ok(())
    }

    async fn latest_payment(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<BookingPayment>, EngineError> {
        Ok(self
            .payments
            .lock()
            .await
            .iter()
            .filter(|p| p.booking_id == booking_id)
            .last()
            .cloned())
    }

    async fn has_succeeded_payment(&self, booking_id: Uuid) -> Result<bool, EngineError> {
        Ok(self.payments.lock().await.iter().any(|p| {
            p.booking_id == booking_id
                && p.status == trek_core::payment::GatewayStatus::Succeeded
        }))
    }

    async fn insert_payment(&self, payment: &BookingPayment) -> Result<(), EngineError> {
        self.payments.lock().await.push(payment.clone());
        Ok(())
    }

    async fn update_payment(&self, payment: &BookingPayment) -> Result<(), EngineError> {
        let mut payments = self.payments.lock().await;
        if let Some(stored) = payments.iter_mut().find(|p| p.id == payment.id) {
            *stored = payment.clone();
        }
        Ok(())
    }

    async fn upsert_billing_details(&self, _details: &BillingDetails) -> Result<(), EngineError> {
        Ok(())
    }
}

#[derive(Default)]
struct MemIntents {
    intents: Mutex<HashMap<Uuid, BookingIntent>>,
    claimed: Mutex<HashSet<Uuid>>,
}

#[async_trait]
impl IntentStore for MemIntents {
    async fn put(&self, intent: &BookingIntent) -> Result<(), EngineError> {
        self.intents.lock().await.insert(intent.id, intent.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<BookingIntent>, EngineError> {
        Ok(self.intents.lock().await.get(&id).cloned())
    }

    async fn claim(&self, id: Uuid) -> Result<(), EngineError> {
        if !self.intents.lock().await.contains_key(&id) {
            return Err(EngineError::NotFound(format!("intent {}", id)));
        }
        if !self.claimed.lock().await.insert(id) {
            return Err(EngineError::conflict(format!(
                "intent {} is already attached to a booking",
                id
            )));
        }
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: IntentStatus) -> Result<(), EngineError> {
        let mut intents = self.intents.lock().await;
        let intent = intents
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("intent {}", id)))?;
        intent.status = status;
        Ok(())
    }
}

struct MemCatalog {
    product: Product,
}

#[async_trait]
impl CatalogStore for MemCatalog {
    async fn product_by_slug(&self, slug: &str) -> Result<Option<Product>, EngineError> {
        Ok((self.product.slug == slug).then(|| self.product.clone()))
    }

    async fn product_by_id(&self, id: Uuid) -> Result<Option<Product>, EngineError> {
        Ok((self.product.id == id).then(|| self.product.clone()))
    }
}

struct Harness {
    store: Arc<MemBookings>,
    intents: Arc<MemIntents>,
    ledger: BookingLedger,
    product: Product,
}

fn annapurna() -> Product {
    Product {
        id: Uuid::new_v4(),
        slug: "annapurna-circuit".into(),
        title: "Annapurna Circuit".into(),
        currency: "USD".into(),
        base_price_minor: Some(15_000),
        tiers: vec![
            GroupPriceTier {
                min_size: None,
                max_size: Some(4),
                unit_minor: 12_000,
            },
            GroupPriceTier {
                min_size: Some(5),
                max_size: None,
                unit_minor: 10_000,
            },
        ],
    }
}

fn harness() -> Harness {
    let store = Arc::new(MemBookings::default());
    let intents = Arc::new(MemIntents::default());
    let product = annapurna();
    let catalog = Arc::new(MemCatalog {
        product: product.clone(),
    });
    let ledger = BookingLedger::new(store.clone(), intents.clone(), catalog);
    Harness {
        store,
        intents,
        ledger,
        product,
    }
}

fn guest() -> Identity {
    Identity {
        subject: None,
        staff: false,
    }
}

fn request(intent_id: Option<Uuid>, party_size: i32, total_minor: Option<i64>) -> CreateBookingRequest {
    CreateBookingRequest {
        product_slug: "annapurna-circuit".into(),
        intent_id,
        party_size: Some(party_size),
        start_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2026, 10, 12).unwrap(),
        lead_name: Some("Asha Rai".into()),
        lead_email: Some("asha@example.com".into()),
        lead_phone: None,
        total_minor,
        notes: None,
        metadata: None,
        details: TravelerDetails::default(),
    }
}

async fn draft_intent(h: &Harness, party_size: i32) -> BookingIntent {
    let intent = BookingIntent::new(
        h.product.id,
        None,
        party_size,
        PriceSnapshot {
            unit_minor: 12_000,
            currency: "USD".into(),
        },
        DEFAULT_INTENT_TTL_SECS,
    );
    h.intents.put(&intent).await.unwrap();
    intent
}

#[tokio::test]
async fn create_consumes_the_intent_and_prices_from_tiers() {
    let h = harness();
    let intent = draft_intent(&h, 2).await;

    let booking = h
        .ledger
        .create(request(Some(intent.id), 2, None), &guest())
        .await
        .unwrap();
    assert_eq!(booking.status, BookingStatus::PendingPayment);
    assert_eq!(booking.total_minor, 24_000);
    assert_eq!(booking.intent_id, Some(intent.id));

    let stored = h.intents.get(intent.id).await.unwrap().unwrap();
    assert_eq!(stored.status, IntentStatus::Held);
}

#[tokio::test]
async fn expired_intent_cannot_create_a_booking() {
    let h = harness();
    let mut intent = draft_intent(&h, 2).await;
    intent.expires_at = intent.created_at - chrono::Duration::hours(1);
    h.intents.put(&intent).await.unwrap();

    let err = h
        .ledger
        .create(request(Some(intent.id), 2, None), &guest())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    // The lazy expiry is written back so later reads agree.
    let stored = h.intents.get(intent.id).await.unwrap().unwrap();
    assert_eq!(stored.status, IntentStatus::Expired);
}

#[tokio::test]
async fn held_intent_cannot_be_consumed_twice() {
    let h = harness();
    let intent = draft_intent(&h, 2).await;

    h.ledger
        .create(request(Some(intent.id), 2, None), &guest())
        .await
        .unwrap();
    let err = h
        .ledger
        .create(request(Some(intent.id), 2, None), &guest())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[tokio::test]
async fn intent_claim_has_a_single_winner() {
    let h = harness();
    let intent = draft_intent(&h, 2).await;

    // Another create claimed the intent but has not written `Held` yet, so
    // the status read still says `Draft`.
    h.intents.claim(intent.id).await.unwrap();

    let err = h
        .ledger
        .create(request(Some(intent.id), 2, None), &guest())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
    assert!(h.store.bookings.lock().await.is_empty());
}

#[tokio::test]
async fn declared_total_outside_tolerance_is_rejected() {
    let h = harness();
    let err = h
        .ledger
        .create(request(None, 2, Some(24_002)), &guest())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    // One minor unit of rounding drift is accepted.
    let booking = h
        .ledger
        .create(request(None, 2, Some(24_001)), &guest())
        .await
        .unwrap();
    assert_eq!(booking.total_minor, 24_000);
}

#[tokio::test]
async fn cancel_releases_the_hold() {
    let h = harness();
    let intent = draft_intent(&h, 2).await;
    let booking = h
        .ledger
        .create(request(Some(intent.id), 2, None), &guest())
        .await
        .unwrap();

    let cancelled = h.ledger.cancel(&booking.reference, &guest()).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);

    let stored = h.intents.get(intent.id).await.unwrap().unwrap();
    assert_eq!(stored.status, IntentStatus::Expired);
}

#[tokio::test]
async fn cancel_over_a_stale_read_loses_to_a_settled_payment() {
    let h = harness();
    let booking = h
        .ledger
        .create(request(None, 2, None), &guest())
        .await
        .unwrap();

    // A webhook settles the booking after the cancel handler has already
    // read it as pending.
    *h.store.stale.lock().await = Some(booking.clone());
    h.store
        .force_status(&booking.reference, BookingStatus::Paid)
        .await;

    let err = h
        .ledger
        .cancel(&booking.reference, &guest())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let committed = h.store.committed(&booking.reference).await.unwrap();
    assert_eq!(committed.status, BookingStatus::Paid);
}

#[tokio::test]
async fn amend_over_a_stale_read_loses_to_a_settled_payment() {
    let h = harness();
    let booking = h
        .ledger
        .create(request(None, 2, None), &guest())
        .await
        .unwrap();

    *h.store.stale.lock().await = Some(booking.clone());
    h.store
        .force_status(&booking.reference, BookingStatus::Paid)
        .await;

    let amend = trek_booking::AmendBookingRequest {
        notes: Some("late request".into()),
        ..Default::default()
    };
    let err = h
        .ledger
        .amend(&booking.reference, amend, &guest())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let committed = h.store.committed(&booking.reference).await.unwrap();
    assert_eq!(committed.status, BookingStatus::Paid);
    assert_eq!(committed.notes, None);
}

#[tokio::test]
async fn retry_after_failure_returns_the_booking_to_pending() {
    let h = harness();
    let booking = h
        .ledger
        .create(request(None, 2, None), &guest())
        .await
        .unwrap();
    h.store
        .force_status(&booking.reference, BookingStatus::Failed)
        .await;
    let failed = h.store.committed(&booking.reference).await.unwrap();

    let flow = PaymentFlow::new(h.store.clone(), Arc::new(MockGateway::new()));
    let response = flow.create_handle(&failed).await.unwrap();
    assert!(response.created);

    let committed = h.store.committed(&booking.reference).await.unwrap();
    assert_eq!(committed.status, BookingStatus::PendingPayment);
}
