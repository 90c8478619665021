//! End-to-end reconciliation behaviour against in-memory collaborators:
//! duplicate delivery, late contradictory events, and paid-edge effects.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use trek_booking::{PaymentReconciler, ReconcileOutcome};
use trek_core::booking::{Booking, BookingStatus};
use trek_core::intent::{BookingIntent, IntentStatus, PriceSnapshot, DEFAULT_INTENT_TTL_SECS};
use trek_core::notify::{NotificationKind, Notifier, ReceiptService};
use trek_core::payment::{BookingPayment, GatewayStatus};
use trek_core::repository::{
    IntentStore, PaymentSeed, ReconciliationStore, ReconciliationTxn,
};
use trek_core::EngineError;

struct MemState {
    booking: Booking,
    payment: Option<BookingPayment>,
    events: Vec<(GatewayStatus, Value)>,
}

struct MemRecon {
    state: Arc<Mutex<MemState>>,
}

#[async_trait]
impl ReconciliationStore for MemRecon {
    async fn open(
        &self,
        _provider_intent_id: &str,
        _booking_ref: Option<&str>,
    ) -> Result<Box<dyn ReconciliationTxn>, EngineError> {
        Ok(Box::new(MemTxn {
            guard: self.state.clone().lock_owned().await,
        }))
    }
}

struct MemTxn {
    guard: OwnedMutexGuard<MemState>,
}

#[async_trait]
impl ReconciliationTxn for MemTxn {
    fn booking(&self) -> &Booking {
        &self.guard.booking
    }

    fn payment(&self) -> Option<&BookingPayment> {
        self.guard.payment.as_ref()
    }

    async fn ensure_payment(&mut self, seed: PaymentSeed) -> Result<(), EngineError> {
        let now = Utc::now();
        let booking = &self.guard.booking;
        self.guard.payment = Some(BookingPayment {
            id: Uuid::new_v4(),
            booking_id: booking.id,
            provider_intent_id: seed.provider_intent_id,
            amount_minor: booking.total_minor,
            currency: booking.currency.clone(),
            status: GatewayStatus::Processing,
            client_secret: seed.client_secret,
            raw_event: Value::Null,
            created_at: now,
            updated_at: now,
        });
        Ok(())
    }

    async fn record_event(
        &mut self,
        status: GatewayStatus,
        raw: &Value,
    ) -> Result<(), EngineError> {
        self.guard.events.push((status, raw.clone()));
        if let Some(payment) = &mut self.guard.payment {
            payment.status = status;
            payment.raw_event = raw.clone();
            payment.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_booking_status(&mut self, status: BookingStatus) -> Result<(), EngineError> {
        self.guard.booking.update_status(status);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), EngineError> {
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

#[derive(Default)]
struct CountingReceipts {
    generated: AtomicUsize,
}

#[async_trait]
impl ReceiptService for CountingReceipts {
    async fn generate(&self, booking: &Booking) -> Result<String, EngineError> {
        self.generated.fetch_add(1, Ordering::SeqCst);
        Ok(format!("receipts/{}.txt", booking.reference))
    }
}

#[derive(Default)]
struct CountingNotifier {
    confirmed: AtomicUsize,
    failed: AtomicUsize,
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn notify(
        &self,
        kind: NotificationKind,
        _booking: &Booking,
        attachment: Option<&str>,
    ) -> Result<(), EngineError> {
        match kind {
            NotificationKind::BookingConfirmed => {
                assert!(attachment.is_some(), "confirmation should carry the receipt");
                self.confirmed.fetch_add(1, Ordering::SeqCst);
            }
            NotificationKind::PaymentFailed => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

struct Harness {
    state: Arc<Mutex<MemState>>,
    intents: Arc<MemIntents>,
    receipts: Arc<CountingReceipts>,
    notifier: Arc<CountingNotifier>,
    reconciler: PaymentReconciler,
    intent_id: Uuid,
}

async fn harness(with_payment: bool) -> Harness {
    let intent = BookingIntent::new(
        Uuid::new_v4(),
        None,
        2,
        PriceSnapshot {
            unit_minor: 12_000,
            currency: "USD".into(),
        },
        DEFAULT_INTENT_TTL_SECS,
    );
    let intent_id = intent.id;

    let now = Utc::now();
    let booking_id = Uuid::new_v4();
    let booking = Booking {
        id: booking_id,
        reference: "TRK2608-0A1B2C".into(),
        product_id: intent.product_id,
        intent_id: Some(intent_id),
        user_id: None,
        party_size: 2,
        start_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2026, 10, 12).unwrap(),
        lead_name: "Asha Rai".into(),
        lead_email: "asha@example.com".into(),
        lead_phone: None,
        total_minor: 24_000,
        currency: "USD".into(),
        status: BookingStatus::PendingPayment,
        notes: None,
        metadata: json!({}),
        created_at: now,
        updated_at: now,
    };
    let payment = with_payment.then(|| BookingPayment {
        id: Uuid::new_v4(),
        booking_id,
        provider_intent_id: "pi_test_1".into(),
        amount_minor: 24_000,
        currency: "USD".into(),
        status: GatewayStatus::RequiresPaymentMethod,
        client_secret: Some("pi_test_1_secret".into()),
        raw_event: Value::Null,
        created_at: now,
        updated_at: now,
    });

    let state = Arc::new(Mutex::new(MemState {
        booking,
        payment,
        events: Vec::new(),
    }));
    let intents = Arc::new(MemIntents::default());
    let mut held = intent;
    held.status = IntentStatus::Held;
    intents.put(&held).await.unwrap();

    let receipts = Arc::new(CountingReceipts::default());
    let notifier = Arc::new(CountingNotifier::default());
    let reconciler = PaymentReconciler::new(
        Arc::new(MemRecon {
            state: state.clone(),
        }),
        intents.clone(),
        receipts.clone(),
        notifier.clone(),
    );
    Harness {
        state,
        intents,
        receipts,
        notifier,
        reconciler,
        intent_id,
    }
}

fn succeeded_event() -> Value {
    json!({"id": "pi_test_1", "status": "succeeded"})
}

#[tokio::test]
async fn duplicate_success_event_settles_exactly_once() {
    let h = harness(true).await;

    let first = h
        .reconciler
        .apply("pi_test_1", None, GatewayStatus::Succeeded, &succeeded_event())
        .await
        .unwrap();
    match first {
        ReconcileOutcome::Transitioned {
            from,
            to,
            side_effect_errors,
        } => {
            assert_eq!(from, BookingStatus::PendingPayment);
            assert_eq!(to, BookingStatus::Paid);
            assert!(side_effect_errors.is_empty());
        }
        other => panic!("expected transition, got {:?}", other),
    }

    let second = h
        .reconciler
        .apply("pi_test_1", None, GatewayStatus::Succeeded, &succeeded_event())
        .await
        .unwrap();
    assert!(matches!(second, ReconcileOutcome::DuplicateEvent));

    let state = h.state.lock().await;
    assert_eq!(state.booking.status, BookingStatus::Paid);
    assert_eq!(state.events.len(), 2, "both deliveries are audited");
    assert_eq!(h.receipts.generated.load(Ordering::SeqCst), 1);
    assert_eq!(h.notifier.confirmed.load(Ordering::SeqCst), 1);

    let intent = h.intents.get(h.intent_id).await.unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Confirmed);
}

#[tokio::test]
async fn late_failure_never_moves_a_paid_booking() {
    let h = harness(true).await;
    h.reconciler
        .apply("pi_test_1", None, GatewayStatus::Succeeded, &succeeded_event())
        .await
        .unwrap();

    let raw = json!({"id": "pi_test_1", "status": "failed"});
    let outcome = h
        .reconciler
        .apply("pi_test_1", None, GatewayStatus::Failed, &raw)
        .await
        .unwrap();
    assert!(matches!(outcome, ReconcileOutcome::NoTransition));

    let state = h.state.lock().await;
    assert_eq!(state.booking.status, BookingStatus::Paid);
    assert_eq!(h.notifier.failed.load(Ordering::SeqCst), 0);
    let intent = h.intents.get(h.intent_id).await.unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Confirmed);
}

#[tokio::test]
async fn failure_releases_the_hold_and_notifies() {
    let h = harness(true).await;
    let raw = json!({"id": "pi_test_1", "status": "canceled"});
    let outcome = h
        .reconciler
        .apply("pi_test_1", None, GatewayStatus::Canceled, &raw)
        .await
        .unwrap();
    match outcome {
        ReconcileOutcome::Transitioned { to, .. } => assert_eq!(to, BookingStatus::Failed),
        other => panic!("expected transition, got {:?}", other),
    }

    let state = h.state.lock().await;
    assert_eq!(state.booking.status, BookingStatus::Failed);
    assert_eq!(h.notifier.failed.load(Ordering::SeqCst), 1);
    assert_eq!(h.receipts.generated.load(Ordering::SeqCst), 0);
    let intent = h.intents.get(h.intent_id).await.unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Expired);
}

#[tokio::test]
async fn event_before_local_payment_row_seeds_it() {
    let h = harness(false).await;
    let raw = json!({
        "id": "pi_test_1",
        "status": "succeeded",
        "client_secret": "pi_test_1_secret",
        "metadata": {"booking_ref": "TRK2608-0A1B2C"},
    });
    let outcome = h
        .reconciler
        .apply("pi_test_1", Some("TRK2608-0A1B2C"), GatewayStatus::Succeeded, &raw)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ReconcileOutcome::Transitioned {
            to: BookingStatus::Paid,
            ..
        }
    ));

    let state = h.state.lock().await;
    let payment = state.payment.as_ref().expect("payment row seeded");
    assert_eq!(payment.provider_intent_id, "pi_test_1");
    assert_eq!(payment.status, GatewayStatus::Succeeded);
    assert_eq!(state.booking.status, BookingStatus::Paid);
}

#[tokio::test]
async fn intermediate_status_keeps_booking_pending() {
    let h = harness(true).await;
    let raw = json!({"id": "pi_test_1", "status": "requires_action"});
    let outcome = h
        .reconciler
        .apply("pi_test_1", None, GatewayStatus::RequiresAction, &raw)
        .await
        .unwrap();
    assert!(matches!(outcome, ReconcileOutcome::NoTransition));

    let state = h.state.lock().await;
    assert_eq!(state.booking.status, BookingStatus::PendingPayment);
    assert_eq!(state.payment.as_ref().unwrap().status, GatewayStatus::RequiresAction);
    assert_eq!(state.events.len(), 1);
}
