use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info};

use trek_core::booking::BookingStatus;
use trek_core::intent::IntentStatus;
use trek_core::notify::{NotificationKind, Notifier, ReceiptService};
use trek_core::payment::GatewayStatus;
use trek_core::repository::{IntentStore, PaymentSeed, ReconciliationStore};
use trek_core::EngineError;

/// What a reconciliation pass did. `side_effect_errors` is non-empty when
/// the transition committed but a post-commit effect (receipt, notification,
/// intent update) failed; the transition itself is never rolled back.
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// The payment already carried this gateway status. Audit row written,
    /// nothing else touched.
    DuplicateEvent,
    /// The event changed the payment status but the booking stays where it
    /// is (still pending, or already settled).
    NoTransition,
    Transitioned {
        from: BookingStatus,
        to: BookingStatus,
        side_effect_errors: Vec<EngineError>,
    },
}

/// Decision computed from the locked state before any write. Pure so the
/// transition rules can be tested without storage.
#[derive(Debug, PartialEq, Eq)]
struct Plan {
    duplicate: bool,
    transition: Option<BookingStatus>,
    paid_edge: bool,
    failed_edge: bool,
}

fn plan(
    booking_status: BookingStatus,
    payment_status: Option<GatewayStatus>,
    event_status: GatewayStatus,
) -> Plan {
    if payment_status == Some(event_status) {
        return Plan {
            duplicate: true,
            transition: None,
            paid_edge: false,
            failed_edge: false,
        };
    }
    // Settled bookings never move again, and in particular never away
    // from Paid.
    if booking_status.is_settled() {
        return Plan {
            duplicate: false,
            transition: None,
            paid_edge: false,
            failed_edge: false,
        };
    }
    let target = event_status.target_booking_status();
    if target == booking_status {
        return Plan {
            duplicate: false,
            transition: None,
            paid_edge: false,
            failed_edge: false,
        };
    }
    Plan {
        duplicate: false,
        transition: Some(target),
        paid_edge: target == BookingStatus::Paid,
        failed_edge: target == BookingStatus::Failed,
    }
}

/// Applies gateway facts to bookings. Every caller that learns a payment
/// outcome — webhook or synchronous confirm — funnels through [`apply`], so
/// the ordering and idempotency rules live in one place.
pub struct PaymentReconciler {
    store: Arc<dyn ReconciliationStore>,
    intents: Arc<dyn IntentStore>,
    receipts: Arc<dyn ReceiptService>,
    notifier: Arc<dyn Notifier>,
}

impl PaymentReconciler {
    pub fn new(
        store: Arc<dyn ReconciliationStore>,
        intents: Arc<dyn IntentStore>,
        receipts: Arc<dyn ReceiptService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            intents,
            receipts,
            notifier,
        }
    }

    /// Reconciles one gateway observation against the local booking. The
    /// audit row is written before any state decision; the booking
    /// transition commits before side effects run.
    pub async fn apply(
        &self,
        provider_intent_id: &str,
        booking_ref: Option<&str>,
        status: GatewayStatus,
        raw: &Value,
    ) -> Result<ReconcileOutcome, EngineError> {
        let mut txn = self.store.open(provider_intent_id, booking_ref).await?;

        let prior_status = txn.payment().map(|p| p.status);
        if prior_status.is_none() {
            // Event raced ahead of the local row (or the row was created
            // out-of-band). Seed it from the event itself.
            txn.ensure_payment(PaymentSeed {
                provider_intent_id: provider_intent_id.to_string(),
                client_secret: raw
                    .get("client_secret")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
            .await?;
        }

        let decision = plan(txn.booking().status, prior_status, status);

        // Audit-first: the event lands in storage whatever we decide.
        txn.record_event(status, raw).await?;

        if decision.duplicate {
            txn.commit().await?;
            return Ok(ReconcileOutcome::DuplicateEvent);
        }
        let Some(target) = decision.transition else {
            txn.commit().await?;
            return Ok(ReconcileOutcome::NoTransition);
        };

        let from = txn.booking().status;
        txn.set_booking_status(target).await?;
        let booking = txn.booking().clone();
        txn.commit().await?;
        info!(
            reference = %booking.reference,
            from = from.as_str(),
            to = target.as_str(),
            "booking reconciled"
        );

        let mut side_effect_errors = Vec::new();
        if decision.paid_edge {
            self.run_paid_effects(&booking, &mut side_effect_errors).await;
        } else if decision.failed_edge {
            self.release_intent(&booking, &mut side_effect_errors).await;
            if let Err(err) = self
                .notifier
                .notify(NotificationKind::PaymentFailed, &booking, None)
                .await
            {
                error!(reference = %booking.reference, error = %err, "failure notification failed");
                side_effect_errors.push(err);
            }
        }

        Ok(ReconcileOutcome::Transitioned {
            from,
            to: target,
            side_effect_errors,
        })
    }

    /// Paid-edge effects, in order: confirm the hold, write the receipt,
    /// send the confirmation. Each failure is recorded and the rest still
    /// run; the Paid status already committed and stands.
    async fn run_paid_effects(
        &self,
        booking: &trek_core::booking::Booking,
        errors: &mut Vec<EngineError>,
    ) {
        if let Some(intent_id) = booking.intent_id {
            if let Err(err) = self
                .intents
                .set_status(intent_id, IntentStatus::Confirmed)
                .await
            {
                error!(reference = %booking.reference, error = %err, "intent confirmation failed");
                errors.push(err);
            }
        }

        let attachment = match self.receipts.generate(booking).await {
            Ok(path) => Some(path),
            Err(err) => {
                error!(reference = %booking.reference, error = %err, "receipt generation failed");
                errors.push(err);
                None
            }
        };

        if let Err(err) = self
            .notifier
            .notify(
                NotificationKind::BookingConfirmed,
                booking,
                attachment.as_deref(),
            )
            .await
        {
            error!(reference = %booking.reference, error = %err, "confirmation notification failed");
            errors.push(err);
        }
    }

    async fn release_intent(
        &self,
        booking: &trek_core::booking::Booking,
        errors: &mut Vec<EngineError>,
    ) {
        let Some(intent_id) = booking.intent_id else {
            return;
        };
        match self.intents.get(intent_id).await {
            Ok(Some(intent)) if intent.status != IntentStatus::Confirmed => {
                if let Err(err) = self.intents.set_status(intent_id, IntentStatus::Expired).await {
                    error!(%intent_id, error = %err, "intent release failed");
                    errors.push(err);
                }
            }
            Ok(_) => {}
            Err(err) => {
                error!(%intent_id, error = %err, "intent lookup failed during release");
                errors.push(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_status_is_a_duplicate() {
        let p = plan(
            BookingStatus::Paid,
            Some(GatewayStatus::Succeeded),
            GatewayStatus::Succeeded,
        );
        assert!(p.duplicate);
        assert_eq!(p.transition, None);
    }

    #[test]
    fn succeeded_moves_pending_to_paid() {
        let p = plan(
            BookingStatus::PendingPayment,
            Some(GatewayStatus::Processing),
            GatewayStatus::Succeeded,
        );
        assert_eq!(p.transition, Some(BookingStatus::Paid));
        assert!(p.paid_edge);
        assert!(!p.failed_edge);
    }

    #[test]
    fn paid_booking_never_moves_on_failure() {
        let p = plan(
            BookingStatus::Paid,
            Some(GatewayStatus::Succeeded),
            GatewayStatus::Failed,
        );
        assert!(!p.duplicate);
        assert_eq!(p.transition, None);
    }

    #[test]
    fn cancelled_booking_ignores_late_success() {
        let p = plan(
            BookingStatus::Cancelled,
            Some(GatewayStatus::Processing),
            GatewayStatus::Succeeded,
        );
        assert_eq!(p.transition, None);
        assert!(!p.paid_edge);
    }

    #[test]
    fn pending_statuses_do_not_transition() {
        let p = plan(
            BookingStatus::PendingPayment,
            Some(GatewayStatus::RequiresPaymentMethod),
            GatewayStatus::RequiresAction,
        );
        assert!(!p.duplicate);
        assert_eq!(p.transition, None);
    }

    #[test]
    fn failure_moves_pending_to_failed() {
        let p = plan(
            BookingStatus::PendingPayment,
            Some(GatewayStatus::RequiresPaymentMethod),
            GatewayStatus::Canceled,
        );
        assert_eq!(p.transition, Some(BookingStatus::Failed));
        assert!(p.failed_edge);
    }

    #[test]
    fn unknown_status_keeps_booking_pending() {
        let p = plan(
            BookingStatus::PendingPayment,
            Some(GatewayStatus::Processing),
            GatewayStatus::Unknown,
        );
        assert_eq!(p.transition, None);
    }

    #[test]
    fn event_without_local_payment_still_transitions() {
        let p = plan(BookingStatus::PendingPayment, None, GatewayStatus::Succeeded);
        assert!(!p.duplicate);
        assert_eq!(p.transition, Some(BookingStatus::Paid));
    }
}
