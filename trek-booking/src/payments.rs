use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use trek_core::booking::{Booking, BookingStatus};
use trek_core::payment::{
    BookingPayment, CreateIntentRequest, GatewayIntent, PaymentGateway, PaymentHandle,
};
use trek_core::repository::BookingStore;
use trek_core::EngineError;

/// Outcome of a handle request, so the HTTP layer can distinguish
/// a freshly created intent (201) from a reused one (200).
#[derive(Debug)]
pub struct HandleResponse {
    pub handle: PaymentHandle,
    pub created: bool,
}

/// Creates and reuses gateway payment intents for bookings. One actionable
/// intent per booking at a time; creation is idempotent on the booking
/// reference.
pub struct PaymentFlow {
    store: Arc<dyn BookingStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentFlow {
    pub fn new(store: Arc<dyn BookingStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    pub async fn create_handle(&self, booking: &Booking) -> Result<HandleResponse, EngineError> {
        match booking.status {
            BookingStatus::PendingPayment | BookingStatus::Failed => {}
            status => {
                return Err(EngineError::conflict(format!(
                    "booking {} is `{}`; no payment can be started",
                    booking.reference,
                    status.as_str()
                )))
            }
        }
        if booking.total_minor <= 0 {
            return Err(EngineError::validation(
                "total_minor",
                "booking total must be positive",
            ));
        }

        if let Some(existing) = self.reusable_handle(booking).await? {
            return Ok(HandleResponse {
                handle: existing,
                created: false,
            });
        }

        let req = CreateIntentRequest {
            amount_minor: booking.total_minor,
            currency: booking.currency.clone(),
            description: format!("Trek booking {}", booking.reference),
            receipt_email: Some(booking.lead_email.clone()),
            // Deterministic per booking so gateway-side retries collapse.
            idempotency_key: format!("{}-intent", booking.reference),
            metadata: json!({
                "booking_id": booking.id,
                "booking_ref": booking.reference,
                "email": booking.lead_email,
            }),
        };
        let intent = self.gateway.create_intent(&req).await?;
        let now = Utc::now();
        let payment = BookingPayment {
            id: Uuid::new_v4(),
            booking_id: booking.id,
            provider_intent_id: intent.provider_intent_id.clone(),
            amount_minor: booking.total_minor,
            currency: booking.currency.clone(),
            status: intent.status,
            client_secret: intent.client_secret.clone(),
            raw_event: intent.raw,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_payment(&payment).await?;

        // A retry after failure starts a fresh attempt; the booking goes
        // back to awaiting this new intent's outcome.
        if booking.status == BookingStatus::Failed {
            let mut booking = booking.clone();
            booking.update_status(BookingStatus::PendingPayment);
            self.store
                .update_booking(&booking, BookingStatus::Failed)
                .await?;
        }

        info!(
            reference = %booking.reference,
            provider_intent_id = %intent.provider_intent_id,
            "payment intent created"
        );
        Ok(HandleResponse {
            handle: PaymentHandle {
                client_secret: intent.client_secret,
                provider_intent_id: intent.provider_intent_id,
            },
            created: true,
        })
    }

    /// Synchronous status check used by the confirm endpoint. Returns the
    /// provider-side view; the caller feeds it to the reconciler.
    pub async fn fetch_status(&self, booking: &Booking) -> Result<GatewayIntent, EngineError> {
        let payment = self
            .store
            .latest_payment(booking.id)
            .await?
            .ok_or_else(|| {
                EngineError::conflict(format!(
                    "booking {} has no payment attempt to confirm",
                    booking.reference
                ))
            })?;
        self.gateway.retrieve_intent(&payment.provider_intent_id).await
    }

    /// Refreshes the latest payment against the gateway and hands its
    /// handle back when it is still completable. Refresh failures fall
    /// through to creating a new intent.
    async fn reusable_handle(
        &self,
        booking: &Booking,
    ) -> Result<Option<PaymentHandle>, EngineError> {
        let Some(mut payment) = self.store.latest_payment(booking.id).await? else {
            return Ok(None);
        };
        if !payment.status.is_actionable() {
            return Ok(None);
        }
        match self.gateway.retrieve_intent(&payment.provider_intent_id).await {
            Ok(remote) => {
                if remote.status != payment.status {
                    payment.status = remote.status;
                    payment.raw_event = remote.raw;
                    payment.updated_at = Utc::now();
                    self.store.update_payment(&payment).await?;
                }
                if remote.status.is_actionable() {
                    Ok(Some(PaymentHandle {
                        client_secret: payment.client_secret.clone(),
                        provider_intent_id: payment.provider_intent_id.clone(),
                    }))
                } else {
                    Ok(None)
                }
            }
            Err(err) => {
                warn!(
                    provider_intent_id = %payment.provider_intent_id,
                    error = %err,
                    "could not refresh payment intent, issuing a new one"
                );
                Ok(None)
            }
        }
    }
}
