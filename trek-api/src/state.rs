use std::sync::Arc;
use std::time::Duration;

use trek_booking::{BookingLedger, PaymentFlow, PaymentReconciler};
use trek_catalog::CatalogStore;
use trek_core::repository::IntentStore;

use crate::middleware::resiliency::CircuitBreaker;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct WebhookConfig {
    pub secret: String,
    pub tolerance_seconds: i64,
}

#[derive(Clone)]
pub struct BusinessConfig {
    pub intent_ttl_seconds: u64,
    pub currency: String,
}

pub struct ResiliencyState {
    pub payment_cb: CircuitBreaker,
}

impl ResiliencyState {
    pub fn new() -> Self {
        Self {
            payment_cb: CircuitBreaker::new("payment", 5, Duration::from_secs(30)),
        }
    }
}

impl Default for ResiliencyState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<BookingLedger>,
    pub payments: Arc<PaymentFlow>,
    pub reconciler: Arc<PaymentReconciler>,
    pub intents: Arc<dyn IntentStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub auth: AuthConfig,
    pub webhook: WebhookConfig,
    pub business: BusinessConfig,
    pub resiliency: Arc<ResiliencyState>,
}
