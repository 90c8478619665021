use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use trek_core::payment::{CreateIntentRequest, GatewayIntent, GatewayStatus, PaymentGateway};
use trek_core::EngineError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for a Stripe-style card payment provider. All calls carry a
/// bounded timeout; failures surface as [`EngineError::Gateway`] and are
/// treated as transient by callers.
pub struct CardGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl CardGateway {
    pub fn new(base_url: String, secret_key: String) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EngineError::Gateway(format!("http client init failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key,
        })
    }

    fn parse_intent(body: Value) -> Result<GatewayIntent, EngineError> {
        let provider_intent_id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Gateway("intent response missing `id`".to_string()))?
            .to_string();
        let status = body
            .get("status")
            .and_then(Value::as_str)
            .map(GatewayStatus::from_provider)
            .ok_or_else(|| EngineError::Gateway("intent response missing `status`".to_string()))?;
        let client_secret = body
            .get("client_secret")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(GatewayIntent {
            provider_intent_id,
            status,
            client_secret,
            raw: body,
        })
    }

    async fn read_body(resp: reqwest::Response) -> Result<Value, EngineError> {
        let http_status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| EngineError::Gateway(format!("unreadable gateway response: {}", e)))?;
        if !http_status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("gateway request rejected");
            return Err(EngineError::Gateway(format!(
                "{} ({})",
                message, http_status
            )));
        }
        Ok(body)
    }
}

#[async_trait]
impl PaymentGateway for CardGateway {
    async fn create_intent(&self, req: &CreateIntentRequest) -> Result<GatewayIntent, EngineError> {
        let mut form: Vec<(String, String)> = vec![
            ("amount".into(), req.amount_minor.to_string()),
            ("currency".into(), req.currency.to_lowercase()),
            ("description".into(), req.description.clone()),
            ("automatic_payment_methods[enabled]".into(), "true".into()),
        ];
        if let Some(email) = &req.receipt_email {
            form.push(("receipt_email".into(), email.clone()));
        }
        if let Some(metadata) = req.metadata.as_object() {
            for (key, value) in metadata {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                form.push((format!("metadata[{}]", key), value));
            }
        }

        debug!(idempotency_key = %req.idempotency_key, "creating gateway payment intent");
        let resp = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &req.idempotency_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| EngineError::Gateway(format!("create intent failed: {}", e)))?;
        Self::parse_intent(Self::read_body(resp).await?)
    }

    async fn retrieve_intent(
        &self,
        provider_intent_id: &str,
    ) -> Result<GatewayIntent, EngineError> {
        let resp = self
            .client
            .get(format!(
                "{}/v1/payment_intents/{}",
                self.base_url, provider_intent_id
            ))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| EngineError::Gateway(format!("retrieve intent failed: {}", e)))?;
        Self::parse_intent(Self::read_body(resp).await?)
    }
}

/// In-process gateway for development and tests. Deduplicates on the
/// idempotency key like the real provider does.
#[derive(Default)]
pub struct MockGateway {
    by_key: Mutex<HashMap<String, GatewayIntent>>,
    by_id: Mutex<HashMap<String, GatewayIntent>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: force a stored intent into the given status, as if the
    /// customer had acted on it.
    pub fn mark(&self, provider_intent_id: &str, status: GatewayStatus) {
        let mut by_id = self.by_id.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(intent) = by_id.get_mut(provider_intent_id) {
            intent.status = status;
            intent.raw["status"] = Value::String(status.as_str().to_string());
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_intent(&self, req: &CreateIntentRequest) -> Result<GatewayIntent, EngineError> {
        let mut by_key = self.by_key.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = by_key.get(&req.idempotency_key) {
            return Ok(existing.clone());
        }
        let id = format!("pi_mock_{}", Uuid::new_v4().simple());
        let secret = format!("{}_secret_{}", id, Uuid::new_v4().simple());
        let intent = GatewayIntent {
            provider_intent_id: id.clone(),
            status: GatewayStatus::RequiresPaymentMethod,
            client_secret: Some(secret.clone()),
            raw: json!({
                "id": id,
                "status": "requires_payment_method",
                "client_secret": secret,
                "amount": req.amount_minor,
                "currency": req.currency,
                "metadata": req.metadata,
            }),
        };
        by_key.insert(req.idempotency_key.clone(), intent.clone());
        self.by_id
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id, intent.clone());
        Ok(intent)
    }

    async fn retrieve_intent(
        &self,
        provider_intent_id: &str,
    ) -> Result<GatewayIntent, EngineError> {
        self.by_id
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(provider_intent_id)
            .cloned()
            .ok_or_else(|| {
                EngineError::Gateway(format!("no such payment intent `{}`", provider_intent_id))
            })
    }
}
