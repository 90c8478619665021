use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use trek_catalog::{pricing, CatalogStore, Product, Quote};
use trek_core::booking::{BillingDetails, Booking, BookingStatus, ExperienceLevel, FormDetails};
use trek_core::intent::{BookingIntent, IntentStatus};
use trek_core::repository::{BookingStore, IntentStore};
use trek_core::EngineError;

const REFERENCE_ATTEMPTS: usize = 5;

/// Caller identity as established by the auth layer. Staff bypass ownership
/// checks; anonymous callers can only touch unowned records.
#[derive(Debug, Clone)]
pub struct Identity {
    pub subject: Option<String>,
    pub staff: bool,
}

impl Identity {
    pub fn may_access(&self, owner: Option<&str>) -> bool {
        match (self.staff, owner) {
            (true, _) => true,
            (_, None) => true,
            (_, Some(owner)) => self.subject.as_deref() == Some(owner),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub product_slug: String,
    pub intent_id: Option<Uuid>,
    pub party_size: Option<i32>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub lead_name: Option<String>,
    pub lead_email: Option<String>,
    pub lead_phone: Option<String>,
    /// Advisory; the resolved total is authoritative.
    pub total_minor: Option<i64>,
    pub notes: Option<String>,
    pub metadata: Option<Value>,
    #[serde(default)]
    pub details: TravelerDetails,
}

#[derive(Debug, Default, Deserialize)]
pub struct TravelerDetails {
    pub lead_title: Option<String>,
    pub lead_first_name: Option<String>,
    pub lead_last_name: Option<String>,
    pub country: Option<String>,
    pub emergency_contact: Option<String>,
    pub dietary_requirements: Option<String>,
    pub medical_conditions: Option<String>,
    pub experience_level: Option<ExperienceLevel>,
    pub guide_language: Option<String>,
    pub special_requests: Option<String>,
    pub comments: Option<String>,
    pub departure_time: Option<NaiveTime>,
    pub return_time: Option<NaiveTime>,
}

impl TravelerDetails {
    fn into_form_details(self, booking_id: Uuid) -> FormDetails {
        FormDetails {
            booking_id,
            lead_title: self.lead_title,
            lead_first_name: self.lead_first_name,
            lead_last_name: self.lead_last_name,
            country: self.country,
            emergency_contact: self.emergency_contact,
            dietary_requirements: self.dietary_requirements,
            medical_conditions: self.medical_conditions,
            experience_level: self.experience_level.unwrap_or_default(),
            guide_language: self.guide_language,
            special_requests: self.special_requests,
            comments: self.comments,
            departure_time: self.departure_time,
            return_time: self.return_time,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AmendBookingRequest {
    pub party_size: Option<i32>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub lead_name: Option<String>,
    pub lead_email: Option<String>,
    pub lead_phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BillingInput {
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

/// Owns the durable booking aggregate and its creation/cancellation/
/// amendment rules. Payment-driven transitions belong to the reconciler.
pub struct BookingLedger {
    store: Arc<dyn BookingStore>,
    intents: Arc<dyn IntentStore>,
    catalog: Arc<dyn CatalogStore>,
}

impl BookingLedger {
    pub fn new(
        store: Arc<dyn BookingStore>,
        intents: Arc<dyn IntentStore>,
        catalog: Arc<dyn CatalogStore>,
    ) -> Self {
        Self {
            store,
            intents,
            catalog,
        }
    }

    pub async fn create(
        &self,
        req: CreateBookingRequest,
        identity: &Identity,
    ) -> Result<Booking, EngineError> {
        let product = self
            .catalog
            .product_by_slug(&req.product_slug)
            .await?
            .ok_or_else(|| EngineError::validation("product_slug", "unknown product"))?;

        let intent = match req.intent_id {
            Some(id) => Some(self.load_consumable_intent(id, &product, identity).await?),
            None => None,
        };

        let party_size = req
            .party_size
            .or_else(|| intent.as_ref().map(|i| i.party_size))
            .unwrap_or(1);
        if party_size < 1 {
            return Err(EngineError::validation(
                "party_size",
                "party size must be at least 1",
            ));
        }
        if req.start_date > req.end_date {
            return Err(EngineError::validation(
                "end_date",
                "end date must not precede start date",
            ));
        }

        let lead_name = resolve_lead_name(&req)?;
        let lead_email = req
            .lead_email
            .clone()
            .or_else(|| intent.as_ref().and_then(|i| i.email.clone()))
            .filter(|e| e.contains('@'))
            .ok_or_else(|| EngineError::validation("lead_email", "a valid email is required"))?;
        let lead_phone = req
            .lead_phone
            .clone()
            .or_else(|| intent.as_ref().and_then(|i| i.phone.clone()));

        let quote = self.quote_or_snapshot(&product, party_size, intent.as_ref())?;
        if let Some(declared) = req.total_minor {
            if !quote.matches_declared(declared) {
                return Err(EngineError::conflict(format!(
                    "declared total {} does not match resolved total {}; re-quote required",
                    declared, quote.total_minor
                )));
            }
        }

        let booking_id = Uuid::new_v4();
        let reference = self.allocate_reference(booking_id).await?;
        let now = Utc::now();
        let booking = Booking {
            id: booking_id,
            reference,
            product_id: product.id,
            intent_id: intent.as_ref().map(|i| i.id),
            user_id: identity.subject.clone(),
            party_size,
            start_date: req.start_date,
            end_date: req.end_date,
            lead_name,
            lead_email,
            lead_phone,
            total_minor: quote.total_minor,
            currency: quote.currency,
            status: BookingStatus::PendingPayment,
            notes: req.notes,
            metadata: req.metadata.unwrap_or_else(|| Value::Object(Default::default())),
            created_at: now,
            updated_at: now,
        };

        if let Some(intent) = &intent {
            // Single-winner consumption: two concurrent creates over the
            // same intent race here, and only one gets past the claim.
            self.intents.claim(intent.id).await?;
        }

        let details = req.details.into_form_details(booking_id);
        self.store.insert_booking(&booking, &details).await?;

        if let Some(intent) = &intent {
            // The hold is attached to exactly one booking from here on.
            self.intents.set_status(intent.id, IntentStatus::Held).await?;
        }

        info!(reference = %booking.reference, total_minor = booking.total_minor, "booking created");
        Ok(booking)
    }

    pub async fn get(&self, reference: &str, identity: &Identity) -> Result<Booking, EngineError> {
        let booking = self
            .store
            .get_by_reference(reference)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("booking {}", reference)))?;
        if !identity.may_access(booking.user_id.as_deref()) {
            return Err(EngineError::NotFound(format!("booking {}", reference)));
        }
        Ok(booking)
    }

    pub async fn cancel(
        &self,
        reference: &str,
        identity: &Identity,
    ) -> Result<Booking, EngineError> {
        let mut booking = self.get(reference, identity).await?;
        let prior = booking.status;
        if !prior.can_cancel() {
            return Err(EngineError::conflict(format!(
                "booking {} cannot be cancelled from `{}`",
                reference,
                booking.status.as_str()
            )));
        }
        booking.update_status(BookingStatus::Cancelled);
        // Guarded write: if a payment settled the booking between the read
        // above and here, the write loses and the caller sees the conflict
        // instead of clobbering the settled status.
        self.store.update_booking(&booking, prior).await?;
        self.release_intent(&booking).await;
        info!(reference = %booking.reference, "booking cancelled");
        Ok(booking)
    }

    /// Pre-payment amendment. Totals are re-resolved when the party size
    /// changes, which is only allowed before any payment attempt exists.
    pub async fn amend(
        &self,
        reference: &str,
        req: AmendBookingRequest,
        identity: &Identity,
    ) -> Result<Booking, EngineError> {
        let mut booking = self.get(reference, identity).await?;
        let prior = booking.status;
        if !booking.status.allows_amendment() {
            return Err(EngineError::conflict(format!(
                "booking {} is `{}` and can no longer be amended",
                reference,
                booking.status.as_str()
            )));
        }
        if self.store.has_succeeded_payment(booking.id).await? {
            return Err(EngineError::conflict(
                "a succeeded payment exists for this booking".to_string(),
            ));
        }

        if let Some(size) = req.party_size {
            if size < 1 {
                return Err(EngineError::validation(
                    "party_size",
                    "party size must be at least 1",
                ));
            }
            if size != booking.party_size {
                if self.store.latest_payment(booking.id).await?.is_some() {
                    return Err(EngineError::conflict(
                        "total is locked once a payment attempt exists; cancel and re-book"
                            .to_string(),
                    ));
                }
                let product = self
                    .catalog
                    .product_by_id(booking.product_id)
                    .await?
                    .ok_or_else(|| {
                        EngineError::Store(format!("product {} missing", booking.product_id))
                    })?;
                let quote = pricing::resolve(&product, size).map_err(pricing_to_engine)?;
                booking.party_size = size;
                booking.total_minor = quote.total_minor;
                booking.currency = quote.currency;
            }
        }

        let start = req.start_date.unwrap_or(booking.start_date);
        let end = req.end_date.unwrap_or(booking.end_date);
        if start > end {
            return Err(EngineError::validation(
                "end_date",
                "end date must not precede start date",
            ));
        }
        booking.start_date = start;
        booking.end_date = end;

        if let Some(name) = req.lead_name {
            if name.trim().is_empty() {
                return Err(EngineError::validation("lead_name", "must not be blank"));
            }
            booking.lead_name = name;
        }
        if let Some(email) = req.lead_email {
            if !email.contains('@') {
                return Err(EngineError::validation("lead_email", "invalid email"));
            }
            booking.lead_email = email;
        }
        if req.lead_phone.is_some() {
            booking.lead_phone = req.lead_phone;
        }
        if req.notes.is_some() {
            booking.notes = req.notes;
        }

        booking.updated_at = Utc::now();
        self.store.update_booking(&booking, prior).await?;
        Ok(booking)
    }

    pub async fn upsert_billing(
        &self,
        reference: &str,
        input: BillingInput,
        identity: &Identity,
    ) -> Result<BillingDetails, EngineError> {
        let booking = self.get(reference, identity).await?;
        let details = BillingDetails {
            booking_id: booking.id,
            name: input.name,
            email: input.email,
            phone: input.phone,
            address_line1: input.address_line1,
            address_line2: input.address_line2,
            city: input.city,
            state: input.state,
            postal_code: input.postal_code,
            country: input.country,
        };
        self.store.upsert_billing_details(&details).await?;
        Ok(details)
    }

    async fn load_consumable_intent(
        &self,
        id: Uuid,
        product: &Product,
        identity: &Identity,
    ) -> Result<BookingIntent, EngineError> {
        let intent = self
            .intents
            .get(id)
            .await?
            .ok_or_else(|| EngineError::validation("intent_id", "unknown booking intent"))?;
        if intent.product_id != product.id {
            return Err(EngineError::validation(
                "intent_id",
                "intent does not match this product",
            ));
        }
        if !identity.may_access(intent.user_id.as_deref()) {
            return Err(EngineError::conflict(
                "intent belongs to another customer".to_string(),
            ));
        }
        let now = Utc::now();
        match intent.effective_status(now) {
            IntentStatus::Draft => Ok(intent),
            IntentStatus::Expired => {
                // Record the lazy expiry so later reads agree.
                if intent.status != IntentStatus::Expired {
                    let _ = self.intents.set_status(id, IntentStatus::Expired).await;
                }
                Err(EngineError::conflict("booking intent has expired".to_string()))
            }
            status => Err(EngineError::conflict(format!(
                "booking intent is already {}",
                status.as_str()
            ))),
        }
    }

    fn quote_or_snapshot(
        &self,
        product: &Product,
        party_size: i32,
        intent: Option<&BookingIntent>,
    ) -> Result<Quote, EngineError> {
        match pricing::resolve(product, party_size) {
            Ok(quote) => Ok(quote),
            Err(pricing::PricingError::Unavailable) => {
                // Price-locked intents keep working even if the catalog
                // entry lost its price after the snapshot was taken.
                let intent = intent.ok_or_else(|| {
                    EngineError::validation("total_minor", "pricing unavailable for this product")
                })?;
                let snapshot = &intent.price_snapshot;
                Ok(Quote {
                    unit_minor: snapshot.unit_minor,
                    total_minor: snapshot.unit_minor * i64::from(party_size),
                    currency: snapshot.currency.clone(),
                })
            }
            Err(err) => Err(pricing_to_engine(err)),
        }
    }

    async fn allocate_reference(&self, booking_id: Uuid) -> Result<String, EngineError> {
        let now = Utc::now();
        for _ in 0..REFERENCE_ATTEMPTS {
            let candidate = crate::reference::generate(now);
            if !self.store.reference_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        warn!("booking reference space congested, falling back to uuid suffix");
        Ok(crate::reference::fallback(now, booking_id))
    }

    async fn release_intent(&self, booking: &Booking) {
        let Some(intent_id) = booking.intent_id else {
            return;
        };
        match self.intents.get(intent_id).await {
            Ok(Some(intent)) if intent.status != IntentStatus::Confirmed => {
                if let Err(err) = self.intents.set_status(intent_id, IntentStatus::Expired).await {
                    warn!(%intent_id, error = %err, "failed to release booking intent");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(%intent_id, error = %err, "failed to load booking intent"),
        }
    }
}

fn resolve_lead_name(req: &CreateBookingRequest) -> Result<String, EngineError> {
    if let Some(name) = req.lead_name.as_deref() {
        let name = name.trim();
        if !name.is_empty() {
            return Ok(name.to_string());
        }
    }
    let combined: String = [
        req.details.lead_title.as_deref(),
        req.details.lead_first_name.as_deref(),
        req.details.lead_last_name.as_deref(),
    ]
    .iter()
    .flatten()
    .map(|part| part.trim())
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join(" ");
    if req.details.lead_first_name.is_some() && req.details.lead_last_name.is_some() {
        return Ok(combined);
    }
    Err(EngineError::validation(
        "lead_name",
        "provide lead_name or both lead_first_name and lead_last_name",
    ))
}

fn pricing_to_engine(err: trek_catalog::PricingError) -> EngineError {
    match err {
        trek_catalog::PricingError::PartySize => {
            EngineError::validation("party_size", "party size must be at least 1")
        }
        trek_catalog::PricingError::Unavailable => {
            EngineError::validation("total_minor", "pricing unavailable for this product")
        }
    }
}
