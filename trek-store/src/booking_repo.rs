use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use trek_core::booking::{BillingDetails, Booking, BookingStatus, FormDetails};
use trek_core::payment::{BookingPayment, GatewayStatus};
use trek_core::repository::{
    BookingStore, PaymentSeed, ReconciliationStore, ReconciliationTxn,
};
use trek_core::EngineError;

fn store_err(e: sqlx::Error) -> EngineError {
    EngineError::Store(e.to_string())
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    reference: String,
    product_id: Uuid,
    intent_id: Option<Uuid>,
    user_id: Option<String>,
    party_size: i32,
    start_date: NaiveDate,
    end_date: NaiveDate,
    lead_name: String,
    lead_email: String,
    lead_phone: Option<String>,
    total_minor: i64,
    currency: String,
    status: String,
    notes: Option<String>,
    metadata: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BookingRow {
    fn into_booking(self) -> Result<Booking, EngineError> {
        let status = BookingStatus::parse(&self.status).ok_or_else(|| {
            EngineError::Store(format!("unknown booking status `{}` in store", self.status))
        })?;
        Ok(Booking {
            id: self.id,
            reference: self.reference,
            product_id: self.product_id,
            intent_id: self.intent_id,
            user_id: self.user_id,
            party_size: self.party_size,
            start_date: self.start_date,
            end_date: self.end_date,
            lead_name: self.lead_name,
            lead_email: self.lead_email,
            lead_phone: self.lead_phone,
            total_minor: self.total_minor,
            currency: self.currency,
            status,
            notes: self.notes,
            metadata: self.metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    booking_id: Uuid,
    provider_intent_id: String,
    amount_minor: i64,
    currency: String,
    status: String,
    client_secret: Option<String>,
    raw_event: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_payment(self) -> BookingPayment {
        BookingPayment {
            id: self.id,
            booking_id: self.booking_id,
            provider_intent_id: self.provider_intent_id,
            amount_minor: self.amount_minor,
            currency: self.currency,
            status: GatewayStatus::from_provider(&self.status),
            client_secret: self.client_secret,
            raw_event: self.raw_event,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const BOOKING_COLUMNS: &str = "id, reference, product_id, intent_id, user_id, party_size, start_date, end_date, lead_name, lead_email, lead_phone, total_minor, currency, status, notes, metadata, created_at, updated_at";
const PAYMENT_COLUMNS: &str = "id, booking_id, provider_intent_id, amount_minor, currency, status, client_secret, raw_event, created_at, updated_at";

pub struct SqlBookingStore {
    pool: PgPool,
}

impl SqlBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingStore for SqlBookingStore {
    async fn reference_exists(&self, reference: &str) -> Result<bool, EngineError> {
        let exists: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM bookings WHERE reference = $1)")
                .bind(reference)
                .fetch_one(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(exists.0)
    }

    async fn insert_booking(
        &self,
        booking: &Booking,
        details: &FormDetails,
    ) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        sqlx::query(
            r#"
            INSERT INTO bookings (id, reference, product_id, intent_id, user_id, party_size, start_date, end_date, lead_name, lead_email, lead_phone, total_minor, currency, status, notes, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(booking.id)
        .bind(&booking.reference)
        .bind(booking.product_id)
        .bind(booking.intent_id)
        .bind(&booking.user_id)
        .bind(booking.party_size)
        .bind(booking.start_date)
        .bind(booking.end_date)
        .bind(&booking.lead_name)
        .bind(&booking.lead_email)
        .bind(&booking.lead_phone)
        .bind(booking.total_minor)
        .bind(&booking.currency)
        .bind(booking.status.as_str())
        .bind(&booking.notes)
        .bind(&booking.metadata)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        sqlx::query(
            r#"
            INSERT INTO booking_form_details (booking_id, lead_title, lead_first_name, lead_last_name, country, emergency_contact, dietary_requirements, medical_conditions, experience_level, guide_language, special_requests, comments, departure_time, return_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(details.booking_id)
        .bind(&details.lead_title)
        .bind(&details.lead_first_name)
        .bind(&details.lead_last_name)
        .bind(&details.country)
        .bind(&details.emergency_contact)
        .bind(&details.dietary_requirements)
        .bind(&details.medical_conditions)
        .bind(details.experience_level.as_str())
        .bind(&details.guide_language)
        .bind(&details.special_requests)
        .bind(&details.comments)
        .bind(details.departure_time)
        .bind(details.return_time)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        tx.commit().await.map_err(store_err)
    }

    async fn get_by_reference(&self, reference: &str) -> Result<Option<Booking>, EngineError> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE reference = $1",
            BOOKING_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(BookingRow::into_booking).transpose()
    }

    async fn update_booking(
        &self,
        booking: &Booking,
        expected: BookingStatus,
    ) -> Result<(), EngineError> {
        // The status predicate makes the write lose against a reconciler
        // transition that committed after the caller's read.
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET party_size = $1, start_date = $2, end_date = $3, lead_name = $4,
                lead_email = $5, lead_phone = $6, total_minor = $7, currency = $8,
                status = $9, notes = $10, updated_at = NOW()
            WHERE id = $11 AND status = $12
            "#,
        )
        .bind(booking.party_size)
        .bind(booking.start_date)
        .bind(booking.end_date)
        .bind(&booking.lead_name)
        .bind(&booking.lead_email)
        .bind(&booking.lead_phone)
        .bind(booking.total_minor)
        .bind(&booking.currency)
        .bind(booking.status.as_str())
        .bind(&booking.notes)
        .bind(booking.id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        if result.rows_affected() == 0 {
            return Err(EngineError::conflict(format!(
                "booking {} changed concurrently; re-read and retry",
                booking.reference
            )));
        }
        Ok(())
    }

    async fn latest_payment(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<BookingPayment>, EngineError> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM booking_payments WHERE booking_id = $1 ORDER BY created_at DESC LIMIT 1",
            PAYMENT_COLUMNS
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(row.map(PaymentRow::into_payment))
    }

    async fn has_succeeded_payment(&self, booking_id: Uuid) -> Result<bool, EngineError> {
        let exists: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM booking_payments WHERE booking_id = $1 AND status = 'succeeded')",
        )
        .bind(booking_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(exists.0)
    }

    async fn insert_payment(&self, payment: &BookingPayment) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO booking_payments (id, booking_id, provider_intent_id, amount_minor, currency, status, client_secret, raw_event, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(payment.id)
        .bind(payment.booking_id)
        .bind(&payment.provider_intent_id)
        .bind(payment.amount_minor)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(&payment.client_secret)
        .bind(&payment.raw_event)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn update_payment(&self, payment: &BookingPayment) -> Result<(), EngineError> {
        sqlx::query(
            "UPDATE booking_payments SET status = $1, raw_event = $2, updated_at = NOW() WHERE id = $3",
        )
        .bind(payment.status.as_str())
        .bind(&payment.raw_event)
        .bind(payment.id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn upsert_billing_details(&self, details: &BillingDetails) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO booking_billing_details (booking_id, name, email, phone, address_line1, address_line2, city, state, postal_code, country)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (booking_id) DO UPDATE
            SET name = EXCLUDED.name, email = EXCLUDED.email, phone = EXCLUDED.phone,
                address_line1 = EXCLUDED.address_line1, address_line2 = EXCLUDED.address_line2,
                city = EXCLUDED.city, state = EXCLUDED.state,
                postal_code = EXCLUDED.postal_code, country = EXCLUDED.country
            "#,
        )
        .bind(details.booking_id)
        .bind(&details.name)
        .bind(&details.email)
        .bind(&details.phone)
        .bind(&details.address_line1)
        .bind(&details.address_line2)
        .bind(&details.city)
        .bind(&details.state)
        .bind(&details.postal_code)
        .bind(&details.country)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl ReconciliationStore for SqlBookingStore {
    async fn open(
        &self,
        provider_intent_id: &str,
        booking_ref: Option<&str>,
    ) -> Result<Box<dyn ReconciliationTxn>, EngineError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let booking_id: Option<(Uuid,)> =
            sqlx::query_as("SELECT booking_id FROM booking_payments WHERE provider_intent_id = $1")
                .bind(provider_intent_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(store_err)?;
        let booking_id = match booking_id {
            Some((id,)) => id,
            None => {
                // No local row yet; fall back to the reference carried in
                // the event metadata.
                let reference = booking_ref.ok_or_else(|| {
                    EngineError::NotFound(format!(
                        "no booking for payment intent {}",
                        provider_intent_id
                    ))
                })?;
                let row: Option<(Uuid,)> =
                    sqlx::query_as("SELECT id FROM bookings WHERE reference = $1")
                        .bind(reference)
                        .fetch_optional(&mut *tx)
                        .await
                        .map_err(store_err)?;
                row.ok_or_else(|| EngineError::NotFound(format!("booking {}", reference)))?
                    .0
            }
        };

        // Serializes concurrent deliveries for the same booking.
        let booking: BookingRow = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE id = $1 FOR UPDATE",
            BOOKING_COLUMNS
        ))
        .bind(booking_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_err)?;
        let booking = booking.into_booking()?;

        let payment: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM booking_payments WHERE provider_intent_id = $1 FOR UPDATE",
            PAYMENT_COLUMNS
        ))
        .bind(provider_intent_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;

        Ok(Box::new(SqlReconciliationTxn {
            tx,
            booking,
            payment: payment.map(PaymentRow::into_payment),
        }))
    }
}

struct SqlReconciliationTxn {
    tx: Transaction<'static, Postgres>,
    booking: Booking,
    payment: Option<BookingPayment>,
}

#[async_trait]
impl ReconciliationTxn for SqlReconciliationTxn {
    fn booking(&self) -> &Booking {
        &self.booking
    }

    fn payment(&self) -> Option<&BookingPayment> {
        self.payment.as_ref()
    }

    async fn ensure_payment(&mut self, seed: PaymentSeed) -> Result<(), EngineError> {
        let now = Utc::now();
        let payment = BookingPayment {
            id: Uuid::new_v4(),
            booking_id: self.booking.id,
            provider_intent_id: seed.provider_intent_id,
            amount_minor: self.booking.total_minor,
            currency: self.booking.currency.clone(),
            status: GatewayStatus::Processing,
            client_secret: seed.client_secret,
            raw_event: Value::Null,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            r#"
            INSERT INTO booking_payments (id, booking_id, provider_intent_id, amount_minor, currency, status, client_secret, raw_event, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(payment.id)
        .bind(payment.booking_id)
        .bind(&payment.provider_intent_id)
        .bind(payment.amount_minor)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(&payment.client_secret)
        .bind(&payment.raw_event)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        self.payment = Some(payment);
        Ok(())
    }

    async fn record_event(
        &mut self,
        status: GatewayStatus,
        raw: &Value,
    ) -> Result<(), EngineError> {
        let payment = self
            .payment
            .as_mut()
            .ok_or_else(|| EngineError::Store("recording event without a payment row".into()))?;

        sqlx::query(
            "INSERT INTO payment_events (id, payment_id, status, raw) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(payment.id)
        .bind(status.as_str())
        .bind(raw)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;

        sqlx::query(
            "UPDATE booking_payments SET status = $1, raw_event = $2, updated_at = NOW() WHERE id = $3",
        )
        .bind(status.as_str())
        .bind(raw)
        .bind(payment.id)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;

        payment.status = status;
        payment.raw_event = raw.clone();
        payment.updated_at = Utc::now();
        Ok(())
    }

    async fn set_booking_status(&mut self, status: BookingStatus) -> Result<(), EngineError> {
        sqlx::query("UPDATE bookings SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(status.as_str())
            .bind(self.booking.id)
            .execute(&mut *self.tx)
            .await
            .map_err(store_err)?;
        self.booking.update_status(status);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), EngineError> {
        self.tx.commit().await.map_err(store_err)
    }
}
