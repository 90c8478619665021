use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::path::PathBuf;
use tracing::info;

use trek_core::booking::Booking;
use trek_core::notify::ReceiptService;
use trek_core::EngineError;

/// Renders a plain-text receipt document to disk and records it against the
/// booking. Regeneration overwrites both the file and the row, so a
/// duplicate Paid edge cannot produce a second receipt.
pub struct ReceiptWriter {
    pool: PgPool,
    dir: PathBuf,
}

impl ReceiptWriter {
    pub fn new(pool: PgPool, dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            dir: dir.into(),
        }
    }

    fn render(booking: &Booking) -> String {
        format!(
            "RECEIPT\n\
             Booking reference: {}\n\
             Lead traveler:     {}\n\
             Party size:        {}\n\
             Dates:             {} to {}\n\
             Amount paid:       {} {}\n\
             Issued:            {}\n",
            booking.reference,
            booking.lead_name,
            booking.party_size,
            booking.start_date,
            booking.end_date,
            booking.currency,
            format_amount(booking.total_minor, &booking.currency),
            Utc::now().to_rfc3339(),
        )
    }
}

/// ISO 4217 minor-unit exponent for the currencies the engine accepts.
fn minor_unit_decimals(currency: &str) -> u32 {
    match currency.to_ascii_uppercase().as_str() {
        "BIF" | "CLP" | "DJF" | "GNF" | "JPY" | "KMF" | "KRW" | "MGA" | "PYG" | "RWF"
        | "UGX" | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
        "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
        _ => 2,
    }
}

fn format_amount(minor: i64, currency: &str) -> String {
    let decimals = minor_unit_decimals(currency);
    if decimals == 0 {
        return minor.to_string();
    }
    let scale = 10_i64.pow(decimals);
    format!(
        "{}.{:0width$}",
        minor / scale,
        (minor % scale).abs(),
        width = decimals as usize
    )
}

#[async_trait]
impl ReceiptService for ReceiptWriter {
    async fn generate(&self, booking: &Booking) -> Result<String, EngineError> {
        let path = self.dir.join(format!("{}.txt", booking.reference));
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| EngineError::SideEffect(format!("receipt dir: {}", e)))?;
        tokio::fs::write(&path, Self::render(booking))
            .await
            .map_err(|e| EngineError::SideEffect(format!("receipt write: {}", e)))?;

        let document_ref = path.to_string_lossy().into_owned();
        sqlx::query(
            r#"
            INSERT INTO booking_receipts (booking_id, document_ref, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (booking_id) DO UPDATE
            SET document_ref = EXCLUDED.document_ref, created_at = NOW()
            "#,
        )
        .bind(booking.id)
        .bind(&document_ref)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::SideEffect(format!("receipt record: {}", e)))?;

        info!(reference = %booking.reference, document_ref = %document_ref, "receipt written");
        Ok(document_ref)
    }
}
