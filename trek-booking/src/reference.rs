use chrono::{DateTime, Datelike, Utc};
use rand::Rng;
use uuid::Uuid;

/// Booking references look like `TRK2608-4F21A9`: a year/month prefix plus
/// six hex characters. Collision handling is the caller's job (bounded
/// retries against the store, then [`fallback`]).
pub fn generate(now: DateTime<Utc>) -> String {
    let mut bytes = [0u8; 3];
    rand::thread_rng().fill(&mut bytes);
    let token: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
    format!("{}-{}", prefix(now), token)
}

/// Collision-proof fallback after retries are exhausted.
pub fn fallback(now: DateTime<Utc>, id: Uuid) -> String {
    let hex = id.simple().to_string().to_uppercase();
    format!("{}-{}", prefix(now), &hex[..8])
}

fn prefix(now: DateTime<Utc>) -> String {
    format!("TRK{:02}{:02}", now.year() % 100, now.month())
}
