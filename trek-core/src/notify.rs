use async_trait::async_trait;

use crate::booking::Booking;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    BookingConfirmed,
    PaymentFailed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BookingConfirmed => "booking.confirmed",
            Self::PaymentFailed => "booking.payment_failed",
        }
    }
}

/// Outbound notification collaborator (email/event fan-out). Fire-and-forget
/// with at-least-once expectations; a failure here never reverses a booking
/// transition.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        kind: NotificationKind,
        booking: &Booking,
        attachment: Option<&str>,
    ) -> Result<(), EngineError>;
}

/// Receipt document collaborator. `generate` is idempotent per booking —
/// re-generating overwrites the previous document rather than producing a
/// second one.
#[async_trait]
pub trait ReceiptService: Send + Sync {
    async fn generate(&self, booking: &Booking) -> Result<String, EngineError>;
}
