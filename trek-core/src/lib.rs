pub mod booking;
pub mod error;
pub mod intent;
pub mod notify;
pub mod payment;
pub mod repository;

pub use booking::{BillingDetails, Booking, BookingReceipt, BookingStatus, FormDetails};
pub use error::EngineError;
pub use intent::{BookingIntent, IntentStatus, PriceSnapshot};
pub use payment::{
    BookingPayment, CreateIntentRequest, GatewayIntent, GatewayStatus, PaymentGateway,
    PaymentHandle,
};
