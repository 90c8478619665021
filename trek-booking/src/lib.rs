pub mod gateway;
pub mod ledger;
pub mod payments;
pub mod reconciler;
pub mod reference;

pub use gateway::{CardGateway, MockGateway};
pub use ledger::{
    AmendBookingRequest, BillingInput, BookingLedger, CreateBookingRequest, Identity,
    TravelerDetails,
};
pub use payments::{HandleResponse, PaymentFlow};
pub use reconciler::{PaymentReconciler, ReconcileOutcome};
