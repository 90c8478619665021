pub mod app_config;
pub mod booking_repo;
pub mod catalog_repo;
pub mod database;
pub mod events;
pub mod intent_repo;
pub mod receipts;

pub use app_config::Config;
pub use booking_repo::SqlBookingStore;
pub use catalog_repo::SqlCatalogStore;
pub use database::DbClient;
pub use events::{EventProducer, KafkaNotifier};
pub use intent_repo::RedisIntentStore;
pub use receipts::ReceiptWriter;
