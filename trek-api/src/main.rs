use std::net::SocketAddr;
use std::sync::Arc;

use trek_api::{
    app,
    state::{AppState, AuthConfig, BusinessConfig, ResiliencyState, WebhookConfig},
};
use trek_booking::{BookingLedger, CardGateway, MockGateway, PaymentFlow, PaymentReconciler};
use trek_catalog::CatalogStore;
use trek_core::payment::{verify_status_map, PaymentGateway};
use trek_core::repository::{BookingStore, IntentStore, ReconciliationStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trek_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = trek_store::Config::load().expect("Failed to load config");
    tracing::info!("Starting Trek API on port {}", config.server.port);

    verify_status_map().expect("gateway status map is inconsistent");

    // Postgres
    let db = trek_store::DbClient::new(&config.database.url)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");

    // Redis holds the intent soft-holds
    let intents: Arc<dyn IntentStore> = Arc::new(
        trek_store::RedisIntentStore::new(&config.redis.url).expect("Failed to connect to Redis"),
    );

    // Kafka carries outbound notifications
    let producer = trek_store::EventProducer::new(&config.kafka.brokers)
        .expect("Failed to create Kafka producer");
    let notifier = Arc::new(trek_store::KafkaNotifier::new(
        producer,
        config.kafka.notification_topic.clone(),
    ));

    let store = Arc::new(trek_store::SqlBookingStore::new(db.pool.clone()));
    let catalog: Arc<dyn CatalogStore> =
        Arc::new(trek_store::SqlCatalogStore::new(db.pool.clone()));
    let receipts = Arc::new(trek_store::ReceiptWriter::new(
        db.pool.clone(),
        config.business_rules.receipt_dir.clone(),
    ));

    let gateway: Arc<dyn PaymentGateway> = if config.gateway.secret_key.is_empty() {
        tracing::warn!("No gateway secret configured, using the in-process mock gateway");
        Arc::new(MockGateway::new())
    } else {
        Arc::new(
            CardGateway::new(
                config.gateway.base_url.clone(),
                config.gateway.secret_key.clone(),
            )
            .expect("Failed to build gateway client"),
        )
    };

    let ledger = Arc::new(BookingLedger::new(
        store.clone() as Arc<dyn BookingStore>,
        intents.clone(),
        catalog.clone(),
    ));
    let payments = Arc::new(PaymentFlow::new(
        store.clone() as Arc<dyn BookingStore>,
        gateway.clone(),
    ));
    let reconciler = Arc::new(PaymentReconciler::new(
        store.clone() as Arc<dyn ReconciliationStore>,
        intents.clone(),
        receipts,
        notifier,
    ));

    let app_state = AppState {
        ledger,
        payments,
        reconciler,
        intents,
        catalog,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
        webhook: WebhookConfig {
            secret: config.gateway.webhook_secret.clone(),
            tolerance_seconds: config.gateway.webhook_tolerance_seconds,
        },
        business: BusinessConfig {
            intent_ttl_seconds: config.business_rules.intent_ttl_seconds,
            currency: config.business_rules.currency.clone(),
        },
        resiliency: Arc::new(ResiliencyState::new()),
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
