use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use trek_core::EngineError;
use uuid::Uuid;

/// Per-person price for a party-size band. Either bound may be open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupPriceTier {
    pub min_size: Option<i32>,
    pub max_size: Option<i32>,
    pub unit_minor: i64,
}

impl GroupPriceTier {
    pub fn contains(&self, party_size: i32) -> bool {
        let min_ok = self.min_size.map_or(true, |min| party_size >= min);
        let max_ok = self.max_size.map_or(true, |max| party_size <= max);
        min_ok && max_ok
    }
}

/// Read-only catalog view of a bookable trek. Tiers are kept sorted by
/// ascending minimum size (open minimums first); the store loads them in
/// that order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub currency: String,
    pub base_price_minor: Option<i64>,
    pub tiers: Vec<GroupPriceTier>,
}

/// Catalog lookup seam; the engine only ever reads from it.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn product_by_slug(&self, slug: &str) -> Result<Option<Product>, EngineError>;

    async fn product_by_id(&self, id: Uuid) -> Result<Option<Product>, EngineError>;
}
