use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use trek_catalog::{CatalogStore, GroupPriceTier, Product};
use trek_core::EngineError;

fn store_err(e: sqlx::Error) -> EngineError {
    EngineError::Store(e.to_string())
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    slug: String,
    title: String,
    currency: String,
    base_price_minor: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct TierRow {
    min_size: Option<i32>,
    max_size: Option<i32>,
    unit_minor: i64,
}

pub struct SqlCatalogStore {
    pool: PgPool,
}

impl SqlCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load(&self, row: ProductRow) -> Result<Product, EngineError> {
        // Open minimums first, then ascending; pricing takes the first
        // matching tier in this order.
        let tiers: Vec<TierRow> = sqlx::query_as(
            "SELECT min_size, max_size, unit_minor FROM product_price_tiers WHERE product_id = $1 ORDER BY min_size ASC NULLS FIRST, id ASC",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(Product {
            id: row.id,
            slug: row.slug,
            title: row.title,
            currency: row.currency,
            base_price_minor: row.base_price_minor,
            tiers: tiers
                .into_iter()
                .map(|t| GroupPriceTier {
                    min_size: t.min_size,
                    max_size: t.max_size,
                    unit_minor: t.unit_minor,
                })
                .collect(),
        })
    }
}

#[async_trait]
impl CatalogStore for SqlCatalogStore {
    async fn product_by_slug(&self, slug: &str) -> Result<Option<Product>, EngineError> {
        let row: Option<ProductRow> = sqlx::query_as(
            "SELECT id, slug, title, currency, base_price_minor FROM products WHERE slug = $1 AND active",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        match row {
            Some(row) => Ok(Some(self.load(row).await?)),
            None => Ok(None),
        }
    }

    async fn product_by_id(&self, id: Uuid) -> Result<Option<Product>, EngineError> {
        let row: Option<ProductRow> = sqlx::query_as(
            "SELECT id, slug, title, currency, base_price_minor FROM products WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        match row {
            Some(row) => Ok(Some(self.load(row).await?)),
            None => Ok(None),
        }
    }
}
