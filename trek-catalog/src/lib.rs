pub mod pricing;
pub mod product;

pub use pricing::{resolve, PricingError, Quote};
pub use product::{CatalogStore, GroupPriceTier, Product};
