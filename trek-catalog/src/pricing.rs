use serde::Serialize;

use crate::product::Product;

/// Client-declared totals may drift from the resolved total by at most this
/// many minor units before the request is rejected.
pub const TOTAL_TOLERANCE_MINOR: i64 = 1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("party size must be at least 1")]
    PartySize,

    #[error("no price available for this product")]
    Unavailable,
}

/// Authoritative price for `(product, party_size)`. The client can propose
/// a total, but this value wins.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Quote {
    pub unit_minor: i64,
    pub total_minor: i64,
    pub currency: String,
}

impl Quote {
    /// Accepts a client-declared total only within the rounding tolerance.
    pub fn matches_declared(&self, declared_minor: i64) -> bool {
        (declared_minor - self.total_minor).abs() <= TOTAL_TOLERANCE_MINOR
    }
}

/// Resolve the unit and total price for a party.
///
/// Tiers are scanned in ascending order of their minimum bound (open
/// minimums first) and the first tier containing the party size wins; when
/// several overlapping tiers share a minimum, insertion order decides. With
/// no matching tier the flat base price applies. Prices are in currency
/// minor units, so `unit × party_size` needs no further rounding.
pub fn resolve(product: &Product, party_size: i32) -> Result<Quote, PricingError> {
    if party_size < 1 {
        return Err(PricingError::PartySize);
    }

    let mut tiers: Vec<_> = product.tiers.iter().enumerate().collect();
    tiers.sort_by_key(|(idx, tier)| (tier.min_size, *idx));

    let unit_minor = tiers
        .iter()
        .find(|(_, tier)| tier.contains(party_size))
        .map(|(_, tier)| tier.unit_minor)
        .or(product.base_price_minor)
        .ok_or(PricingError::Unavailable)?;

    Ok(Quote {
        unit_minor,
        total_minor: unit_minor * i64::from(party_size),
        currency: product.currency.clone(),
    })
}
