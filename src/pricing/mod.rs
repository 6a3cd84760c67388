//! Hourly instance pricing.

pub mod cache;
pub mod table;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use cache::CachedPricing;
pub use table::StaticPriceTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceKind {
    OnDemand,
    Spot,
}

impl std::fmt::Display for PriceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceKind::OnDemand => write!(f, "on-demand"),
            PriceKind::Spot => write!(f, "spot"),
        }
    }
}

/// Source of USD-per-hour prices.
///
/// Implementations return an error when no price is known; callers decide
/// whether that degrades to zero.
#[async_trait]
pub trait PricingOracle: Send + Sync {
    async fn price(&self, instance_type: &str, region: &str, kind: PriceKind) -> Result<f64>;
}

/// Display name the public price list uses for a region code.
pub fn region_location(region: &str) -> Option<&'static str> {
    match region {
        "us-east-1" => Some("US East (N. Virginia)"),
        "us-east-2" => Some("US East (Ohio)"),
        "us-west-1" => Some("US West (N. California)"),
        "us-west-2" => Some("US West (Oregon)"),
        _ => None,
    }
}
