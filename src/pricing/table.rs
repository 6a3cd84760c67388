use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Result, TrackerError};
use crate::pricing::{region_location, PriceKind, PricingOracle};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct InstancePrice {
    pub on_demand: Option<f64>,
    pub spot: Option<f64>,
}

/// Prices from a JSON document keyed by region, then instance type:
///
/// ```json
/// {"us-west-2": {"m5.large": {"on_demand": 0.096, "spot": 0.0361}}}
/// ```
///
/// Regions may also be keyed by their price-list location name
/// (`"US West (Oregon)"`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct StaticPriceTable {
    regions: HashMap<String, HashMap<String, InstancePrice>>,
}

impl StaticPriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TrackerError::Config(format!("cannot read price table {}: {}", path.display(), e))
        })?;
        let table: StaticPriceTable = serde_json::from_str(&raw)?;
        tracing::info!(path = %path.display(), regions = table.regions.len(), "Loaded price table");
        Ok(table)
    }

    pub fn with_price(
        mut self,
        region: impl Into<String>,
        instance_type: impl Into<String>,
        on_demand: f64,
        spot: f64,
    ) -> Self {
        self.regions.entry(region.into()).or_default().insert(
            instance_type.into(),
            InstancePrice {
                on_demand: Some(on_demand),
                spot: Some(spot),
            },
        );
        self
    }

    fn lookup(&self, instance_type: &str, region: &str) -> Option<&InstancePrice> {
        let by_code = self.regions.get(region);
        let by_location = region_location(region).and_then(|loc| self.regions.get(loc));
        by_code
            .and_then(|types| types.get(instance_type))
            .or_else(|| by_location.and_then(|types| types.get(instance_type)))
    }
}

#[async_trait]
impl PricingOracle for StaticPriceTable {
    async fn price(&self, instance_type: &str, region: &str, kind: PriceKind) -> Result<f64> {
        let entry = self.lookup(instance_type, region).ok_or_else(|| {
            TrackerError::Pricing(format!("no price data for {} in {}", instance_type, region))
        })?;
        let price = match kind {
            PriceKind::OnDemand => entry.on_demand,
            PriceKind::Spot => entry.spot,
        };
        price.ok_or_else(|| {
            TrackerError::Pricing(format!(
                "no {} price for {} in {}",
                kind, instance_type, region
            ))
        })
    }
}
