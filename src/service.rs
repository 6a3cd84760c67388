use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{run_api, ApiState};
use crate::config::TrackerConfig;
use crate::error::Result;
use crate::metrics::MetricsAggregator;
use crate::pricing::{CachedPricing, PricingOracle, StaticPriceTable};
use crate::resolver::{InstanceResolver, StaticResolver};
use crate::store::{FileJobStore, InMemoryJobStore, JobStore};
use crate::tracker::Reconciler;

/// Wires the store, resolver and pricing adapters into a reconciler and an
/// aggregator. Every component is built once here and shared by handle.
pub struct TrackerService {
    pub config: TrackerConfig,
    pub store: Arc<dyn JobStore>,
    pub reconciler: Arc<Reconciler>,
    pub aggregator: Arc<MetricsAggregator>,
}

impl TrackerService {
    /// Build all adapters described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory cannot be created or a
    /// configured price/resolver table cannot be read.
    pub async fn from_config(config: TrackerConfig) -> Result<Self> {
        let store: Arc<dyn JobStore> = match &config.store.data_dir {
            Some(dir) => Arc::new(FileJobStore::open(dir.clone()).await?),
            None => {
                tracing::warn!("No data directory configured, job records are kept in memory");
                Arc::new(InMemoryJobStore::new())
            }
        };

        let resolver: Arc<dyn InstanceResolver> = match &config.resolver.table_path {
            Some(path) => Arc::new(StaticResolver::from_file(path)?),
            None => {
                tracing::warn!("No resolver table configured, instances will resolve as unknown");
                Arc::new(StaticResolver::default())
            }
        };

        let table = match &config.pricing.table_path {
            Some(path) => StaticPriceTable::from_file(path)?,
            None => {
                tracing::warn!("No price table configured, all prices will be zero");
                StaticPriceTable::new()
            }
        };
        let pricing: Arc<dyn PricingOracle> = match config.pricing.cache_ttl() {
            Some(ttl) => Arc::new(CachedPricing::new(table, ttl)),
            None => Arc::new(table),
        };

        Ok(Self::with_adapters(config, store, resolver, pricing))
    }

    /// Assemble a service from already-built adapters.
    pub fn with_adapters(
        config: TrackerConfig,
        store: Arc<dyn JobStore>,
        resolver: Arc<dyn InstanceResolver>,
        pricing: Arc<dyn PricingOracle>,
    ) -> Self {
        let reconciler = Arc::new(Reconciler::new(store.clone(), resolver, &config));
        let aggregator = Arc::new(MetricsAggregator::new(pricing, &config.pricing));
        Self {
            config,
            store,
            reconciler,
            aggregator,
        }
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            reconciler: self.reconciler.clone(),
            aggregator: self.aggregator.clone(),
            store: self.store.clone(),
            store_timeout: self.config.store_timeout(),
        }
    }

    /// Serve the HTTP API until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        run_api(self.config.listen_addr, self.api_state(), shutdown).await
    }
}
