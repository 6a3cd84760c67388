use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::PricingConfig;
use crate::pricing::{PriceKind, PricingOracle};
use crate::tracker::{JobRecord, UNKNOWN};

const SECONDS_PER_HOUR: f64 = 3600.0;
const UNKNOWN_QUEUE: &str = "Unknown";

/// Spot vs on-demand cost, billing each instance for its longest single job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlainSummary {
    pub number_of_jobs: usize,
    pub number_of_retries: u64,
    pub total_run_time: u64,
    #[serde(rename = "JobQueueName")]
    pub job_queue_names: Vec<String>,
    pub total_on_demand_cost: f64,
    pub total_spot_cost: f64,
    /// Always `total_on_demand_cost - total_spot_cost`.
    pub estimated_savings: f64,
}

/// Spot cost with and without crediting time recovered across interruptions.
/// Each instance is billed for the summed runtime of every job that used it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnhancedSummary {
    pub number_of_jobs: usize,
    pub total_retries: u64,
    pub total_run_time_spot: u64,
    pub total_time_wasted_spot: i64,
    pub total_run_time_with_rescue_spot: u64,
    #[serde(rename = "JobQueueName")]
    pub job_queue_names: Vec<String>,
    pub cost_without_rescue: f64,
    pub cost_with_rescue: f64,
    /// Always `cost_without_rescue - cost_with_rescue`.
    pub savings_with_rescue: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainInstanceUsage {
    pub instance_type: String,
    pub longest_runtime: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedInstanceUsage {
    pub instance_type: String,
    pub total_runtime: u64,
    pub saved_time: i64,
}

impl EnhancedInstanceUsage {
    pub fn adjusted_runtime(&self) -> u64 {
        let total = i64::try_from(self.total_runtime).unwrap_or(i64::MAX);
        total.saturating_sub(self.saved_time).max(0) as u64
    }
}

fn queue_names(records: &[JobRecord]) -> Vec<String> {
    records
        .iter()
        .map(|r| {
            if r.queue_name.is_empty() || r.queue_name == UNKNOWN {
                UNKNOWN_QUEUE.to_string()
            } else {
                r.queue_name.clone()
            }
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Every instance referenced by any job, with the longest runtime among the
/// jobs that reference it. The first type seen for an instance wins.
pub fn plain_instance_usage(records: &[JobRecord]) -> BTreeMap<String, PlainInstanceUsage> {
    let mut instances: BTreeMap<String, PlainInstanceUsage> = BTreeMap::new();
    for record in records {
        for (instance_id, instance_type) in &record.instance_map {
            let usage = instances
                .entry(instance_id.clone())
                .or_insert_with(|| PlainInstanceUsage {
                    instance_type: instance_type.clone(),
                    longest_runtime: 0,
                });
            usage.longest_runtime = usage.longest_runtime.max(record.run_duration_seconds);
        }
    }
    instances
}

/// Every instance referenced by any job, with runtime and saved time summed
/// over the jobs that reference it.
pub fn enhanced_instance_usage(records: &[JobRecord]) -> BTreeMap<String, EnhancedInstanceUsage> {
    let mut instances: BTreeMap<String, EnhancedInstanceUsage> = BTreeMap::new();
    for record in records {
        let saved = record.total_time_saved.decode();
        if saved.malformed > 0 {
            tracing::warn!(
                job_id = %record.job_id,
                malformed = saved.malformed,
                "Ignoring unparsable time-saved entries"
            );
        }

        for (instance_id, instance_type) in &record.instance_map {
            let usage = instances
                .entry(instance_id.clone())
                .or_insert_with(|| EnhancedInstanceUsage {
                    instance_type: instance_type.clone(),
                    total_runtime: 0,
                    saved_time: 0,
                });
            usage.total_runtime = usage
                .total_runtime
                .saturating_add(record.run_duration_seconds);
            usage.saved_time = usage.saved_time.saturating_add(saved.seconds);
        }
    }
    instances
}

/// Turns job records into cost summaries using a pricing oracle.
///
/// A failed or timed-out price lookup counts as a price of zero, so a summary
/// is always produced.
pub struct MetricsAggregator {
    pricing: Arc<dyn PricingOracle>,
    region: String,
    lookup_timeout: Duration,
}

impl MetricsAggregator {
    pub fn new(pricing: Arc<dyn PricingOracle>, config: &PricingConfig) -> Self {
        Self {
            pricing,
            region: config.region.clone(),
            lookup_timeout: config.timeout(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn price_or_zero(&self, instance_id: &str, instance_type: &str, region: &str, kind: PriceKind) -> f64 {
        if instance_type == UNKNOWN {
            tracing::warn!(instance_id, kind = %kind, "Instance type unknown, pricing at zero");
            return 0.0;
        }

        let lookup = self.pricing.price(instance_type, region, kind);
        match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(Ok(price)) if price.is_finite() && price >= 0.0 => price,
            Ok(Ok(price)) => {
                tracing::warn!(instance_type, region, kind = %kind, price, "Discarding invalid price");
                0.0
            }
            Ok(Err(e)) => {
                tracing::warn!(instance_type, region, kind = %kind, error = %e, "Price lookup failed");
                0.0
            }
            Err(_) => {
                tracing::warn!(instance_type, region, kind = %kind, "Price lookup timed out");
                0.0
            }
        }
    }

    /// Plain mode: on-demand vs spot, each instance billed once for the
    /// longest job that ran on it.
    pub async fn compute_plain_metrics(&self, records: &[JobRecord], region: &str) -> PlainSummary {
        let mut total_on_demand_cost = 0.0;
        let mut total_spot_cost = 0.0;

        for (instance_id, usage) in plain_instance_usage(records) {
            let hours = usage.longest_runtime as f64 / SECONDS_PER_HOUR;
            let on_demand = self
                .price_or_zero(&instance_id, &usage.instance_type, region, PriceKind::OnDemand)
                .await;
            let spot = self
                .price_or_zero(&instance_id, &usage.instance_type, region, PriceKind::Spot)
                .await;
            total_on_demand_cost += on_demand * hours;
            total_spot_cost += spot * hours;
        }

        let summary = PlainSummary {
            number_of_jobs: records.len(),
            number_of_retries: records.iter().map(|r| u64::from(r.attempts)).sum(),
            total_run_time: records.iter().map(|r| r.run_duration_seconds).sum(),
            job_queue_names: queue_names(records),
            total_on_demand_cost,
            total_spot_cost,
            estimated_savings: total_on_demand_cost - total_spot_cost,
        };
        tracing::debug!(
            jobs = summary.number_of_jobs,
            savings = summary.estimated_savings,
            region,
            "Computed plain metrics"
        );
        summary
    }

    /// Enhanced mode: spot cost with and without time recovered across
    /// interruptions, priced in the aggregator's region.
    pub async fn compute_enhanced_metrics(&self, records: &[JobRecord]) -> EnhancedSummary {
        let mut cost_without_rescue = 0.0;
        let mut cost_with_rescue = 0.0;
        let mut total_run_time_spot: u64 = 0;
        let mut total_run_time_with_rescue_spot: u64 = 0;

        for (instance_id, usage) in enhanced_instance_usage(records) {
            let adjusted = usage.adjusted_runtime();
            total_run_time_spot = total_run_time_spot.saturating_add(usage.total_runtime);
            total_run_time_with_rescue_spot = total_run_time_with_rescue_spot.saturating_add(adjusted);

            let spot = self
                .price_or_zero(&instance_id, &usage.instance_type, &self.region, PriceKind::Spot)
                .await;
            cost_without_rescue += spot * (usage.total_runtime as f64 / SECONDS_PER_HOUR);
            cost_with_rescue += spot * (adjusted as f64 / SECONDS_PER_HOUR);
        }

        let summary = EnhancedSummary {
            number_of_jobs: records.len(),
            total_retries: records.iter().map(|r| u64::from(r.attempts)).sum(),
            total_run_time_spot,
            total_time_wasted_spot: total_run_time_spot as i64 - total_run_time_with_rescue_spot as i64,
            total_run_time_with_rescue_spot,
            job_queue_names: queue_names(records),
            cost_without_rescue,
            cost_with_rescue,
            savings_with_rescue: cost_without_rescue - cost_with_rescue,
        };
        tracing::debug!(
            jobs = summary.number_of_jobs,
            savings = summary.savings_with_rescue,
            region = %self.region,
            "Computed enhanced metrics"
        );
        summary
    }
}
