//! Cost and savings summaries over all tracked jobs.
//!
//! Two independent computations are offered and deliberately kept apart:
//! [`MetricsAggregator::compute_plain_metrics`] bills each instance once for
//! the longest job that ran on it, while
//! [`MetricsAggregator::compute_enhanced_metrics`] bills each instance for the
//! summed runtime of all its jobs.

pub mod aggregator;

pub use aggregator::{
    enhanced_instance_usage, plain_instance_usage, EnhancedInstanceUsage, EnhancedSummary,
    MetricsAggregator, PlainInstanceUsage, PlainSummary,
};
