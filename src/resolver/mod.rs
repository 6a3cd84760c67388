//! Orchestrator identifier resolution.
//!
//! Events only carry a container-instance locator. The reconciler needs the
//! compute instance behind it and that instance's type; both lookups go
//! through [`InstanceResolver`] and a failure in either degrades to the
//! unknown sentinel rather than failing the event.

pub mod table;

use async_trait::async_trait;

use crate::error::Result;

pub use table::StaticResolver;

#[async_trait]
pub trait InstanceResolver: Send + Sync {
    /// Container-instance locator -> compute instance id.
    async fn resolve_instance(&self, container_locator: &str) -> Result<String>;

    /// Compute instance id -> instance type (e.g. `m5.large`).
    async fn resolve_instance_type(&self, instance_id: &str) -> Result<String>;
}
