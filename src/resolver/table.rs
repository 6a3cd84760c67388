use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::{Result, TrackerError};
use crate::resolver::InstanceResolver;

/// On-disk form of a resolver table.
///
/// ```json
/// {
///   "containers": {"arn:aws:ecs:...:container-instance/abc": "i-0123"},
///   "instances": {"i-0123": "m5.large"}
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResolverTable {
    pub containers: HashMap<String, String>,
    pub instances: HashMap<String, String>,
}

/// Resolver backed by a fixed lookup table, updatable at runtime.
#[derive(Debug, Default)]
pub struct StaticResolver {
    table: RwLock<ResolverTable>,
}

impl StaticResolver {
    pub fn new(table: ResolverTable) -> Self {
        Self {
            table: RwLock::new(table),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TrackerError::Config(format!("cannot read resolver table {}: {}", path.display(), e))
        })?;
        let table: ResolverTable = serde_json::from_str(&raw)?;
        tracing::info!(
            path = %path.display(),
            containers = table.containers.len(),
            instances = table.instances.len(),
            "Loaded resolver table"
        );
        Ok(Self::new(table))
    }

    /// Register a container locator and the instance behind it.
    pub async fn register(
        &self,
        container_locator: impl Into<String>,
        instance_id: impl Into<String>,
        instance_type: impl Into<String>,
    ) {
        let instance_id = instance_id.into();
        let mut table = self.table.write().await;
        table
            .containers
            .insert(container_locator.into(), instance_id.clone());
        table.instances.insert(instance_id, instance_type.into());
    }
}

#[async_trait]
impl InstanceResolver for StaticResolver {
    async fn resolve_instance(&self, container_locator: &str) -> Result<String> {
        self.table
            .read()
            .await
            .containers
            .get(container_locator)
            .cloned()
            .ok_or_else(|| {
                TrackerError::Resolution(format!("no instance for container {}", container_locator))
            })
    }

    async fn resolve_instance_type(&self, instance_id: &str) -> Result<String> {
        self.table
            .read()
            .await
            .instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| {
                TrackerError::Resolution(format!("no instance type for {}", instance_id))
            })
    }
}
