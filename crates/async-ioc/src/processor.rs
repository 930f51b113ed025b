use async_trait::async_trait;

use crate::types::Instance;

/// Framework hook around component initialization.
///
/// Returning a different instance wraps the component: callers of `get`
/// receive the returned instance instead of the raw one.
#[async_trait]
pub trait PostProcessor: Send + Sync + 'static {
    async fn before_initialization(&self, instance: Instance, _name: &str) -> anyhow::Result<Instance> {
        Ok(instance)
    }

    async fn after_initialization(&self, instance: Instance, _name: &str) -> anyhow::Result<Instance> {
        Ok(instance)
    }
}
