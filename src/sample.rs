//! Sample resource and reconciler driven by the binary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use steward_core::{ObjectKey, ObjectMeta, Resource};
use steward_informer::Lister;
use steward_reconciler::{Outcome, Reconcile};
use tracing::info;

/// A resource with free-form desired state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleResource {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl SampleResource {
    pub fn new(metadata: ObjectMeta, spec: serde_json::Value) -> Self {
        Self { metadata, spec }
    }
}

impl Resource for SampleResource {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
}

/// Logs the desired state of every resource it reconciles.
///
/// A key missing from the cache means the resource was deleted, which is
/// reported as [`Outcome::not_found`].
pub struct SpecLogger {
    lister: Lister<SampleResource>,
}

impl SpecLogger {
    pub fn new(lister: Lister<SampleResource>) -> Self {
        Self { lister }
    }
}

#[async_trait]
impl Reconcile for SpecLogger {
    async fn reconcile(&self, key: &ObjectKey) -> Outcome {
        let Some(resource) = self.lister.get_by_key(key) else {
            return Outcome::not_found(key.clone());
        };
        match serde_json::to_string(&resource.spec) {
            Ok(spec) => {
                info!(
                    key = %key,
                    resource_version = resource.metadata.resource_version,
                    spec = %spec,
                    "Observed desired state"
                );
                Outcome::Success
            }
            Err(e) => Outcome::terminal(format!("spec is not serializable: {e}")),
        }
    }
}
