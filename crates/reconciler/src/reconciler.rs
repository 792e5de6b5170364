//! The reconcile contract.

use async_trait::async_trait;
use steward_core::ObjectKey;

use crate::types::Outcome;

/// Drives one resource toward its declared state.
///
/// Called by workers with the key of a resource that may have changed. The
/// implementation reads current state from the cache, so it must treat a
/// missing object as already deleted. Calls for different keys run
/// concurrently; calls for one key never overlap. Calling twice with no
/// external change in between must converge to the same state without
/// repeating side effects.
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Reconcile the resource identified by `key`.
    async fn reconcile(&self, key: &ObjectKey) -> Outcome;
}

#[async_trait]
impl<F, Fut> Reconcile for F
where
    F: Fn(ObjectKey) -> Fut + Send + Sync,
    Fut: Future<Output = Outcome> + Send,
{
    async fn reconcile(&self, key: &ObjectKey) -> Outcome {
        self(key.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOk;

    #[async_trait]
    impl Reconcile for AlwaysOk {
        async fn reconcile(&self, _key: &ObjectKey) -> Outcome {
            Outcome::Success
        }
    }

    #[tokio::test]
    async fn test_struct_reconciler() -> Result<(), Box<dyn std::error::Error>> {
        let key = ObjectKey::namespaced("ns", "foo")?;
        assert_eq!(AlwaysOk.reconcile(&key).await, Outcome::Success);
        Ok(())
    }

    #[tokio::test]
    async fn test_closure_reconciler() -> Result<(), Box<dyn std::error::Error>> {
        let reconciler = |key: ObjectKey| async move {
            if key.name() == "gone" {
                Outcome::not_found(key)
            } else {
                Outcome::Success
            }
        };
        let gone = ObjectKey::namespaced("ns", "gone")?;
        assert!(matches!(
            reconciler.reconcile(&gone).await,
            Outcome::Terminal(ref e) if e.is_not_found()
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_trait_object() -> Result<(), Box<dyn std::error::Error>> {
        let reconciler: Box<dyn Reconcile> =
            Box::new(|_key: ObjectKey| async { Outcome::retriable("busy") });
        let key = ObjectKey::cluster("node-1")?;
        assert!(matches!(reconciler.reconcile(&key).await, Outcome::Retriable(_)));
        Ok(())
    }
}
