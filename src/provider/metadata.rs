//! Provider address → `{endpoint, model}` resolution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::InferenceError;
use crate::provider::{ProviderRegistry, ServiceMetadata};

/// Resolves service metadata, optionally memoizing it for one session.
pub struct MetadataResolver {
    registry: Arc<dyn ProviderRegistry>,
    cache: Option<Mutex<HashMap<String, ServiceMetadata>>>,
}

impl MetadataResolver {
    pub fn new(registry: Arc<dyn ProviderRegistry>, cache_enabled: bool) -> Self {
        Self {
            registry,
            cache: cache_enabled.then(|| Mutex::new(HashMap::new())),
        }
    }

    pub async fn resolve(&self, provider: &str) -> Result<ServiceMetadata, InferenceError> {
        if let Some(cache) = &self.cache
            && let Some(hit) = cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .get(provider)
                .cloned()
        {
            tracing::debug!(provider, "Service metadata cache hit");
            return Ok(hit);
        }

        let metadata = self.registry.service_metadata(provider).await?;
        tracing::debug!(
            provider,
            endpoint = %metadata.endpoint,
            model = %metadata.model,
            "Resolved service metadata"
        );

        if let Some(cache) = &self.cache {
            cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(provider.to_string(), metadata.clone());
        }
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::wallet::Identity;

    #[derive(Default)]
    struct CountingRegistry {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl ProviderRegistry for CountingRegistry {
        async fn acknowledge_provider(
            &self,
            _identity: &Identity,
            _provider: &str,
        ) -> Result<(), InferenceError> {
            Ok(())
        }

        async fn service_metadata(
            &self,
            provider: &str,
        ) -> Result<ServiceMetadata, InferenceError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if provider == "0xmissing" {
                return Err(InferenceError::ProviderUnreachable {
                    provider: provider.to_string(),
                    reason: "not registered".to_string(),
                });
            }
            ServiceMetadata::parse(provider, "https://node.example/v1", "llama-3.3-70b")
        }
    }

    #[tokio::test]
    async fn uncached_resolver_asks_every_time() {
        let registry = Arc::new(CountingRegistry::default());
        let resolver = MetadataResolver::new(registry.clone(), false);

        resolver.resolve("0xp").await.unwrap();
        resolver.resolve("0xp").await.unwrap();
        assert_eq!(registry.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cached_resolver_asks_once_per_provider() {
        let registry = Arc::new(CountingRegistry::default());
        let resolver = MetadataResolver::new(registry.clone(), true);

        let first = resolver.resolve("0xp").await.unwrap();
        let second = resolver.resolve("0xp").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.model, "llama-3.3-70b");
        assert_eq!(registry.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let registry = Arc::new(CountingRegistry::default());
        let resolver = MetadataResolver::new(registry.clone(), true);

        assert!(resolver.resolve("0xmissing").await.is_err());
        assert!(resolver.resolve("0xmissing").await.is_err());
        assert_eq!(registry.lookups.load(Ordering::SeqCst), 2);
    }
}
