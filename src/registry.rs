//! Credential Registry (C1): per-appliance lookup with a short read-through
//! cache in front of the caller-supplied [`ApplianceRepository`].
//!
//! Design Note (§9): "never log passwords" — nothing in this module ever
//! formats `Appliance.password`; [`tracing`] events log only the appliance
//! id and whether a lookup hit the cache.

use crate::domain::Appliance;
use crate::error::CoreError;
use crate::repository::ApplianceRepository;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct CachedAppliance {
    appliance: Appliance,
    cached_at: Instant,
}

/// Read-through cache over an [`ApplianceRepository`] (§4.1).
pub struct CredentialRegistry {
    repository: Arc<dyn ApplianceRepository>,
    cache: Mutex<HashMap<String, CachedAppliance>>,
    ttl: Duration,
}

impl CredentialRegistry {
    pub fn new(repository: Arc<dyn ApplianceRepository>, ttl: Duration) -> Self {
        Self {
            repository,
            cache: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Look up one appliance by id, failing with [`CoreError::NotFound`]
    /// when absent (§4.1).
    pub async fn lookup(&self, id: &str) -> Result<Appliance, CoreError> {
        if let Some(appliance) = self.cached(id).await {
            tracing::debug!(appliance_id = id, cache = "hit", "credential registry lookup");
            return Ok(appliance);
        }

        tracing::debug!(appliance_id = id, cache = "miss", "credential registry lookup");
        let appliance = self.repository.lookup(id).await?;
        self.store(appliance.clone()).await;
        Ok(appliance)
    }

    /// All currently-active appliances, always read through to the
    /// repository (list membership can change; caching it would risk
    /// operating on a stale fleet).
    pub async fn list_active(&self) -> Result<Vec<Appliance>, CoreError> {
        self.repository.list_active().await
    }

    async fn cached(&self, id: &str) -> Option<Appliance> {
        let guard = self.cache.lock().await;
        let entry = guard.get(id)?;
        if entry.cached_at.elapsed() < self.ttl {
            Some(entry.appliance.clone())
        } else {
            None
        }
    }

    async fn store(&self, appliance: Appliance) {
        let mut guard = self.cache.lock().await;
        guard.insert(
            appliance.id.clone(),
            CachedAppliance {
                appliance,
                cached_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryApplianceRepository;

    fn appliance(id: &str) -> Appliance {
        Appliance {
            id: id.to_string(),
            base_url: "https://sbc.example.test".to_string(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            accept_invalid_certs: false,
        }
    }

    #[tokio::test]
    async fn lookup_returns_not_found_for_unregistered_id() {
        let repo = Arc::new(InMemoryApplianceRepository::default());
        let registry = CredentialRegistry::new(repo, Duration::from_secs(600));
        let result = registry.lookup("missing").await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn lookup_returns_the_registered_appliance() {
        let repo = Arc::new(InMemoryApplianceRepository::default());
        repo.insert(appliance("app-1"));
        let registry = CredentialRegistry::new(repo, Duration::from_secs(600));
        let found = registry.lookup("app-1").await.unwrap();
        assert_eq!(found.id, "app-1");
    }

    #[tokio::test]
    async fn a_zero_ttl_never_serves_from_cache() {
        let repo = Arc::new(InMemoryApplianceRepository::default());
        repo.insert(appliance("app-1"));
        let registry = CredentialRegistry::new(repo.clone(), Duration::from_secs(0));
        registry.lookup("app-1").await.unwrap();
        // A second lookup still succeeds by reading through, even though the
        // cache entry from the first call is already stale.
        let found = registry.lookup("app-1").await.unwrap();
        assert_eq!(found.id, "app-1");
    }

    #[tokio::test]
    async fn list_active_delegates_to_the_repository() {
        let repo = Arc::new(InMemoryApplianceRepository::default());
        repo.insert(appliance("app-1"));
        repo.insert(appliance("app-2"));
        let registry = CredentialRegistry::new(repo, Duration::from_secs(600));
        let all = registry.list_active().await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
