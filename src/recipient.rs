use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::model::Destination;

/// Read-only lookup of the active device token per owner.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn lookup_by_owner(&self, owner_id: &str) -> Result<Option<String>>;
}

#[derive(Debug, Error)]
pub enum ResolveError {
    /// Empty owner, no token row, or an empty token value.
    #[error("no destination for owner")]
    NotFound,
    #[error("token store failure: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// Maps an owner id to its current destination. One store lookup per call,
/// nothing cached: tokens can rotate between dispatches.
#[derive(Clone)]
pub struct RecipientResolver {
    store: Arc<dyn TokenStore>,
}

impl RecipientResolver {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    #[instrument(skip_all, fields(owner_id = %owner_id))]
    pub async fn resolve(&self, owner_id: &str) -> Result<Destination, ResolveError> {
        let owner_id = owner_id.trim();
        if owner_id.is_empty() {
            return Err(ResolveError::NotFound);
        }
        let token = self.store.lookup_by_owner(owner_id).await?;
        match token.map(|t| t.trim().to_string()) {
            Some(token) if !token.is_empty() => Ok(Destination {
                owner_id: owner_id.to_string(),
                token,
            }),
            _ => {
                debug!("no usable token on record");
                Err(ResolveError::NotFound)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MapStore {
        tokens: HashMap<String, String>,
        fail: bool,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl TokenStore for MapStore {
        async fn lookup_by_owner(&self, owner_id: &str) -> Result<Option<String>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("store offline"));
            }
            Ok(self.tokens.get(owner_id).cloned())
        }
    }

    fn resolver_with(store: MapStore) -> (RecipientResolver, Arc<MapStore>) {
        let store = Arc::new(store);
        (RecipientResolver::new(store.clone()), store)
    }

    #[tokio::test]
    async fn resolves_existing_token() {
        let mut store = MapStore::default();
        store.tokens.insert("u1".into(), "T1".into());
        let (resolver, _) = resolver_with(store);
        let dest = resolver.resolve("u1").await.unwrap();
        assert_eq!(dest.owner_id, "u1");
        assert_eq!(dest.token, "T1");
    }

    #[tokio::test]
    async fn not_found_cases_collapse() {
        let mut store = MapStore::default();
        store.tokens.insert("blank".into(), "  ".into());
        let (resolver, store) = resolver_with(store);

        assert!(matches!(resolver.resolve("").await, Err(ResolveError::NotFound)));
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
        assert!(matches!(resolver.resolve("ghost").await, Err(ResolveError::NotFound)));
        assert!(matches!(resolver.resolve("blank").await, Err(ResolveError::NotFound)));
    }

    #[tokio::test]
    async fn store_failure_is_distinct_from_not_found() {
        let (resolver, _) = resolver_with(MapStore {
            fail: true,
            ..Default::default()
        });
        let err = resolver.resolve("u1").await.unwrap_err();
        assert!(matches!(err, ResolveError::Store(_)));
        assert!(err.to_string().contains("store offline"));
    }

    #[tokio::test]
    async fn every_resolve_hits_the_store() {
        let mut store = MapStore::default();
        store.tokens.insert("u1".into(), "T1".into());
        let (resolver, store) = resolver_with(store);
        resolver.resolve("u1").await.unwrap();
        resolver.resolve("u1").await.unwrap();
        assert_eq!(store.lookups.load(Ordering::SeqCst), 2);
    }
}
