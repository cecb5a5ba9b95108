/// Scope chain resolver with TTL caching
///
/// Builds the ancestor chain of a scope instance, e.g.
/// `team/core → [team/core, project/web, organization/acme]`, through the
/// injected [`ScopeHierarchy`], and caches the result.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::warn;

use super::hierarchy::ScopeHierarchy;
use crate::error::Result;
use crate::registry::RoleRegistry;
use crate::types::ScopeRef;

/// Default cache TTL (60 seconds)
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Chains deeper than this are cut off
const MAX_CHAIN_DEPTH: usize = 32;

/// Cache entry with TTL
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    created_at: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }

    /// Returns the value if not expired, None otherwise
    fn get(&self) -> Option<&T> {
        if self.is_expired() {
            None
        } else {
            Some(&self.value)
        }
    }
}

/// Statistics about cache performance
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    /// Number of expired entries encountered
    pub expirations: usize,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Resolves scope-instance ancestor chains with caching
///
/// Parent links that contradict the registry's scope tree, cycles, and chains
/// deeper than a fixed bound end the chain with a warning instead of failing
/// the permission check.
pub struct ScopeResolver {
    registry: Arc<RoleRegistry>,
    hierarchy: Arc<dyn ScopeHierarchy>,
    chain_cache: DashMap<ScopeRef, CacheEntry<Vec<ScopeRef>>>,
    ttl: Duration,
    hits: AtomicUsize,
    misses: AtomicUsize,
    expirations: AtomicUsize,
}

impl ScopeResolver {
    pub fn new(registry: Arc<RoleRegistry>, hierarchy: Arc<dyn ScopeHierarchy>) -> Self {
        Self::with_ttl(registry, hierarchy, DEFAULT_CACHE_TTL)
    }

    /// Creates a resolver with a custom TTL; a zero TTL disables caching
    pub fn with_ttl(
        registry: Arc<RoleRegistry>,
        hierarchy: Arc<dyn ScopeHierarchy>,
        ttl: Duration,
    ) -> Self {
        Self {
            registry,
            hierarchy,
            chain_cache: DashMap::new(),
            ttl,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            expirations: AtomicUsize::new(0),
        }
    }

    /// Builds the chain `[target, parent, grandparent, …]`
    pub async fn build_chain(&self, target: &ScopeRef) -> Result<Vec<ScopeRef>> {
        if !self.ttl.is_zero() {
            if let Some(entry) = self.chain_cache.get(target) {
                if let Some(chain) = entry.get() {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(chain.clone());
                }
                self.expirations.fetch_add(1, Ordering::Relaxed);
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }

        let chain = self.build_chain_uncached(target).await?;

        if !self.ttl.is_zero() {
            self.chain_cache
                .insert(target.clone(), CacheEntry::new(chain.clone(), self.ttl));
        }

        Ok(chain)
    }

    async fn build_chain_uncached(&self, target: &ScopeRef) -> Result<Vec<ScopeRef>> {
        let mut chain = vec![target.clone()];
        let mut seen: HashSet<ScopeRef> = HashSet::from([target.clone()]);
        let mut current = target.clone();

        while let Some(parent) = self.hierarchy.parent(&current).await? {
            if !self.registry.is_descendant(&current.scope, &parent.scope) {
                warn!(
                    "Ignoring parent link {} -> {}: scope '{}' does not enclose '{}'",
                    current, parent, parent.scope, current.scope
                );
                break;
            }
            if !seen.insert(parent.clone()) {
                warn!("Scope hierarchy cycle at {} while resolving {}", parent, target);
                break;
            }
            if chain.len() >= MAX_CHAIN_DEPTH {
                warn!("Scope chain for {} exceeds {} levels, truncating", target, MAX_CHAIN_DEPTH);
                break;
            }

            chain.push(parent.clone());
            current = parent;
        }

        Ok(chain)
    }

    /// Clears cached chains, e.g. after hierarchy links change
    pub fn clear_cache(&self) {
        self.chain_cache.clear();
    }

    /// Removes expired entries from the cache
    pub fn cleanup_expired(&self) {
        self.chain_cache.retain(|_, entry| !entry.is_expired());
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries: self.chain_cache.len(),
        }
    }

    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn cache_size(&self) -> usize {
        self.chain_cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{FlatHierarchy, InMemoryHierarchy};
    use async_trait::async_trait;
    use proptest::prelude::*;

    fn registry() -> Arc<RoleRegistry> {
        Arc::new(
            RoleRegistry::builder()
                .define_scope("organization")
                .define_scope("project")
                .within("organization")
                .define_scope("team")
                .within("project")
                .build()
                .unwrap(),
        )
    }

    fn linked() -> (Arc<RoleRegistry>, Arc<InMemoryHierarchy>) {
        let registry = registry();
        let hierarchy = Arc::new(InMemoryHierarchy::new(registry.clone()));
        hierarchy
            .link(ScopeRef::new("team", "core"), ScopeRef::new("project", "web"))
            .unwrap();
        hierarchy
            .link(ScopeRef::new("project", "web"), ScopeRef::new("organization", "acme"))
            .unwrap();
        (registry, hierarchy)
    }

    #[tokio::test]
    async fn test_build_chain() {
        let (registry, hierarchy) = linked();
        let resolver = ScopeResolver::new(registry, hierarchy);

        let chain = resolver.build_chain(&ScopeRef::new("team", "core")).await.unwrap();
        assert_eq!(
            chain,
            vec![
                ScopeRef::new("team", "core"),
                ScopeRef::new("project", "web"),
                ScopeRef::new("organization", "acme"),
            ]
        );
    }

    #[tokio::test]
    async fn test_flat_chain() {
        let resolver = ScopeResolver::new(registry(), Arc::new(FlatHierarchy));
        let chain = resolver
            .build_chain(&ScopeRef::new("project", "web"))
            .await
            .unwrap();
        assert_eq!(chain, vec![ScopeRef::new("project", "web")]);
    }

    #[tokio::test]
    async fn test_chain_caching() {
        let (registry, hierarchy) = linked();
        let resolver = ScopeResolver::new(registry, hierarchy);
        let target = ScopeRef::new("project", "web");

        let chain1 = resolver.build_chain(&target).await.unwrap();
        assert_eq!(resolver.stats().misses, 1);

        let chain2 = resolver.build_chain(&target).await.unwrap();
        let stats = resolver.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
        assert!(stats.hit_rate() > 0.0);
        assert_eq!(chain1, chain2);
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_cache() {
        let (registry, hierarchy) = linked();
        let resolver = ScopeResolver::with_ttl(registry, hierarchy, Duration::ZERO);

        resolver.build_chain(&ScopeRef::new("project", "web")).await.unwrap();
        assert_eq!(resolver.cache_size(), 0);
    }

    #[tokio::test]
    async fn test_cache_expiration() {
        let (registry, hierarchy) = linked();
        let resolver = ScopeResolver::with_ttl(registry, hierarchy, Duration::from_millis(20));
        let target = ScopeRef::new("project", "web");

        resolver.build_chain(&target).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        resolver.build_chain(&target).await.unwrap();

        assert!(resolver.stats().expirations > 0);
        resolver.cleanup_expired();
    }

    #[tokio::test]
    async fn test_clear_cache_sees_new_links() {
        let (registry, hierarchy) = linked();
        let resolver = ScopeResolver::new(registry, hierarchy.clone());
        let target = ScopeRef::new("project", "api");

        assert_eq!(resolver.build_chain(&target).await.unwrap().len(), 1);

        hierarchy
            .link(target.clone(), ScopeRef::new("organization", "acme"))
            .unwrap();
        resolver.clear_cache();

        assert_eq!(resolver.build_chain(&target).await.unwrap().len(), 2);
    }

    struct CyclicHierarchy;

    #[async_trait]
    impl ScopeHierarchy for CyclicHierarchy {
        async fn parent(&self, target: &ScopeRef) -> Result<Option<ScopeRef>> {
            Ok(match target.scope.as_str() {
                "team" => Some(ScopeRef::new("project", "web")),
                "project" => Some(ScopeRef::new("organization", "acme")),
                // points back down the tree
                _ => Some(ScopeRef::new("team", "core")),
            })
        }
    }

    #[tokio::test]
    async fn test_contradicting_links_end_chain() {
        let resolver = ScopeResolver::new(registry(), Arc::new(CyclicHierarchy));
        let chain = resolver.build_chain(&ScopeRef::new("team", "core")).await.unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[2], ScopeRef::new("organization", "acme"));
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let (registry, hierarchy) = linked();
        let resolver = Arc::new(ScopeResolver::new(registry, hierarchy));
        let mut handles = vec![];

        for _ in 0..10 {
            let resolver = Arc::clone(&resolver);
            handles.push(tokio::spawn(async move {
                resolver
                    .build_chain(&ScopeRef::new("team", "core"))
                    .await
                    .unwrap()
                    .len()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 3);
        }

        let stats = resolver.stats();
        assert_eq!(stats.hits + stats.misses, 10);
    }

    proptest! {
        #[test]
        fn prop_chain_walks_every_link(
            org in "[a-z]{3,8}",
            project in "[a-z]{3,8}",
            team in "[a-z0-9]{3,8}"
        ) {
            let registry = registry();
            let hierarchy = Arc::new(InMemoryHierarchy::new(registry.clone()));
            hierarchy
                .link(ScopeRef::new("team", &team), ScopeRef::new("project", &project))
                .unwrap();
            hierarchy
                .link(ScopeRef::new("project", &project), ScopeRef::new("organization", &org))
                .unwrap();
            let resolver = ScopeResolver::new(registry, hierarchy);

            let chain = tokio_test::block_on(resolver.build_chain(&ScopeRef::new("team", &team)))
                .unwrap();

            prop_assert_eq!(chain.len(), 3);
            prop_assert_eq!(&chain[0], &ScopeRef::new("team", &team));
            prop_assert_eq!(&chain[2], &ScopeRef::new("organization", &org));
        }
    }
}
