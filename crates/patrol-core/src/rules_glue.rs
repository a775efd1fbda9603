//! Primitives consumed by the out-of-scope rules-job handler: alert dedupe,
//! IOC cache versioning, and allowlist checking (`spec.md` §4.9, C9).

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use uuid::Uuid;

use crate::model::CacheVersion;

const DEDUPE_TTL: Duration = Duration::from_secs(120);

/// Tuple identifying an alert-worthy observation for at-most-once emission
/// within a TTL window (`spec.md` Glossary: Dedupe fingerprint).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupeFingerprint {
    pub site_id: Uuid,
    pub rule_id: Uuid,
    pub event_signature: u64,
}

/// Race-free set-if-absent dedupe cache: `should_alert` returns `true` at
/// most once per TTL window per key.
pub struct DedupeCache {
    entries: DashMap<DedupeFingerprint, tokio::time::Instant>,
    ttl: Duration,
}

impl Default for DedupeCache {
    fn default() -> Self {
        Self::new(DEDUPE_TTL)
    }
}

impl DedupeCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    /// Returns `true` if this fingerprint has not been seen within the TTL
    /// window (and records it as seen), `false` otherwise.
    pub fn should_alert(&self, fingerprint: DedupeFingerprint) -> bool {
        let now = tokio::time::Instant::now();

        // `DashMap::entry` holds the shard lock for the duration of the
        // closure, making the expiry-check-then-insert atomic across
        // concurrent callers for the same key.
        match self.entries.entry(fingerprint) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if now.duration_since(*occupied.get()) >= self.ttl {
                    occupied.insert(now);
                    true
                } else {
                    false
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
        }
    }
}

/// Monotonic integer per logical cache namespace. Derived caches embed the
/// current version in their keys so a bump makes stale entries unreachable
/// without key enumeration.
#[derive(Default)]
pub struct CacheVersionRegistry {
    versions: DashMap<String, AtomicU64>,
}

impl CacheVersionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self, namespace: &str) -> CacheVersion {
        let counter = self
            .versions
            .entry(namespace.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        CacheVersion(counter.load(Ordering::Acquire))
    }

    /// Bump the namespace's version, invalidating derived caches keyed by it.
    pub fn bump(&self, namespace: &str) -> CacheVersion {
        let counter = self
            .versions
            .entry(namespace.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        let new_version = counter.fetch_add(1, Ordering::AcqRel) + 1;
        CacheVersion(new_version)
    }
}

/// The out-of-scope allowlist service this cache sits in front of.
#[async_trait::async_trait]
pub trait AllowlistSource: Send + Sync {
    async fn is_allowed(&self, domain: &str) -> bool;
}

/// LRU + TTL cache over `AllowlistSource`. O(1) on cache hit.
pub struct AllowlistChecker {
    cache: moka::sync::Cache<String, bool>,
    source: std::sync::Arc<dyn AllowlistSource>,
}

impl AllowlistChecker {
    pub fn new(source: std::sync::Arc<dyn AllowlistSource>, capacity: u64, ttl: Duration) -> Self {
        let cache = moka::sync::Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self { cache, source }
    }

    pub async fn is_allowed(&self, domain: &str) -> bool {
        if let Some(hit) = self.cache.get(domain) {
            return hit;
        }

        let allowed = self.source.is_allowed(domain).await;
        self.cache.insert(domain.to_string(), allowed);
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn dedupe_fires_once_per_ttl_window() {
        let cache = DedupeCache::new(StdDuration::from_millis(50));
        let fp = DedupeFingerprint { site_id: Uuid::new_v4(), rule_id: Uuid::new_v4(), event_signature: 1 };

        assert!(cache.should_alert(fp));
        assert!(!cache.should_alert(fp));

        tokio::time::sleep(StdDuration::from_millis(60)).await;
        assert!(cache.should_alert(fp));
    }

    #[test]
    fn version_registry_bumps_monotonically() {
        let registry = CacheVersionRegistry::new();
        assert_eq!(registry.current("ioc").0, 0);
        assert_eq!(registry.bump("ioc").0, 1);
        assert_eq!(registry.bump("ioc").0, 2);
        assert_eq!(registry.current("ioc").0, 2);
        // Independent namespaces don't share counters.
        assert_eq!(registry.current("other").0, 0);
    }

    struct AlwaysAllow;
    #[async_trait::async_trait]
    impl AllowlistSource for AlwaysAllow {
        async fn is_allowed(&self, _domain: &str) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn allowlist_checker_caches_hits() {
        let checker = AllowlistChecker::new(
            std::sync::Arc::new(AlwaysAllow),
            100,
            StdDuration::from_secs(60),
        );
        assert!(checker.is_allowed("example.com").await);
        assert!(checker.is_allowed("example.com").await);
    }
}
