//! Tenant-wide destination presence, cached with a 30 s TTL. This is the
//! only cross-session mutable state in the whole bridge (spec.md §5),
//! guarded by `DashMap`'s internal sharding and bounded by approximate-LRU
//! capacity eviction, grounded on `spark-switch::applications::location::LocationStore`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use voicebridge_core::{Clock, TenantId, VoiceError};

pub const PRESENCE_TTL: Duration = Duration::from_secs(30);
pub const MAX_CACHE_ENTRIES: usize = 4096;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// The switch-control-socket equivalent of `sofia_contact` (spec.md §6):
/// registration status for one destination in a tenant's domain. Ring
/// groups and queues resolve membership to a single boolean before calling
/// this, one member at a time.
#[async_trait]
pub trait PresenceSource: Send + Sync {
    async fn query(&self, tenant: &TenantId, destination: &str) -> Result<PresenceStatus, VoiceError>;
}

struct CacheEntry {
    status: PresenceStatus,
    cached_at: std::time::Instant,
}

type Key = (TenantId, String);

/// Arc-shared, lazily-expiring presence cache. No background sweep: entries
/// are checked for staleness on read, and a FIFO `order` queue bounds memory
/// with eviction of the least-recently-touched key.
#[derive(Clone)]
pub struct PresenceCache {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_entries: usize,
    entries: Arc<DashMap<Key, CacheEntry>>,
    order: Arc<Mutex<VecDeque<Key>>>,
}

impl PresenceCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(clock, PRESENCE_TTL, MAX_CACHE_ENTRIES)
    }

    pub fn with_capacity(clock: Arc<dyn Clock>, ttl: Duration, max_entries: usize) -> Self {
        Self {
            clock,
            ttl,
            max_entries,
            entries: Arc::new(DashMap::new()),
            order: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Resolve presence for `destination`, using a cached value if fresh,
    /// else querying `source` and caching the result.
    pub async fn resolve(
        &self,
        tenant: &TenantId,
        destination: &str,
        source: &dyn PresenceSource,
    ) -> Result<PresenceStatus, VoiceError> {
        let key = (tenant.clone(), destination.to_string());

        if let Some(status) = self.fresh_hit(&key) {
            return Ok(status);
        }

        let status = source.query(tenant, destination).await?;
        self.insert(key, status);
        Ok(status)
    }

    fn fresh_hit(&self, key: &Key) -> Option<PresenceStatus> {
        let entry = self.entries.get(key)?;
        if self.clock.now().saturating_duration_since(entry.cached_at) >= self.ttl {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        let status = entry.status;
        drop(entry);
        self.touch(key);
        Some(status)
    }

    fn touch(&self, key: &Key) {
        let mut order = self.order.lock().unwrap();
        Self::move_to_back(&mut order, key);
    }

    fn insert(&self, key: Key, status: PresenceStatus) {
        let is_new = !self.entries.contains_key(&key);
        self.entries.insert(
            key.clone(),
            CacheEntry {
                status,
                cached_at: self.clock.now(),
            },
        );

        let mut order = self.order.lock().unwrap();
        if is_new {
            order.push_back(key);
            while order.len() > self.max_entries {
                if let Some(evicted) = order.pop_front() {
                    self.entries.remove(&evicted);
                }
            }
        } else {
            Self::move_to_back(&mut order, &key);
        }
    }

    fn move_to_back(order: &mut VecDeque<Key>, key: &Key) {
        if let Some(pos) = order.iter().position(|k| k == key) {
            let k = order.remove(pos).unwrap();
            order.push_back(k);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use voicebridge_core::FakeClock;

    struct CountingSource {
        status: PresenceStatus,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PresenceSource for CountingSource {
        async fn query(&self, _tenant: &TenantId, _destination: &str) -> Result<PresenceStatus, VoiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.status)
        }
    }

    #[tokio::test]
    async fn caches_hit_without_requerying() {
        let clock = Arc::new(FakeClock::new());
        let cache = PresenceCache::new(clock.clone());
        let source = CountingSource {
            status: PresenceStatus::Online,
            calls: AtomicUsize::new(0),
        };
        let tenant = TenantId::new("t1").unwrap();

        let first = cache.resolve(&tenant, "1004", &source).await.unwrap();
        let second = cache.resolve(&tenant, "1004", &source).await.unwrap();

        assert_eq!(first, PresenceStatus::Online);
        assert_eq!(second, PresenceStatus::Online);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expires_after_ttl() {
        let clock = Arc::new(FakeClock::new());
        let cache = PresenceCache::new(clock.clone());
        let source = CountingSource {
            status: PresenceStatus::Online,
            calls: AtomicUsize::new(0),
        };
        let tenant = TenantId::new("t1").unwrap();

        cache.resolve(&tenant, "1004", &source).await.unwrap();
        clock.advance(PRESENCE_TTL + Duration::from_secs(1));
        cache.resolve(&tenant, "1004", &source).await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn evicts_least_recently_touched_beyond_capacity() {
        let clock = Arc::new(FakeClock::new());
        let cache = PresenceCache::with_capacity(clock.clone(), PRESENCE_TTL, 2);
        let source = CountingSource {
            status: PresenceStatus::Offline,
            calls: AtomicUsize::new(0),
        };
        let tenant = TenantId::new("t1").unwrap();

        cache.resolve(&tenant, "a", &source).await.unwrap();
        cache.resolve(&tenant, "b", &source).await.unwrap();
        cache.resolve(&tenant, "c", &source).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(!cache.entries.contains_key(&(tenant.clone(), "a".to_string())));
    }
}
