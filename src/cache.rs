//! Response cache keyed by request identity.
//!
//! [`CacheStore`] is raw keyed storage and the seam for durable stores.
//! [`Cache`] is the freshness-aware view the executor talks to: records older
//! than the configured life are invisible to reads but stay stored until they
//! are overwritten or deleted. There is no background sweep.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::TransportResponse;

/// Millisecond wall clock used to stamp and age records.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CacheRecord {
    pub key: String,
    pub response: TransportResponse,
    pub stored_at_ms: u64,
}

/// Keyed record storage shared by every instance targeting the same identity.
///
/// Writes are last-writer-wins snapshots; implementations need no ordering
/// beyond that.
pub trait CacheStore: Send + Sync {
    fn load(&self, key: &str) -> Option<CacheRecord>;
    fn store(&self, record: CacheRecord);
    fn remove(&self, key: &str);
    fn clear(&self);
}

/// In-process [`CacheStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, CacheRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of physically stored records, expired ones included.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl CacheStore for MemoryStore {
    fn load(&self, key: &str) -> Option<CacheRecord> {
        self.records.read().get(key).cloned()
    }

    fn store(&self, record: CacheRecord) {
        self.records.write().insert(record.key.clone(), record);
    }

    fn remove(&self, key: &str) {
        self.records.write().remove(key);
    }

    fn clear(&self) {
        self.records.write().clear();
    }
}

/// Freshness-aware view over a [`CacheStore`].
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    life_ms: u64,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("life_ms", &self.life_ms)
            .finish_non_exhaustive()
    }
}

impl Cache {
    /// `life_ms == 0` means records never go stale.
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, life_ms: u64) -> Self {
        Self {
            store,
            clock,
            life_ms,
        }
    }

    pub fn life_ms(&self) -> u64 {
        self.life_ms
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<TransportResponse> {
        let record = self.store.load(key)?;
        self.is_fresh(&record).then_some(record.response)
    }

    pub fn set(&self, key: &str, response: TransportResponse) {
        self.store.store(CacheRecord {
            key: key.to_owned(),
            response,
            stored_at_ms: self.clock.now_ms(),
        });
    }

    pub fn delete(&self, key: &str) {
        self.store.remove(key);
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    fn is_fresh(&self, record: &CacheRecord) -> bool {
        self.life_ms == 0 || self.clock.now_ms().saturating_sub(record.stored_at_ms) < self.life_ms
    }
}

#[cfg(test)]
mod tests {
    use super::{Cache, CacheStore, Clock, MemoryStore};
    use crate::TransportResponse;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct ManualClock(AtomicU64);

    impl ManualClock {
        fn advance(&self, ms: u64) {
            self.0.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn cache(life_ms: u64) -> (Cache, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let cache = Cache::new(store.clone(), clock.clone(), life_ms);
        (cache, store, clock)
    }

    #[test]
    fn read_before_life_elapses_returns_stored_response() {
        let (cache, _, clock) = cache(100);
        let response = TransportResponse::new(200, r#"{"v":1}"#);
        cache.set("k", response.clone());

        clock.advance(99);
        assert!(cache.has("k"));
        assert_eq!(cache.get("k"), Some(response));
    }

    #[test]
    fn expired_record_is_invisible_but_still_stored() {
        let (cache, store, clock) = cache(100);
        cache.set("k", TransportResponse::new(200, "x"));

        clock.advance(100);
        assert!(!cache.has("k"));
        assert!(cache.get("k").is_none());
        assert_eq!(store.len(), 1);
        assert!(store.load("k").is_some());
    }

    #[test]
    fn zero_life_never_expires() {
        let (cache, _, clock) = cache(0);
        cache.set("k", TransportResponse::new(200, "x"));
        clock.advance(u64::from(u32::MAX));
        assert!(cache.has("k"));
    }

    #[test]
    fn overwrite_refreshes_timestamp_and_delete_removes() {
        let (cache, store, clock) = cache(50);
        cache.set("k", TransportResponse::new(200, "old"));
        clock.advance(60);
        cache.set("k", TransportResponse::new(200, "new"));
        assert_eq!(cache.get("k").map(|r| r.text()), Some("new".to_owned()));

        cache.delete("k");
        assert!(store.is_empty());
    }
}
