//! TTL-bounded result cache keyed by plan fingerprint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::fingerprint::Fingerprint;
use crate::PipelineOutput;

struct CacheEntry {
    output: PipelineOutput,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn expired(&self) -> bool {
        self.stored_at.elapsed() >= self.ttl
    }
}

struct CacheInner {
    default_ttl: Duration,
    entries: Mutex<HashMap<Fingerprint, CacheEntry>>,
}

/// Shared in-memory cache of final pipeline outputs.
///
/// Expired entries are evicted lazily on lookup; `spawn_sweeper` adds an
/// optional periodic sweep. There is no eager invalidation on backend
/// writes; staleness is bounded by the TTL.
///
/// A zero `default_ttl` disables caching: nothing is stored, nothing hits.
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<CacheInner>,
}

impl ResultCache {
    pub fn new(default_ttl: Duration) -> ResultCache {
        ResultCache {
            inner: Arc::new(CacheInner {
                default_ttl,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    /// Returns the cached output, or nothing when absent or expired.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<PipelineOutput> {
        let mut entries = self.inner.entries.lock();
        match entries.get(fingerprint) {
            Some(entry) if !entry.expired() => Some(entry.output.clone()),
            Some(_) => {
                entries.remove(fingerprint);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, fingerprint: Fingerprint, output: PipelineOutput, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        self.inner.entries.lock().insert(
            fingerprint,
            CacheEntry {
                output,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Drop every expired entry.
    pub fn sweep(&self) {
        let mut entries = self.inner.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.expired());
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "swept expired cache entries");
        }
    }

    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                cache.sweep();
            }
        })
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;

    fn output(tag: &str) -> PipelineOutput {
        let mut results = IndexMap::new();
        results.insert(tag.to_string(), vec![serde_json::json!({"v": tag})]);
        PipelineOutput {
            results,
            warnings: Vec::new(),
        }
    }

    fn key(tag: &str) -> Fingerprint {
        use crate::plan::{Plan, Stage};
        use schemastore::BackendKind;
        Plan::new(vec![Stage {
            index: 0,
            backend: BackendKind::Postgres,
            query: tag.to_string(),
            params: Default::default(),
            output_label: None,
            description: None,
        }])
        .fingerprint()
    }

    #[test]
    fn round_trip() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.put(key("a"), output("a"), cache.default_ttl());
        assert_eq!(cache.get(&key("a")), Some(output("a")));
        assert_eq!(cache.get(&key("b")), None);
    }

    #[test]
    fn expired_entries_miss_and_are_evicted() {
        let cache = ResultCache::new(Duration::from_millis(10));
        cache.put(key("a"), output("a"), cache.default_ttl());
        assert_eq!(cache.len(), 1);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get(&key("a")), None);
        // Lazy eviction removed the entry on lookup.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let cache = ResultCache::new(Duration::from_millis(10));
        cache.put(key("a"), output("a"), Duration::from_millis(10));
        cache.put(key("b"), output("b"), Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(20));
        cache.sweep();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key("b")), Some(output("b")));
    }

    #[test]
    fn zero_ttl_disables_storage() {
        let cache = ResultCache::new(Duration::ZERO);
        cache.put(key("a"), output("a"), cache.default_ttl());
        assert!(cache.is_empty());
        assert_eq!(cache.get(&key("a")), None);
    }
}
