//! Location resolver: orchestrates cache, rate gate and provider chain.
//!
//! Single flow:  cache (valid) → hit
//!               cache (invalid/corrupt) → delete → gate → chain → write-back
//! Batch flow:   resolve every distinct candidate in concurrent groups,
//!               then pick primary → first secondary → aggregated failure.

use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::cache::{CacheStore, SqliteCacheStore};
use super::policy::{EvictionPolicy, Validity, ValidityPolicy};
use super::providers::ProviderChain;
use super::types::{CacheError, CacheWrite, GeocodeResult, LocationError};
use crate::config::{BatchConfig, Config};
use crate::rate_gate::RateGate;

/// Candidate location strings extracted from one content item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidates {
    /// The extractor's most specific pick, if it marked one.
    pub primary: Option<String>,
    /// Alternate mentions, in extraction order.
    pub secondary: Vec<String>,
}

impl Candidates {
    pub fn new(primary: impl Into<String>, secondary: Vec<String>) -> Self {
        Self {
            primary: Some(primary.into()),
            secondary,
        }
    }

    /// Treat the first element as primary, the rest as secondaries.
    pub fn from_list(list: Vec<String>) -> Self {
        let mut iter = list.into_iter();
        Self {
            primary: iter.next(),
            secondary: iter.collect(),
        }
    }

    /// Only secondaries; no candidate gets precedence.
    pub fn unranked(list: Vec<String>) -> Self {
        Self {
            primary: None,
            secondary: list,
        }
    }

    fn primary_key(&self) -> Option<&str> {
        self.primary.as_deref().filter(|p| !p.trim().is_empty())
    }

    /// Distinct, non-blank candidates: primary first, then secondaries in order.
    /// Texts are kept exactly as given; they are cache keys.
    pub fn distinct(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.primary
            .iter()
            .chain(self.secondary.iter())
            .filter(|c| !c.trim().is_empty())
            .filter(|c| seen.insert(c.as_str()))
            .cloned()
            .collect()
    }
}

/// Per-candidate results plus the selected best pick.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub results: HashMap<String, GeocodeResult>,
    /// Which candidate `best` came from, if any succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,
    pub best: GeocodeResult,
}

/// Admin view of the cache.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_entries: u64,
    pub total_usage: u64,
    pub recent_entries: u64,
    /// Hits / (hits + misses) since process start.
    pub cache_hit_rate: f64,
    pub max_entries: u64,
    pub utilization_percent: f64,
}

/// The resolution engine. Collaborators are injected, so tests can
/// substitute fakes and several gates can coexist.
pub struct Resolver {
    store: Arc<dyn CacheStore>,
    gate: Arc<RateGate>,
    chain: ProviderChain,
    validity: ValidityPolicy,
    eviction: EvictionPolicy,
    batch_size: usize,
    batch_delay: Duration,
    recent_window: ChronoDuration,
    hits: AtomicU64,
    misses: AtomicU64,
    /// Held across the capacity check and the insert of a new key.
    write_lock: Mutex<()>,
}

impl Resolver {
    pub fn new(store: Arc<dyn CacheStore>, gate: Arc<RateGate>, chain: ProviderChain) -> Self {
        let batch = BatchConfig::default();
        Self {
            store,
            gate,
            chain,
            validity: ValidityPolicy::default(),
            eviction: EvictionPolicy::default(),
            batch_size: batch.group_size,
            batch_delay: batch.group_delay(),
            recent_window: ChronoDuration::hours(24),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    /// Wire up the SQLite store, geocoding gate and provider chain from config.
    pub fn from_config(config: &Config) -> Result<Self, CacheError> {
        let store = SqliteCacheStore::open(&config.cache.path)?;
        let gate = config.geocode_gate.to_gate("geocode");
        let chain = ProviderChain::from_config(&config.providers);
        info!(
            "Resolver ready: cache at {}, providers {:?}",
            config.cache.path.display(),
            chain.ids()
        );
        Ok(Self::new(Arc::new(store), Arc::new(gate), chain)
            .with_validity(config.cache.validity())
            .with_eviction(config.cache.eviction())
            .with_batch(&config.batch)
            .with_recent_window(config.cache.recent_window()))
    }

    pub fn with_validity(mut self, validity: ValidityPolicy) -> Self {
        self.validity = validity;
        self
    }

    pub fn with_eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }

    pub fn with_batch(mut self, batch: &BatchConfig) -> Self {
        self.batch_size = batch.group_size.max(1);
        self.batch_delay = batch.group_delay();
        self
    }

    pub fn with_recent_window(mut self, window: ChronoDuration) -> Self {
        self.recent_window = window;
        self
    }

    pub fn gate(&self) -> &RateGate {
        &self.gate
    }

    pub fn chain(&self) -> &ProviderChain {
        &self.chain
    }

    /// Resolve one location text. Failures come back as `success: false`.
    pub async fn resolve_one(&self, text: &str) -> GeocodeResult {
        match self.try_resolve_one(text).await {
            Ok(result) => result,
            Err(e) => GeocodeResult::failure(e),
        }
    }

    /// Like [`resolve_one`](Self::resolve_one) but keeps the typed error.
    pub async fn try_resolve_one(&self, text: &str) -> Result<GeocodeResult, LocationError> {
        if text.trim().is_empty() {
            return Err(LocationError::EmptyInput);
        }

        // 1. Cache lookup
        let now = Utc::now();
        match self.store.get(text).await {
            Ok(Some(entry)) => match self.validity.check(&entry, now) {
                Validity::Fresh => {
                    if let Err(e) = self.store.touch(entry.id, now).await {
                        warn!("Failed to record cache hit for '{}': {}", text, e);
                    }
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!("Cache hit for '{}'", text);
                    return Ok(GeocodeResult::from_cache(&entry));
                }
                stale => {
                    info!("Dropping {:?} cache entry for '{}'", stale, text);
                    if let Err(e) = self.store.delete(entry.id).await {
                        warn!("Failed to delete stale entry for '{}': {}", text, e);
                    }
                }
            },
            Ok(None) => debug!("Cache miss for '{}'", text),
            Err(CacheError::Corrupted { id, reason }) => {
                warn!("Corrupted cache row {} for '{}' ({}), dropping it", id, text, reason);
                if let Err(e) = self.store.delete(id).await {
                    warn!("Failed to delete corrupted row {}: {}", id, e);
                }
            }
            Err(e) => warn!("Cache read failed for '{}', treating as miss: {}", text, e),
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        // 2. Gated provider chain
        self.gate.wait_for_next_call().await;
        let (provider, geocode) = self.chain.resolve(text).await?;

        // 3. Write-back
        let write = CacheWrite::from_geocode(provider, &geocode);
        let _guard = self.write_lock.lock().await;
        // Re-check under the lock: a concurrent resolution may have stored
        // this key already, and only new keys count against capacity.
        let is_new = matches!(self.store.get(text).await, Ok(None));
        if is_new {
            if let Err(e) = self.eviction.before_insert(self.store.as_ref()).await {
                warn!("Eviction check failed: {}", e);
            }
        }
        if let Err(e) = self.store.upsert(text, &write, Utc::now()).await {
            warn!("Failed to cache '{}': {}", text, e);
        }

        Ok(GeocodeResult::fresh(provider, &geocode))
    }

    /// Resolve every candidate of one content item and pick the best.
    pub async fn resolve_batch(&self, candidates: &Candidates) -> BatchOutcome {
        let ordered = candidates.distinct();
        let mut results = HashMap::with_capacity(ordered.len());

        for (i, group) in ordered.chunks(self.batch_size).enumerate() {
            if i > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
            let resolved = join_all(group.iter().map(|c| self.resolve_one(c))).await;
            for (candidate, result) in group.iter().zip(resolved) {
                results.insert(candidate.clone(), result);
            }
        }

        let (selected, best) = match select_best(candidates.primary_key(), &ordered, &results) {
            Ok(candidate) => {
                let best = results[candidate].clone();
                (Some(candidate.to_string()), best)
            }
            Err(e) => {
                warn!("Batch resolution failed: {}", e);
                (None, GeocodeResult::failure(e))
            }
        };
        BatchOutcome {
            results,
            selected,
            best,
        }
    }

    pub async fn cache_stats(&self) -> Result<CacheStats, LocationError> {
        let summary = self
            .store
            .usage_summary(Utc::now() - self.recent_window)
            .await?;
        let hits = self.hits.load(Ordering::Relaxed);
        let lookups = hits + self.misses.load(Ordering::Relaxed);
        let max_entries = self.eviction.max_entries;

        Ok(CacheStats {
            total_entries: summary.total_entries,
            total_usage: summary.total_usage,
            recent_entries: summary.recent_entries,
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            max_entries,
            utilization_percent: if max_entries == 0 {
                0.0
            } else {
                summary.total_entries as f64 / max_entries as f64 * 100.0
            },
        })
    }

    /// Remove every cache entry. Returns the number removed.
    pub async fn clear_cache(&self) -> Result<u64, LocationError> {
        let removed = self.store.delete_all().await?;
        info!("Cleared location cache ({} entries)", removed);
        Ok(removed)
    }
}

/// Primary if it resolved, else the first resolved secondary in extraction
/// order, else a failure naming every candidate and its reason.
fn select_best<'a>(
    primary: Option<&str>,
    ordered: &'a [String],
    results: &HashMap<String, GeocodeResult>,
) -> Result<&'a str, LocationError> {
    let succeeded = |c: &str| results.get(c).map_or(false, |r| r.success);

    if let Some(p) = primary {
        if let Some(candidate) = ordered.iter().find(|c| c.as_str() == p) {
            if succeeded(candidate.as_str()) {
                return Ok(candidate.as_str());
            }
        }
    }
    if let Some(candidate) = ordered
        .iter()
        .filter(|c| Some(c.as_str()) != primary)
        .find(|c| succeeded(c.as_str()))
    {
        return Ok(candidate.as_str());
    }

    let attempts = ordered
        .iter()
        .map(|c| {
            let reason = results
                .get(c)
                .and_then(|r| r.error.clone())
                .unwrap_or_else(|| "not attempted".to_string());
            (c.clone(), reason)
        })
        .collect();
    Err(LocationError::BatchFailed { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::cache::MemoryCacheStore;
    use crate::location::providers::fake::FakeProvider;
    use crate::location::types::ProviderId;
    use crate::rate_gate::RateGateConfig;
    use std::sync::atomic::AtomicUsize;

    fn open_gate() -> Arc<RateGate> {
        Arc::new(RateGate::new(
            "test",
            RateGateConfig {
                window: Duration::from_secs(60),
                max_calls: 1_000,
                min_delay: Duration::ZERO,
            },
        ))
    }

    fn resolver_with(
        store: Arc<MemoryCacheStore>,
        providers: Vec<FakeProvider>,
    ) -> Resolver {
        let mut chain = ProviderChain::new(Duration::from_secs(5));
        for p in providers {
            chain = chain.with_provider(p);
        }
        Resolver::new(store, open_gate(), chain).with_batch(&BatchConfig {
            group_size: 5,
            group_delay_ms: 0,
        })
    }

    fn calls(counter: &Arc<AtomicUsize>) -> usize {
        counter.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_monas_miss_then_hit() {
        let store = Arc::new(MemoryCacheStore::new());
        let a = FakeProvider::new(ProviderId::Google).knows("Monas", -6.1754, 106.8270);
        let counter = a.calls();
        let resolver = resolver_with(Arc::clone(&store), vec![a]);

        let first = resolver.resolve_one("Monas").await;
        assert!(first.success);
        assert_eq!(first.cached, Some(false));
        assert_eq!(first.source, Some(ProviderId::Google));
        assert_eq!(calls(&counter), 1);

        let entry = store.get("Monas").await.unwrap().unwrap();
        assert_eq!(entry.usage_count, 1);
        assert_eq!(store.count().await.unwrap(), 1);

        let second = resolver.resolve_one("Monas").await;
        assert!(second.success);
        assert_eq!(second.cached, Some(true));
        assert_eq!(second.lat, first.lat);
        assert_eq!(second.lng, first.lng);
        assert_eq!(calls(&counter), 1);
    }

    #[tokio::test]
    async fn test_unused_entry_is_refetched() {
        let store = Arc::new(MemoryCacheStore::new());
        let eight_days_ago = Utc::now() - ChronoDuration::days(8);
        store
            .upsert(
                "Bandung",
                &CacheWrite {
                    latitude: 1.0,
                    longitude: 1.0,
                    formatted_address: None,
                    source_provider: ProviderId::Nominatim,
                    confidence_score: 0.9,
                },
                eight_days_ago,
            )
            .await
            .unwrap();
        let old_id = store.get("Bandung").await.unwrap().unwrap().id;

        let p = FakeProvider::new(ProviderId::Google).knows("Bandung", -6.9175, 107.6191);
        let counter = p.calls();
        let resolver = resolver_with(Arc::clone(&store), vec![p]);

        let result = resolver.resolve_one("Bandung").await;
        assert_eq!(result.cached, Some(false));
        assert_eq!(calls(&counter), 1);

        let entry = store.get("Bandung").await.unwrap().unwrap();
        assert_ne!(entry.id, old_id);
        assert_eq!(entry.usage_count, 1);
        approx::assert_abs_diff_eq!(entry.latitude, -6.9175, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss_even_if_recently_used() {
        let store = Arc::new(MemoryCacheStore::new());
        store
            .upsert(
                "Medan",
                &CacheWrite {
                    latitude: 3.0,
                    longitude: 98.0,
                    formatted_address: None,
                    source_provider: ProviderId::Nominatim,
                    confidence_score: 0.9,
                },
                Utc::now() - ChronoDuration::days(31),
            )
            .await
            .unwrap();
        let id = store.get("Medan").await.unwrap().unwrap().id;
        store.touch(id, Utc::now()).await.unwrap();

        let p = FakeProvider::new(ProviderId::Google).knows("Medan", 3.5952, 98.6722);
        let counter = p.calls();
        let resolver = resolver_with(Arc::clone(&store), vec![p]);

        let result = resolver.resolve_one("Medan").await;
        assert_eq!(result.cached, Some(false));
        assert_eq!(calls(&counter), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let store = Arc::new(MemoryCacheStore::new());
        let resolver = resolver_with(
            Arc::clone(&store),
            vec![
                FakeProvider::unavailable(ProviderId::Google),
                FakeProvider::new(ProviderId::Nominatim),
            ],
        );

        let result = resolver.resolve_one("Atlantis").await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains("google"));
        assert!(error.contains("nominatim"));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fallback_source_is_winning_provider() {
        let store = Arc::new(MemoryCacheStore::new());
        let c = FakeProvider::new(ProviderId::Builtin).knows("Palu", 0.0, 0.0);
        let counter_c = c.calls();
        let resolver = resolver_with(
            Arc::clone(&store),
            vec![
                FakeProvider::new(ProviderId::Google),
                FakeProvider::new(ProviderId::Nominatim).knows("Palu", -0.8917, 119.8707),
                c,
            ],
        );

        let result = resolver.resolve_one("Palu").await;
        assert_eq!(result.source, Some(ProviderId::Nominatim));
        assert_eq!(calls(&counter_c), 0);
        assert_eq!(
            store.get("Palu").await.unwrap().unwrap().source_provider,
            ProviderId::Nominatim
        );
    }

    #[tokio::test]
    async fn test_empty_text_short_circuits() {
        let p = FakeProvider::new(ProviderId::Google);
        let counter = p.calls();
        let resolver = resolver_with(Arc::new(MemoryCacheStore::new()), vec![p]);
        let result = resolver.resolve_one("   ").await;
        assert!(!result.success);
        assert_eq!(calls(&counter), 0);
    }

    #[tokio::test]
    async fn test_capacity_bound_holds() {
        let store = Arc::new(MemoryCacheStore::new());
        let mut provider = FakeProvider::new(ProviderId::Google);
        for i in 0..25 {
            provider = provider.knows(&format!("place-{}", i), 0.0, i as f64);
        }
        let resolver =
            resolver_with(Arc::clone(&store), vec![provider]).with_eviction(EvictionPolicy::new(10, 0.2));

        for i in 0..25 {
            assert!(resolver.resolve_one(&format!("place-{}", i)).await.success);
            assert!(store.count().await.unwrap() <= 10);
        }
        // The most recent insert always survives.
        assert!(store.get("place-24").await.unwrap().is_some());
        assert!(store.get("place-0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_primary_precedence() {
        let p = FakeProvider::new(ProviderId::Google)
            .knows("DPRD NTB, Mataram", -8.5826, 116.1005)
            .knows("Mataram", -8.5833, 116.1167);
        let resolver = resolver_with(Arc::new(MemoryCacheStore::new()), vec![p]);

        let outcome = resolver
            .resolve_batch(&Candidates::from_list(vec![
                "DPRD NTB, Mataram".into(),
                "Mataram".into(),
            ]))
            .await;

        assert_eq!(outcome.selected.as_deref(), Some("DPRD NTB, Mataram"));
        assert_eq!(outcome.best.lat, Some(-8.5826));
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results["Mataram"].success);
    }

    #[tokio::test]
    async fn test_batch_falls_back_to_first_resolved_secondary() {
        let p = FakeProvider::new(ProviderId::Google)
            .knows("Lombok", -8.65, 116.32)
            .knows("Mataram", -8.5833, 116.1167);
        let resolver = resolver_with(Arc::new(MemoryCacheStore::new()), vec![p]);

        let outcome = resolver
            .resolve_batch(&Candidates::new(
                "Kantor Camat Antah Berantah",
                vec!["Desa Fiktif".into(), "Mataram".into(), "Lombok".into()],
            ))
            .await;

        assert_eq!(outcome.selected.as_deref(), Some("Mataram"));
        assert!(outcome.best.success);
        assert!(!outcome.results["Kantor Camat Antah Berantah"].success);
    }

    #[tokio::test]
    async fn test_batch_failure_names_every_candidate() {
        let resolver = resolver_with(
            Arc::new(MemoryCacheStore::new()),
            vec![FakeProvider::new(ProviderId::Nominatim)],
        );
        let outcome = resolver
            .resolve_batch(&Candidates::from_list(vec!["Alpha".into(), "Beta".into()]))
            .await;

        assert!(outcome.selected.is_none());
        assert!(!outcome.best.success);
        let error = outcome.best.error.unwrap();
        assert!(error.contains("'Alpha' => "));
        assert!(error.contains("'Beta' => "));
        assert!(error.contains("no results for 'Beta'"));
    }

    #[tokio::test]
    async fn test_batch_dedupes_and_groups() {
        let mut provider = FakeProvider::new(ProviderId::Google).slow(Duration::from_millis(100));
        let names: Vec<String> = (0..10).map(|i| format!("loc-{}", i)).collect();
        for name in &names {
            provider = provider.knows(name, 1.0, 1.0);
        }
        let counter = provider.calls();
        let resolver = resolver_with(Arc::new(MemoryCacheStore::new()), vec![provider]);

        let mut list = names.clone();
        list.push("loc-3".into());
        list.push("  ".into());

        let start = std::time::Instant::now();
        let outcome = resolver.resolve_batch(&Candidates::from_list(list)).await;
        let elapsed = start.elapsed();

        assert_eq!(calls(&counter), 10);
        assert_eq!(outcome.results.len(), 10);
        assert_eq!(outcome.selected.as_deref(), Some("loc-0"));
        // Two concurrent groups of five, not ten sequential calls.
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_batch_selection_ignores_completion_order() {
        // Primary is slow, secondary fast: primary still wins.
        let slow = FakeProvider::new(ProviderId::Google)
            .knows("Monas", -6.1754, 106.8272)
            .knows("Jakarta", -6.2088, 106.8456)
            .slow(Duration::from_millis(50));
        let resolver = resolver_with(Arc::new(MemoryCacheStore::new()), vec![slow]);
        let outcome = resolver
            .resolve_batch(&Candidates::new("Monas", vec!["Jakarta".into()]))
            .await;
        assert_eq!(outcome.selected.as_deref(), Some("Monas"));
    }

    #[tokio::test]
    async fn test_empty_batch_fails() {
        let resolver = resolver_with(Arc::new(MemoryCacheStore::new()), vec![]);
        let outcome = resolver.resolve_batch(&Candidates::default()).await;
        assert!(!outcome.best.success);
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_stats_and_clear() {
        let store = Arc::new(MemoryCacheStore::new());
        let p = FakeProvider::new(ProviderId::Google)
            .knows("Ambon", -3.6954, 128.1814)
            .knows("Kupang", -10.1772, 123.6070);
        let resolver =
            resolver_with(Arc::clone(&store), vec![p]).with_eviction(EvictionPolicy::new(100, 0.2));

        resolver.resolve_one("Ambon").await;
        resolver.resolve_one("Ambon").await;
        resolver.resolve_one("Kupang").await;
        resolver.resolve_one("Ambon").await;

        let stats = resolver.cache_stats().await.unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.total_usage, 4);
        assert_eq!(stats.recent_entries, 2);
        assert_eq!(stats.max_entries, 100);
        approx::assert_abs_diff_eq!(stats.cache_hit_rate, 0.5, epsilon = 1e-9);
        approx::assert_abs_diff_eq!(stats.utilization_percent, 2.0, epsilon = 1e-9);

        assert_eq!(resolver.clear_cache().await.unwrap(), 2);
        assert_eq!(resolver.cache_stats().await.unwrap().total_entries, 0);
    }

    #[test]
    fn test_candidates_distinct() {
        let c = Candidates::new(
            "Monas",
            vec!["Jakarta".into(), "Monas".into(), "  ".into(), "Jakarta".into()],
        );
        assert_eq!(c.distinct(), vec!["Monas".to_string(), "Jakarta".to_string()]);
        assert_eq!(c.primary_key(), Some("Monas"));
        assert_eq!(Candidates::unranked(vec!["a".into()]).primary_key(), None);
        assert_eq!(Candidates::new(" ", vec![]).primary_key(), None);
    }

    #[tokio::test]
    async fn test_batch_keys_match_single_lookup_keys() {
        let store = Arc::new(MemoryCacheStore::new());
        let p = FakeProvider::new(ProviderId::Google).knows(" Monas", -6.1754, 106.8272);
        let resolver = resolver_with(Arc::clone(&store), vec![p]);

        let outcome = resolver
            .resolve_batch(&Candidates::new(" Monas", vec![]))
            .await;
        assert_eq!(outcome.selected.as_deref(), Some(" Monas"));
        assert!(outcome.results[" Monas"].success);

        let single = resolver.resolve_one(" Monas").await;
        assert_eq!(single.cached, Some(true));
        assert!(store.get("Monas").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_batches_respect_capacity() {
        let store = Arc::new(SqliteCacheStore::open_in_memory().unwrap());
        let mut provider = FakeProvider::new(ProviderId::Google);
        for i in 0..200 {
            provider = provider.knows(&format!("kecamatan-{}", i), -7.0, 110.0);
        }
        let chain = ProviderChain::new(Duration::from_secs(5)).with_provider(provider);
        let resolver = Arc::new(
            Resolver::new(store.clone(), open_gate(), chain)
                .with_eviction(EvictionPolicy::new(10, 0.2))
                .with_batch(&BatchConfig {
                    group_size: 5,
                    group_delay_ms: 0,
                }),
        );

        for round in 0..10 {
            let handles: Vec<_> = (0..4)
                .map(|b| {
                    let resolver = Arc::clone(&resolver);
                    tokio::spawn(async move {
                        let base = (round * 4 + b) * 5;
                        let names = (base..base + 5).map(|i| format!("kecamatan-{}", i)).collect();
                        resolver.resolve_batch(&Candidates::from_list(names)).await
                    })
                })
                .collect();
            for handle in handles {
                assert!(handle.await.unwrap().best.success);
            }
            let count = store.count().await.unwrap();
            assert!(count <= 10, "cache holds {} rows after round {}", count, round);
        }
    }

    #[tokio::test]
    async fn test_corrupted_row_is_replaced() {
        let store = Arc::new(SqliteCacheStore::open_in_memory().unwrap());
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO location_cache (location_text, latitude, longitude, source_provider, created_at, last_used_at)
                 VALUES ('Monas', 1.0, 2.0, 'mapquest', 0, 0)",
                [],
            )
            .unwrap();
        }
        assert!(store.get("Monas").await.is_err());

        let p = FakeProvider::new(ProviderId::Nominatim).knows("Monas", -6.1754, 106.8272);
        let counter = p.calls();
        let chain = ProviderChain::new(Duration::from_secs(5)).with_provider(p);
        let resolver = Resolver::new(store.clone(), open_gate(), chain);

        let result = resolver.resolve_one("Monas").await;
        assert!(result.success);
        assert_eq!(result.cached, Some(false));
        assert_eq!(calls(&counter), 1);

        let entry = store.get("Monas").await.unwrap().unwrap();
        assert_eq!(entry.source_provider, ProviderId::Nominatim);
        assert_eq!(entry.usage_count, 1);
        approx::assert_abs_diff_eq!(entry.latitude, -6.1754, epsilon = 1e-9);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
