use async_trait::async_trait;
use geoloc::location::{
    CacheStore, Candidates, EvictionPolicy, Geocode, GeocodeProvider, ProviderChain,
    ProviderError, ProviderId, Resolver, SqliteCacheStore,
};
use geoloc::rate_gate::{RateGate, RateGateConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Provider backed by a fixed table; counts every call.
struct TableProvider {
    id: ProviderId,
    table: HashMap<&'static str, (f64, f64)>,
    calls: Arc<AtomicUsize>,
}

impl TableProvider {
    fn new(id: ProviderId, rows: &[(&'static str, f64, f64)]) -> Self {
        Self {
            id,
            table: rows.iter().map(|&(k, lat, lng)| (k, (lat, lng))).collect(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl GeocodeProvider for TableProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn resolve(&self, text: &str) -> Result<Geocode, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.table
            .get(text)
            .map(|&(lat, lng)| Geocode::new(lat, lng).with_address(text))
            .ok_or_else(|| ProviderError::NoResults {
                provider: self.id,
                query: text.to_string(),
            })
    }
}

fn gate() -> Arc<RateGate> {
    Arc::new(RateGate::new(
        "geocode",
        RateGateConfig {
            window: Duration::from_secs(60),
            max_calls: 100,
            min_delay: Duration::ZERO,
        },
    ))
}

const PLACES: &[(&str, f64, f64)] = &[
    ("Monas", -6.1754, 106.8272),
    ("Bandung", -6.9175, 107.6191),
    ("Mataram", -8.5833, 116.1167),
];

fn resolver(store: &SqliteCacheStore) -> (Resolver, Arc<AtomicUsize>) {
    let provider = TableProvider::new(ProviderId::Nominatim, PLACES);
    let calls = Arc::clone(&provider.calls);
    let chain = ProviderChain::new(Duration::from_secs(5)).with_provider(provider);
    (Resolver::new(Arc::new(store.clone()), gate(), chain), calls)
}

#[tokio::test]
async fn test_cache_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.db");

    {
        let store = SqliteCacheStore::open(&path).unwrap();
        let (resolver, calls) = resolver(&store);
        let result = resolver.resolve_one("Monas").await;
        assert!(result.success);
        assert_eq!(result.cached, Some(false));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    let store = SqliteCacheStore::open(&path).unwrap();
    let (resolver, calls) = resolver(&store);
    let result = resolver.resolve_one("Monas").await;
    assert_eq!(result.cached, Some(true));
    assert_eq!(result.source, Some(ProviderId::Nominatim));
    approx::assert_abs_diff_eq!(result.lat.unwrap(), -6.1754, epsilon = 1e-9);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let entry = store.get("Monas").await.unwrap().unwrap();
    assert_eq!(entry.usage_count, 2);
}

#[tokio::test]
async fn test_batch_end_to_end() {
    let dir = TempDir::new().unwrap();
    let store = SqliteCacheStore::open(&dir.path().join("cache.db")).unwrap();
    let (resolver, calls) = resolver(&store);

    let candidates = Candidates::new(
        "Kantor Gubernur NTB",
        vec!["Mataram".into(), "Bandung".into(), "Mataram".into()],
    );
    let outcome = resolver.resolve_batch(&candidates).await;
    assert_eq!(outcome.selected.as_deref(), Some("Mataram"));
    assert_eq!(outcome.results.len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Failed candidates are not cached; successful ones are.
    assert!(store.get("Kantor Gubernur NTB").await.unwrap().is_none());
    assert_eq!(store.count().await.unwrap(), 2);

    // Second pass only re-queries the failure.
    let again = resolver.resolve_batch(&candidates).await;
    assert_eq!(again.selected.as_deref(), Some("Mataram"));
    assert_eq!(again.best.cached, Some(true));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_stats_clear_and_capacity() {
    let dir = TempDir::new().unwrap();
    let store = SqliteCacheStore::open(&dir.path().join("cache.db")).unwrap();
    let (resolver, _) = resolver(&store);
    let resolver = resolver.with_eviction(EvictionPolicy::new(2, 0.5));

    for (name, _, _) in PLACES {
        assert!(resolver.resolve_one(name).await.success);
        assert!(store.count().await.unwrap() <= 2);
    }
    assert!(store.get("Mataram").await.unwrap().is_some());

    let stats = resolver.cache_stats().await.unwrap();
    assert_eq!(stats.max_entries, 2);
    assert_eq!(stats.cache_hit_rate, 0.0);
    assert!(stats.utilization_percent <= 100.0);

    let removed = resolver.clear_cache().await.unwrap();
    assert_eq!(removed, stats.total_entries);
    assert_eq!(store.count().await.unwrap(), 0);
}
