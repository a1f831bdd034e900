//! Location resolution subsystem.
//!
//! Turns free-text place names into coordinates through a durable cache,
//! a rate-gated provider chain and an offline gazetteer, with batch
//! candidate selection for content items that mention several places.

pub mod cache;
pub mod gazetteer;
pub mod policy;
pub mod providers;
pub mod resolver;
pub mod types;

pub use cache::{CacheStore, MemoryCacheStore, SqliteCacheStore, UsageSummary};
pub use policy::{EvictionPolicy, Validity, ValidityPolicy};
pub use providers::{GeocodeProvider, ProviderChain};
pub use resolver::{BatchOutcome, CacheStats, Candidates, Resolver};
pub use types::{
    format_coords, CacheEntry, CacheError, CacheWrite, Geocode, GeocodeResult, LocationError,
    ProviderError, ProviderId,
};
