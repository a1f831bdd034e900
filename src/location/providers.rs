//! Geocoding providers and the ordered fallback chain.
//!
//! Every backend implements [`GeocodeProvider`]. Responses are parsed into
//! strict per-provider DTOs at the adapter boundary, so a malformed body
//! surfaces as `InvalidResponse` instead of leaking half-filled values.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::gazetteer::BuiltinGazetteer;
use super::types::{Geocode, LocationError, ProviderError, ProviderId};
use crate::config::ProvidersConfig;

/// A text-to-coordinate backend.
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Resolve `text` to its best coordinate.
    ///
    /// An unconfigured provider must return [`ProviderError::Unavailable`]
    /// without touching the network.
    async fn resolve(&self, text: &str) -> Result<Geocode, ProviderError>;
}

// ─── Chain ──────────────────────────────────────────────────────

/// Providers tried strictly in order until one succeeds.
pub struct ProviderChain {
    providers: Vec<Arc<dyn GeocodeProvider>>,
    timeout: Duration,
}

impl ProviderChain {
    pub fn new(timeout: Duration) -> Self {
        Self {
            providers: Vec::new(),
            timeout,
        }
    }

    pub fn with_provider(mut self, provider: impl GeocodeProvider + 'static) -> Self {
        self.push(Arc::new(provider));
        self
    }

    pub fn push(&mut self, provider: Arc<dyn GeocodeProvider>) {
        self.providers.push(provider);
    }

    /// Build the chain in the configured order. Unknown names are skipped.
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let timeout = config.timeout();
        let mut chain = Self::new(timeout);
        let mut seen = Vec::new();

        for name in &config.order {
            let id = match name.parse::<ProviderId>() {
                Ok(id) => id,
                Err(e) => {
                    warn!("Skipping provider in config: {}", e);
                    continue;
                }
            };
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);

            let provider: Arc<dyn GeocodeProvider> = match id {
                ProviderId::Google => Arc::new(GoogleProvider::new(
                    config.google_api_key.clone(),
                    config.region.clone(),
                    &config.user_agent,
                    timeout,
                )),
                ProviderId::LocationIq => Arc::new(LocationIqProvider::new(
                    config.locationiq_api_key.clone(),
                    config.region.clone(),
                    &config.user_agent,
                    timeout,
                )),
                ProviderId::Nominatim => Arc::new(NominatimProvider::new(
                    &config.nominatim_url,
                    config.region.clone(),
                    &config.user_agent,
                    timeout,
                )),
                ProviderId::Builtin => Arc::new(BuiltinGazetteer::new()),
            };
            chain.push(provider);
        }
        chain
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    /// Try each provider in order. Individual failures never abort the
    /// chain; they are returned together only if every provider fails.
    pub async fn resolve(&self, text: &str) -> Result<(ProviderId, Geocode), LocationError> {
        if self.providers.is_empty() {
            return Err(LocationError::NoProviders);
        }

        let mut errors = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            let id = provider.id();
            match tokio::time::timeout(self.timeout, provider.resolve(text)).await {
                Ok(Ok(geocode)) => {
                    info!("Resolved '{}' via {} ({:.4}, {:.4})", text, id, geocode.lat, geocode.lng);
                    return Ok((id, geocode));
                }
                Ok(Err(err @ ProviderError::Unavailable { .. })) => {
                    debug!("{}", err);
                    errors.push(err);
                }
                Ok(Err(err)) => {
                    warn!("Provider failed for '{}': {}", text, err);
                    errors.push(err);
                }
                Err(_) => {
                    let err = ProviderError::Timeout {
                        provider: id,
                        after: self.timeout,
                    };
                    warn!("Provider failed for '{}': {}", text, err);
                    errors.push(err);
                }
            }
        }
        Err(LocationError::AllProvidersFailed { errors })
    }
}

// ─── HTTP plumbing ──────────────────────────────────────────────

fn build_agent(user_agent: &str, timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
}

/// GET `url` with `query` on the blocking pool and decode JSON into `T`.
async fn get_json<T>(
    provider: ProviderId,
    agent: &ureq::Agent,
    url: &str,
    query: Vec<(&'static str, String)>,
) -> Result<T, ProviderError>
where
    T: DeserializeOwned + Send + 'static,
{
    let agent = agent.clone();
    let url = url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut request = agent.get(&url);
        for (key, value) in &query {
            request = request.query(key, value);
        }
        match request.call() {
            Ok(response) => response
                .into_json::<T>()
                .map_err(|e| ProviderError::InvalidResponse {
                    provider,
                    message: e.to_string(),
                }),
            Err(ureq::Error::Status(status, _)) => Err(ProviderError::Http { provider, status }),
            Err(e) => Err(ProviderError::Network {
                provider,
                message: e.to_string(),
            }),
        }
    })
    .await
    .map_err(|e| ProviderError::Network {
        provider,
        message: e.to_string(),
    })?
}

fn parse_coord(provider: ProviderId, field: &str, raw: &str) -> Result<f64, ProviderError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| ProviderError::InvalidResponse {
            provider,
            message: format!("{} is not a number: '{}'", field, raw),
        })
}

fn checked_coords(provider: ProviderId, lat: f64, lng: f64) -> Result<(f64, f64), ProviderError> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(ProviderError::InvalidResponse {
            provider,
            message: format!("latitude out of range: {}", lat),
        });
    }
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(ProviderError::InvalidResponse {
            provider,
            message: format!("longitude out of range: {}", lng),
        });
    }
    Ok((lat, lng))
}

fn configured_key(key: &Option<String>) -> Option<String> {
    key.as_ref()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
}

// ─── Nominatim-shaped responses (Nominatim, LocationIQ) ─────────

#[derive(Deserialize, Debug, Clone)]
pub struct NominatimPlace {
    pub lat: String,
    pub lon: String,
    pub display_name: String,
    #[serde(default)]
    pub importance: Option<f64>,
}

fn first_place(
    provider: ProviderId,
    query: &str,
    places: Vec<NominatimPlace>,
) -> Result<Geocode, ProviderError> {
    let place = places
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::NoResults {
            provider,
            query: query.to_string(),
        })?;
    let lat = parse_coord(provider, "lat", &place.lat)?;
    let lng = parse_coord(provider, "lon", &place.lon)?;
    let (lat, lng) = checked_coords(provider, lat, lng)?;
    Ok(Geocode::new(lat, lng).with_address(place.display_name))
}

// ─── Nominatim provider ─────────────────────────────────────────

pub const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";

/// OpenStreetMap Nominatim. Needs no key, only an identifying User-Agent.
pub struct NominatimProvider {
    agent: ureq::Agent,
    url: String,
    region: Option<String>,
}

impl NominatimProvider {
    pub fn new(url: &str, region: Option<String>, user_agent: &str, timeout: Duration) -> Self {
        Self {
            agent: build_agent(user_agent, timeout),
            url: url.to_string(),
            region,
        }
    }
}

#[async_trait]
impl GeocodeProvider for NominatimProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Nominatim
    }

    async fn resolve(&self, text: &str) -> Result<Geocode, ProviderError> {
        let mut query = vec![
            ("q", text.to_string()),
            ("format", "json".to_string()),
            ("limit", "1".to_string()),
        ];
        if let Some(cc) = &self.region {
            query.push(("countrycodes", cc.clone()));
        }
        let places: Vec<NominatimPlace> = get_json(self.id(), &self.agent, &self.url, query).await?;
        first_place(self.id(), text, places)
    }
}

// ─── LocationIQ provider ────────────────────────────────────────

pub const LOCATIONIQ_URL: &str = "https://us1.locationiq.com/v1/search";

/// LocationIQ search API (Nominatim-compatible responses).
pub struct LocationIqProvider {
    agent: ureq::Agent,
    api_key: Option<String>,
    region: Option<String>,
}

impl LocationIqProvider {
    pub fn new(
        api_key: Option<String>,
        region: Option<String>,
        user_agent: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            agent: build_agent(user_agent, timeout),
            api_key: configured_key(&api_key),
            region,
        }
    }
}

#[async_trait]
impl GeocodeProvider for LocationIqProvider {
    fn id(&self) -> ProviderId {
        ProviderId::LocationIq
    }

    async fn resolve(&self, text: &str) -> Result<Geocode, ProviderError> {
        let key = self
            .api_key
            .clone()
            .ok_or(ProviderError::Unavailable { provider: self.id() })?;

        let mut query = vec![
            ("key", key),
            ("q", text.to_string()),
            ("format", "json".to_string()),
            ("limit", "1".to_string()),
        ];
        if let Some(cc) = &self.region {
            query.push(("countrycodes", cc.clone()));
        }

        // LocationIQ answers "no match" with a 404.
        let places =
            match get_json::<Vec<NominatimPlace>>(self.id(), &self.agent, LOCATIONIQ_URL, query).await {
                Err(ProviderError::Http { status: 404, .. }) => Vec::new(),
                other => other?,
            };
        first_place(self.id(), text, places)
    }
}

// ─── Google Maps provider ───────────────────────────────────────

pub const GOOGLE_GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

#[derive(Deserialize, Debug)]
struct GoogleResponse {
    status: String,
    #[serde(default)]
    results: Vec<GoogleResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GoogleResult {
    formatted_address: String,
    geometry: GoogleGeometry,
}

#[derive(Deserialize, Debug)]
struct GoogleGeometry {
    location: GoogleLatLng,
}

#[derive(Deserialize, Debug)]
struct GoogleLatLng {
    lat: f64,
    lng: f64,
}

/// Google Maps Geocoding API.
pub struct GoogleProvider {
    agent: ureq::Agent,
    api_key: Option<String>,
    region: Option<String>,
}

impl GoogleProvider {
    pub fn new(
        api_key: Option<String>,
        region: Option<String>,
        user_agent: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            agent: build_agent(user_agent, timeout),
            api_key: configured_key(&api_key),
            region,
        }
    }
}

fn google_geocode(query: &str, response: GoogleResponse) -> Result<Geocode, ProviderError> {
    let provider = ProviderId::Google;
    match response.status.as_str() {
        "OK" => {}
        "ZERO_RESULTS" => {
            return Err(ProviderError::NoResults {
                provider,
                query: query.to_string(),
            })
        }
        _ => {
            return Err(ProviderError::Rejected {
                provider,
                status: response.status,
                message: response.error_message,
            })
        }
    }
    let top = response
        .results
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::NoResults {
            provider,
            query: query.to_string(),
        })?;
    let (lat, lng) = checked_coords(
        provider,
        top.geometry.location.lat,
        top.geometry.location.lng,
    )?;
    Ok(Geocode::new(lat, lng).with_address(top.formatted_address))
}

#[async_trait]
impl GeocodeProvider for GoogleProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Google
    }

    async fn resolve(&self, text: &str) -> Result<Geocode, ProviderError> {
        let key = self
            .api_key
            .clone()
            .ok_or(ProviderError::Unavailable { provider: self.id() })?;

        let mut query = vec![("address", text.to_string()), ("key", key)];
        if let Some(cc) = &self.region {
            query.push(("region", cc.clone()));
        }
        let response: GoogleResponse =
            get_json(self.id(), &self.agent, GOOGLE_GEOCODE_URL, query).await?;
        google_geocode(text, response)
    }
}

// ─── Test doubles ───────────────────────────────────────────────
