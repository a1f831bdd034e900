//! Core types for the location subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Confidence recorded for a first-time provider resolution.
pub const DEFAULT_CONFIDENCE: f64 = 0.9;

/// Which backend produced a coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Google,
    LocationIq,
    Nominatim,
    Builtin,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::LocationIq => "locationiq",
            Self::Nominatim => "nominatim",
            Self::Builtin => "builtin",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "google" | "googlemaps" | "google_maps" => Ok(Self::Google),
            "locationiq" | "location_iq" => Ok(Self::LocationIq),
            "nominatim" | "osm" => Ok(Self::Nominatim),
            "builtin" | "built-in" | "gazetteer" => Ok(Self::Builtin),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// A coordinate returned by a single provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Geocode {
    pub lat: f64,
    pub lng: f64,
    pub formatted_address: Option<String>,
    pub confidence: f64,
}

impl Geocode {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            formatted_address: None,
            confidence: DEFAULT_CONFIDENCE,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.formatted_address = Some(address.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

/// One cached location row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub id: i64,
    /// Lookup key, used verbatim.
    pub location_text: String,
    pub latitude: f64,
    pub longitude: f64,
    pub formatted_address: Option<String>,
    pub source_provider: ProviderId,
    pub confidence_score: f64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub usage_count: u64,
}

/// The value half of an upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheWrite {
    pub latitude: f64,
    pub longitude: f64,
    pub formatted_address: Option<String>,
    pub source_provider: ProviderId,
    pub confidence_score: f64,
}

impl CacheWrite {
    pub fn from_geocode(provider: ProviderId, geocode: &Geocode) -> Self {
        Self {
            latitude: geocode.lat,
            longitude: geocode.lng,
            formatted_address: geocode.formatted_address.clone(),
            source_provider: provider,
            confidence_score: geocode.confidence,
        }
    }
}

/// The flat result handed to upstream content processors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodeResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ProviderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GeocodeResult {
    pub fn from_cache(entry: &CacheEntry) -> Self {
        Self {
            success: true,
            lat: Some(entry.latitude),
            lng: Some(entry.longitude),
            formatted_address: entry.formatted_address.clone(),
            source: Some(entry.source_provider),
            cached: Some(true),
            confidence: Some(entry.confidence_score),
            error: None,
        }
    }

    pub fn fresh(provider: ProviderId, geocode: &Geocode) -> Self {
        Self {
            success: true,
            lat: Some(geocode.lat),
            lng: Some(geocode.lng),
            formatted_address: geocode.formatted_address.clone(),
            source: Some(provider),
            cached: Some(false),
            confidence: Some(geocode.confidence),
            error: None,
        }
    }

    pub fn failure(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            lat: None,
            lng: None,
            formatted_address: None,
            source: None,
            cached: None,
            confidence: None,
            error: Some(error.to_string()),
        }
    }

    pub fn display_line(&self) -> String {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) if self.success => {
                let address = self.formatted_address.as_deref().unwrap_or("(no address)");
                let origin = match (self.source, self.cached) {
                    (Some(src), Some(true)) => format!("{} (cached)", src),
                    (Some(src), _) => src.to_string(),
                    (None, _) => "unknown".to_string(),
                };
                format!(
                    "\u{1F4CD} {}\n  \u{1F4D0} {}\n  \u{1F50E} {}",
                    address,
                    format_coords(lat, lng),
                    origin
                )
            }
            _ => format!(
                "\u{26A0}\u{FE0F}  {}",
                self.error.as_deref().unwrap_or("unresolved")
            ),
        }
    }
}

/// Human-readable coordinates, e.g. `6.1754°S, 106.8270°E`.
pub fn format_coords(lat: f64, lng: f64) -> String {
    let ns = if lat < 0.0 { 'S' } else { 'N' };
    let ew = if lng < 0.0 { 'W' } else { 'E' };
    format!("{:.4}\u{00B0}{}, {:.4}\u{00B0}{}", lat.abs(), ns, lng.abs(), ew)
}

/// A single provider's failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("{provider}: not configured (missing credentials)")]
    Unavailable { provider: ProviderId },
    #[error("{provider}: HTTP {status}")]
    Http { provider: ProviderId, status: u16 },
    #[error("{provider}: network error: {message}")]
    Network { provider: ProviderId, message: String },
    #[error("{}: request rejected ({}){}", .provider, .status, message_suffix(.message))]
    Rejected {
        provider: ProviderId,
        status: String,
        message: Option<String>,
    },
    #[error("{provider}: invalid response: {message}")]
    InvalidResponse { provider: ProviderId, message: String },
    #[error("{provider}: no results for '{query}'")]
    NoResults { provider: ProviderId, query: String },
    #[error("{provider}: timed out after {after:?}")]
    Timeout { provider: ProviderId, after: Duration },
}

fn message_suffix(message: &Option<String>) -> String {
    match message {
        Some(m) if !m.is_empty() => format!(": {}", m),
        _ => String::new(),
    }
}

impl ProviderError {
    pub fn provider(&self) -> ProviderId {
        match self {
            Self::Unavailable { provider }
            | Self::Http { provider, .. }
            | Self::Network { provider, .. }
            | Self::Rejected { provider, .. }
            | Self::InvalidResponse { provider, .. }
            | Self::NoResults { provider, .. }
            | Self::Timeout { provider, .. } => *provider,
        }
    }
}

/// Cache store failures. None of these reach resolution callers.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("corrupted cache row {id}: {reason}")]
    Corrupted { id: i64, reason: String },
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache lock poisoned")]
    Poisoned,
    #[error("cache task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Location resolution errors.
#[derive(Debug, Error)]
pub enum LocationError {
    #[error("empty location text")]
    EmptyInput,
    #[error("no geocoding providers configured")]
    NoProviders,
    #[error("all providers failed: {}", join_provider_errors(.errors))]
    AllProvidersFailed { errors: Vec<ProviderError> },
    #[error("no candidate resolved: {}", join_attempts(.attempts))]
    BatchFailed { attempts: Vec<(String, String)> },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

fn join_provider_errors(errors: &[ProviderError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_attempts(attempts: &[(String, String)]) -> String {
    if attempts.is_empty() {
        return "no candidates given".to_string();
    }
    attempts
        .iter()
        .map(|(candidate, reason)| format!("'{}' => {}", candidate, reason))
        .collect::<Vec<_>>()
        .join(" | ")
}
