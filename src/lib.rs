//! geoloc: cached, rate-gated geocoding with provider fallback.

pub mod config;
pub mod location;
pub mod rate_gate;
pub mod server;
