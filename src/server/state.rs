use crate::location::Resolver;
use crate::rate_gate::RateGate;
use std::sync::Arc;

pub struct AppState {
    pub resolver: Arc<Resolver>,
    /// Public traffic class; independent of the resolver's geocoding gate.
    pub api_gate: RateGate,
}

impl AppState {
    pub fn new(resolver: Arc<Resolver>, api_gate: RateGate) -> Self {
        Self { resolver, api_gate }
    }
}
