//! Fixed-window admission gate for outbound calls.
//!
//! Each gate instance owns its own counters: one per caller class
//! (geocoding, public API traffic, ...). Callers reserve a slot under the
//! lock, so two concurrent callers can never both take the last slot.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateGateConfig {
    pub window: Duration,
    pub max_calls: u32,
    pub min_delay: Duration,
}

impl Default for RateGateConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_calls: 50,
            min_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug)]
struct GateState {
    window_start: Instant,
    calls_in_window: u32,
    /// Time slot reserved by the most recent caller.
    last_call: Option<Instant>,
    total_calls: u64,
    total_waits: u64,
}

/// Point-in-time view of a gate, for stats and logs.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GateSnapshot {
    pub name: String,
    pub calls_in_window: u32,
    pub max_calls: u32,
    pub window_secs: u64,
    pub total_calls: u64,
    pub total_waits: u64,
}

#[derive(Debug)]
pub struct RateGate {
    name: String,
    config: RateGateConfig,
    state: Mutex<GateState>,
}

enum Admission {
    /// Slot reserved; sleep this long before calling.
    Go(Duration),
    /// Window full; sleep until it resets and check again.
    Full(Duration),
}

impl RateGate {
    pub fn new(name: impl Into<String>, config: RateGateConfig) -> Self {
        Self {
            name: name.into(),
            config: RateGateConfig {
                max_calls: config.max_calls.max(1),
                ..config
            },
            state: Mutex::new(GateState {
                window_start: Instant::now(),
                calls_in_window: 0,
                last_call: None,
                total_calls: 0,
                total_waits: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RateGateConfig {
        &self.config
    }

    /// Suspend until a call is allowed under this gate's budget.
    pub async fn wait_for_next_call(&self) {
        loop {
            match self.admit().await {
                Admission::Go(delay) => {
                    if !delay.is_zero() {
                        debug!("[{}] spacing call by {:?}", self.name, delay);
                        tokio::time::sleep(delay).await;
                    }
                    return;
                }
                Admission::Full(until_reset) => {
                    debug!(
                        "[{}] window full ({} calls), waiting {:?} for reset",
                        self.name, self.config.max_calls, until_reset
                    );
                    tokio::time::sleep(until_reset).await;
                }
            }
        }
    }

    async fn admit(&self) -> Admission {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if now.duration_since(state.window_start) >= self.config.window {
            state.window_start = now;
            state.calls_in_window = 0;
        }

        if state.calls_in_window >= self.config.max_calls {
            state.total_waits += 1;
            let reset_at = state.window_start + self.config.window;
            return Admission::Full(reset_at.saturating_duration_since(now));
        }

        let slot = match state.last_call {
            Some(last) => (last + self.config.min_delay).max(now),
            None => now,
        };
        let delay = slot.saturating_duration_since(now);
        if !delay.is_zero() {
            state.total_waits += 1;
        }

        state.calls_in_window += 1;
        state.total_calls += 1;
        state.last_call = Some(slot);
        Admission::Go(delay)
    }

    pub async fn snapshot(&self) -> GateSnapshot {
        let state = self.state.lock().await;
        let expired = state.window_start.elapsed() >= self.config.window;
        GateSnapshot {
            name: self.name.clone(),
            calls_in_window: if expired { 0 } else { state.calls_in_window },
            max_calls: self.config.max_calls,
            window_secs: self.config.window.as_secs(),
            total_calls: state.total_calls,
            total_waits: state.total_waits,
        }
    }
}
