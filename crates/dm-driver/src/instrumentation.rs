//! Debug instrumentation of the values the driver sends and receives.

use std::sync::Arc;

use serde::Serialize;

/// Environment variable selecting [`Verbose`] instrumentation.
pub const INSTRUMENT_ENV: &str = "HETZNER_DRIVER_INSTRUMENT";
/// Environment variable enabling HTTP body logging in the API client; must be
/// set to `42`.
pub const HTTP_DEBUG_ENV: &str = "HETZNER_DRIVER_HTTP_DEBUG";

/// Observer the driver calls at every point where it hands a value to the
/// provider or receives a resolved entity back.
pub trait Instrumentation: Send + Sync {
    /// Whether payloads should be serialized at all.
    fn enabled(&self) -> bool;

    fn record(&self, label: &str, payload: &serde_json::Value);
}

/// Does nothing. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl Instrumentation for Silent {
    fn enabled(&self) -> bool {
        false
    }

    fn record(&self, _label: &str, _payload: &serde_json::Value) {}
}

/// Logs each payload as JSON at `debug` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verbose;

impl Instrumentation for Verbose {
    fn enabled(&self) -> bool {
        true
    }

    fn record(&self, label: &str, payload: &serde_json::Value) {
        tracing::debug!(label, payload = %payload, "instrumented");
    }
}

/// Pick an implementation from [`INSTRUMENT_ENV`].
pub fn from_env() -> Arc<dyn Instrumentation> {
    match std::env::var(INSTRUMENT_ENV).as_deref() {
        Ok("1") | Ok("true") => Arc::new(Verbose),
        _ => Arc::new(Silent),
    }
}

pub fn http_debug_from_env() -> bool {
    std::env::var(HTTP_DEBUG_ENV).as_deref() == Ok("42")
}

/// Serialize `value` and pass it to `instrumentation` when enabled.
pub(crate) fn observe<T: Serialize>(instrumentation: &dyn Instrumentation, label: &str, value: &T) {
    if !instrumentation.enabled() {
        return;
    }
    match serde_json::to_value(value) {
        Ok(payload) => instrumentation.record(label, &payload),
        Err(e) => tracing::warn!(label, error = %e, "could not serialize instrumented value"),
    }
}
