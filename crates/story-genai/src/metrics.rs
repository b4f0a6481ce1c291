//! Adapter call metrics.

use metrics::{counter, histogram};

pub mod names {
    /// External generation calls by adapter, mode and outcome.
    pub const CALLS_TOTAL: &str = "storybook_genai_calls_total";
    /// Call latency in seconds by adapter and mode.
    pub const CALL_SECONDS: &str = "storybook_genai_call_seconds";
}

/// Record one external call. `mode` is "submit", "sync", "poll" or "script".
pub fn record_call(adapter: &'static str, mode: &'static str, ok: bool, latency_ms: f64) {
    counter!(
        names::CALLS_TOTAL,
        "adapter" => adapter,
        "mode" => mode,
        "outcome" => if ok { "ok" } else { "error" }
    )
    .increment(1);

    histogram!(names::CALL_SECONDS, "adapter" => adapter, "mode" => mode).record(latency_ms / 1000.0);
}
