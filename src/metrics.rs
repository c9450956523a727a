//! Lightweight metrics helpers for the proxy.
//!
//! Thin wrappers over the `metrics` crate macros. No exporter is installed
//! here; the hosting application may install any compatible recorder, and
//! without one every call is a no-op.
//!
//! Provided metrics:
//! * `gameserver_proxy_requests_total` (counter, labels: method, outcome)
//! * `gameserver_proxy_request_duration_seconds` (histogram, labels: outcome)
//! * `gameserver_proxy_resolutions_total` (counter, labels: scheme, outcome)
//! * `gameserver_proxy_forward_duration_seconds` (histogram, labels: status)
//! * `gameserver_proxy_token_refreshes_total` (counter, labels: result)
//! * `gameserver_proxy_active_requests` (gauge)
//! * `gameserver_proxy_upgraded_tunnels_total` (counter)
//!
//! The `*Timer` structs record on `Drop`, so early returns are still measured.
use std::{
    sync::atomic::{AtomicI64, Ordering},
    time::{Duration, Instant},
};

use metrics::{Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::Lazy;

pub const GAMESERVER_PROXY_REQUESTS_TOTAL: &str = "gameserver_proxy_requests_total";
pub const GAMESERVER_PROXY_REQUEST_DURATION_SECONDS: &str =
    "gameserver_proxy_request_duration_seconds";
pub const GAMESERVER_PROXY_RESOLUTIONS_TOTAL: &str = "gameserver_proxy_resolutions_total";
pub const GAMESERVER_PROXY_FORWARD_DURATION_SECONDS: &str =
    "gameserver_proxy_forward_duration_seconds";
pub const GAMESERVER_PROXY_TOKEN_REFRESHES_TOTAL: &str = "gameserver_proxy_token_refreshes_total";
pub const GAMESERVER_PROXY_ACTIVE_REQUESTS: &str = "gameserver_proxy_active_requests";
pub const GAMESERVER_PROXY_UPGRADED_TUNNELS_TOTAL: &str =
    "gameserver_proxy_upgraded_tunnels_total";

static ACTIVE_REQUESTS: AtomicI64 = AtomicI64::new(0);

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        GAMESERVER_PROXY_REQUESTS_TOTAL,
        Unit::Count,
        "Inbound requests handled by the proxy, by final outcome."
    );
    describe_histogram!(
        GAMESERVER_PROXY_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Time from receiving a request to producing its response head."
    );
    describe_counter!(
        GAMESERVER_PROXY_RESOLUTIONS_TOTAL,
        Unit::Count,
        "Endpoint resolution attempts, by route scheme and outcome."
    );
    describe_histogram!(
        GAMESERVER_PROXY_FORWARD_DURATION_SECONDS,
        Unit::Seconds,
        "Time spent waiting for the game server's response head."
    );
    describe_counter!(
        GAMESERVER_PROXY_TOKEN_REFRESHES_TOTAL,
        Unit::Count,
        "Entity token refreshes against the directory service."
    );
    describe_gauge!(
        GAMESERVER_PROXY_ACTIVE_REQUESTS,
        "Requests currently being dispatched."
    );
    describe_counter!(
        GAMESERVER_PROXY_UPGRADED_TUNNELS_TOTAL,
        Unit::Count,
        "Upgraded connections (e.g. WebSocket) tunnelled to game servers."
    );
});

/// Register metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    Lazy::force(&DESCRIPTIONS);
    tracing::debug!("Proxy metric descriptions registered");
    Ok(())
}

/// Count one inbound request by its final outcome.
pub fn increment_request_total(method: &str, outcome: &'static str) {
    counter!(
        GAMESERVER_PROXY_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_request_duration(outcome: &'static str, duration: Duration) {
    histogram!(GAMESERVER_PROXY_REQUEST_DURATION_SECONDS, "outcome" => outcome)
        .record(duration.as_secs_f64());
}

/// Count one resolution attempt.
pub fn increment_resolution_total(scheme: &str, outcome: &'static str) {
    counter!(
        GAMESERVER_PROXY_RESOLUTIONS_TOTAL,
        "scheme" => scheme.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_forward_duration(status: &str, duration: Duration) {
    histogram!(GAMESERVER_PROXY_FORWARD_DURATION_SECONDS, "status" => status.to_string())
        .record(duration.as_secs_f64());
}

/// Count one entity token refresh (`result` is `ok` or `error`).
pub fn increment_token_refresh(result: &'static str) {
    counter!(GAMESERVER_PROXY_TOKEN_REFRESHES_TOTAL, "result" => result).increment(1);
}

pub fn increment_upgraded_tunnels() {
    counter!(GAMESERVER_PROXY_UPGRADED_TUNNELS_TOTAL).increment(1);
}

/// Current number of in-flight dispatches.
pub fn active_requests() -> i64 {
    ACTIVE_REQUESTS.load(Ordering::Relaxed)
}

/// RAII guard tracking one in-flight dispatch.
pub struct ActiveRequestGuard;

impl ActiveRequestGuard {
    pub fn new() -> Self {
        let now = ACTIVE_REQUESTS.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!(GAMESERVER_PROXY_ACTIVE_REQUESTS).set(now as f64);
        Self
    }
}

impl Default for ActiveRequestGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        let now = ACTIVE_REQUESTS.fetch_sub(1, Ordering::Relaxed) - 1;
        gauge!(GAMESERVER_PROXY_ACTIVE_REQUESTS).set(now as f64);
    }
}

/// RAII helper measuring the time spent waiting on a game server.
pub struct ForwardTimer {
    start: Instant,
    status: String,
}

impl ForwardTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            status: "error".to_string(),
        }
    }

    /// Label the measurement with the upstream status code.
    pub fn set_status(&mut self, status: u16) {
        self.status = status.to_string();
    }
}

impl Default for ForwardTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ForwardTimer {
    fn drop(&mut self) {
        record_forward_duration(&self.status, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_active_request_guard_counts() {
        let guard = ActiveRequestGuard::new();
        assert!(active_requests() >= 1);
        drop(guard);
        assert!(active_requests() >= 0);
    }

    #[test]
    fn test_forward_timer() {
        let mut timer = ForwardTimer::new();
        timer.set_status(200);
        assert_eq!(timer.status, "200");
        drop(timer);
    }
}
