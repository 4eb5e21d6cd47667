//! Helper utilities for Sockrelay
//!
//! This module provides common utility functions used throughout the application.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

/// Default interval between attempts in milliseconds
pub const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Default connection timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Microseconds since the Unix epoch, 0 if the clock is before it
pub fn micros_since_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Parse duration from milliseconds
pub fn duration_from_millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Sleep for `duration` unless `cancel` fires first
///
/// Returns `false` if the sleep was cut short by cancellation. A zero
/// duration still yields to the runtime once.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        tokio::task::yield_now().await;
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}
