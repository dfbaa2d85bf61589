// Orchestra Engine: HTTP Retry & Circuit-Breaker
//
// Shared retry utilities used by every provider adapter.
//
//   • Exponential backoff with +/-25% jitter (base 1s, max 30s, 3 retries)
//   • Retry on 429 (rate limit), 500, 502, 503, 504, 529
//   • Respects a `Retry-After` response header
//   • Circuit breaker: 5 consecutive failures -> fail fast for 60s
//
// Grounded on the teacher's engine/http.rs; TLS pinning and request signing
// were dropped in the final trimming pass — they serve the teacher's desktop
// threat model, not anything spec.md asks this core to do.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

pub use crate::atoms::constants::MAX_HTTP_RETRIES as MAX_RETRIES;
use crate::atoms::constants::{INITIAL_RETRY_DELAY_MS, MAX_RETRY_DELAY_MS};

/// Check if an HTTP status code represents a transient/retryable error.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

/// Parse a `Retry-After` header value (seconds only; HTTP-date form is
/// treated as absent rather than parsed, matching the teacher's behaviour).
pub fn parse_retry_after(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

/// Sleep with exponential backoff + jitter. Respects a server-provided
/// `Retry-After` hint by taking the larger of the two delays. Returns the
/// actual delay for logging.
pub async fn retry_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    let base_ms = INITIAL_RETRY_DELAY_MS.saturating_mul(1u64 << attempt.min(10));
    let capped_ms = base_ms.min(MAX_RETRY_DELAY_MS);
    let delay_ms = if let Some(secs) = retry_after_secs {
        (secs.min(60) * 1000).max(capped_ms)
    } else {
        capped_ms
    };
    let jittered = apply_jitter(delay_ms);
    let delay = Duration::from_millis(jittered);
    tokio::time::sleep(delay).await;
    delay
}

fn apply_jitter(base_ms: u64) -> u64 {
    let jitter_range = (base_ms / 4) as i64;
    if jitter_range == 0 {
        return base_ms.max(100);
    }
    let offset = (rand_jitter() % (2 * jitter_range + 1)) - jitter_range;
    let result = base_ms as i64 + offset;
    result.max(100) as u64
}

/// Clock-based jitter source — avoids pulling in a `rand` dependency for a
/// single non-cryptographic use.
fn rand_jitter() -> i64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    nanos as i64
}

// ── Circuit breaker ──────────────────────────────────────────────────────

/// Per-provider circuit breaker: after `threshold` consecutive failures,
/// reject new requests immediately for `cooldown_secs` instead of hammering
/// a down vendor.
pub struct CircuitBreaker {
    threshold: u32,
    cooldown_secs: u64,
    consecutive_failures: AtomicU32,
    opened_at: Mutex<Option<SystemTime>>,
    tripped_count: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown_secs: u64) -> Self {
        CircuitBreaker {
            threshold,
            cooldown_secs,
            consecutive_failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
            tripped_count: AtomicU64::new(0),
        }
    }

    /// Returns `Err` if the circuit is open and the cooldown hasn't elapsed.
    pub fn check(&self) -> Result<(), String> {
        let mut opened = self.opened_at.lock();
        if let Some(opened_at) = *opened {
            let elapsed = SystemTime::now().duration_since(opened_at).unwrap_or_default();
            if elapsed.as_secs() < self.cooldown_secs {
                return Err(format!(
                    "circuit open: {} consecutive failures, retry in {}s",
                    self.threshold,
                    self.cooldown_secs - elapsed.as_secs()
                ));
            }
            // Cooldown elapsed: half-open, let the next call through.
            *opened = None;
        }
        Ok(())
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.threshold {
            let mut opened = self.opened_at.lock();
            if opened.is_none() {
                *opened = Some(SystemTime::now());
                self.tripped_count.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.opened_at.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_status_set() {
        for s in [429, 500, 502, 503, 504, 529] {
            assert!(is_retryable_status(s), "{s} should be retryable");
        }
        for s in [200, 400, 401, 403, 404] {
            assert!(!is_retryable_status(s), "{s} should not be retryable");
        }
    }

    #[test]
    fn circuit_opens_after_threshold() {
        let cb = CircuitBreaker::new(2, 60);
        assert!(cb.check().is_ok());
        cb.record_failure();
        assert!(cb.check().is_ok());
        cb.record_failure();
        assert!(cb.check().is_err());
        cb.record_success();
        assert!(cb.check().is_ok());
    }

    #[test]
    fn retry_after_parses_seconds() {
        assert_eq!(parse_retry_after("5"), Some(5));
        assert_eq!(parse_retry_after("not-a-number"), None);
    }
}
