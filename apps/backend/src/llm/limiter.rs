//! Token-bucket rate limiter for completion calls.
//!
//! One shared limiter guards the external service credential across every
//! session: at most one call in flight, a minimum spacing between calls,
//! and a rolling per-window quota. `acquire` resolves once a call may
//! start and the returned permit keeps the in-flight bound held until the
//! call finishes.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tokio::time::Instant;
use tracing::debug;

const MIN_SPACING: Duration = Duration::from_millis(200);
const WINDOW: Duration = Duration::from_secs(60);
const WINDOW_QUOTA: u32 = 50;

#[derive(Debug)]
struct LimiterState {
    last_call: Option<Instant>,
    window_start: Instant,
    used_in_window: u32,
}

pub struct RateLimiter {
    /// Held by the active caller; bounds concurrency to one in flight.
    in_flight: AsyncMutex<()>,
    state: Mutex<LimiterState>,
    min_spacing: Duration,
    window: Duration,
    quota: u32,
}

/// Proof that a call slot was granted; hold it for the call's duration.
pub struct RatePermit<'a> {
    _in_flight: MutexGuard<'a, ()>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(MIN_SPACING, WINDOW, WINDOW_QUOTA)
    }
}

impl RateLimiter {
    pub fn new(min_spacing: Duration, window: Duration, quota: u32) -> Self {
        Self {
            in_flight: AsyncMutex::new(()),
            state: Mutex::new(LimiterState {
                last_call: None,
                window_start: Instant::now(),
                used_in_window: 0,
            }),
            min_spacing,
            window,
            quota,
        }
    }

    /// Wait until a call may start.
    pub async fn acquire(&self) -> RatePermit<'_> {
        let in_flight = self.in_flight.lock().await;

        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();

                if now.duration_since(state.window_start) >= self.window {
                    state.window_start = now;
                    state.used_in_window = 0;
                }

                if state.used_in_window >= self.quota {
                    // Quota exhausted: sleep out the rest of the window.
                    let resume_at = state.window_start + self.window;
                    debug!(
                        wait_ms = resume_at.saturating_duration_since(now).as_millis() as u64,
                        "completion quota exhausted, throttling"
                    );
                    Some(resume_at.saturating_duration_since(now))
                } else {
                    let spacing_wait = state
                        .last_call
                        .map(|last| (last + self.min_spacing).saturating_duration_since(now))
                        .unwrap_or(Duration::ZERO);
                    if spacing_wait.is_zero() {
                        state.used_in_window += 1;
                        state.last_call = Some(now);
                        None
                    } else {
                        Some(spacing_wait)
                    }
                }
            };

            match wait {
                None => return RatePermit { _in_flight: in_flight },
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn enforces_minimum_spacing() {
        let limiter = RateLimiter::new(Duration::from_millis(200), Duration::from_secs(60), 50);
        let start = Instant::now();

        drop(limiter.acquire().await);
        drop(limiter.acquire().await);
        drop(limiter.acquire().await);

        // Two spacings between three calls.
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn quota_exhaustion_waits_for_window_reset() {
        let limiter = RateLimiter::new(Duration::ZERO, Duration::from_secs(60), 2);
        let start = Instant::now();

        drop(limiter.acquire().await);
        drop(limiter.acquire().await);
        // Third call must wait out the window.
        drop(limiter.acquire().await);

        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn permit_serializes_in_flight_calls() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new(
            Duration::ZERO,
            Duration::from_secs(60),
            50,
        ));
        let concurrent = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let peak = Arc::new(std::sync::atomic::AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            let concurrent = concurrent.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let permit = limiter.acquire().await;
                let live = concurrent.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                peak.fetch_max(live, std::sync::atomic::Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                concurrent.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                drop(permit);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
