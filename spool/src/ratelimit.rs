//! Windowed limiter for error logs emitted under sustained overload.
//!
//! When the ring buffer stays full, or a backend stays down, every publish or
//! chunk would otherwise log. The limiter allows a fixed number of events per
//! window and counts what it suppressed so the next emitted line can report it.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default number of events allowed per window.
pub const DEFAULT_MAX_EVENTS: u32 = 5;

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(30);

/// Gate for rate-limited log lines.
///
/// ```rust
/// use spool::ratelimit::RateLimitedLog;
///
/// let limiter = RateLimitedLog::default();
/// if let Some(suppressed) = limiter.try_acquire() {
///     tracing::error!(suppressed, "backend unavailable");
/// }
/// ```
#[derive(Debug)]
pub struct RateLimitedLog {
    max_events: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

#[derive(Debug)]
struct WindowState {
    started: Instant,
    emitted: u32,
    suppressed: u64,
}

impl RateLimitedLog {
    /// Allows at most `max_events` per `window`.
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self {
            max_events,
            window,
            state: Mutex::new(WindowState {
                started: Instant::now(),
                emitted: 0,
                suppressed: 0,
            }),
        }
    }

    /// Claims a slot in the current window.
    ///
    /// Returns `Some(n)` when the caller may log, where `n` is the number of
    /// events suppressed since the last permitted one. Returns `None` when the
    /// window is exhausted.
    pub fn try_acquire(&self) -> Option<u64> {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&self, now: Instant) -> Option<u64> {
        let mut state = self.state.lock();
        if now.saturating_duration_since(state.started) >= self.window {
            state.started = now;
            state.emitted = 0;
        }
        if state.emitted < self.max_events {
            state.emitted += 1;
            Some(std::mem::take(&mut state.suppressed))
        } else {
            state.suppressed += 1;
            None
        }
    }
}

impl Default for RateLimitedLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EVENTS, DEFAULT_WINDOW)
    }
}
