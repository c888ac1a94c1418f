//! # Per-Key Admission Gate
//!
//! A fixed-window request counter keyed by actor id. Each key owns one
//! `ThrottleWindow`; the first admit for a key opens a window with count 1, later
//! admits inside the window increment the count until the limit is hit, and the
//! first admit at or after `window` elapsed opens a fresh window.
//!
//! ## Fixed, Not Sliding
//!
//! This is a fixed-window counter, not a sliding log or token bucket. A client can
//! send `limit` requests at the very end of one window and `limit` more at the start
//! of the next, so up to `2 * limit` requests may pass within one window length
//! across a boundary. That burst is accepted behavior for this gate.
//!
//! ## Concurrency
//!
//! Windows live in a `DashMap`, so a read-modify-write locks only the shard that
//! holds the key. Unrelated actors never serialize behind each other.
//!
//! ## Time
//!
//! Time comes from a [`Clock`]. Production uses [`SystemClock`]; tests drive a
//! [`ManualClock`] forward explicitly.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);
/// Default number of admits per window.
pub const DEFAULT_LIMIT: u32 = 5;

/// A monotonic time source.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// The process clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.origin + offset
    }
}

/// Window length and request limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// How long a window stays open.
    pub window: Duration,
    /// Admits allowed per window.
    pub limit: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            limit: DEFAULT_LIMIT,
        }
    }
}

/// The outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request may proceed.
    Allowed,
    /// The key exhausted its window; the current window closes after `retry_after`.
    Throttled {
        /// Time left in the current window.
        retry_after: Duration,
    },
}

impl Admission {
    /// `true` for [`Admission::Allowed`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// Per-key counter state.
#[derive(Debug, Clone, Copy)]
struct ThrottleWindow {
    start: Instant,
    count: u32,
}

impl ThrottleWindow {
    fn open(now: Instant) -> Self {
        Self { start: now, count: 1 }
    }
}

/// # Rate Limiter
///
/// Holds one window per key for the lifetime of the limiter. Construct one per
/// service and share it behind an `Arc`.
pub struct RateLimiter<K> {
    config: ThrottleConfig,
    windows: DashMap<K, ThrottleWindow>,
    clock: Arc<dyn Clock>,
}

impl<K> RateLimiter<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates a limiter driven by the system clock.
    pub fn new(config: ThrottleConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a limiter driven by an arbitrary clock.
    pub fn with_clock(config: ThrottleConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            clock,
        }
    }

    /// The configured window and limit.
    pub fn config(&self) -> ThrottleConfig {
        self.config
    }

    /// Records one request for `key` and decides whether it may proceed.
    pub fn admit(&self, key: &K) -> Admission {
        let now = self.clock.now();

        // The entry guard holds the shard lock for the whole read-modify-write.
        match self.windows.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(ThrottleWindow::open(now));
                Admission::Allowed
            }
            Entry::Occupied(mut slot) => {
                let window = slot.get_mut();
                let elapsed = now.saturating_duration_since(window.start);

                if elapsed >= self.config.window {
                    *window = ThrottleWindow::open(now);
                    Admission::Allowed
                } else if window.count < self.config.limit {
                    window.count += 1;
                    Admission::Allowed
                } else {
                    Admission::Throttled {
                        retry_after: self.config.window - elapsed,
                    }
                }
            }
        }
    }

    /// Number of keys with a recorded window.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn limiter(clock: Arc<ManualClock>) -> RateLimiter<Uuid> {
        RateLimiter::with_clock(ThrottleConfig::default(), clock)
    }

    #[test]
    fn sixth_request_inside_window_is_throttled() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(clock.clone());
        let actor = Uuid::new_v4();

        for i in 0..5 {
            clock.advance(Duration::from_millis(10));
            assert!(limiter.admit(&actor).is_allowed(), "request {} should pass", i + 1);
        }

        match limiter.admit(&actor) {
            Admission::Throttled { retry_after } => {
                // Window opened at +10ms, now is +50ms.
                assert_eq!(retry_after, Duration::from_millis(960));
            }
            Admission::Allowed => panic!("sixth request should be throttled"),
        }
    }

    #[test]
    fn window_resets_after_window_length() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(clock.clone());
        let actor = Uuid::new_v4();

        for _ in 0..5 {
            assert!(limiter.admit(&actor).is_allowed());
        }
        assert!(!limiter.admit(&actor).is_allowed());

        clock.advance(Duration::from_millis(1001));
        assert!(limiter.admit(&actor).is_allowed());

        // Count restarted at 1, so four more fit in the new window.
        for _ in 0..4 {
            assert!(limiter.admit(&actor).is_allowed());
        }
        assert!(!limiter.admit(&actor).is_allowed());
    }

    #[test]
    fn elapsed_equal_to_window_opens_a_new_window() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(clock.clone());
        let actor = Uuid::new_v4();

        for _ in 0..5 {
            limiter.admit(&actor);
        }
        clock.advance(DEFAULT_WINDOW);
        assert!(limiter.admit(&actor).is_allowed());
    }

    #[test]
    fn keys_are_throttled_independently() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(clock);
        let noisy = Uuid::new_v4();
        let quiet = Uuid::new_v4();

        for _ in 0..10 {
            limiter.admit(&noisy);
        }
        assert!(!limiter.admit(&noisy).is_allowed());
        assert!(limiter.admit(&quiet).is_allowed());
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn burst_across_boundary_is_allowed() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(clock.clone());
        let actor = Uuid::new_v4();

        assert!(limiter.admit(&actor).is_allowed());
        clock.advance(Duration::from_millis(990));
        for _ in 0..4 {
            assert!(limiter.admit(&actor).is_allowed());
        }
        clock.advance(Duration::from_millis(20));
        for _ in 0..5 {
            assert!(limiter.admit(&actor).is_allowed());
        }
    }

    #[test]
    fn concurrent_admits_never_exceed_limit() {
        let limiter = Arc::new(RateLimiter::<u32>::with_clock(
            ThrottleConfig { window: Duration::from_secs(60), limit: 5 },
            Arc::new(ManualClock::new()),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || (0..50).filter(|_| limiter.admit(&7).is_allowed()).count())
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 5);
    }
}
