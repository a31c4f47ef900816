//! Request timing on the monotonic clock.

use std::time::Duration;

use tokio::time::Instant;

/// Opaque monotonic start mark captured at request entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Mark(Instant);

/// Timer for measuring request durations.
///
/// Backed by `tokio::time::Instant`, which follows the monotonic clock and
/// honours paused time in tests.
pub struct RequestTimer;

impl RequestTimer {
    pub fn start() -> Mark {
        Mark(Instant::now())
    }

    /// Elapsed time since `mark`, never negative.
    pub fn elapsed(mark: Mark) -> Duration {
        Instant::now().saturating_duration_since(mark.0)
    }

    pub fn elapsed_millis(mark: Mark) -> f64 {
        Self::elapsed(mark).as_nanos() as f64 / 1_000_000.0
    }
}

impl Mark {
    pub fn instant(&self) -> Instant {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer() {
        let mark = RequestTimer::start();
        std::thread::sleep(Duration::from_millis(10));
        let elapsed = RequestTimer::elapsed_millis(mark);
        assert!(elapsed >= 10.0);
        assert!(elapsed < 1000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_follows_tokio_clock() {
        let mark = RequestTimer::start();
        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(RequestTimer::elapsed(mark), Duration::from_millis(250));
    }

    #[test]
    fn test_marks_are_ordered() {
        let first = RequestTimer::start();
        let second = RequestTimer::start();
        assert!(first <= second);
        assert!(RequestTimer::elapsed_millis(second) >= 0.0);
    }
}
