use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default window for the restart-rate counter
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window event counter
///
/// Events older than the window are pruned whenever the counter is touched, so
/// no background task is needed and `close` only has to flip a flag. A closed
/// counter ignores new events but keeps reporting the ones it already holds.
#[derive(Debug)]
pub struct RateCounter {
    window: Duration,
    events: Mutex<VecDeque<(Instant, u64)>>,
    closed: AtomicBool,
}

impl RateCounter {
    /// Create a counter over the given trailing window
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            events: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Length of the trailing window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record `n` events at the current time. Ignored after `close`.
    pub fn add(&self, n: u64) {
        if n == 0 || self.is_closed() {
            return;
        }
        let now = Instant::now();
        let mut events = self.events();
        Self::prune(&mut events, now, self.window);
        events.push_back((now, n));
    }

    /// Number of events recorded within the trailing window
    pub fn count(&self) -> u64 {
        let now = Instant::now();
        let mut events = self.events();
        Self::prune(&mut events, now, self.window);
        events.iter().map(|(_, n)| n).sum()
    }

    /// Stop accepting events. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn events(&self) -> MutexGuard<'_, VecDeque<(Instant, u64)>> {
        // A panic while holding this lock cannot leave the deque inconsistent
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn prune(events: &mut VecDeque<(Instant, u64)>, now: Instant, window: Duration) {
        while let Some(&(at, _)) = events.front() {
            if now.duration_since(at) >= window {
                events.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for RateCounter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_rate_counter_default_window() {
        let counter = RateCounter::default();
        assert_eq!(counter.window(), Duration::from_secs(60));
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_rate_counter_add() {
        let counter = RateCounter::default();

        counter.add(1);
        assert_eq!(counter.count(), 1);

        counter.add(3);
        assert_eq!(counter.count(), 4);

        // Zero is a no-op
        counter.add(0);
        assert_eq!(counter.count(), 4);
    }

    #[test]
    fn test_rate_counter_window_expiry() {
        let counter = RateCounter::new(Duration::from_millis(100));

        counter.add(2);
        assert_eq!(counter.count(), 2);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(counter.count(), 0);

        counter.add(1);
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn test_rate_counter_partial_expiry() {
        let counter = RateCounter::new(Duration::from_millis(300));

        counter.add(1);
        thread::sleep(Duration::from_millis(200));
        counter.add(1);
        assert_eq!(counter.count(), 2);

        thread::sleep(Duration::from_millis(150));
        // First event has aged out, second has not
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn test_rate_counter_close() {
        let counter = RateCounter::default();
        counter.add(5);

        counter.close();
        counter.close();
        assert!(counter.is_closed());
        assert_eq!(counter.count(), 5);

        counter.add(1);
        assert_eq!(counter.count(), 5);
    }

    #[test]
    fn test_rate_counter_closed_still_decays() {
        let counter = RateCounter::new(Duration::from_millis(100));
        counter.add(1);
        counter.close();

        thread::sleep(Duration::from_millis(150));
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_rate_counter_concurrent() {
        let counter = Arc::new(RateCounter::default());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..250 {
                    counter.add(1);
                    let _ = counter.count();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.count(), 2000);
    }
}
