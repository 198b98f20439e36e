//! Single-flight guard for collections.

use std::sync::atomic::{AtomicBool, Ordering};

/// Lets at most one collection run at a time.
///
/// Overlapping requests are refused rather than queued: [`SingleFlightGuard::try_enter`]
/// returns `None` while another holder is active. The guard is created once by the
/// serving layer and shared with every exporter that needs it.
#[derive(Debug, Default)]
pub struct SingleFlightGuard {
    running: AtomicBool,
}

impl SingleFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim the guard.
    ///
    /// The returned permit releases the guard when dropped, on every exit path
    /// including unwinding.
    pub fn try_enter(&self) -> Option<FlightPermit<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightPermit { guard: self })
    }

    /// Whether a permit is currently held.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Proof of holding the [`SingleFlightGuard`].
#[must_use = "the guard is released as soon as the permit is dropped"]
#[derive(Debug)]
pub struct FlightPermit<'a> {
    guard: &'a SingleFlightGuard,
}

impl FlightPermit<'_> {
    /// Release the guard now.
    pub fn exit(self) {}
}

impl Drop for FlightPermit<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_second_enter_is_refused() {
        let guard = SingleFlightGuard::new();
        let permit = guard.try_enter();
        assert!(permit.is_some());
        assert!(guard.is_running());
        assert!(guard.try_enter().is_none());

        drop(permit);
        assert!(!guard.is_running());
        assert!(guard.try_enter().is_some());
    }

    #[test]
    fn test_exit_releases() {
        let guard = SingleFlightGuard::new();
        guard.try_enter().unwrap().exit();
        assert!(!guard.is_running());
    }

    #[test]
    fn test_concurrent_enter_exactly_one_wins() {
        for _ in 0..50 {
            let guard = Arc::new(SingleFlightGuard::new());
            let barrier = Arc::new(Barrier::new(2));
            let (entered, left) = (Arc::new(AtomicUsize::new(0)), Arc::new(Barrier::new(2)));

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let (guard, barrier, entered, left) =
                        (guard.clone(), barrier.clone(), entered.clone(), left.clone());
                    std::thread::spawn(move || {
                        barrier.wait();
                        let permit = guard.try_enter();
                        if permit.is_some() {
                            entered.fetch_add(1, Ordering::SeqCst);
                        }
                        // hold the permit until both threads have tried
                        left.wait();
                        drop(permit);
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(entered.load(Ordering::SeqCst), 1);
            assert!(guard.try_enter().is_some());
        }
    }

    #[test]
    fn test_released_on_panic() {
        let guard = SingleFlightGuard::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _permit = guard.try_enter().unwrap();
            panic!("collection blew up");
        }));

        assert!(result.is_err());
        assert!(!guard.is_running());
    }
}
