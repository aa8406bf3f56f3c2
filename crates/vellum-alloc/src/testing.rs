//! Fault-injecting strategy for exercising allocation-failure paths.
//!
//! Wraps one recording table behind a lock and fails size-increasing
//! requests on a configurable schedule: a positive threshold fails exactly
//! the Nth such request, a negative threshold fails the Nth and every one
//! after it (for driving cleanup-after-exhaustion paths), zero never
//! fails. Code under test is handed an ordinary handle and cannot tell it
//! runs under fault injection.
//!
//! The expected deployment is one process-wide instance shared by
//! concurrent callers; [`PROCESS_TESTING`] is that instance. Its lifecycle
//! is explicit: call [`TestingHeap::reset`] between test cases and
//! [`TestingHeap::assert_no_leaks`] at teardown points. Confined
//! per-instance use works the same way through [`TestingHeap::new`].

use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::handle::Allocator;
use crate::recording::Ledger;

struct TestingState {
    /// Failure threshold; see the module docs for the sign convention.
    fail_at: i64,
    /// Count of size-increasing requests seen so far.
    allocations: i64,
    ledger: Ledger,
}

impl TestingState {
    /// Advances the counter and reports whether this request must fail.
    /// Only called for requests that would grow memory use.
    fn counts_as_failure(&mut self) -> bool {
        self.allocations += 1;
        if self.fail_at < 0 {
            self.allocations >= -self.fail_at
        } else if self.fail_at > 0 {
            self.allocations == self.fail_at
        } else {
            false
        }
    }
}

/// The testing strategy. The only internally synchronized strategy; every
/// operation holds the one lock for its duration.
pub struct TestingHeap {
    state: Mutex<TestingState>,
}

/// The process-wide instance. Never used implicitly; callers opt in by
/// building handles from it.
pub static PROCESS_TESTING: TestingHeap = TestingHeap::new();

impl TestingHeap {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(TestingState {
                fail_at: 0,
                allocations: 0,
                ledger: Ledger::new(),
            }),
        }
    }

    /// A handle backed by this instance.
    pub fn handle(&self) -> Allocator<'_> {
        Allocator::Testing(self)
    }

    /// Sets the failure threshold. Positive fails exactly the Nth
    /// size-increasing request, negative fails the Nth and all later ones,
    /// zero disables failures. Does not reset the request counter.
    pub fn set_fail_at(&self, fail_at: i64) {
        self.state.lock().fail_at = fail_at;
    }

    /// Number of size-increasing requests seen since the last reset.
    pub fn allocation_count(&self) -> i64 {
        self.state.lock().allocations
    }

    /// Between-test-cases point: releases anything still tracked, clears
    /// the table, and disarms the failure schedule.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.ledger.free_all();
        state.allocations = 0;
        state.fail_at = 0;
    }

    pub fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        let mut state = self.state.lock();
        if state.counts_as_failure() {
            return None;
        }
        state.ledger.alloc(size, false)
    }

    pub fn zalloc(&self, size: usize) -> Option<NonNull<u8>> {
        let mut state = self.state.lock();
        if state.counts_as_failure() {
            return None;
        }
        state.ledger.alloc(size, true)
    }

    /// # Safety
    ///
    /// A present `ptr` must be live and previously returned by this
    /// instance with exactly `old_size` bytes.
    pub unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let mut state = self.state.lock();
        // Shrinks and frees never fail; only growth draws from the
        // failure schedule.
        if new_size > old_size && state.counts_as_failure() {
            return None;
        }
        // SAFETY: forwarded caller contract.
        unsafe { state.ledger.realloc(ptr, old_size, new_size) }
    }

    /// # Safety
    ///
    /// `ptr` must be live and previously returned by this instance, and
    /// must not be used afterwards.
    pub unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.state.lock().ledger.free(ptr, size) };
    }

    /// Releases every still-live allocation and empties the table.
    pub fn free_all(&self) {
        self.state.lock().ledger.free_all();
    }

    /// Number of allocations currently tracked as live.
    pub fn live_count(&self) -> usize {
        self.state.lock().ledger.live_count()
    }

    /// Teardown check; panics if anything is still tracked.
    pub fn assert_no_leaks(&self) {
        self.state.lock().ledger.assert_no_leaks();
    }
}

impl Default for TestingHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_threshold_fails_exactly_the_nth() {
        let heap = TestingHeap::new();
        heap.set_fail_at(3);
        assert!(heap.alloc(16).is_some());
        assert!(heap.alloc(16).is_some());
        assert!(heap.alloc(16).is_none(), "third request must fail");
        assert!(heap.alloc(16).is_some(), "later requests succeed again");
        heap.free_all();
    }

    #[test]
    fn negative_threshold_is_sticky() {
        let heap = TestingHeap::new();
        heap.set_fail_at(-2);
        assert!(heap.alloc(16).is_some());
        assert!(heap.alloc(16).is_none());
        assert!(heap.alloc(16).is_none());
        assert!(heap.zalloc(16).is_none());
        heap.free_all();
    }

    #[test]
    fn zero_threshold_never_fails() {
        let heap = TestingHeap::new();
        for _ in 0..64 {
            assert!(heap.alloc(8).is_some());
        }
        heap.free_all();
        heap.assert_no_leaks();
    }

    #[test]
    fn only_growth_draws_from_the_schedule() {
        let heap = TestingHeap::new();
        let ptr = heap.alloc(64).expect("first request succeeds");
        heap.set_fail_at(2);
        // SAFETY: ptr is live with 64 recorded bytes; a shrink must not
        // advance the counter.
        let shrunk = unsafe { heap.realloc(Some(ptr), 64, 32) }.expect("shrink never fails");
        assert_eq!(heap.allocation_count(), 1);
        // SAFETY: shrunk is live with 32 recorded bytes.
        let grown = unsafe { heap.realloc(Some(shrunk), 32, 128) };
        assert!(grown.is_none(), "the second growth request must fail");
        assert_eq!(heap.live_count(), 1, "the old block stays live and tracked");
        heap.free_all();
    }

    #[test]
    fn failed_requests_are_not_forwarded() {
        let heap = TestingHeap::new();
        heap.set_fail_at(1);
        assert!(heap.alloc(1024).is_none());
        assert_eq!(heap.live_count(), 0);
        assert_eq!(heap.allocation_count(), 1);
    }

    #[test]
    fn reset_clears_schedule_counter_and_table() {
        let heap = TestingHeap::new();
        heap.set_fail_at(-1);
        assert!(heap.alloc(16).is_none());
        heap.reset();
        assert_eq!(heap.allocation_count(), 0);
        assert!(heap.alloc(16).is_some(), "schedule is disarmed after reset");
        heap.reset();
        heap.assert_no_leaks();
    }

    #[test]
    #[should_panic(expected = "allocation(s) were never released")]
    fn teardown_audit_catches_leaks() {
        let heap = TestingHeap::new();
        heap.alloc(32).expect("alloc");
        heap.assert_no_leaks();
    }

    #[test]
    fn process_wide_instance_round_trip() {
        // The one test that touches the shared static, so parallel test
        // threads cannot interleave schedules on it.
        let alloc = PROCESS_TESTING.handle();
        let ptr = alloc.alloc(64).expect("alloc");
        // SAFETY: ptr is live with 64 recorded bytes.
        unsafe { alloc.free(Some(ptr), 64) };
        PROCESS_TESTING.reset();
        PROCESS_TESTING.assert_no_leaks();
    }

    #[test]
    fn shared_across_threads() {
        let heap = TestingHeap::new();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        if let Some(ptr) = heap.alloc(24) {
                            // SAFETY: ptr is live with 24 recorded bytes.
                            unsafe { heap.free(ptr, 24) };
                        }
                    }
                });
            }
        });
        heap.assert_no_leaks();
        assert_eq!(heap.allocation_count(), 400);
    }
}
