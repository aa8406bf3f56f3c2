//! Heap wrapper that tracks every live allocation.
//!
//! Each allocation made through this strategy is forwarded to the heap and
//! recorded as a (address, size) pair. That table is what makes bulk
//! reclamation and leak auditing possible on top of a heap that has
//! neither. The table also turns the exact-size release contract into a
//! checked one: freeing an untracked pointer, or freeing with a size that
//! does not match the recorded one, is a caller-side memory bug and panics
//! rather than risking silent corruption.

use std::cell::RefCell;
use std::ptr::NonNull;

use crate::handle::Allocator;
use crate::heap;

/// One traced operation. Collected only while tracing is enabled; drained
/// explicitly by the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    Alloc { addr: usize, size: usize },
    Zalloc { addr: usize, size: usize },
    Realloc { old_addr: usize, new_addr: usize, old_size: usize, new_size: usize },
    Free { addr: usize, size: usize },
    FreeAll { released: usize },
}

/// The bookkeeping table plus the forwarding logic. Shared with the
/// testing strategy, which drives one of these under its lock.
pub(crate) struct Ledger {
    // Parallel columns; a cleared slot has address 0. Addresses are stored
    // raw so the table itself stays Send.
    addrs: Vec<usize>,
    sizes: Vec<usize>,
    trace: Vec<TraceEvent>,
    tracing: bool,
}

impl Ledger {
    pub(crate) const fn new() -> Self {
        Self {
            addrs: Vec::new(),
            sizes: Vec::new(),
            trace: Vec::new(),
            tracing: false,
        }
    }

    fn note(&mut self, event: TraceEvent) {
        if self.tracing {
            self.trace.push(event);
        }
    }

    fn record(&mut self, addr: usize, size: usize) {
        self.addrs.push(addr);
        self.sizes.push(size);
    }

    /// Newest-first lookup; frees usually target recent allocations.
    fn position(&self, addr: usize) -> Option<usize> {
        self.addrs.iter().rposition(|&a| a == addr)
    }

    fn clear_slot(&mut self, index: usize) {
        self.addrs[index] = 0;
        self.sizes[index] = 0;
        while self.addrs.last() == Some(&0) {
            self.addrs.pop();
            self.sizes.pop();
        }
    }

    pub(crate) fn alloc(&mut self, size: usize, zeroed: bool) -> Option<NonNull<u8>> {
        let out = if zeroed {
            heap::zalloc(size)
        } else {
            heap::alloc(size)
        }?;
        let addr = out.as_ptr() as usize;
        self.record(addr, size);
        self.note(if zeroed {
            TraceEvent::Zalloc { addr, size }
        } else {
            TraceEvent::Alloc { addr, size }
        });
        Some(out)
    }

    /// # Safety
    ///
    /// `ptr` must be live and previously returned by this ledger.
    pub(crate) unsafe fn free(&mut self, ptr: NonNull<u8>, size: usize) {
        let addr = ptr.as_ptr() as usize;
        let Some(index) = self.position(addr) else {
            panic!("freeing {addr:#x}, which this allocator never handed out (or already released)");
        };
        let recorded = self.sizes[index];
        assert!(
            recorded == size,
            "freeing {addr:#x} with size {size}, but it was allocated with size {recorded}"
        );
        // SAFETY: the table says addr is a live heap-strategy block of
        // exactly `size` bytes.
        unsafe { heap::free(ptr, size) };
        self.clear_slot(index);
        self.note(TraceEvent::Free { addr, size });
    }

    /// # Safety
    ///
    /// A present `ptr` must be live and previously returned by this ledger
    /// with exactly `old_size` bytes.
    pub(crate) unsafe fn realloc(
        &mut self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let p = match ptr {
            Some(p) => p,
            None => {
                if new_size == 0 {
                    return None;
                }
                return self.alloc(new_size, false);
            }
        };
        if new_size == 0 {
            // SAFETY: forwarded caller contract.
            unsafe { self.free(p, old_size) };
            return None;
        }
        let addr = p.as_ptr() as usize;
        let Some(index) = self.position(addr) else {
            panic!("resizing {addr:#x}, which this allocator never handed out (or already released)");
        };
        let recorded = self.sizes[index];
        assert!(
            recorded == old_size,
            "resizing {addr:#x} with old size {old_size}, but it was allocated with size {recorded}"
        );
        self.clear_slot(index);
        // SAFETY: addr is a live heap-strategy block of old_size bytes.
        match unsafe { heap::realloc(p, old_size, new_size) } {
            Some(moved) => {
                let new_addr = moved.as_ptr() as usize;
                self.record(new_addr, new_size);
                self.note(TraceEvent::Realloc {
                    old_addr: addr,
                    new_addr,
                    old_size,
                    new_size,
                });
                Some(moved)
            }
            None => {
                // The platform allocator keeps the old block alive on a
                // failed resize, so the table must keep tracking it.
                self.record(addr, old_size);
                None
            }
        }
    }

    pub(crate) fn free_all(&mut self) {
        let mut released = 0;
        for index in 0..self.addrs.len() {
            let addr = self.addrs[index];
            if addr == 0 {
                continue;
            }
            // SAFETY: every live table entry is a heap-strategy block of the
            // recorded size.
            unsafe { heap::free(NonNull::new_unchecked(addr as *mut u8), self.sizes[index]) };
            released += 1;
        }
        self.addrs.clear();
        self.sizes.clear();
        self.note(TraceEvent::FreeAll { released });
    }

    pub(crate) fn live_count(&self) -> usize {
        self.addrs.iter().filter(|&&a| a != 0).count()
    }

    pub(crate) fn assert_no_leaks(&self) {
        let live = self.live_count();
        assert!(live == 0, "{live} allocation(s) were never released");
    }

    pub(crate) fn set_tracing(&mut self, enabled: bool) {
        self.tracing = enabled;
    }

    pub(crate) fn drain_trace(&mut self) -> Vec<TraceEvent> {
        std::mem::take(&mut self.trace)
    }
}

impl Drop for Ledger {
    fn drop(&mut self) {
        self.free_all();
    }
}

/// The recording strategy. Not `Sync`; confine an instance to one thread
/// or use the testing strategy, which adds the lock.
pub struct RecordingHeap {
    ledger: RefCell<Ledger>,
}

impl RecordingHeap {
    pub const fn new() -> Self {
        Self {
            ledger: RefCell::new(Ledger::new()),
        }
    }

    /// A handle backed by this recorder.
    pub fn handle(&self) -> Allocator<'_> {
        Allocator::Recording(self)
    }

    pub fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        self.ledger.borrow_mut().alloc(size, false)
    }

    pub fn zalloc(&self, size: usize) -> Option<NonNull<u8>> {
        self.ledger.borrow_mut().alloc(size, true)
    }

    /// # Safety
    ///
    /// A present `ptr` must be live and previously returned by this
    /// recorder with exactly `old_size` bytes.
    pub unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: forwarded caller contract.
        unsafe { self.ledger.borrow_mut().realloc(ptr, old_size, new_size) }
    }

    /// # Safety
    ///
    /// `ptr` must be live and previously returned by this recorder, and
    /// must not be used afterwards.
    pub unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.ledger.borrow_mut().free(ptr, size) };
    }

    /// Releases every still-live allocation and empties the table. This is
    /// the operation the table exists for.
    pub fn free_all(&self) {
        self.ledger.borrow_mut().free_all();
    }

    /// Number of allocations currently tracked as live.
    pub fn live_count(&self) -> usize {
        self.ledger.borrow().live_count()
    }

    /// Leak audit. Panics if anything is still tracked; call at a
    /// checkpoint such as the end of a test case.
    pub fn assert_no_leaks(&self) {
        self.ledger.borrow().assert_no_leaks();
    }

    /// Enables or disables in-memory operation tracing.
    pub fn set_tracing(&self, enabled: bool) {
        self.ledger.borrow_mut().set_tracing(enabled);
    }

    /// Takes the traced operations collected so far.
    pub fn drain_trace(&self) -> Vec<TraceEvent> {
        self.ledger.borrow_mut().drain_trace()
    }
}

impl Default for RecordingHeap {
    fn default() -> Self {
        Self::new()
    }
}
