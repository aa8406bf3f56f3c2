//! The value-typed allocator handle.
//!
//! [`Allocator`] is a `Copy` sum over the closed strategy set. Every
//! operation matches on the variant; adding a strategy means touching every
//! operation, which is deliberate: the set is small, curated, and
//! auditable, not a plugin surface.
//!
//! Failure is always an empty result. Misusing a strategy (bulk-reclaiming
//! one that cannot) is a fatal defect and panics.

use std::fmt;
use std::ptr::{self, NonNull};

use crate::arena::{self, BumpArena};
use crate::heap;
use crate::recording::RecordingHeap;
use crate::testing::TestingHeap;

/// A value-typed handle selecting one allocation strategy. Cheap to copy
/// and pass around; all state lives behind the reference it carries.
#[derive(Clone, Copy)]
pub enum Allocator<'a> {
    /// Pass-through to the platform allocator. No bulk reclamation.
    Heap,
    /// Refuses every allocation and accepts frees as no-ops. Hand this to
    /// a component to forbid allocation in it by construction.
    Null,
    /// Bump-pointer arena; see [`BumpArena`].
    Arena(&'a BumpArena),
    /// Heap wrapper with live-allocation bookkeeping; see
    /// [`RecordingHeap`].
    Recording(&'a RecordingHeap),
    /// Recording behind a lock and a failure schedule; see
    /// [`TestingHeap`].
    Testing(&'a TestingHeap),
}

impl<'a> Allocator<'a> {
    /// Allocates `size` uninitialized bytes. `None` on exhaustion or under
    /// the null strategy.
    pub fn alloc(self, size: usize) -> Option<NonNull<u8>> {
        match self {
            Allocator::Heap => heap::alloc(size),
            Allocator::Null => None,
            Allocator::Arena(a) => a.alloc(size),
            Allocator::Recording(r) => r.alloc(size),
            Allocator::Testing(t) => t.alloc(size),
        }
    }

    /// Allocates `size` zeroed bytes.
    pub fn zalloc(self, size: usize) -> Option<NonNull<u8>> {
        match self {
            Allocator::Heap => heap::zalloc(size),
            Allocator::Null => None,
            Allocator::Arena(a) => a.zalloc(size),
            Allocator::Recording(r) => r.zalloc(size),
            Allocator::Testing(t) => t.zalloc(size),
        }
    }

    /// Resizes an allocation, preserving the leading
    /// `min(old_size, new_size)` bytes. `realloc(None, 0, n)` allocates;
    /// `realloc(Some(p), n, 0)` frees and returns `None`. On failure the
    /// original block is untouched and still owed a release.
    ///
    /// # Safety
    ///
    /// A present `ptr` must be live, obtained from this same handle, with
    /// exactly `old_size` as supplied at its most recent allocation.
    pub unsafe fn realloc(
        self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        match self {
            Allocator::Heap => match (ptr, new_size) {
                (None, 0) => None,
                (None, n) => heap::alloc(n),
                (Some(p), 0) => {
                    // SAFETY: forwarded caller contract.
                    unsafe { heap::free(p, old_size) };
                    None
                }
                // SAFETY: forwarded caller contract.
                (Some(p), n) => unsafe { heap::realloc(p, old_size, n) },
            },
            Allocator::Null => None,
            // SAFETY: forwarded caller contract.
            Allocator::Arena(a) => unsafe { a.realloc(ptr, old_size, new_size) },
            // SAFETY: forwarded caller contract.
            Allocator::Recording(r) => unsafe { r.realloc(ptr, old_size, new_size) },
            // SAFETY: forwarded caller contract.
            Allocator::Testing(t) => unsafe { t.realloc(ptr, old_size, new_size) },
        }
    }

    /// Releases an allocation. A `None` pointer is a no-op.
    ///
    /// # Safety
    ///
    /// A present `ptr` must be live, obtained from this same handle, with
    /// exactly `size` as supplied at its most recent allocation, and must
    /// not be used afterwards.
    pub unsafe fn free(self, ptr: Option<NonNull<u8>>, size: usize) {
        let Some(p) = ptr else { return };
        match self {
            // SAFETY: forwarded caller contract.
            Allocator::Heap => unsafe { heap::free(p, size) },
            Allocator::Null => {}
            // SAFETY: forwarded caller contract.
            Allocator::Arena(a) => unsafe { a.free(p, size) },
            // SAFETY: forwarded caller contract.
            Allocator::Recording(r) => unsafe { r.free(p, size) },
            // SAFETY: forwarded caller contract.
            Allocator::Testing(t) => unsafe { t.free(p, size) },
        }
    }

    /// Whether [`Allocator::free_all`] is available on this strategy.
    pub fn supports_free_all(self) -> bool {
        match self {
            Allocator::Heap | Allocator::Null => false,
            Allocator::Arena(_) | Allocator::Recording(_) | Allocator::Testing(_) => true,
        }
    }

    /// Releases every allocation made through this handle since creation
    /// or the last `free_all`.
    ///
    /// # Panics
    ///
    /// On the heap and null strategies: calling this means the caller
    /// picked the wrong strategy for its usage pattern, which is a defect,
    /// not a recoverable condition.
    pub fn free_all(self) {
        match self {
            Allocator::Heap | Allocator::Null => {
                panic!("free_all on the {self:?} strategy, which has no bulk reclamation")
            }
            Allocator::Arena(a) => a.free_all(),
            Allocator::Recording(r) => r.free_all(),
            Allocator::Testing(t) => t.free_all(),
        }
    }

    /// Rounds `size` up to the strategy's true usable size for a request
    /// of `size` bytes. Sizing requests to this avoids wasted tails.
    pub fn good_size(self, size: usize) -> usize {
        match self {
            Allocator::Arena(_) => arena::round_up(size),
            Allocator::Heap
            | Allocator::Null
            | Allocator::Recording(_)
            | Allocator::Testing(_) => size,
        }
    }

    /// Allocates a copy of `bytes`. The copy is released with
    /// `free(ptr, bytes.len())`.
    pub fn duplicate(self, bytes: &[u8]) -> Option<NonNull<u8>> {
        let out = self.alloc(bytes.len())?;
        if !bytes.is_empty() {
            // SAFETY: out is a fresh block of bytes.len() bytes.
            unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), out.as_ptr(), bytes.len()) };
        }
        Some(out)
    }

    /// Allocates a NUL-terminated copy of `text`, so the bytes can be
    /// handed to C-string consumers. The copy occupies `text.len() + 1`
    /// bytes and is released with that size.
    pub fn duplicate_text(self, text: &str) -> Option<NonNull<u8>> {
        let out = self.alloc(text.len() + 1)?;
        // SAFETY: out is a fresh block of text.len() + 1 bytes.
        unsafe {
            ptr::copy_nonoverlapping(text.as_ptr(), out.as_ptr(), text.len());
            out.as_ptr().add(text.len()).write(0);
        }
        Some(out)
    }
}

impl fmt::Debug for Allocator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Allocator::Heap => "heap",
            Allocator::Null => "null",
            Allocator::Arena(_) => "arena",
            Allocator::Recording(_) => "recording",
            Allocator::Testing(_) => "testing",
        })
    }
}

impl<'a> From<&'a BumpArena> for Allocator<'a> {
    fn from(arena: &'a BumpArena) -> Self {
        Allocator::Arena(arena)
    }
}

impl<'a> From<&'a RecordingHeap> for Allocator<'a> {
    fn from(recording: &'a RecordingHeap) -> Self {
        Allocator::Recording(recording)
    }
}

impl<'a> From<&'a TestingHeap> for Allocator<'a> {
    fn from(testing: &'a TestingHeap) -> Self {
        Allocator::Testing(testing)
    }
}
