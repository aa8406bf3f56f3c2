//! Pass-through strategy over the platform allocator.
//!
//! Every block handed out here is created with one sizing rule, so a caller
//! that honors the exact-size release contract always frees with the layout
//! the block was created with. All the other strategies that need raw memory
//! (arena regions, big allocations, the recording wrapper) obtain it from
//! this module.

use std::alloc::Layout;
use std::ptr::NonNull;

/// Alignment of every heap-strategy block.
pub const MIN_ALIGN: usize = 16;

/// Layout for a block of `size` user bytes.
///
/// Zero-sized requests are bumped to one byte; the platform allocator does
/// not accept empty layouts. Allocation and release both go through this
/// function, so the bump is invisible to callers.
fn layout_for(size: usize) -> Option<Layout> {
    Layout::from_size_align(size.max(1), MIN_ALIGN).ok()
}

/// Allocates `size` uninitialized bytes. `None` when the platform
/// allocator refuses.
pub fn alloc(size: usize) -> Option<NonNull<u8>> {
    let layout = layout_for(size)?;
    // SAFETY: layout has non-zero size.
    let ptr = unsafe { std::alloc::alloc(layout) };
    NonNull::new(ptr)
}

/// Allocates `size` zeroed bytes.
pub fn zalloc(size: usize) -> Option<NonNull<u8>> {
    let layout = layout_for(size)?;
    // SAFETY: layout has non-zero size.
    let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
    NonNull::new(ptr)
}

/// Resizes `ptr` from `old_size` to `new_size` bytes, preserving the
/// leading `min(old_size, new_size)` bytes. `None` when the platform
/// allocator refuses, in which case the original block is untouched.
///
/// # Safety
///
/// `ptr` must have come from this module with exactly `old_size` bytes and
/// must not be used again if a new pointer is returned.
pub unsafe fn realloc(ptr: NonNull<u8>, old_size: usize, new_size: usize) -> Option<NonNull<u8>> {
    let old_layout = layout_for(old_size)?;
    // Reject sizes the platform allocator could never represent before
    // handing them down.
    layout_for(new_size)?;
    // SAFETY: per this function's contract, ptr was allocated with
    // `old_layout`.
    let moved = unsafe { std::alloc::realloc(ptr.as_ptr(), old_layout, new_size.max(1)) };
    NonNull::new(moved)
}

/// Releases `ptr`.
///
/// # Safety
///
/// `ptr` must have come from this module with exactly `size` bytes and must
/// not be used afterwards.
pub unsafe fn free(ptr: NonNull<u8>, size: usize) {
    let layout = layout_for(size).expect("freed size was never allocatable");
    // SAFETY: per this function's contract, ptr was allocated with `layout`.
    unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
}
