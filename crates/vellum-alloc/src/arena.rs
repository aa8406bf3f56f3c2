//! Bump-pointer arena over chained fixed-size regions.
//!
//! Allocation advances an offset into the current region. When a region
//! cannot serve a request, a fresh one is taken from the heap strategy and
//! linked in front of the old one, which is abandoned (not freed) until the
//! whole arena is reclaimed. Requests larger than half a region go onto a
//! separate doubly linked list of individually freeable "big" blocks, so one
//! oversized request neither forces a bigger region size nor wastes the tail
//! of the current region.
//!
//! The only individual reclamation is the top of the stack: freeing or
//! resizing the most recent allocation of the current region adjusts the
//! bump offset in place. Everything else waits for [`BumpArena::free_all`].

use std::cell::RefCell;
use std::mem;
use std::ptr::{self, NonNull};

use crate::handle::Allocator;
use crate::heap;

/// Bytes per region, header included. 128 pages of 4 KiB.
pub const REGION_SIZE: usize = 4096 * 128;

const REGION_HEADER: usize = mem::size_of::<usize>() * 2;

/// Payload bytes a single region can serve.
pub const REGION_CAPACITY: usize = REGION_SIZE - REGION_HEADER;

/// Rounded sizes above this go to the big-allocation list instead of a
/// region.
pub const BIG_THRESHOLD: usize = REGION_SIZE / 2;

/// Allocation quantum. Every request is rounded up to a multiple of this.
pub const SIZE_QUANTUM: usize = 8;

/// Rounds `size` up to the next multiple of [`SIZE_QUANTUM`].
pub const fn round_up(size: usize) -> usize {
    let rem = size % SIZE_QUANTUM;
    if rem != 0 { size + (SIZE_QUANTUM - rem) } else { size }
}

/// One linearly allocated region. `prev` is the previously exhausted
/// region, newest-first.
#[repr(C)]
struct Region {
    prev: Option<NonNull<Region>>,
    used: usize,
    buf: [u8; REGION_CAPACITY],
}

const _: () = assert!(mem::size_of::<Region>() == REGION_SIZE);
const _: () = assert!(mem::align_of::<Region>() <= heap::MIN_ALIGN);

/// Header preceding a big allocation's payload. Padded to a cache line;
/// these front fairly large blocks, so the waste is immaterial.
#[repr(C)]
struct BigBlock {
    prev: Option<NonNull<BigBlock>>,
    next: Option<NonNull<BigBlock>>,
    /// Rounded payload size.
    size: usize,
    _pad: [usize; 5],
}

const BIG_HEADER: usize = mem::size_of::<BigBlock>();
const _: () = assert!(BIG_HEADER == 64);

struct ArenaState {
    head: Option<NonNull<Region>>,
    bigs: Option<NonNull<BigBlock>>,
}

/// Occupancy snapshot across the region chain and the big list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Bytes bumped out of regions (rounded sizes, rolled-back frees
    /// excluded).
    pub used: usize,
    /// Payload capacity across all chained regions.
    pub capacity: usize,
    /// Number of chained regions.
    pub region_count: usize,
    /// Rounded payload bytes held by big allocations.
    pub big_bytes: usize,
    /// Number of live big allocations.
    pub big_count: usize,
}

/// The arena strategy. Not `Sync`; confine a given arena to one thread or
/// synchronize externally.
pub struct BumpArena {
    state: RefCell<ArenaState>,
}

impl BumpArena {
    /// Creates an empty arena. No region is taken until the first request.
    pub const fn new() -> Self {
        Self {
            state: RefCell::new(ArenaState {
                head: None,
                bigs: None,
            }),
        }
    }

    /// A handle backed by this arena.
    pub fn handle(&self) -> Allocator<'_> {
        Allocator::Arena(self)
    }

    /// Allocates `size` uninitialized bytes, rounded up to the quantum.
    pub fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        alloc_in(&mut self.state.borrow_mut(), size, false)
    }

    /// Allocates `size` zeroed bytes, rounded up to the quantum.
    pub fn zalloc(&self, size: usize) -> Option<NonNull<u8>> {
        alloc_in(&mut self.state.borrow_mut(), size, true)
    }

    /// Resizes an allocation, in place when `ptr` is the most recent
    /// allocation of the current region and the new size still fits.
    /// Otherwise the bytes move to a fresh block and the old one is
    /// abandoned until [`BumpArena::free_all`].
    ///
    /// `realloc(None, 0, n)` allocates; `realloc(Some(p), n, 0)` frees and
    /// returns `None`. On failure the original block is untouched.
    ///
    /// # Safety
    ///
    /// A present `ptr` must be a live allocation of this arena made with
    /// exactly `old_size` bytes.
    pub unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let p = match ptr {
            Some(p) if old_size > 0 => p,
            _ => {
                if new_size == 0 {
                    return ptr;
                }
                return self.alloc(new_size);
            }
        };
        let mut state = self.state.borrow_mut();
        if new_size == 0 {
            // SAFETY: forwarded caller contract.
            unsafe { free_in(&mut state, p, old_size) };
            return None;
        }
        let old_r = round_up(old_size);
        let new_r = round_up(new_size);
        if old_r == new_r {
            return Some(p);
        }
        if old_r > BIG_THRESHOLD {
            if new_r > BIG_THRESHOLD {
                // SAFETY: p is a live big payload of old_r rounded bytes.
                return unsafe { big_realloc(&mut state, p, old_r, new_r) };
            }
            // Shrinking out of the big list into a region.
            let out = bump(&mut state, new_r)?;
            // SAFETY: distinct blocks; new_size bytes fit in both.
            unsafe {
                ptr::copy_nonoverlapping(p.as_ptr(), out.as_ptr(), new_size);
                big_free(&mut state, p, old_r);
            }
            return Some(out);
        }
        if new_r > BIG_THRESHOLD {
            // Growing out of a region into the big list.
            let out = big_alloc(&mut state, new_r, false)?;
            // SAFETY: distinct blocks; old_size bytes fit in both. The old
            // block rolls the bump offset back if it was top of stack.
            unsafe {
                ptr::copy_nonoverlapping(p.as_ptr(), out.as_ptr(), old_size);
                free_in(&mut state, p, old_size);
            }
            return Some(out);
        }
        if let Some(head) = state.head {
            let used = region_used(head);
            // SAFETY: head is a live region; used <= capacity.
            let end = unsafe { region_base(head).add(used) };
            // SAFETY: p + old_r stays within the allocation p came from
            // (or one past it), per the caller contract.
            if unsafe { p.as_ptr().add(old_r) } == end {
                let new_used = used - old_r + new_r;
                if new_used <= REGION_CAPACITY {
                    set_region_used(head, new_used);
                    return Some(p);
                }
            }
        }
        let out = bump(&mut state, new_r)?;
        // SAFETY: out is fresh bump space past (or in a newer region than)
        // p's bytes, so the ranges are disjoint. The old block stays
        // abandoned; the arena never revisits it.
        unsafe { ptr::copy_nonoverlapping(p.as_ptr(), out.as_ptr(), old_size.min(new_size)) };
        Some(out)
    }

    /// Rolls the bump offset back when `ptr` is the most recent allocation
    /// of the current region; frees a big allocation immediately; otherwise
    /// does nothing until [`BumpArena::free_all`].
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation of this arena made with exactly
    /// `size` bytes, and must not be used afterwards.
    pub unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { free_in(&mut self.state.borrow_mut(), ptr, size) };
    }

    /// Releases every region and every big allocation, resetting the arena
    /// to empty. All pointers previously handed out become dangling.
    pub fn free_all(&self) {
        release_all(&mut self.state.borrow_mut());
    }

    /// Current occupancy of the region chain and the big list.
    pub fn stats(&self) -> ArenaStats {
        let state = self.state.borrow();
        let mut stats = ArenaStats::default();
        let mut region = state.head;
        while let Some(r) = region {
            stats.used += region_used(r);
            stats.capacity += REGION_CAPACITY;
            stats.region_count += 1;
            // SAFETY: r is a live region owned by this arena.
            region = unsafe { (*r.as_ptr()).prev };
        }
        let mut big = state.bigs;
        while let Some(b) = big {
            // SAFETY: b is a live big block owned by this arena.
            unsafe {
                stats.big_bytes += (*b.as_ptr()).size;
                big = (*b.as_ptr()).next;
            }
            stats.big_count += 1;
        }
        stats
    }
}

impl Default for BumpArena {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BumpArena {
    fn drop(&mut self) {
        release_all(self.state.get_mut());
    }
}

fn region_used(region: NonNull<Region>) -> usize {
    // SAFETY: every region reachable from the state is live.
    unsafe { (*region.as_ptr()).used }
}

fn set_region_used(region: NonNull<Region>, used: usize) {
    // SAFETY: as above; used is kept <= REGION_CAPACITY by all callers.
    unsafe { ptr::addr_of_mut!((*region.as_ptr()).used).write(used) };
}

fn region_base(region: NonNull<Region>) -> *mut u8 {
    // SAFETY: as above.
    unsafe { ptr::addr_of_mut!((*region.as_ptr()).buf).cast::<u8>() }
}

fn push_region(state: &mut ArenaState) -> Option<NonNull<Region>> {
    let raw = heap::alloc(REGION_SIZE)?;
    let region = raw.cast::<Region>();
    // SAFETY: raw points to REGION_SIZE fresh bytes, aligned for Region;
    // both header fields are written before anything reads them.
    unsafe {
        ptr::addr_of_mut!((*region.as_ptr()).prev).write(state.head);
        ptr::addr_of_mut!((*region.as_ptr()).used).write(0);
    }
    state.head = Some(region);
    Some(region)
}

/// Bumps `rounded` bytes out of the current region, taking a fresh region
/// when there is none or the current one lacks room.
fn bump(state: &mut ArenaState, rounded: usize) -> Option<NonNull<u8>> {
    let head = match state.head {
        Some(h) if region_used(h) + rounded <= REGION_CAPACITY => h,
        _ => push_region(state)?,
    };
    let used = region_used(head);
    // SAFETY: used + rounded <= REGION_CAPACITY, so the cursor stays inside
    // the region's buffer.
    let out = unsafe { region_base(head).add(used) };
    set_region_used(head, used + rounded);
    NonNull::new(out)
}

fn alloc_in(state: &mut ArenaState, size: usize, zeroed: bool) -> Option<NonNull<u8>> {
    let rounded = round_up(size);
    if rounded > BIG_THRESHOLD {
        return big_alloc(state, rounded, zeroed);
    }
    let out = bump(state, rounded)?;
    if zeroed {
        // SAFETY: out points at rounded writable bytes inside the current
        // region.
        unsafe { ptr::write_bytes(out.as_ptr(), 0, rounded) };
    }
    Some(out)
}

/// # Safety
///
/// `ptr` must be a live allocation of this arena of exactly `size` bytes.
unsafe fn free_in(state: &mut ArenaState, ptr: NonNull<u8>, size: usize) {
    if size == 0 {
        return;
    }
    let rounded = round_up(size);
    if rounded > BIG_THRESHOLD {
        // SAFETY: a request this large was served from the big list.
        unsafe { big_free(state, ptr, rounded) };
        return;
    }
    let Some(head) = state.head else { return };
    let used = region_used(head);
    // SAFETY: head is live; ptr + rounded is in-bounds-or-one-past per the
    // caller contract.
    let end = unsafe { region_base(head).add(used) };
    if unsafe { ptr.as_ptr().add(rounded) } == end {
        set_region_used(head, used - rounded);
    }
}

fn big_alloc(state: &mut ArenaState, rounded: usize, zeroed: bool) -> Option<NonNull<u8>> {
    let total = BIG_HEADER.checked_add(rounded)?;
    let raw = if zeroed {
        heap::zalloc(total)
    } else {
        heap::alloc(total)
    }?;
    let block = raw.cast::<BigBlock>();
    // SAFETY: raw points to `total` fresh bytes aligned for BigBlock; the
    // header is fully written before the block becomes reachable.
    unsafe {
        ptr::addr_of_mut!((*block.as_ptr()).prev).write(None);
        ptr::addr_of_mut!((*block.as_ptr()).next).write(state.bigs);
        ptr::addr_of_mut!((*block.as_ptr()).size).write(rounded);
        if let Some(old_head) = state.bigs {
            ptr::addr_of_mut!((*old_head.as_ptr()).prev).write(Some(block));
        }
    }
    state.bigs = Some(block);
    // SAFETY: the payload begins BIG_HEADER bytes into the block.
    NonNull::new(unsafe { raw.as_ptr().add(BIG_HEADER) })
}

/// # Safety
///
/// `payload` must be a live big-allocation payload of this arena.
unsafe fn big_header(payload: NonNull<u8>) -> NonNull<BigBlock> {
    // SAFETY: the payload sits BIG_HEADER bytes past its header.
    unsafe { NonNull::new_unchecked(payload.as_ptr().sub(BIG_HEADER)).cast::<BigBlock>() }
}

/// # Safety
///
/// `block` must be linked into this arena's big list.
unsafe fn big_unlink(state: &mut ArenaState, block: NonNull<BigBlock>) {
    // SAFETY: block and its neighbors are live list nodes.
    unsafe {
        let prev = (*block.as_ptr()).prev;
        let next = (*block.as_ptr()).next;
        match prev {
            Some(p) => ptr::addr_of_mut!((*p.as_ptr()).next).write(next),
            None => state.bigs = next,
        }
        if let Some(n) = next {
            ptr::addr_of_mut!((*n.as_ptr()).prev).write(prev);
        }
    }
}

/// # Safety
///
/// `payload` must be a live big-allocation payload of this arena and must
/// not be used afterwards.
unsafe fn big_free(state: &mut ArenaState, payload: NonNull<u8>, rounded: usize) {
    // SAFETY: forwarded caller contract.
    let block = unsafe { big_header(payload) };
    // SAFETY: block is a live header.
    let recorded = unsafe { (*block.as_ptr()).size };
    assert!(
        recorded == rounded,
        "big allocation freed with rounded size {rounded}, but it was allocated with {recorded}"
    );
    // SAFETY: block is linked; it was allocated as header + payload in one
    // heap block of the recorded size.
    unsafe {
        big_unlink(state, block);
        heap::free(block.cast::<u8>(), BIG_HEADER + recorded);
    }
}

/// # Safety
///
/// `payload` must be a live big-allocation payload of this arena made with
/// exactly `old_r` rounded bytes.
unsafe fn big_realloc(
    state: &mut ArenaState,
    payload: NonNull<u8>,
    old_r: usize,
    new_r: usize,
) -> Option<NonNull<u8>> {
    // SAFETY: forwarded caller contract.
    let block = unsafe { big_header(payload) };
    // SAFETY: block is a live header.
    let (recorded, prev, next) = unsafe {
        (
            (*block.as_ptr()).size,
            (*block.as_ptr()).prev,
            (*block.as_ptr()).next,
        )
    };
    assert!(
        recorded == old_r,
        "big allocation resized with rounded size {old_r}, but it was allocated with {recorded}"
    );
    let total_old = BIG_HEADER + old_r;
    let total_new = BIG_HEADER.checked_add(new_r)?;
    // SAFETY: the block was allocated from the heap strategy with total_old
    // bytes. On failure the old block and the list are untouched.
    let moved = unsafe { heap::realloc(block.cast::<u8>(), total_old, total_new)? };
    let moved_block = moved.cast::<BigBlock>();
    // SAFETY: the move preserved the header bytes; only the size and the
    // neighbors' back-pointers need updating.
    unsafe {
        ptr::addr_of_mut!((*moved_block.as_ptr()).size).write(new_r);
        match prev {
            Some(p) => ptr::addr_of_mut!((*p.as_ptr()).next).write(Some(moved_block)),
            None => state.bigs = Some(moved_block),
        }
        if let Some(n) = next {
            ptr::addr_of_mut!((*n.as_ptr()).prev).write(Some(moved_block));
        }
    }
    // SAFETY: the payload begins BIG_HEADER bytes into the block.
    NonNull::new(unsafe { moved.as_ptr().add(BIG_HEADER) })
}

fn release_all(state: &mut ArenaState) {
    let mut region = state.head.take();
    while let Some(r) = region {
        // SAFETY: r was obtained from heap::alloc(REGION_SIZE) and is not
        // reachable anymore.
        unsafe {
            region = (*r.as_ptr()).prev;
            heap::free(r.cast::<u8>(), REGION_SIZE);
        }
    }
    let mut big = state.bigs.take();
    while let Some(b) = big {
        // SAFETY: b was obtained from heap::alloc with header + size bytes
        // and is not reachable anymore.
        unsafe {
            let size = (*b.as_ptr()).size;
            big = (*b.as_ptr()).next;
            heap::free(b.cast::<u8>(), BIG_HEADER + size);
        }
    }
}
