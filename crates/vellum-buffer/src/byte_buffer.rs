//! Owned, growable byte storage over an allocator handle.
//!
//! The raw allocator layer requires callers to repeat sizes on every
//! release and resize; this type remembers its own length and capacity so
//! application code never does. Growth is geometric and sized through
//! `good_size`, and the storage is released on drop with the exact stored
//! capacity.

use std::fmt;
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::slice;

use thiserror::Error;
use vellum_alloc::Allocator;

/// The backing allocator refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("allocator reported exhaustion")]
pub struct OutOfMemory;

const FIRST_CAPACITY: usize = 32;

/// An owned byte sequence backed by an [`Allocator`] handle.
pub struct ByteBuffer<'a> {
    alloc: Allocator<'a>,
    data: Option<NonNull<u8>>,
    len: usize,
    cap: usize,
}

impl<'a> ByteBuffer<'a> {
    /// An empty buffer. No memory is taken until the first write.
    pub const fn new(alloc: Allocator<'a>) -> Self {
        Self {
            alloc,
            data: None,
            len: 0,
            cap: 0,
        }
    }

    /// An empty buffer with room for at least `capacity` bytes.
    pub fn with_capacity(alloc: Allocator<'a>, capacity: usize) -> Result<Self, OutOfMemory> {
        let mut buffer = Self::new(alloc);
        buffer.reserve(capacity)?;
        Ok(buffer)
    }

    /// A buffer of `len` zeroed bytes, sized exactly.
    pub fn zeroed(alloc: Allocator<'a>, len: usize) -> Result<Self, OutOfMemory> {
        if len == 0 {
            return Ok(Self::new(alloc));
        }
        let data = alloc.zalloc(len).ok_or(OutOfMemory)?;
        Ok(Self {
            alloc,
            data: Some(data),
            len,
            cap: len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn as_ptr(&self) -> *const u8 {
        match self.data {
            Some(p) => p.as_ptr(),
            None => NonNull::dangling().as_ptr(),
        }
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        match self.data {
            Some(p) => p.as_ptr(),
            None => NonNull::dangling().as_ptr(),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the first len bytes are initialized and owned by this
        // buffer.
        unsafe { slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let len = self.len;
        // SAFETY: as above, and the borrow is exclusive.
        unsafe { slice::from_raw_parts_mut(self.as_mut_ptr(), len) }
    }

    /// Forgets the contents without releasing capacity.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Shortens the buffer to `len` bytes; longer requests are ignored.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
        }
    }

    /// Sets the length directly.
    ///
    /// # Safety
    ///
    /// `len` must not exceed the capacity and the first `len` bytes must
    /// be initialized.
    pub unsafe fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.cap);
        self.len = len;
    }

    /// Ensures room for `additional` more bytes. On failure the buffer is
    /// unchanged and still usable.
    pub fn reserve(&mut self, additional: usize) -> Result<(), OutOfMemory> {
        let needed = self.len.checked_add(additional).ok_or(OutOfMemory)?;
        if needed <= self.cap {
            return Ok(());
        }
        let mut new_cap = if self.cap == 0 {
            FIRST_CAPACITY
        } else {
            self.cap.checked_mul(2).ok_or(OutOfMemory)?
        };
        if new_cap < needed {
            new_cap = needed;
        }
        let new_cap = self.alloc.good_size(new_cap);
        // SAFETY: data and cap describe this buffer's current block
        // exactly; a None result leaves that block untouched.
        let moved = unsafe { self.alloc.realloc(self.data, self.cap, new_cap) }.ok_or(OutOfMemory)?;
        self.data = Some(moved);
        self.cap = new_cap;
        Ok(())
    }

    pub fn push(&mut self, byte: u8) -> Result<(), OutOfMemory> {
        self.reserve(1)?;
        // SAFETY: reserve guaranteed len < cap.
        unsafe { self.as_mut_ptr().add(self.len).write(byte) };
        self.len += 1;
        Ok(())
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<(), OutOfMemory> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.reserve(bytes.len())?;
        // SAFETY: reserve guaranteed room for bytes.len() more bytes, and
        // `bytes` cannot alias the spare capacity of this exclusive buffer.
        unsafe {
            ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.as_mut_ptr().add(self.len),
                bytes.len(),
            );
        }
        self.len += bytes.len();
        Ok(())
    }
}

impl Drop for ByteBuffer<'_> {
    fn drop(&mut self) {
        // SAFETY: data and cap describe the owned block exactly.
        unsafe { self.alloc.free(self.data, self.cap) };
    }
}

impl Deref for ByteBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for ByteBuffer<'_> {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for ByteBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("len", &self.len)
            .field("cap", &self.cap)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_alloc::{BumpArena, RecordingHeap};

    #[test]
    fn push_and_extend_accumulate() {
        let rec = RecordingHeap::new();
        {
            let mut buffer = ByteBuffer::new(rec.handle());
            buffer.push(b'v').expect("push");
            buffer.extend_from_slice(b"ellum").expect("extend");
            assert_eq!(buffer.as_slice(), b"vellum");
            assert_eq!(buffer.len(), 6);
            assert!(buffer.capacity() >= 6);
        }
        rec.assert_no_leaks();
    }

    #[test]
    fn growth_preserves_contents() {
        let rec = RecordingHeap::new();
        {
            let mut buffer = ByteBuffer::new(rec.handle());
            for i in 0..1000u32 {
                buffer.push((i % 251) as u8).expect("push");
            }
            let expected: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
            assert_eq!(buffer.as_slice(), expected.as_slice());
        }
        rec.assert_no_leaks();
    }

    #[test]
    fn null_backed_growth_fails_and_leaves_buffer_usable() {
        let mut buffer = ByteBuffer::new(vellum_alloc::Allocator::Null);
        assert_eq!(buffer.push(1), Err(OutOfMemory));
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.capacity(), 0);
        assert_eq!(buffer.extend_from_slice(b"xy"), Err(OutOfMemory));
        assert!(buffer.is_empty());
    }

    #[test]
    fn arena_backed_growth_stays_in_place_while_top_of_stack() {
        let arena = BumpArena::new();
        let mut buffer = ByteBuffer::with_capacity(arena.handle(), 8).expect("capacity");
        buffer.extend_from_slice(b"01234567").expect("fill");
        let before = buffer.as_ptr();
        for _ in 0..100 {
            buffer.push(b'x').expect("push");
        }
        assert_eq!(
            buffer.as_ptr(),
            before,
            "sole top-of-stack buffer must regrow in place"
        );
        assert_eq!(&buffer[..8], b"01234567");
    }

    #[test]
    fn zeroed_is_exact_and_zero_filled() {
        let rec = RecordingHeap::new();
        {
            let buffer = ByteBuffer::zeroed(rec.handle(), 64).expect("zeroed");
            assert_eq!(buffer.len(), 64);
            assert_eq!(buffer.capacity(), 64);
            assert!(buffer.iter().all(|&b| b == 0));
        }
        rec.assert_no_leaks();
    }

    #[test]
    fn clear_and_truncate_keep_capacity() {
        let rec = RecordingHeap::new();
        {
            let mut buffer = ByteBuffer::new(rec.handle());
            buffer.extend_from_slice(b"abcdef").expect("extend");
            buffer.truncate(3);
            assert_eq!(buffer.as_slice(), b"abc");
            buffer.truncate(10);
            assert_eq!(buffer.len(), 3);
            let cap = buffer.capacity();
            buffer.clear();
            assert!(buffer.is_empty());
            assert_eq!(buffer.capacity(), cap);
        }
        rec.assert_no_leaks();
    }
}
