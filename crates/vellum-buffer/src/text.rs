//! Owned UTF-8 text with a trailing NUL, backed by an allocator handle.
//!
//! The NUL terminator is not part of the logical string; it is there so
//! the underlying bytes can be handed to C-string consumers without
//! another copy. The storage is `len + 1` bytes and is released with that
//! exact size on drop.

use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;
use std::slice;
use std::str;

use vellum_alloc::Allocator;

use crate::byte_buffer::OutOfMemory;

/// An owned, NUL-terminated UTF-8 copy.
pub struct OwnedText<'a> {
    alloc: Allocator<'a>,
    data: NonNull<u8>,
    /// Length excluding the terminating NUL.
    len: usize,
}

impl<'a> OwnedText<'a> {
    /// Duplicates `text` through the handle.
    pub fn copy_of(alloc: Allocator<'a>, text: &str) -> Result<Self, OutOfMemory> {
        let data = alloc.duplicate_text(text).ok_or(OutOfMemory)?;
        Ok(Self {
            alloc,
            data,
            len: text.len(),
        })
    }

    /// Takes ownership of an allocation already shaped like owned text.
    ///
    /// # Safety
    ///
    /// `data` must be a live block of `len + 1` bytes from `alloc`, whose
    /// first `len` bytes are valid UTF-8 and whose last byte is NUL.
    pub(crate) unsafe fn from_raw(alloc: Allocator<'a>, data: NonNull<u8>, len: usize) -> Self {
        Self { alloc, data, len }
    }

    /// Length in bytes, excluding the terminating NUL.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: the constructor contracts guarantee len initialized
        // UTF-8 bytes.
        unsafe { str::from_utf8_unchecked(slice::from_raw_parts(self.data.as_ptr(), self.len)) }
    }

    /// The bytes including the terminating NUL.
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        // SAFETY: the storage is len + 1 initialized bytes.
        unsafe { slice::from_raw_parts(self.data.as_ptr(), self.len + 1) }
    }
}

impl Drop for OwnedText<'_> {
    fn drop(&mut self) {
        // SAFETY: the storage is a live block of len + 1 bytes from this
        // handle.
        unsafe { self.alloc.free(Some(self.data), self.len + 1) };
    }
}

impl Deref for OwnedText<'_> {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Debug for OwnedText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for OwnedText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq<str> for OwnedText<'_> {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}
