//! # vellum-buffer
//!
//! Allocator-backed building blocks: an owned growable byte buffer, owned
//! NUL-terminated text, whole-file readers, and an unpadded base64 codec.
//!
//! Everything here talks to memory exclusively through the
//! [`vellum_alloc::Allocator`] handle and never learns which strategy
//! backs it. The raw allocator layer makes callers repeat sizes; these
//! owned types remember their own, which is the ergonomic surface
//! application code is meant to use.

pub mod base64;
pub mod byte_buffer;
pub mod file_util;
pub mod text;

pub use byte_buffer::{ByteBuffer, OutOfMemory};
pub use file_util::{FileError, read_binary_file, read_text_file, write_file};
pub use text::OwnedText;
