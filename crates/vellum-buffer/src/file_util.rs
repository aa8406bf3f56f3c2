//! Whole-file readers and writer over an allocator handle.
//!
//! Files are read in binary mode; no newline translation happens in either
//! direction, so CRLF content round-trips untouched. The text reader
//! NUL-terminates its result for C-string consumers and insists on UTF-8;
//! the binary reader sizes its buffer exactly to the file.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::ptr::NonNull;
use std::slice;

use thiserror::Error;
use vellum_alloc::Allocator;

use crate::byte_buffer::{ByteBuffer, OutOfMemory};
use crate::text::OwnedText;

/// Why a file operation failed. Allocator exhaustion is reported apart
/// from I/O so callers can tell a full disk from a full heap.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("could not open file: {0}")]
    Open(#[source] io::Error),
    #[error("i/o failed after open: {0}")]
    Io(#[source] io::Error),
    #[error("not a regular file")]
    NotRegular,
    #[error("allocator reported exhaustion")]
    AllocFailure,
    #[error("file is not valid utf-8")]
    InvalidUtf8,
}

impl From<OutOfMemory> for FileError {
    fn from(_: OutOfMemory) -> Self {
        FileError::AllocFailure
    }
}

fn open_regular(path: &Path) -> Result<(File, usize), FileError> {
    let file = File::open(path).map_err(FileError::Open)?;
    let meta = file.metadata().map_err(FileError::Io)?;
    if !meta.is_file() {
        return Err(FileError::NotRegular);
    }
    Ok((file, meta.len() as usize))
}

/// Reads an entire file into an allocator-backed byte buffer.
pub fn read_binary_file<'a>(
    alloc: Allocator<'a>,
    path: impl AsRef<Path>,
) -> Result<ByteBuffer<'a>, FileError> {
    let (mut file, nbytes) = open_regular(path.as_ref())?;
    let mut buffer = ByteBuffer::zeroed(alloc, nbytes)?;
    file.read_exact(buffer.as_mut_slice()).map_err(FileError::Io)?;
    Ok(buffer)
}

/// Reads an entire file into owned, NUL-terminated UTF-8 text.
pub fn read_text_file<'a>(
    alloc: Allocator<'a>,
    path: impl AsRef<Path>,
) -> Result<OwnedText<'a>, FileError> {
    let (mut file, nbytes) = open_regular(path.as_ref())?;
    let data = alloc.zalloc(nbytes + 1).ok_or(FileError::AllocFailure)?;
    // SAFETY: data is nbytes + 1 zeroed (hence initialized) bytes; the
    // final byte stays zero as the terminator.
    let contents = unsafe { slice::from_raw_parts_mut(data.as_ptr(), nbytes) };
    if let Err(err) = file.read_exact(contents) {
        release(alloc, data, nbytes + 1);
        return Err(FileError::Io(err));
    }
    if std::str::from_utf8(contents).is_err() {
        release(alloc, data, nbytes + 1);
        return Err(FileError::InvalidUtf8);
    }
    // SAFETY: data is nbytes + 1 bytes from alloc, UTF-8 checked, NUL
    // terminated.
    Ok(unsafe { OwnedText::from_raw(alloc, data, nbytes) })
}

fn release(alloc: Allocator<'_>, data: NonNull<u8>, size: usize) {
    // SAFETY: releasing the block taken above, with its exact size.
    unsafe { alloc.free(Some(data), size) };
}

/// Writes `bytes` to `path`, truncating any existing file.
pub fn write_file(path: impl AsRef<Path>, bytes: &[u8]) -> Result<(), FileError> {
    let mut file = File::create(path).map_err(FileError::Open)?;
    file.write_all(bytes).map_err(FileError::Io)?;
    file.flush().map_err(FileError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use vellum_alloc::RecordingHeap;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("vellum_{}_{}", std::process::id(), name))
    }

    #[test]
    fn binary_round_trip() {
        let path = scratch_path("roundtrip.bin");
        let payload: Vec<u8> = (0u16..600).map(|i| (i % 256) as u8).collect();
        write_file(&path, &payload).expect("write");

        let rec = RecordingHeap::new();
        {
            let buffer = read_binary_file(rec.handle(), &path).expect("read");
            assert_eq!(buffer.as_slice(), payload.as_slice());
        }
        rec.assert_no_leaks();
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn text_read_terminates_and_preserves_crlf() {
        let path = scratch_path("lines.txt");
        write_file(&path, b"one\r\ntwo\n").expect("write");

        let rec = RecordingHeap::new();
        {
            let text = read_text_file(rec.handle(), &path).expect("read");
            assert_eq!(text.as_str(), "one\r\ntwo\n");
            assert_eq!(text.as_bytes_with_nul().last(), Some(&0));
        }
        rec.assert_no_leaks();
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn missing_file_reports_open_failure() {
        let rec = RecordingHeap::new();
        let err = read_binary_file(rec.handle(), scratch_path("does_not_exist"))
            .expect_err("must fail");
        assert!(matches!(err, FileError::Open(_)), "got {err:?}");
        rec.assert_no_leaks();
    }

    #[test]
    fn directory_is_not_a_regular_file() {
        let rec = RecordingHeap::new();
        let err = read_binary_file(rec.handle(), std::env::temp_dir()).expect_err("must fail");
        assert!(matches!(err, FileError::NotRegular), "got {err:?}");
        rec.assert_no_leaks();
    }

    #[test]
    fn invalid_utf8_is_rejected_without_leaking() {
        let path = scratch_path("binary.dat");
        write_file(&path, &[0x66, 0xFF, 0xFE, 0x67]).expect("write");

        let rec = RecordingHeap::new();
        let err = read_text_file(rec.handle(), &path).expect_err("must fail");
        assert!(matches!(err, FileError::InvalidUtf8), "got {err:?}");
        rec.assert_no_leaks();
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn empty_file_reads_as_empty() {
        let path = scratch_path("empty.bin");
        write_file(&path, b"").expect("write");

        let rec = RecordingHeap::new();
        {
            let buffer = read_binary_file(rec.handle(), &path).expect("read");
            assert!(buffer.is_empty());
            let text = read_text_file(rec.handle(), &path).expect("read");
            assert!(text.is_empty());
        }
        rec.assert_no_leaks();
        std::fs::remove_file(&path).expect("cleanup");
    }
}
