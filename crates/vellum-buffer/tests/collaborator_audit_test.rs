//! Integration test: collaborators stay honest about allocator usage.
//!
//! Runs the owned types and utilities over a recording handle and audits
//! for leaks at every checkpoint, then repeats representative flows over
//! an arena to show the same code runs unchanged on a bump strategy.
//!
//! Run: cargo test -p vellum-buffer --test collaborator_audit_test

use vellum_alloc::{BumpArena, RecordingHeap, TestingHeap};
use vellum_buffer::base64;
use vellum_buffer::{ByteBuffer, OutOfMemory, OwnedText, read_binary_file, write_file};

fn scratch_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("vellum_audit_{}_{}", std::process::id(), name))
}

#[test]
fn buffers_text_and_codec_release_everything() {
    let rec = RecordingHeap::new();
    let alloc = rec.handle();
    {
        let mut body = ByteBuffer::new(alloc);
        body.extend_from_slice(b"image row payload").expect("extend");
        let encoded = base64::encode_to_buffer(alloc, body.as_slice()).expect("encode");
        let banner = OwnedText::copy_of(alloc, "frame 1/3").expect("copy");
        assert!(!encoded.is_empty());
        assert_eq!(&*banner, "frame 1/3");
    }
    rec.assert_no_leaks();
}

#[test]
fn file_to_encoded_buffer_pipeline_over_an_arena() {
    let path = scratch_path("pipeline.bin");
    let payload: Vec<u8> = (0u16..300).map(|i| (i * 7 % 256) as u8).collect();
    write_file(&path, &payload).expect("write");

    let arena = BumpArena::new();
    let alloc = arena.handle();
    {
        let raw = read_binary_file(alloc, &path).expect("read");
        assert_eq!(raw.as_slice(), payload.as_slice());
        let encoded = base64::encode_to_buffer(alloc, raw.as_slice()).expect("encode");
        let mut decoded = ByteBuffer::zeroed(alloc, base64::decoded_len(encoded.len()))
            .expect("sized");
        let n = base64::decode_into(decoded.as_mut_slice(), encoded.as_slice()).expect("decode");
        assert_eq!(n, decoded.len());
        assert_eq!(decoded.as_slice(), payload.as_slice());
    }
    arena.free_all();
    assert_eq!(arena.stats().used, 0);
    std::fs::remove_file(&path).expect("cleanup");
}

#[test]
fn exhaustion_mid_pipeline_is_an_error_not_a_leak() {
    let testing = TestingHeap::new();
    let alloc = testing.handle();

    // Fail the third size-increasing request and everything after it; the
    // pipeline must surface OutOfMemory and release what it already took.
    testing.set_fail_at(-3);
    let outcome: Result<(), OutOfMemory> = (|| {
        let mut buffer = ByteBuffer::with_capacity(alloc, 64)?;
        buffer.extend_from_slice(&[0xAB; 64])?;
        let text = OwnedText::copy_of(alloc, "status line")?;
        let encoded = base64::encode_to_buffer(alloc, buffer.as_slice())?;
        drop((text, encoded));
        Ok(())
    })();
    assert_eq!(outcome, Err(OutOfMemory));
    testing.assert_no_leaks();
    testing.reset();
}
