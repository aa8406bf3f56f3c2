//! # vellum-alloc
//!
//! Allocation strategies behind one value-typed handle.
//!
//! Code that needs memory takes an [`Allocator`] and never learns which
//! strategy backs it: the platform heap, a refuse-everything null strategy,
//! a chained bump-pointer arena ([`BumpArena`]), a bookkeeping wrapper that
//! retrofits bulk reclamation and leak auditing onto the heap
//! ([`RecordingHeap`]), or a locked, fault-injecting variant for driving
//! error paths deterministically ([`TestingHeap`]).
//!
//! The raw layer is deliberately zero-overhead: blocks are not
//! self-describing, so every release and resize must supply the exact size
//! given at the most recent allocation. Owned container types built on top
//! remember their own sizes so application code does not.
//!
//! ```
//! use vellum_alloc::BumpArena;
//!
//! let arena = BumpArena::new();
//! let alloc = arena.handle();
//! let block = alloc.alloc(64).expect("arena allocation");
//! // ... fill the block ...
//! let copy = alloc.duplicate(b"cached row").expect("arena allocation");
//! let _ = (block, copy);
//! alloc.free_all();
//! ```

pub mod arena;
pub mod handle;
pub mod heap;
pub mod recording;
pub mod testing;

pub use arena::{ArenaStats, BumpArena};
pub use handle::Allocator;
pub use recording::{RecordingHeap, TraceEvent};
pub use testing::{PROCESS_TESTING, TestingHeap};
