//! This crate provides [`GuardedPool`], a fixed-size object pool allocator that hands out
//! uniformly sized memory blocks from slab-like pages and reclaims them to an intrusive free
//! list.
//!
//! In debug mode the pool paints recognizable byte signatures over every region of its pages
//! and validates each `free`, turning the classic client mistakes (double free, freeing a
//! pointer that is not a block, buffer over/underflow into the guard pads) into errors instead
//! of silent corruption.
//!
//! # Features
//!
//! - **O(1) allocate and free**: blocks are recycled through a LIFO free list threaded through
//!   the free blocks themselves; a new page is only provisioned when the list runs dry.
//! - **Configurable block dressing**: optional per-block headers (allocation id, use counter,
//!   external records with labels), guard pads and payload alignment, all computed as exact
//!   byte offsets at construction.
//! - **Debug signatures**: unallocated/allocated/freed payloads and pad/alignment filler each
//!   carry a distinct pattern while debug mode is on.
//! - **Misuse detection**: `free` reports double frees, bad boundaries and pad corruption as
//!   typed errors; `validate_pages` and `dump_memory_in_use` sweep whole pages.
//! - **Empty-page reclamation**: fully free pages can be handed back to the raw allocator.
//! - **Passthrough mode**: the pool can stand aside and forward every request to the raw
//!   allocator while still keeping usage statistics.
//!
//! # Example
//!
//! ```
//! use guarded_pool::{GuardedPool, HeaderMode, PoolError};
//!
//! let mut pool = GuardedPool::builder()
//!     .object_size(32)
//!     .objects_per_page(8)
//!     .debug(true)
//!     .pad_bytes(4)
//!     .header(HeaderMode::Basic)
//!     .build()?;
//!
//! let block = pool.allocate()?;
//!
//! // SAFETY: the pool handed out 32 writable bytes at this address.
//! unsafe { block.as_ptr().cast::<u128>().write_unaligned(0xFEED_FACE) };
//!
//! // SAFETY: `block` came from this pool and has not been freed.
//! unsafe { pool.free(block.as_ptr())? };
//!
//! // Freeing the same block again is caught while debug mode is on.
//! // SAFETY: debug mode validates the argument before touching anything.
//! let err = unsafe { pool.free(block.as_ptr()) };
//! assert!(matches!(err, Err(PoolError::DoubleFree { .. })));
//! # Ok::<(), guarded_pool::PoolError>(())
//! ```

mod builder;
mod config;
mod error;
mod free_list;
mod header;
mod layout;
mod page;
mod pool;
mod signature;
mod stats;

pub use builder::*;
pub use config::*;
pub use error::*;
pub use header::BlockNote;
pub use layout::BlockLayout;
pub use pool::*;
pub use signature::{
    ALIGN_PATTERN, ALLOCATED_PATTERN, FREED_PATTERN, PAD_PATTERN, UNALLOCATED_PATTERN,
};
pub use stats::*;
