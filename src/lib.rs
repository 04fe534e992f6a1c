//! # rpool - Region and Free-List Memory Pools
//!
//! This crate provides two independent memory pools built on top of the C
//! heap (`libc::malloc`):
//!
//! - [`RegionPool`]: a **region allocator** (arena) for many small
//!   allocations that share one lifetime, with bulk reset and teardown
//!   callbacks.
//! - [`FreeListPool`] / [`PoolAllocator`]: a thread-safe **segregated free
//!   list** allocator for small, uniformly sized objects, meant to back
//!   container storage.
//!
//! ## Overview
//!
//! ```text
//!   Region Pool:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │  block 0                      block 1                  block 2       │
//!   │  ┌─────┬────┬────┬───────┐    ┌───┬────┬──────────┐    ┌───┬──────┐  │
//!   │  │ hdr │ A1 │ A2 │ free  │ ─▶ │ h │ A3 │   free   │ ─▶ │ h │ free │  │
//!   │  └─────┴────┴────┴───────┘    └───┴────┴──────────┘    └───┴──────┘  │
//!   │                  ▲                     ▲                             │
//!   │                cursor                cursor                          │
//!   │                                                                      │
//!   │  large list:  [ L1 ] ─▶ [ vacant ] ─▶ [ L2 ]     (malloc'd one by one)│
//!   │  cleanups:    newest ─▶ ... ─▶ oldest            (run at destroy)    │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Free-List Pool:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │   bucket  8 ─▶ □ ─▶ □ ─▶ □                                           │
//!   │   bucket 16 ─▶ ▭ ─▶ ▭                                                │
//!   │   ...                                                                │
//!   │   bucket 128 ─▶ (empty: refill 20 objects from the arena)            │
//!   │                                                                      │
//!   │   arena: ┌──────── carved ────────┬──── start ──────── end ───┐      │
//!   │          └────────────────────────┴───────────────────────────┘      │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rpool
//!   ├── align       - Alignment macros (align!, align_to!)
//!   ├── config      - Pool constants and settings
//!   ├── error       - AllocError
//!   ├── oom         - Raw memory layer with OOM handler retry
//!   ├── block       - Block records of a region pool (internal)
//!   ├── large       - Large-allocation list (internal)
//!   ├── cleanup     - Teardown callbacks
//!   ├── region      - RegionPool implementation
//!   ├── size_class  - Size-class arithmetic
//!   ├── freelist    - FreeListPool implementation
//!   └── pool_alloc  - Typed PoolAllocator<T> handle
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rpool::RegionPool;
//!
//! let mut pool = RegionPool::try_new(4096).unwrap();
//!
//! // Small requests are bumped out of the pool's blocks.
//! let small = pool.alloc_zeroed(128).unwrap();
//! assert!(pool.owns_small(small));
//!
//! // Oversized requests are malloc'd and tracked.
//! let large = pool.alloc(8192).unwrap();
//! assert!(pool.free(large).unwrap());
//!
//! // Teardown callbacks run newest first when the pool is dropped.
//! pool.cleanup_add(0).unwrap().set_handler(|_| println!("closing"));
//! ```
//!
//! ```rust
//! use rpool::PoolAllocator;
//!
//! let alloc = PoolAllocator::<u64>::new();
//! let ptr = alloc.allocate(8).unwrap();
//! unsafe {
//!     alloc.construct(ptr, 42);
//!     assert_eq!(*ptr.as_ptr(), 42);
//!     alloc.deallocate(ptr, 8);
//! }
//! ```
//!
//! ## Out of Memory
//!
//! Every raw request goes through an [`OomAllocator`]. When `malloc` fails,
//! the installed handler is run and the request retried until it succeeds;
//! without a handler the failure surfaces as [`AllocError::OutOfMemory`].
//! [`OomAllocator::shared`] is the process-wide instance; pools can be given
//! their own to keep handlers apart.
//!
//! ## Limitations
//!
//! - **No individual small frees in regions**: small region allocations are
//!   only reclaimed by `reset` or `destroy`.
//! - **Exact-size frees only**: the free-list pool needs the original size
//!   to file a block back into its bucket.
//! - **Regions are single-owner**: `RegionPool` is `Send` but not `Sync`.
//! - **Unix-only**: raw memory comes from `libc`.
//!
//! ## Safety
//!
//! Pointers handed out by either pool are raw. They must not outlive the
//! pool (region) or be freed with a different size (free list).

pub mod align;
mod block;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod freelist;
mod large;
pub mod oom;
pub mod pool_alloc;
pub mod region;
pub mod size_class;

#[cfg(test)]
mod testing;

pub use cleanup::{Cleanup, CleanupHandler};
pub use config::{FreeListConfig, RegionConfig};
pub use error::AllocError;
pub use freelist::{FreeListPool, FreeListStats};
pub use oom::{LibcAlloc, OomAllocator, OomHandler, RawAlloc};
pub use pool_alloc::PoolAllocator;
pub use region::{MIN_POOL_SIZE, RegionPool, RegionStats};
