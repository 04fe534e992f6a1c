//! Segregated free-list allocator.
//!
//! Small requests (up to [`FREELIST_MAX_BYTES`]) are served from one of
//! sixteen buckets of equally sized blocks. Freed blocks go back to their
//! bucket and carry the link to the next free block in their own first word:
//!
//! ```text
//!   bucket 0 ( 8) ─▶ ┌────┐ ─▶ ┌────┐ ─▶ None
//!                    └────┘    └────┘
//!   bucket 1 (16) ─▶ None
//!   bucket 2 (24) ─▶ ┌──────┐ ─▶ None
//!   ...              └──────┘
//!
//!   arena:  [ carved │ start ───────────── end )   ◀─ current slab
//! ```
//!
//! An empty bucket is refilled with a batch of objects carved from the arena.
//! When the arena can't provide even one object, its leftover is filed into
//! the bucket of its own size and a new slab is requested, sized
//! `2 * batch + round_up(heap_size / 16)`. If the raw layer has nothing, a
//! block from a larger bucket becomes the arena instead.
//!
//! Large requests bypass all of this and go to the raw layer directly.

use std::{
  mem,
  ptr::{self, NonNull},
  sync::{Arc, LazyLock},
};

use log::{debug, error, trace, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::{
  config::{FREELIST_ALIGN, FREELIST_COUNT, FREELIST_MAX_BYTES, FreeListConfig},
  error::{AllocError, Result},
  oom::{LibcAlloc, OomAllocator, RawAlloc},
  size_class::{class_size, freelist_index, is_small, round_up},
};

/// Link stored in the first word of a free block.
#[repr(C)]
struct FreeNode {
  next: Option<NonNull<FreeNode>>,
}

const _: () = assert!(mem::size_of::<FreeNode>() <= FREELIST_ALIGN);
const _: () = assert!(mem::align_of::<FreeNode>() <= FREELIST_ALIGN);

struct State {
  free_lists: [Option<NonNull<FreeNode>>; FREELIST_COUNT],
  start: NonNull<u8>,
  end: NonNull<u8>,
  heap_size: usize,
  slabs: Vec<NonNull<u8>>,
}

// All pointers refer to memory owned by the pool and are only touched under
// the pool's lock.
unsafe impl Send for State {}

impl State {
  fn new() -> Self {
    Self {
      free_lists: [None; FREELIST_COUNT],
      start: NonNull::dangling(),
      end: NonNull::dangling(),
      heap_size: 0,
      slabs: Vec::new(),
    }
  }

  fn bytes_left(&self) -> usize {
    self.end.as_ptr().addr() - self.start.as_ptr().addr()
  }

  fn pop(
    &mut self,
    index: usize,
  ) -> Option<NonNull<u8>> {
    let node = self.free_lists[index]?;
    self.free_lists[index] = unsafe { node.as_ref().next };
    Some(node.cast())
  }

  /// # Safety
  ///
  /// `block` must be a free, exclusively owned block of `class_size(index)`
  /// bytes aligned to [`FREELIST_ALIGN`].
  unsafe fn push(
    &mut self,
    index: usize,
    block: NonNull<u8>,
  ) {
    let node = block.cast::<FreeNode>();
    debug_assert!(node.is_aligned());
    unsafe {
      node.write(FreeNode {
        next: self.free_lists[index],
      });
    }
    self.free_lists[index] = Some(node);
  }

  fn carve(
    &mut self,
    bytes: usize,
  ) -> NonNull<u8> {
    debug_assert!(bytes <= self.bytes_left());
    let chunk = self.start;
    self.start = unsafe { self.start.add(bytes) };
    chunk
  }

  /// Files the arena's unused tail under the bucket matching its size.
  fn salvage_leftover(&mut self) {
    let left = self.bytes_left();
    if left > 0 {
      debug_assert!(is_small(left) && left.is_multiple_of(FREELIST_ALIGN));
      let index = freelist_index(left);
      let tail = self.carve(left);
      unsafe { self.push(index, tail) };
      trace!("salvaged {left} arena bytes into bucket {index}");
    }
  }

  fn set_arena(
    &mut self,
    start: NonNull<u8>,
    bytes: usize,
  ) {
    self.start = start;
    self.end = unsafe { start.add(bytes) };
  }

  /// Takes one block from the first non-empty bucket at or above `size`.
  fn scavenge(
    &mut self,
    size: usize,
  ) -> Option<(NonNull<u8>, usize)> {
    (freelist_index(size)..FREELIST_COUNT)
      .find_map(|index| self.pop(index).map(|block| (block, class_size(index))))
  }

  fn free_blocks(&self) -> [usize; FREELIST_COUNT] {
    self.free_lists.map(|head| {
      std::iter::successors(head, |node| unsafe { node.as_ref().next }).count()
    })
  }
}

/// Accounting snapshot of a [`FreeListPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeListStats {
  /// Bytes obtained from the raw layer for arena slabs so far.
  pub heap_size: usize,
  /// Bytes between the arena cursors.
  pub arena_remaining: usize,
  /// Number of blocks sitting in each bucket.
  pub free_blocks: [usize; FREELIST_COUNT],
}

impl FreeListStats {
  /// Bytes held by all buckets.
  pub fn free_bytes(&self) -> usize {
    self
      .free_blocks
      .iter()
      .enumerate()
      .map(|(index, count)| count * class_size(index))
      .sum()
  }
}

static GLOBAL: LazyLock<FreeListPool> = LazyLock::new(|| FreeListPool::new(OomAllocator::shared()));

/// Thread-safe size-class allocator for small objects.
///
/// A single lock protects the buckets and the arena cursors. It is released
/// while a new slab is requested from the raw layer.
pub struct FreeListPool<R: RawAlloc = LibcAlloc> {
  raw: Arc<OomAllocator<R>>,
  config: FreeListConfig,
  state: Mutex<State>,
}

impl FreeListPool<LibcAlloc> {
  /// The process-wide pool behind [`PoolAllocator`](crate::PoolAllocator).
  pub fn global() -> &'static Self {
    &GLOBAL
  }
}

impl<R: RawAlloc> FreeListPool<R> {
  pub fn new(raw: Arc<OomAllocator<R>>) -> Self {
    Self::with_config(raw, FreeListConfig::default())
  }

  pub fn with_config(
    raw: Arc<OomAllocator<R>>,
    config: FreeListConfig,
  ) -> Self {
    Self {
      raw,
      config: FreeListConfig {
        refill_objects: config.refill_objects.max(1),
        max_chunk_attempts: config.max_chunk_attempts.max(1),
      },
      state: Mutex::new(State::new()),
    }
  }

  pub fn raw(&self) -> &Arc<OomAllocator<R>> {
    &self.raw
  }

  /// Allocates `size` bytes, aligned to [`FREELIST_ALIGN`] for small sizes.
  ///
  /// A zero-sized request returns a dangling pointer that must not be read.
  pub fn allocate(
    &self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    if size == 0 {
      return Ok(NonNull::dangling());
    }
    if !is_small(size) {
      return self.raw.allocate(size);
    }

    let mut state = self.state.lock();
    if let Some(block) = state.pop(freelist_index(size)) {
      return Ok(block);
    }
    self.refill(&mut state, round_up(size))
  }

  /// Returns a block to its bucket, or to the raw layer if it is large.
  ///
  /// # Safety
  ///
  /// `ptr` must come from this pool with the same `size` and must not be
  /// used afterwards.
  pub unsafe fn deallocate(
    &self,
    ptr: NonNull<u8>,
    size: usize,
  ) {
    if size == 0 {
      return;
    }
    if !is_small(size) {
      unsafe { self.raw.deallocate(ptr) };
      return;
    }
    unsafe { self.state.lock().push(freelist_index(size), ptr) };
  }

  /// Resizes a block from `old_size` to `new_size`, keeping the first
  /// `min(old_size, new_size)` bytes.
  ///
  /// # Safety
  ///
  /// `ptr` must come from this pool with `old_size`. On success it must not
  /// be used again unless it is the returned pointer.
  pub unsafe fn reallocate(
    &self,
    ptr: NonNull<u8>,
    old_size: usize,
    new_size: usize,
  ) -> Result<NonNull<u8>> {
    if !is_small(old_size) && !is_small(new_size) {
      return unsafe { self.raw.reallocate(ptr, new_size) };
    }
    if round_up(old_size) == round_up(new_size) {
      return Ok(ptr);
    }

    let new = self.allocate(new_size)?;
    unsafe {
      ptr::copy_nonoverlapping(ptr.as_ptr(), new.as_ptr(), old_size.min(new_size));
      self.deallocate(ptr, old_size);
    }
    Ok(new)
  }

  /// Refills the empty bucket for `size` (already rounded) and returns one
  /// block from the batch.
  fn refill(
    &self,
    state: &mut MutexGuard<'_, State>,
    size: usize,
  ) -> Result<NonNull<u8>> {
    let (chunk, nobjs) = self.chunk_alloc(state, size, self.config.refill_objects)?;
    if nobjs == 1 {
      return Ok(chunk);
    }

    let index = freelist_index(size);
    // Pushed back to front so the bucket hands them out in address order.
    for i in (1..nobjs).rev() {
      unsafe { state.push(index, chunk.add(i * size)) };
    }
    trace!("refilled bucket {index} with {} blocks of {size} bytes", nobjs - 1);
    Ok(chunk)
  }

  /// Carves up to `nobjs` objects of `size` bytes from the arena, growing it
  /// when it can't provide even one. Returns the chunk and how many objects
  /// it holds.
  fn chunk_alloc(
    &self,
    state: &mut MutexGuard<'_, State>,
    size: usize,
    nobjs: usize,
  ) -> Result<(NonNull<u8>, usize)> {
    let total = size * nobjs;

    for _ in 0..self.config.max_chunk_attempts {
      let left = state.bytes_left();
      if left >= total {
        return Ok((state.carve(total), nobjs));
      }
      if left >= size {
        let fits = left / size;
        return Ok((state.carve(fits * size), fits));
      }

      let bytes_to_get = 2 * total + round_up(state.heap_size >> 4);
      state.salvage_leftover();

      let slab = MutexGuard::unlocked(state, || self.raw.try_allocate(bytes_to_get));
      if let Some(slab) = slab {
        self.install_slab(state, slab, bytes_to_get, size);
        continue;
      }

      // The arena may have been grown by another thread while unlocked.
      if state.bytes_left() >= size {
        continue;
      }
      state.salvage_leftover();

      if let Some((block, bytes)) = state.scavenge(size) {
        warn!("raw layer refused {bytes_to_get} bytes, scavenged a {bytes}-byte free block");
        state.set_arena(block, bytes);
        continue;
      }

      // Last resort: let the OOM handler try to make room.
      match MutexGuard::unlocked(state, || self.raw.allocate(bytes_to_get)) {
        Ok(slab) => self.install_slab(state, slab, bytes_to_get, size),
        Err(err) => {
          error!("free-list arena exhausted refilling {size}-byte objects: {err}");
          return Err(AllocError::ArenaExhausted { size });
        }
      }
    }

    error!("free-list arena still short after {} attempts", self.config.max_chunk_attempts);
    Err(AllocError::ArenaExhausted { size })
  }

  /// Makes `slab` the arena. Another thread may have grown the arena while
  /// the lock was released; if that arena can still serve `size`, the new
  /// slab is handed back instead.
  fn install_slab(
    &self,
    state: &mut MutexGuard<'_, State>,
    slab: NonNull<u8>,
    bytes: usize,
    size: usize,
  ) {
    if state.bytes_left() >= size {
      unsafe { self.raw.deallocate(slab) };
      return;
    }
    state.salvage_leftover();
    state.set_arena(slab, bytes);
    state.heap_size += bytes;
    state.slabs.push(slab);
    debug!(
      "free-list arena grew by {bytes} bytes, heap size now {}",
      state.heap_size
    );
  }

  pub fn stats(&self) -> FreeListStats {
    let state = self.state.lock();
    FreeListStats {
      heap_size: state.heap_size,
      arena_remaining: state.bytes_left(),
      free_blocks: state.free_blocks(),
    }
  }
}

impl<R: RawAlloc> Drop for FreeListPool<R> {
  fn drop(&mut self) {
    let state = self.state.get_mut();
    for slab in state.slabs.drain(..) {
      unsafe { self.raw.deallocate(slab) };
    }
  }
}
