//! Region (arena) allocator.
//!
//! A [`RegionPool`] hands out small allocations by bumping a cursor through a
//! chain of equally sized blocks and tracks oversized allocations one by one.
//! Small allocations are only reclaimed in bulk by [`RegionPool::reset`] or
//! [`RegionPool::destroy`].
//!
//! ```text
//!   block 0 (pool)                          block 1
//!   ┌────────────┬──────────┬──────────┐    ┌────────┬────────┬───────────┐
//!   │ pool hdr   │ used     │ free     │──▶ │ hdr    │ used   │ free      │──▶ ...
//!   └────────────┴──────────┴──────────┘    └────────┴────────┴───────────┘
//!                           ▲          ▲             ▲        ▲           ▲
//!                         cursor     limit         start    cursor      limit
//!
//!   large list ─▶ [alloc] ─▶ [vacant] ─▶ [alloc] ─▶ None      (nodes live in blocks)
//!   cleanups   ─▶ newest  ─▶ ...      ─▶ oldest               (run at destroy)
//! ```
//!
//! Blocks that keep failing small requests are skipped: once a block has
//! taken part in more than four growth scans, `current` moves past it.

use std::{ptr::NonNull, sync::Arc};

use log::{debug, error, trace};

use crate::{
  align_to,
  block::{BLOCK_HEADER_SIZE, Block, POOL_HEADER_SIZE},
  cleanup::{CLEANUP_NODE_SIZE, Cleanup},
  config::{DEFAULT_POOL_SIZE, POOL_ALIGNMENT, RegionConfig},
  error::{AllocError, Result},
  large::{LARGE_NODE_SIZE, LargeList},
  oom::{LibcAlloc, OomAllocator, RawAlloc},
};

/// Smallest size a pool can be created with: the pool header plus room for
/// two large-allocation nodes.
pub const MIN_POOL_SIZE: usize = align_to!(POOL_HEADER_SIZE + 2 * LARGE_NODE_SIZE, POOL_ALIGNMENT);

/// A block is skipped by later scans once its fail count goes past this.
const MAX_BLOCK_FAILURES: u32 = 4;

/// Point-in-time numbers about a [`RegionPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionStats {
  pub blocks: usize,
  pub block_size: usize,
  pub max_small: usize,
  pub current_block: usize,
  pub large_nodes: usize,
  pub large_held: usize,
  pub cleanups: usize,
}

/// Arena allocator with bulk reset and LIFO teardown callbacks.
///
/// Meant for a single owner (one pool per connection or per worker); it is
/// `Send` but performs no locking.
pub struct RegionPool<R: RawAlloc = LibcAlloc> {
  raw: Arc<OomAllocator<R>>,
  blocks: Vec<Block>,
  block_size: usize,
  max_small: usize,
  current: usize,
  large: LargeList,
  cleanups: Vec<Cleanup>,
}

// Every pointer held by the pool refers to memory the pool owns exclusively.
unsafe impl<R: RawAlloc> Send for RegionPool<R> {}

impl RegionPool<LibcAlloc> {
  /// Creates a pool of `size` bytes. On failure the pool is returned in the
  /// invalid state; check [`is_valid`](Self::is_valid) before use.
  pub fn new(size: usize) -> Self {
    Self::try_new(size).unwrap_or_else(|err| {
      error!("region pool creation failed: {err}");
      Self::invalid(OomAllocator::shared())
    })
  }

  pub fn try_new(size: usize) -> Result<Self> {
    Self::with_config(size, RegionConfig::default())
  }

  pub fn with_default_size() -> Result<Self> {
    Self::try_new(DEFAULT_POOL_SIZE)
  }

  pub fn with_config(
    size: usize,
    config: RegionConfig,
  ) -> Result<Self> {
    Self::with_raw(OomAllocator::shared(), size, config)
  }
}

impl<R: RawAlloc> RegionPool<R> {
  /// Creates a pool whose blocks and large allocations come from `raw`.
  pub fn with_raw(
    raw: Arc<OomAllocator<R>>,
    size: usize,
    config: RegionConfig,
  ) -> Result<Self> {
    if size < MIN_POOL_SIZE {
      return Err(AllocError::PoolTooSmall {
        size,
        min: MIN_POOL_SIZE,
      });
    }

    let mem = raw.allocate(size)?;
    let max_small = config.max_alloc_from_pool().min(size - POOL_HEADER_SIZE);
    debug!("created region pool at {mem:p}: {size} bytes, max small {max_small}");

    Ok(Self {
      raw,
      blocks: vec![Block::new(mem, POOL_HEADER_SIZE, size)],
      block_size: size,
      max_small,
      current: 0,
      large: LargeList::new(),
      cleanups: Vec::new(),
    })
  }

  fn invalid(raw: Arc<OomAllocator<R>>) -> Self {
    Self {
      raw,
      blocks: Vec::new(),
      block_size: 0,
      max_small: 0,
      current: 0,
      large: LargeList::new(),
      cleanups: Vec::new(),
    }
  }

  /// `false` if creation failed or the pool was destroyed.
  pub fn is_valid(&self) -> bool {
    !self.blocks.is_empty()
  }

  fn ensure_valid(&self) -> Result<()> {
    if self.is_valid() {
      Ok(())
    } else {
      Err(AllocError::InvalidPool)
    }
  }

  /// Allocates `size` word-aligned bytes.
  pub fn alloc(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    self.ensure_valid()?;
    if size <= self.max_small {
      return self.alloc_small(size, true);
    }
    self.alloc_large(size)
  }

  /// Allocates `size` bytes with no alignment guarantee.
  pub fn alloc_unaligned(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    self.ensure_valid()?;
    if size <= self.max_small {
      return self.alloc_small(size, false);
    }
    self.alloc_large(size)
  }

  /// Like [`alloc`](Self::alloc), with the bytes zeroed.
  pub fn alloc_zeroed(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    let ptr = self.alloc(size)?;
    unsafe { ptr.as_ptr().write_bytes(0, size) };
    Ok(ptr)
  }

  fn alloc_small(
    &mut self,
    size: usize,
    align: bool,
  ) -> Result<NonNull<u8>> {
    for block in &mut self.blocks[self.current..] {
      if let Some(ptr) = block.try_bump(size, align) {
        return Ok(ptr);
      }
    }
    self.alloc_block(size)
  }

  /// Appends a block as large as the first one and serves `size` from it.
  fn alloc_block(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    let mem = self.raw.allocate(self.block_size)?;
    let mut block = Block::new(mem, BLOCK_HEADER_SIZE, self.block_size);
    let Some(ptr) = block.try_bump(size, true) else {
      unsafe { self.raw.deallocate(mem) };
      return Err(AllocError::OutOfMemory { size });
    };

    // The scan that got us here failed on every block but the last.
    let last = self.blocks.len() - 1;
    for index in self.current..last {
      let block = &mut self.blocks[index];
      let failed = block.fail_count;
      block.fail_count += 1;
      if failed > MAX_BLOCK_FAILURES {
        self.current = index + 1;
      }
    }

    self.blocks.push(block);
    debug!(
      "region pool grew to {} blocks, scans start at block {}",
      self.blocks.len(),
      self.current
    );
    Ok(ptr)
  }

  fn alloc_large(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    let ptr = self.raw.allocate(size)?;
    if self.large.try_reuse(ptr) {
      trace!("large allocation {ptr:p} ({size} bytes) reused a vacant slot");
      return Ok(ptr);
    }

    match self.alloc_small(LARGE_NODE_SIZE, true) {
      Ok(node) => {
        unsafe { self.large.push(node, ptr) };
        trace!("large allocation {ptr:p} ({size} bytes) linked a new node");
        Ok(ptr)
      }
      Err(err) => {
        unsafe { self.raw.deallocate(ptr) };
        Err(err)
      }
    }
  }

  /// Releases a large allocation. Pointers the large list doesn't hold,
  /// small allocations included, are ignored and `Ok(false)` is returned.
  pub fn free(
    &mut self,
    ptr: NonNull<u8>,
  ) -> Result<bool> {
    self.ensure_valid()?;
    if !self.large.vacate(ptr) {
      return Ok(false);
    }
    unsafe { self.raw.deallocate(ptr) };
    Ok(true)
  }

  /// Frees every large allocation and rewinds all blocks.
  ///
  /// The chain keeps its length, and registered cleanups stay queued for
  /// [`destroy`](Self::destroy).
  pub fn reset(&mut self) -> Result<()> {
    self.ensure_valid()?;
    let raw = &self.raw;
    self.large.clear(|ptr| unsafe { raw.deallocate(ptr) });

    for (index, block) in self.blocks.iter_mut().enumerate() {
      let header = if index == 0 { POOL_HEADER_SIZE } else { BLOCK_HEADER_SIZE };
      block.rewind(header);
    }
    self.current = 0;
    debug!("region pool reset, {} blocks kept", self.blocks.len());
    Ok(())
  }

  /// Runs cleanups newest first, then releases large allocations and blocks.
  /// The pool is invalid afterwards. Called by `Drop`.
  pub fn destroy(&mut self) {
    if !self.is_valid() {
      return;
    }

    for cleanup in self.cleanups.drain(..).rev() {
      cleanup.run();
    }

    let raw = &self.raw;
    self.large.clear(|ptr| unsafe { raw.deallocate(ptr) });

    let blocks = self.blocks.len();
    for block in self.blocks.drain(..) {
      unsafe { self.raw.deallocate(block.base()) };
    }
    self.current = 0;
    debug!("region pool destroyed, {blocks} blocks released");
  }

  /// Registers a cleanup record, reserving `size` payload bytes from the pool
  /// when `size > 0`. Set its handler on the returned record.
  pub fn cleanup_add(
    &mut self,
    size: usize,
  ) -> Result<&mut Cleanup> {
    self.ensure_valid()?;
    // The record itself lives in `cleanups`; its footprint keeps the cursors
    // where an in-band node would leave them.
    let _node = self.alloc_small(CLEANUP_NODE_SIZE, true)?;
    let payload = if size > 0 { Some(self.alloc(size)?) } else { None };

    let index = self.cleanups.len();
    self.cleanups.push(Cleanup::new(payload, size));
    Ok(&mut self.cleanups[index])
  }

  /// Whether `ptr` lies inside one of the pool's blocks.
  pub fn owns_small(
    &self,
    ptr: NonNull<u8>,
  ) -> bool {
    let addr = ptr.as_ptr().addr();
    self.blocks.iter().any(|block| block.contains(addr))
  }

  /// Whether `ptr` is a live large allocation of this pool.
  pub fn owns_large(
    &self,
    ptr: NonNull<u8>,
  ) -> bool {
    self.large.contains(ptr)
  }

  pub fn max_small(&self) -> usize {
    self.max_small
  }

  pub fn block_count(&self) -> usize {
    self.blocks.len()
  }

  /// Nodes in the large list, vacant ones included.
  pub fn large_count(&self) -> usize {
    self.large.len()
  }

  pub fn cleanup_count(&self) -> usize {
    self.cleanups.len()
  }

  pub fn stats(&self) -> RegionStats {
    RegionStats {
      blocks: self.blocks.len(),
      block_size: self.block_size,
      max_small: self.max_small,
      current_block: self.current,
      large_nodes: self.large.len(),
      large_held: self.large.held(),
      cleanups: self.cleanups.len(),
    }
  }
}

impl<R: RawAlloc> Drop for RegionPool<R> {
  fn drop(&mut self) {
    self.destroy();
  }
}
