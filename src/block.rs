use std::{mem, ptr::NonNull};

use crate::align::checked_align_to;

/// Bytes reserved at the front of every chained block for its header
/// (cursor, limit, next link, fail count).
pub(crate) const BLOCK_HEADER_SIZE: usize = 4 * mem::size_of::<usize>();

/// Bytes reserved at the front of the first block: the block header plus
/// the small-allocation cap, the current-block index and the two list heads.
pub(crate) const POOL_HEADER_SIZE: usize = BLOCK_HEADER_SIZE + 4 * mem::size_of::<usize>();

/// Small allocations are rounded up to the machine word when aligned.
pub(crate) const WORD: usize = mem::size_of::<usize>();

/// One contiguous slab of a region pool's chain.
///
/// Offsets are relative to `mem`; the block at index `i + 1` of the chain is
/// this block's `next`.
pub(crate) struct Block {
  mem: NonNull<u8>,
  pub cursor: usize,
  pub limit: usize,
  pub fail_count: u32,
}

impl Block {
  pub fn new(
    mem: NonNull<u8>,
    header_size: usize,
    size: usize,
  ) -> Self {
    debug_assert!(header_size <= size);
    Self {
      mem,
      cursor: header_size,
      limit: size,
      fail_count: 0,
    }
  }

  pub fn base(&self) -> NonNull<u8> {
    self.mem
  }

  /// Reserves `size` bytes at the cursor, word-aligning it first when
  /// `align` is set. Leaves the block untouched if the bytes don't fit.
  pub fn try_bump(
    &mut self,
    size: usize,
    align: bool,
  ) -> Option<NonNull<u8>> {
    let base = self.mem.as_ptr().addr();
    let mut start = self.cursor;
    if align {
      start = checked_align_to(base.checked_add(start)?, WORD)? - base;
    }
    if start > self.limit || self.limit - start < size {
      return None;
    }
    self.cursor = start + size;
    debug_assert!(self.cursor <= self.limit);
    Some(unsafe { self.mem.add(start) })
  }

  pub fn rewind(
    &mut self,
    header_size: usize,
  ) {
    self.cursor = header_size;
    self.fail_count = 0;
  }

  pub fn remaining(&self) -> usize {
    self.limit - self.cursor
  }

  /// Whether `addr` lies inside `[start, limit)` of this block.
  pub fn contains(
    &self,
    addr: usize,
  ) -> bool {
    let base = self.mem.as_ptr().addr();
    addr >= base && addr - base < self.limit
  }
}
