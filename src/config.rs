//! Tunables shared by the two allocators.

/// Page size assumed when no explicit [`RegionConfig`] is given.
pub const PAGE_SIZE: usize = 4096;

/// Pool size used by [`RegionPool::with_default_size`](crate::RegionPool::with_default_size).
pub const DEFAULT_POOL_SIZE: usize = 16 * 1024;

/// Alignment the minimum pool size is rounded to.
pub const POOL_ALIGNMENT: usize = 16;

/// Alignment unit of the free-list size classes.
pub const FREELIST_ALIGN: usize = 8;

/// Largest request served from the free lists; bigger ones go to the raw layer.
pub const FREELIST_MAX_BYTES: usize = 128;

/// Number of size classes (`FREELIST_MAX_BYTES / FREELIST_ALIGN`).
pub const FREELIST_COUNT: usize = FREELIST_MAX_BYTES / FREELIST_ALIGN;

/// Objects requested per bucket refill.
pub const REFILL_OBJECTS: usize = 20;

/// Upper bound on carve/grow rounds a single chunk request may take.
pub const MAX_CHUNK_ATTEMPTS: usize = 8;

/// Queries the operating system page size, falling back to [`PAGE_SIZE`].
pub fn system_page_size() -> usize {
  let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
  usize::try_from(size).ok().filter(|s| s.is_power_of_two()).unwrap_or(PAGE_SIZE)
}

/// Region allocator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionConfig {
  /// Small allocations are capped below one page.
  pub page_size: usize,
}

impl Default for RegionConfig {
  fn default() -> Self {
    Self {
      page_size: PAGE_SIZE,
    }
  }
}

impl RegionConfig {
  /// Uses the page size reported by the OS.
  pub fn from_system() -> Self {
    Self {
      page_size: system_page_size(),
    }
  }

  /// Largest request the small path may ever serve (`page_size - 1`).
  pub fn max_alloc_from_pool(&self) -> usize {
    self.page_size.saturating_sub(1)
  }
}

/// Free-list allocator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeListConfig {
  /// How many objects a bucket refill asks the arena for.
  pub refill_objects: usize,
  /// Bound on arena carve/grow rounds before giving up.
  pub max_chunk_attempts: usize,
}

impl Default for FreeListConfig {
  fn default() -> Self {
    Self {
      refill_objects: REFILL_OBJECTS,
      max_chunk_attempts: MAX_CHUNK_ATTEMPTS,
    }
  }
}
