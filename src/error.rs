use thiserror::Error;

/// Failures reported by the region and free-list allocators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
  /// The raw layer could not produce memory and no OOM handler recovered it.
  #[error("out of memory while requesting {size} bytes")]
  OutOfMemory { size: usize },
  /// Chunk refill ran out of arena, raw memory and scavengeable free blocks.
  #[error("free-list arena exhausted while refilling {size}-byte objects")]
  ArenaExhausted { size: usize },
  /// The region pool failed creation or has already been destroyed.
  #[error("region pool is not valid")]
  InvalidPool,
  /// Requested pool size cannot hold the pool header plus minimal bookkeeping.
  #[error("pool size {size} is below the minimum of {min} bytes")]
  PoolTooSmall { size: usize, min: usize },
  /// `count * size_of::<T>()` does not fit in `usize`.
  #[error("allocation size overflows usize")]
  SizeOverflow,
  /// The element type needs more alignment than the free lists guarantee.
  #[error("alignment {align} is not supported by the free-list allocator")]
  UnsupportedAlignment { align: usize },
}

pub type Result<T, E = AllocError> = core::result::Result<T, E>;
