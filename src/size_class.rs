//! Size classes for the free-list allocator.
//!
//! Requests of 1..=128 bytes are rounded up to a multiple of 8 and filed
//! under one of 16 buckets:
//!
//! ```text
//!   bytes   1..=8  9..=16  17..=24  ...  121..=128
//!   bucket    0      1        2     ...     15
//!   class     8     16       24     ...    128
//! ```

use crate::{
  align_to,
  config::{FREELIST_ALIGN, FREELIST_COUNT, FREELIST_MAX_BYTES},
};

/// Rounds `bytes` up to the class alignment.
pub const fn round_up(bytes: usize) -> usize {
  align_to!(bytes, FREELIST_ALIGN)
}

/// Bucket holding blocks for requests of `bytes` (`1..=128`).
pub const fn freelist_index(bytes: usize) -> usize {
  debug_assert!(bytes > 0 && bytes <= FREELIST_MAX_BYTES);
  round_up(bytes) / FREELIST_ALIGN - 1
}

/// Block size of bucket `index`.
pub const fn class_size(index: usize) -> usize {
  debug_assert!(index < FREELIST_COUNT);
  (index + 1) * FREELIST_ALIGN
}

/// Whether a request of `bytes` is served from the free lists.
pub const fn is_small(bytes: usize) -> bool {
  bytes <= FREELIST_MAX_BYTES
}
