//! Raw memory primitives and the out-of-memory retry wrapper.
//!
//! Both allocators get their slabs, blocks and oversized allocations from
//! an [`OomAllocator`]. When the underlying primitive fails, the allocator
//! runs the installed OOM handler and tries again; the handler is expected
//! to release memory somewhere else in the process. With no handler
//! installed, exhaustion is reported straight away.
//!
//! ```text
//!   allocate(n)
//!       │
//!       ▼
//!   raw malloc ──ok──────────────────────────────▶ pointer
//!       │ null
//!       ▼
//!   handler installed? ──no──▶ Err(OutOfMemory)
//!       │ yes
//!       ▼
//!   handler() ─▶ raw malloc ──ok─────────────────▶ pointer
//!       ▲             │ null
//!       └─────────────┘
//! ```

use std::{
  mem,
  ptr::NonNull,
  sync::{Arc, LazyLock},
};

use log::{error, warn};
use parking_lot::RwLock;

use crate::error::{AllocError, Result};

/// Callback run each time a raw request fails.
pub type OomHandler = Arc<dyn Fn() + Send + Sync>;

/// malloc-shaped memory source. Failure is signalled with a null pointer.
pub trait RawAlloc: Send + Sync {
  /// Returns `size` fresh bytes aligned for any primitive type, or null.
  fn malloc(
    &self,
    size: usize,
  ) -> *mut u8;

  /// Resizes `ptr` to `size` bytes, or returns null leaving `ptr` untouched.
  ///
  /// # Safety
  ///
  /// `ptr` must come from this source and still be live.
  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8;

  /// # Safety
  ///
  /// `ptr` must come from this source and still be live.
  unsafe fn free(
    &self,
    ptr: *mut u8,
  );
}

/// The C library heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcAlloc;

impl RawAlloc for LibcAlloc {
  fn malloc(
    &self,
    size: usize,
  ) -> *mut u8 {
    unsafe { libc::malloc(size).cast() }
  }

  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    unsafe { libc::realloc(ptr.cast(), size).cast() }
  }

  unsafe fn free(
    &self,
    ptr: *mut u8,
  ) {
    unsafe { libc::free(ptr.cast()) }
  }
}

static SHARED: LazyLock<Arc<OomAllocator>> = LazyLock::new(|| Arc::new(OomAllocator::default()));

/// Raw allocator with a pluggable out-of-memory handler.
pub struct OomAllocator<R: RawAlloc = LibcAlloc> {
  raw: R,
  handler: RwLock<Option<OomHandler>>,
}

impl Default for OomAllocator<LibcAlloc> {
  fn default() -> Self {
    Self::new(LibcAlloc)
  }
}

impl OomAllocator<LibcAlloc> {
  /// The process-wide instance used by [`FreeListPool::global`](crate::FreeListPool::global)
  /// and by region pools created without an explicit raw layer.
  pub fn shared() -> Arc<Self> {
    Arc::clone(&SHARED)
  }
}

impl<R: RawAlloc> OomAllocator<R> {
  pub fn new(raw: R) -> Self {
    Self {
      raw,
      handler: RwLock::new(None),
    }
  }

  pub fn raw(&self) -> &R {
    &self.raw
  }

  /// Installs `handler` (or removes it with `None`) and returns the previous one.
  pub fn set_oom_handler(
    &self,
    handler: Option<OomHandler>,
  ) -> Option<OomHandler> {
    mem::replace(&mut *self.handler.write(), handler)
  }

  pub fn has_oom_handler(&self) -> bool {
    self.handler.read().is_some()
  }

  /// One raw attempt, no handler involvement.
  pub fn try_allocate(
    &self,
    size: usize,
  ) -> Option<NonNull<u8>> {
    NonNull::new(self.raw.malloc(size.max(1)))
  }

  /// Allocates `size` bytes, running the OOM handler until the request succeeds.
  pub fn allocate(
    &self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    if let Some(ptr) = self.try_allocate(size) {
      return Ok(ptr);
    }
    self.retry(size, || self.try_allocate(size))
  }

  /// Resizes a raw allocation, running the OOM handler on failure.
  ///
  /// On error `ptr` is still live and owned by the caller.
  ///
  /// # Safety
  ///
  /// `ptr` must come from this allocator and still be live.
  pub unsafe fn reallocate(
    &self,
    ptr: NonNull<u8>,
    size: usize,
  ) -> Result<NonNull<u8>> {
    let attempt = || NonNull::new(unsafe { self.raw.realloc(ptr.as_ptr(), size.max(1)) });
    if let Some(new) = attempt() {
      return Ok(new);
    }
    self.retry(size, attempt)
  }

  /// # Safety
  ///
  /// `ptr` must come from this allocator and must not be used afterwards.
  pub unsafe fn deallocate(
    &self,
    ptr: NonNull<u8>,
  ) {
    unsafe { self.raw.free(ptr.as_ptr()) }
  }

  fn retry(
    &self,
    size: usize,
    mut attempt: impl FnMut() -> Option<NonNull<u8>>,
  ) -> Result<NonNull<u8>> {
    loop {
      // Cloned out so the handler may replace itself without deadlocking.
      let Some(handler) = self.handler.read().clone() else {
        error!("out of memory: {size} bytes requested and no OOM handler installed");
        return Err(AllocError::OutOfMemory { size });
      };
      warn!("raw allocation of {size} bytes failed, running OOM handler");
      handler();
      if let Some(ptr) = attempt() {
        return Ok(ptr);
      }
    }
  }
}
