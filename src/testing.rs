//! Failure-injecting raw layer for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::oom::{LibcAlloc, RawAlloc};

/// Wraps [`LibcAlloc`], counting calls and live blocks, and failing on demand.
pub(crate) struct TestAlloc {
  fail_next: AtomicUsize,
  budget: AtomicUsize,
  malloc_calls: AtomicUsize,
  live: AtomicUsize,
}

impl TestAlloc {
  pub(crate) fn new() -> Self {
    Self::with_budget(usize::MAX)
  }

  /// Mallocs fail once `bytes` have been handed out in total.
  pub(crate) fn with_budget(bytes: usize) -> Self {
    Self {
      fail_next: AtomicUsize::new(0),
      budget: AtomicUsize::new(bytes),
      malloc_calls: AtomicUsize::new(0),
      live: AtomicUsize::new(0),
    }
  }

  /// Fails the next `count` malloc/realloc calls; `usize::MAX` fails forever.
  pub(crate) fn fail_next(
    &self,
    count: usize,
  ) {
    self.fail_next.store(count, Ordering::SeqCst);
  }

  pub(crate) fn malloc_calls(&self) -> usize {
    self.malloc_calls.load(Ordering::SeqCst)
  }

  pub(crate) fn live(&self) -> usize {
    self.live.load(Ordering::SeqCst)
  }

  fn should_fail(&self) -> bool {
    self
      .fail_next
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
        0 => None,
        usize::MAX => Some(usize::MAX),
        n => Some(n - 1),
      })
      .is_ok()
  }
}

impl RawAlloc for TestAlloc {
  fn malloc(
    &self,
    size: usize,
  ) -> *mut u8 {
    self.malloc_calls.fetch_add(1, Ordering::SeqCst);
    if self.should_fail() {
      return std::ptr::null_mut();
    }
    let within_budget = self
      .budget
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(size))
      .is_ok();
    if !within_budget {
      return std::ptr::null_mut();
    }
    let ptr = LibcAlloc.malloc(size);
    if !ptr.is_null() {
      self.live.fetch_add(1, Ordering::SeqCst);
    }
    ptr
  }

  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    if self.should_fail() {
      return std::ptr::null_mut();
    }
    unsafe { LibcAlloc.realloc(ptr, size) }
  }

  unsafe fn free(
    &self,
    ptr: *mut u8,
  ) {
    self.live.fetch_sub(1, Ordering::SeqCst);
    unsafe { LibcAlloc.free(ptr) }
  }
}
