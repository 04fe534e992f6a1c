//! Typed handle over the global free-list pool, for container code.
//!
//! [`PoolAllocator<T>`] carries no state: every handle talks to
//! [`FreeListPool::global`], so handles of any element type are
//! interchangeable and [`rebind`](PoolAllocator::rebind) is free.
//!
//! ```rust
//! use rpool::PoolAllocator;
//!
//! let alloc = PoolAllocator::<u32>::new();
//! let ptr = alloc.allocate(4).unwrap();
//! unsafe {
//!     for i in 0..4 {
//!         alloc.construct(ptr.add(i), i as u32 * 10);
//!     }
//!     assert_eq!(*ptr.add(3).as_ptr(), 30);
//!     alloc.deallocate(ptr, 4);
//! }
//! ```

use std::{fmt, marker::PhantomData, mem, ptr::NonNull};

use crate::{
  config::FREELIST_ALIGN,
  error::{AllocError, Result},
  freelist::FreeListPool,
};

pub struct PoolAllocator<T> {
  _marker: PhantomData<fn() -> T>,
}

impl<T> PoolAllocator<T> {
  pub const fn new() -> Self {
    Self {
      _marker: PhantomData,
    }
  }

  /// The same allocator, viewed for another element type.
  pub fn rebind<U>(self) -> PoolAllocator<U> {
    PoolAllocator::new()
  }

  fn byte_size(count: usize) -> Result<usize> {
    if mem::align_of::<T>() > FREELIST_ALIGN {
      return Err(AllocError::UnsupportedAlignment {
        align: mem::align_of::<T>(),
      });
    }
    count
      .checked_mul(mem::size_of::<T>())
      .ok_or(AllocError::SizeOverflow)
  }

  /// Allocates uninitialized room for `count` elements.
  pub fn allocate(
    &self,
    count: usize,
  ) -> Result<NonNull<T>> {
    let bytes = Self::byte_size(count)?;
    if bytes == 0 {
      return Ok(NonNull::dangling());
    }
    Ok(FreeListPool::global().allocate(bytes)?.cast())
  }

  /// # Safety
  ///
  /// `ptr` must come from [`allocate`](Self::allocate) (of any rebound
  /// handle) with the same `count` and element size, and its elements must
  /// already be destroyed or trivially droppable.
  pub unsafe fn deallocate(
    &self,
    ptr: NonNull<T>,
    count: usize,
  ) {
    let bytes = mem::size_of::<T>() * count;
    if bytes > 0 {
      unsafe { FreeListPool::global().deallocate(ptr.cast(), bytes) };
    }
  }

  /// Grows or shrinks storage from `old_count` to `new_count` elements,
  /// moving the first `min(old_count, new_count)` of them.
  ///
  /// # Safety
  ///
  /// Same contract as [`deallocate`](Self::deallocate) for `ptr` and
  /// `old_count`.
  pub unsafe fn reallocate(
    &self,
    ptr: NonNull<T>,
    old_count: usize,
    new_count: usize,
  ) -> Result<NonNull<T>> {
    let old_bytes = Self::byte_size(old_count)?;
    let new_bytes = Self::byte_size(new_count)?;
    if old_bytes == 0 {
      return self.allocate(new_count);
    }
    if new_bytes == 0 {
      unsafe { self.deallocate(ptr, old_count) };
      return Ok(NonNull::dangling());
    }
    let new = unsafe { FreeListPool::global().reallocate(ptr.cast(), old_bytes, new_bytes)? };
    Ok(new.cast())
  }

  /// Moves `value` into the slot at `ptr`.
  ///
  /// # Safety
  ///
  /// `ptr` must be valid for writes and properly aligned. Whatever was in the
  /// slot is overwritten without being dropped.
  pub unsafe fn construct(
    &self,
    ptr: NonNull<T>,
    value: T,
  ) {
    unsafe { ptr.write(value) };
  }

  /// Drops the element at `ptr` in place, leaving the storage allocated.
  ///
  /// # Safety
  ///
  /// `ptr` must point to an initialized element that isn't used afterwards.
  pub unsafe fn destroy(
    &self,
    ptr: NonNull<T>,
  ) {
    unsafe { ptr.drop_in_place() };
  }
}

impl<T> Default for PoolAllocator<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Clone for PoolAllocator<T> {
  fn clone(&self) -> Self {
    *self
  }
}

impl<T> Copy for PoolAllocator<T> {}

impl<T, U> PartialEq<PoolAllocator<U>> for PoolAllocator<T> {
  fn eq(
    &self,
    _other: &PoolAllocator<U>,
  ) -> bool {
    true
  }
}

impl<T> Eq for PoolAllocator<T> {}

impl<T> fmt::Debug for PoolAllocator<T> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("PoolAllocator")
      .field("element", &std::any::type_name::<T>())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use std::{
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
  };

  use super::*;

  /// Minimal growable array that gets its storage from a `PoolAllocator`.
  struct PoolVec<T> {
    alloc: PoolAllocator<T>,
    ptr: NonNull<T>,
    len: usize,
    cap: usize,
  }

  impl<T> PoolVec<T> {
    fn new() -> Self {
      Self {
        alloc: PoolAllocator::new(),
        ptr: NonNull::dangling(),
        len: 0,
        cap: 0,
      }
    }

    fn push(
      &mut self,
      value: T,
    ) {
      if self.len == self.cap {
        let cap = (self.cap * 2).max(1);
        self.ptr = unsafe { self.alloc.reallocate(self.ptr, self.cap, cap) }.unwrap();
        self.cap = cap;
      }
      unsafe { self.alloc.construct(self.ptr.add(self.len), value) };
      self.len += 1;
    }

    fn get(
      &self,
      index: usize,
    ) -> &T {
      assert!(index < self.len);
      unsafe { self.ptr.add(index).as_ref() }
    }
  }

  impl<T> Drop for PoolVec<T> {
    fn drop(&mut self) {
      unsafe {
        for i in 0..self.len {
          self.alloc.destroy(self.ptr.add(i));
        }
        self.alloc.deallocate(self.ptr, self.cap);
      }
    }
  }

  #[test]
  fn test_vec_of_ints() {
    let mut vec = PoolVec::new();
    for i in 0..20 {
      vec.push(i);
    }
    for i in 0..20 {
      assert_eq!(*vec.get(i), i);
    }
    assert_eq!(vec.cap, 32);
  }

  #[test]
  fn test_destroy_runs_drop() {
    static DROPS: AtomicUsize = AtomicUsize::new(0);
    struct Noisy;
    impl Drop for Noisy {
      fn drop(&mut self) {
        DROPS.fetch_add(1, Ordering::SeqCst);
      }
    }

    {
      let mut vec = PoolVec::new();
      for _ in 0..5 {
        vec.push(Noisy);
      }
    }
    assert_eq!(DROPS.load(Ordering::SeqCst), 5);
  }

  #[test]
  fn test_vec_of_rc() {
    let shared = Rc::new(7);
    {
      let mut vec = PoolVec::new();
      for _ in 0..10 {
        vec.push(Rc::clone(&shared));
      }
      assert_eq!(Rc::strong_count(&shared), 11);
    }
    assert_eq!(Rc::strong_count(&shared), 1);
  }

  #[test]
  fn test_rebind_is_stateless() {
    let ints = PoolAllocator::<u32>::new();
    let bytes: PoolAllocator<u8> = ints.rebind();
    assert_eq!(ints, bytes);
    assert_eq!(mem::size_of::<PoolAllocator<u64>>(), 0);

    // Memory from one handle may be released through a rebound one.
    let ptr = ints.allocate(4).unwrap();
    unsafe { bytes.deallocate(ptr.cast(), 16) };
  }

  #[test]
  fn test_zero_sized_requests() {
    let alloc = PoolAllocator::<u64>::new();
    let ptr = alloc.allocate(0).unwrap();
    assert_eq!(ptr, NonNull::dangling());
    unsafe { alloc.deallocate(ptr, 0) };

    let unit = PoolAllocator::<()>::new();
    assert!(unit.allocate(1000).is_ok());
  }

  #[test]
  fn test_overflow_and_alignment_errors() {
    let alloc = PoolAllocator::<u64>::new();
    assert_eq!(alloc.allocate(usize::MAX), Err(AllocError::SizeOverflow));

    #[repr(align(32))]
    struct Wide;
    let wide = PoolAllocator::<Wide>::new();
    assert_eq!(
      wide.allocate(1).err(),
      Some(AllocError::UnsupportedAlignment { align: 32 })
    );
  }

  #[test]
  fn test_large_element_counts_use_raw_layer() {
    let alloc = PoolAllocator::<u64>::new();
    let ptr = alloc.allocate(100).unwrap();
    unsafe {
      for i in 0..100 {
        alloc.construct(ptr.add(i), i as u64);
      }
      assert_eq!(*ptr.add(99).as_ptr(), 99);
      alloc.deallocate(ptr, 100);
    }
  }
}
