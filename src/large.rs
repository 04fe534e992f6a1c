//! Tracking of oversized region allocations.
//!
//! Each oversized request gets its own raw allocation. The pool remembers
//! it in a [`LargeNode`] that is itself carved from the pool's small path,
//! so the list lives inside the block chain:
//!
//! ```text
//!   head ─▶ ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!           │ alloc: 0x..  │──▶│ alloc: None  │──▶│ alloc: 0x..  │──▶ None
//!           └──────────────┘   └──────────────┘   └──────────────┘
//!                                 vacant slot,
//!                                 reusable
//! ```
//!
//! Freeing a large allocation only vacates its node; the node stays linked
//! and a later oversized request may take the slot over.

use std::{mem, ptr::NonNull};

/// How many nodes from the head are searched for a vacant slot before a
/// new node is linked.
pub(crate) const LARGE_SCAN_LIMIT: usize = 4;

#[repr(C)]
pub(crate) struct LargeNode {
  next: Option<NonNull<LargeNode>>,
  alloc: Option<NonNull<u8>>,
}

pub(crate) const LARGE_NODE_SIZE: usize = mem::size_of::<LargeNode>();

pub(crate) struct LargeList {
  head: Option<NonNull<LargeNode>>,
}

impl LargeList {
  pub const fn new() -> Self {
    Self { head: None }
  }

  fn nodes(&self) -> impl Iterator<Item = NonNull<LargeNode>> + '_ {
    std::iter::successors(self.head, |node| unsafe { node.as_ref().next })
  }

  /// Parks `ptr` in a vacant node among the first [`LARGE_SCAN_LIMIT`].
  pub fn try_reuse(
    &mut self,
    ptr: NonNull<u8>,
  ) -> bool {
    for mut node in self.nodes().take(LARGE_SCAN_LIMIT) {
      let node = unsafe { node.as_mut() };
      if node.alloc.is_none() {
        node.alloc = Some(ptr);
        return true;
      }
    }
    false
  }

  /// Links a new node holding `ptr` at the head.
  ///
  /// # Safety
  ///
  /// `mem` must be valid for writes of [`LARGE_NODE_SIZE`] bytes, aligned for
  /// [`LargeNode`], and stay valid until the list is cleared.
  pub unsafe fn push(
    &mut self,
    mem: NonNull<u8>,
    ptr: NonNull<u8>,
  ) {
    let node = mem.cast::<LargeNode>();
    debug_assert!(node.is_aligned());
    unsafe {
      node.write(LargeNode {
        next: self.head,
        alloc: Some(ptr),
      });
    }
    self.head = Some(node);
  }

  /// Vacates the node holding `ptr`. Returns `false` when `ptr` isn't tracked.
  pub fn vacate(
    &mut self,
    ptr: NonNull<u8>,
  ) -> bool {
    for mut node in self.nodes() {
      let node = unsafe { node.as_mut() };
      if node.alloc == Some(ptr) {
        node.alloc = None;
        return true;
      }
    }
    false
  }

  /// Hands every held allocation to `release` and forgets all nodes.
  pub fn clear(
    &mut self,
    mut release: impl FnMut(NonNull<u8>),
  ) {
    for node in self.nodes() {
      if let Some(ptr) = unsafe { node.as_ref().alloc } {
        release(ptr);
      }
    }
    self.head = None;
  }

  pub fn contains(
    &self,
    ptr: NonNull<u8>,
  ) -> bool {
    self.nodes().any(|node| unsafe { node.as_ref().alloc } == Some(ptr))
  }

  /// Number of linked nodes, vacant ones included.
  pub fn len(&self) -> usize {
    self.nodes().count()
  }

  /// Number of nodes currently holding an allocation.
  pub fn held(&self) -> usize {
    self
      .nodes()
      .filter(|node| unsafe { node.as_ref().alloc }.is_some())
      .count()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Slots {
    nodes: Vec<LargeNode>,
    next: usize,
  }

  impl Slots {
    fn new(count: usize) -> Self {
      let nodes = (0..count)
        .map(|_| LargeNode {
          next: None,
          alloc: None,
        })
        .collect();
      Self { nodes, next: 0 }
    }

    fn take(&mut self) -> NonNull<u8> {
      let slot = NonNull::from(&mut self.nodes[self.next]).cast();
      self.next += 1;
      slot
    }
  }

  fn fake(addr: usize) -> NonNull<u8> {
    NonNull::new(std::ptr::without_provenance_mut(addr)).unwrap()
  }

  #[test]
  fn test_push_and_vacate() {
    let mut slots = Slots::new(2);
    let mut list = LargeList::new();
    unsafe {
      list.push(slots.take(), fake(0x1000));
      list.push(slots.take(), fake(0x2000));
    }
    assert_eq!(list.len(), 2);
    assert!(list.vacate(fake(0x1000)));
    assert!(!list.vacate(fake(0x1000)));
    assert!(!list.vacate(fake(0x3000)));
    assert_eq!(list.len(), 2);
    assert_eq!(list.held(), 1);
  }

  #[test]
  fn test_vacant_slot_is_reused() {
    let mut slots = Slots::new(1);
    let mut list = LargeList::new();
    unsafe { list.push(slots.take(), fake(0x1000)) };
    assert!(!list.try_reuse(fake(0x2000)));
    list.vacate(fake(0x1000));
    assert!(list.try_reuse(fake(0x2000)));
    assert!(list.contains(fake(0x2000)));
    assert_eq!(list.len(), 1);
  }

  #[test]
  fn test_reuse_scan_is_bounded() {
    let mut slots = Slots::new(LARGE_SCAN_LIMIT + 1);
    let mut list = LargeList::new();
    for i in 0..=LARGE_SCAN_LIMIT {
      unsafe { list.push(slots.take(), fake(0x1000 * (i + 1))) };
    }
    // The oldest node sits past the scan window.
    list.vacate(fake(0x1000));
    assert!(!list.try_reuse(fake(0x9000)));

    list.vacate(fake(0x1000 * (LARGE_SCAN_LIMIT + 1)));
    assert!(list.try_reuse(fake(0x9000)));
  }

  #[test]
  fn test_clear_releases_held_only() {
    let mut slots = Slots::new(3);
    let mut list = LargeList::new();
    unsafe {
      list.push(slots.take(), fake(0x1000));
      list.push(slots.take(), fake(0x2000));
      list.push(slots.take(), fake(0x3000));
    }
    list.vacate(fake(0x2000));

    let mut released = Vec::new();
    list.clear(|ptr| released.push(ptr.as_ptr().addr()));
    released.sort_unstable();
    assert_eq!(released, vec![0x1000, 0x3000]);
    assert_eq!(list.len(), 0);
  }
}
