//! The buddy allocator itself.
//!
//! ```text
//!   Logical block tree (heap-order indices), S = total logical size:
//!
//!   level 0            [        index 0, size S        ]
//!                          /                    \
//!   level 1        [ idx 1, S/2 ]          [ idx 2, S/2 ]
//!                     /        \              /        \
//!   level 2    [idx3]    [idx4]        [idx5]    [idx6]
//!                ...                                 ...
//!   level L-1  leaves of size LEAF_SIZE
//!
//!   A block is tracked by exactly one of:
//!     - a bit in `split_map`   (internal node, currently divided in two)
//!     - membership in the free list for its level (currently free)
//!     - neither                (currently allocated)
//!
//!   `free_map` holds one bit per buddy *pair*: set iff exactly one sibling
//!   is free. That single read answers "is my buddy free?" on deallocate
//!   without ever touching the buddy's own storage.
//! ```
//!
//! If the caller-supplied region is not itself a power of two (after
//! alignment and trimming to a `LEAF_SIZE` boundary), the allocator pads the
//! *front* of its logical tree with a virtual prefix and marks every leaf in
//! that prefix pre-allocated before handing out a single real address. Real
//! bytes always live at the tail of the logical region.

use core::mem::{align_of, size_of};
use core::ptr::NonNull;
use core::slice;

use log::{debug, trace};

use crate::arithmetic::{
  buddy_of, first_index_at, log2_floor, next_power_of_two, parent_of, right_child_of,
  to_level_index,
};
use crate::bitmap::Bitmap;
use crate::error::BuddyAllocatorError;
use crate::freelist::FreeList;

/// Smallest block the allocator will ever hand out or split down to.
pub const LEAF_SIZE: usize = 128;

/// A tree of a single level only has a root and no buddies to speak of;
/// the allocator refuses to manage anything smaller than two levels.
pub const MIN_LEVELS: usize = 2;

#[repr(C)]
union MaxAlign {
  _int: u128,
  _ptr: *const (),
  _float: f64,
}

/// Platform-maximal alignment, the same notion C++'s `alignof(std::max_align_t)`
/// captures. Every pointer this allocator returns is aligned to this value.
pub const ALIGNMENT: usize = align_of::<MaxAlign>();

fn pair_index(index: usize) -> usize {
  (index + index % 2) / 2
}

/// Owns a single contiguous region of caller-supplied memory and services
/// power-of-two-sized allocations against it with splitting and coalescing.
///
/// Not `Sync`, not `Send` by convention of its raw-pointer bookkeeping: the
/// type has no internal synchronization at all and is meant for exclusively
/// single-threaded use (share it yourself behind a `Mutex`/`RefCell` if you
/// need to).
///
/// A default-constructed allocator manages no memory; every operation on it
/// is a safe no-op. To reset a live allocator back to that empty state while
/// handing its memory off elsewhere, use `core::mem::take`.
pub struct BuddyAllocator {
  logical_start: usize,
  logical_size: usize,
  levels_count: usize,
  free_lists: Option<NonNull<FreeList>>,
  split_map: Bitmap,
  free_map: Bitmap,
}

impl Default for BuddyAllocator {
  fn default() -> Self {
    Self {
      logical_start: 0,
      logical_size: 0,
      levels_count: 0,
      free_lists: None,
      split_map: Bitmap::empty(),
      free_map: Bitmap::empty(),
    }
  }
}

impl BuddyAllocator {
  /// Adopts `[memory, memory + size)` as the region this allocator manages.
  ///
  /// # Safety
  ///
  /// `memory` must be valid for reads and writes of `size` bytes for the
  /// entire lifetime of the returned allocator, and the caller must not
  /// touch that memory except through pointers this allocator later hands
  /// back via `allocate`.
  pub unsafe fn new(memory: *mut u8, size: usize) -> Result<Self, BuddyAllocatorError> {
    if memory.is_null() {
      return Err(BuddyAllocatorError::NullMemory);
    }

    let raw_addr = memory as usize;
    let aligned_addr = raw_addr.next_multiple_of(ALIGNMENT);
    let lost_to_alignment = aligned_addr - raw_addr;
    if lost_to_alignment >= size {
      return Err(BuddyAllocatorError::InsufficientMemory { available: 0 });
    }

    let available = size - lost_to_alignment;
    let usable = (available / LEAF_SIZE) * LEAF_SIZE;
    if usable == 0 {
      return Err(BuddyAllocatorError::InsufficientMemory { available });
    }
    let waste_tail = available - usable;

    let logical_size = next_power_of_two(usable);
    let levels_count = log2_floor(logical_size / LEAF_SIZE) + 1;
    if levels_count < MIN_LEVELS {
      return Err(BuddyAllocatorError::InsufficientMemory { available: usable });
    }

    let logical_start = aligned_addr - (logical_size - usable);

    let free_lists_bytes = levels_count * size_of::<FreeList>();
    let split_bits = (1usize << (levels_count - 1)) - 1;
    let free_bits = 1usize << (levels_count - 1);
    let split_bytes = crate::arithmetic::size_in_bytes(split_bits);
    let free_bytes = crate::arithmetic::size_in_bytes(free_bits);

    let bookkeeping_fits_in_tail = waste_tail >= split_bytes + free_bytes;
    let head_reserved = if bookkeeping_fits_in_tail {
      free_lists_bytes
    } else {
      free_lists_bytes + split_bytes + free_bytes
    };
    if head_reserved > usable {
      return Err(BuddyAllocatorError::InsufficientMemory { available: usable });
    }

    let free_lists_ptr = aligned_addr as *mut FreeList;
    let (split_ptr, free_ptr) = if bookkeeping_fits_in_tail {
      let tail_base = aligned_addr + usable;
      (tail_base as *mut u8, (tail_base + split_bytes) as *mut u8)
    } else {
      let base = aligned_addr + free_lists_bytes;
      (base as *mut u8, (base + split_bytes) as *mut u8)
    };

    unsafe {
      for i in 0..levels_count {
        core::ptr::write(free_lists_ptr.add(i), FreeList::new());
      }
    }

    let mut split_map = unsafe { Bitmap::new(split_ptr, split_bits, false) };
    let mut free_map = unsafe { Bitmap::new(free_ptr, free_bits, false) };
    free_map.flip(0);

    let mut allocator = Self {
      logical_start,
      logical_size,
      levels_count,
      free_lists: NonNull::new(free_lists_ptr),
      split_map,
      free_map,
    };

    let first_free_addr = aligned_addr + head_reserved;
    let preallocated = first_free_addr - logical_start;
    allocator.mark_preallocated(preallocated);

    debug!(
      "buddy allocator over {usable} usable bytes, {levels_count} levels, \
       {preallocated} bytes pre-allocated for bookkeeping/padding"
    );

    Ok(allocator)
  }

  fn size_at(&self, level: usize) -> usize {
    self.logical_size >> level
  }

  fn address_of(&self, index: usize, level: usize) -> usize {
    self.logical_start + to_level_index(index, level) * self.size_at(level)
  }

  fn index_of(&self, block: NonNull<u8>, level: usize) -> usize {
    let offset = (block.as_ptr() as usize - self.logical_start) / self.size_at(level);
    first_index_at(level) + offset
  }

  fn free_lists_mut(&mut self) -> &mut [FreeList] {
    let ptr = self.free_lists.expect("allocator manages no memory").as_ptr();
    unsafe { slice::from_raw_parts_mut(ptr, self.levels_count) }
  }

  fn mark_preallocated(&mut self, preallocated: usize) {
    // The free-list head array is always carved from the head of the
    // usable region (see `new`), so `preallocated` is always at least
    // `size_of::<FreeList>()` bytes -- there is no "nothing to mark" case.
    debug_assert!(preallocated > 0);

    let leaf_level = self.levels_count - 1;
    let leaf_count = crate::arithmetic::blocks_fitting(preallocated, LEAF_SIZE);
    let first_leaf = first_index_at(leaf_level);

    for offset in 0..leaf_count {
      let index = first_leaf + offset;
      if to_level_index(index, leaf_level) % 2 == 0 {
        self.free_map.flip(pair_index(index));
      }
    }

    let mut last_child = first_leaf + leaf_count - 1;
    let mut child_level = leaf_level;

    while child_level > 0 {
      let parent_level = child_level - 1;
      let last = parent_of(last_child);

      for idx in first_index_at(parent_level)..=last {
        self.split_map.flip(idx);
      }
      if to_level_index(last, parent_level) % 2 == 0 {
        self.free_map.flip(pair_index(last));
      }

      let right_child = right_child_of(last);
      if right_child > last_child {
        let addr = self.address_of(right_child, child_level);
        let block = NonNull::new(addr as *mut u8).unwrap();
        unsafe {
          self.free_lists_mut()[child_level].insert(block);
        }
      }

      last_child = last;
      child_level = parent_level;
    }
  }

  /// Returns `false` for a default-constructed (or moved-from, via
  /// `core::mem::take`) allocator.
  pub fn manages_memory(&self) -> bool {
    self.free_lists.is_some()
  }

  fn level_for_size(&self, requested: usize) -> usize {
    if requested <= LEAF_SIZE {
      self.levels_count - 1
    } else {
      log2_floor(self.logical_size / next_power_of_two(requested))
    }
  }

  /// Requests a block of at least `requested` bytes. Returns `None` if the
  /// allocator manages no memory, `requested` is zero, `requested` exceeds
  /// the total logical size, or the tree has no free block at the needed
  /// level (and none large enough to split).
  pub fn allocate(&mut self, requested: usize) -> Option<NonNull<u8>> {
    if !self.manages_memory() || requested == 0 || requested > self.logical_size {
      return None;
    }
    let level = self.level_for_size(requested);
    self.allocate_at(level)
  }

  fn allocate_at(&mut self, level: usize) -> Option<NonNull<u8>> {
    if let Some(block) = self.free_lists_mut()[level].extract() {
      let index = self.index_of(block, level);
      self.free_map.flip(pair_index(index));
      return Some(block);
    }

    if level == 0 {
      return None;
    }

    let parent_block = self.allocate_at(level - 1)?;
    let parent_index = self.index_of(parent_block, level - 1);
    self.split_map.flip(parent_index);
    trace!("split block at level {} to satisfy level {level}", level - 1);

    let sibling_addr = parent_block.as_ptr() as usize + self.size_at(level);
    let sibling = NonNull::new(sibling_addr as *mut u8).unwrap();
    unsafe {
      let lists = self.free_lists_mut();
      lists[level].insert(parent_block);
      lists[level].insert(sibling);
    }

    let block = self.free_lists_mut()[level].extract().unwrap();
    let index = self.index_of(block, level);
    self.free_map.flip(pair_index(index));
    Some(block)
  }

  fn level_for_pointer(&self, block: NonNull<u8>) -> usize {
    let leaf_level = self.levels_count - 1;
    let mut level = leaf_level;
    let mut index = self.index_of(block, level);

    while level > 0 {
      let parent = parent_of(index);
      if !self.split_map.at(parent) {
        level -= 1;
        index = parent;
      } else {
        break;
      }
    }

    level
  }

  fn free_at(&mut self, block: NonNull<u8>, level: usize) {
    let index = self.index_of(block, level);
    let pbit = pair_index(index);

    if self.free_map.at(pbit) {
      let buddy_addr = self.address_of(buddy_of(index), level);
      let buddy = NonNull::new(buddy_addr as *mut u8).unwrap();
      unsafe {
        self.free_lists_mut()[level].remove(buddy);
      }
      self.free_map.flip(pbit);

      let parent_index = parent_of(index);
      self.split_map.flip(parent_index);
      trace!("merged buddies at level {level} into parent block");

      if level > 0 {
        let parent_addr = self.address_of(parent_index, level - 1);
        let parent = NonNull::new(parent_addr as *mut u8).unwrap();
        self.free_at(parent, level - 1);
      }
    } else {
      unsafe {
        self.free_lists_mut()[level].insert(block);
      }
      self.free_map.flip(pbit);
    }
  }

  /// Releases `block`, recovering its level by walking the split bitmap
  /// from the leaf upward. A no-op if the allocator manages no memory or
  /// `block` is `None`.
  pub fn deallocate(&mut self, block: Option<NonNull<u8>>) {
    let Some(block) = block else { return };
    if !self.manages_memory() {
      return;
    }
    let level = self.level_for_pointer(block);
    self.free_at(block, level);
  }

  /// Releases `block`, a previously returned allocation of `size` bytes.
  /// Skips the level-recovery walk `deallocate` performs.
  pub fn deallocate_sized(&mut self, block: Option<NonNull<u8>>, size: usize) {
    let Some(block) = block else { return };
    if !self.manages_memory() {
      return;
    }
    let level = self.level_for_size(size);
    self.free_at(block, level);
  }

  /// Total logical size of the managed region, rounded up to a power of
  /// two. `0` for an allocator that manages no memory.
  pub fn capacity(&self) -> usize {
    self.logical_size
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::alloc::{alloc_zeroed, dealloc, Layout};

  struct Region {
    ptr: *mut u8,
    layout: Layout,
  }

  impl Region {
    fn new(size: usize) -> Self {
      let layout = Layout::from_size_align(size, ALIGNMENT).unwrap();
      let ptr = unsafe { alloc_zeroed(layout) };
      assert!(!ptr.is_null());
      Self { ptr, layout }
    }
  }

  impl Drop for Region {
    fn drop(&mut self) {
      unsafe { dealloc(self.ptr, self.layout) };
    }
  }

  #[test]
  fn default_allocator_manages_no_memory() {
    let allocator = BuddyAllocator::default();
    assert!(!allocator.manages_memory());
  }

  #[test]
  fn null_memory_is_rejected() {
    let result = unsafe { BuddyAllocator::new(core::ptr::null_mut(), 4096) };
    assert_eq!(result.unwrap_err(), BuddyAllocatorError::NullMemory);
  }

  #[test]
  fn undersized_region_is_rejected() {
    let region = Region::new(64);
    let result = unsafe { BuddyAllocator::new(region.ptr, 64) };
    assert!(matches!(
      result,
      Err(BuddyAllocatorError::InsufficientMemory { .. })
    ));
  }

  #[test]
  fn construction_over_a_clean_power_of_two_succeeds() {
    let region = Region::new(4096);
    let allocator = unsafe { BuddyAllocator::new(region.ptr, 4096) }.unwrap();
    assert!(allocator.manages_memory());
    assert_eq!(allocator.capacity(), 4096);
  }

  #[test]
  fn allocate_zero_or_oversized_returns_none() {
    let region = Region::new(4096);
    let mut allocator = unsafe { BuddyAllocator::new(region.ptr, 4096) }.unwrap();
    assert_eq!(allocator.allocate(0), None);
    assert_eq!(allocator.allocate(8192), None);
  }

  #[test]
  fn drain_then_refill_returns_the_same_address_set() {
    let region = Region::new(4096);
    let mut allocator = unsafe { BuddyAllocator::new(region.ptr, 4096) }.unwrap();

    let mut first_pass = Vec::new();
    while let Some(p) = allocator.allocate(1) {
      first_pass.push(p);
    }
    assert!(!first_pass.is_empty());

    for p in first_pass.iter().copied() {
      allocator.deallocate(Some(p));
    }

    let mut second_pass = Vec::new();
    while let Some(p) = allocator.allocate(1) {
      second_pass.push(p);
    }

    let mut a: Vec<usize> = first_pass.iter().map(|p| p.as_ptr() as usize).collect();
    let mut b: Vec<usize> = second_pass.iter().map(|p| p.as_ptr() as usize).collect();
    a.sort_unstable();
    b.sort_unstable();
    assert_eq!(a, b);
  }

  #[test]
  fn sibling_leaves_merge_back_into_a_bigger_free_block() {
    let region = Region::new(4096);
    let mut allocator = unsafe { BuddyAllocator::new(region.ptr, 4096) }.unwrap();

    // Two leaf-sized allocations, freed in the opposite order they were
    // taken, should coalesce into a free block one level up -- at worst a
    // request for that bigger size succeeds afterwards where it would
    // otherwise have forced a fresh split of some other free block.
    let leaves: Vec<_> = (0..32).filter_map(|_| allocator.allocate(LEAF_SIZE)).collect();
    assert!(leaves.len() >= 2);
    for p in leaves {
      allocator.deallocate(Some(p));
    }

    let merged = allocator.allocate(LEAF_SIZE * 2);
    assert!(merged.is_some());
  }

  #[test]
  fn sized_deallocate_matches_unhinted_deallocate() {
    let region = Region::new(4096);
    let mut allocator = unsafe { BuddyAllocator::new(region.ptr, 4096) }.unwrap();

    let p1 = allocator.allocate(200).unwrap();
    allocator.deallocate_sized(Some(p1), 200);
    let p2 = allocator.allocate(200).unwrap();
    assert_eq!(p1, p2);
  }

  #[test]
  fn deallocating_none_or_null_is_a_no_op() {
    let region = Region::new(4096);
    let mut allocator = unsafe { BuddyAllocator::new(region.ptr, 4096) }.unwrap();
    allocator.deallocate(None);
    allocator.deallocate(NonNull::new(core::ptr::null_mut()));
    assert!(allocator.manages_memory());
  }

  #[test]
  fn non_power_of_two_region_preallocates_the_front() {
    // 4095 bytes, one leaf short of a clean power of two: the first leaf
    // is unreachable and the first real allocation must land after it.
    let region = Region::new(4096);
    let shifted = unsafe { region.ptr.add(1) };
    let mut allocator = unsafe { BuddyAllocator::new(shifted, 4095) }.unwrap();

    let p = allocator.allocate(1).unwrap();
    assert!(p.as_ptr() as usize >= shifted as usize);
  }

  #[test]
  fn mem_take_resets_the_source_to_empty() {
    let region = Region::new(4096);
    let mut allocator = unsafe { BuddyAllocator::new(region.ptr, 4096) }.unwrap();
    let p = allocator.allocate(LEAF_SIZE).unwrap();

    let mut moved = core::mem::take(&mut allocator);
    assert!(!allocator.manages_memory());
    assert!(moved.manages_memory());

    moved.deallocate(Some(p));
    assert!(moved.allocate(LEAF_SIZE).is_some());
  }
}
