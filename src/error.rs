//! Error type returned by [`crate::BuddyAllocator`] construction.

use thiserror::Error;

/// Failure modes for adopting a caller-supplied memory region.
///
/// Every other operation on [`crate::BuddyAllocator`] is total: `allocate`
/// returns `None` on exhaustion rather than an error, and `deallocate` is a
/// no-op on a null pointer. Only construction can fail.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuddyAllocatorError {
  /// The memory pointer handed to the constructor was null.
  #[error("memory pointer is null")]
  NullMemory,

  /// The region, once aligned and trimmed to a leaf boundary, cannot host
  /// even the minimum two-level tree, or has no room left for bookkeeping.
  #[error("region of {available} bytes is too small to host an allocator")]
  InsufficientMemory {
    /// Usable bytes remaining after alignment and leaf trimming.
    available: usize,
  },
}
