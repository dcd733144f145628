//! # buddy_allocator - A Caller-Memory Buddy Allocator
//!
//! This crate manages a single contiguous region of memory supplied by the
//! caller and services variable-size allocation requests against it using
//! the **buddy system**: blocks are always a power of two in size, split in
//! half when a smaller block is needed, and merged back with their sibling
//! ("buddy") as soon as both halves are free again.
//!
//! ## Overview
//!
//! ```text
//!   Buddy Allocator Concept:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                    CALLER-SUPPLIED MEMORY                           │
//!   │                                                                      │
//!   │   ┌───────────────────────────────┬──────────────────────────────┐  │
//!   │   │          allocated            │            free              │  │
//!   │   └───────────────────────────────┴──────────────────────────────┘  │
//!   │                                                                      │
//!   │   allocate(n) splits a free block in half until it reaches the      │
//!   │   smallest power-of-two size that still fits n, handing back one    │
//!   │   half and keeping the other free.                                  │
//!   │                                                                      │
//!   │   deallocate(p) checks whether p's buddy is also free; if so, the    │
//!   │   two merge back into the parent block and the check repeats one    │
//!   │   level up.                                                         │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   buddy_allocator
//!   ├── arithmetic  - power-of-two / binary-tree index helpers
//!   ├── bitmap      - dense bit-packed flags over caller-owned bytes
//!   ├── freelist    - intrusive doubly linked free list (in-band links)
//!   ├── error       - BuddyAllocatorError
//!   └── buddy       - BuddyAllocator implementation
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use core::ptr::NonNull;
//! use buddy_allocator::BuddyAllocator;
//!
//! fn main() {
//!     let mut backing = vec![0u8; 4096];
//!     let mut allocator = unsafe {
//!         BuddyAllocator::new(backing.as_mut_ptr(), backing.len())
//!     }.expect("region too small");
//!
//!     let block = allocator.allocate(200).expect("out of memory");
//!     unsafe { *block.as_ptr() = 42; }
//!
//!     allocator.deallocate(Some(block));
//! }
//! ```
//!
//! ## How It Works
//!
//! The managed region is treated as the root of a complete binary tree of
//! power-of-two blocks. No header is ever written next to an allocation:
//! a free block's size is implicit in which level's free list it sits on,
//! and a block's size at deallocation time is recovered either from the
//! caller (the sized overload) or by walking a bitmap of "is this ancestor
//! currently split" bits:
//!
//! ```text
//!   level 0            [            whole region            ]
//!                          /                          \
//!   level 1        [ left half ]                [ right half ]
//!                     /      \                      /      \
//!   level 2      [ .. ]    [ .. ]              [ .. ]    [ .. ]
//! ```
//!
//! Free lists are intrusive: a free block's own first two pointer-sized
//! words hold the `prev`/`next` links for its level's list, so the
//! allocator's bookkeeping footprint does not grow with the number of free
//! blocks, only with the depth of the tree.
//!
//! ## Features
//!
//! - **No per-block header**: free/split state lives in two compact
//!   bitmaps, not next to the user's data.
//! - **Zero extra allocation**: every byte of bookkeeping is carved out of
//!   the region the caller handed over.
//! - **O(log n) allocate/deallocate**: bounded by tree depth, not by the
//!   number of outstanding allocations.
//! - **Movable, not copyable**: ownership of a region transfers cleanly;
//!   `core::mem::take` resets the source to "manages no memory".
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no internal synchronization; wrap in a
//!   `Mutex` yourself to share across threads.
//! - **Buddy-only placement**: no first-fit/best-fit policy, no size
//!   classes smaller than a power of two.
//! - **Fixed region**: the allocator never grows; it manages exactly the
//!   bytes it was constructed with.
//!
//! ## Safety
//!
//! Constructing an allocator is `unsafe`: the caller vouches for the
//! memory's validity and exclusive ownership for the allocator's lifetime.
//! `allocate`/`deallocate` themselves are safe, but using a pointer after
//! deallocating it, or deallocating a pointer this allocator never
//! returned, are contract violations this crate does not try to detect.

#![cfg_attr(not(test), no_std)]

pub mod arithmetic;
mod bitmap;
pub mod error;
mod freelist;
mod buddy;

pub use buddy::{BuddyAllocator, ALIGNMENT, LEAF_SIZE, MIN_LEVELS};
pub use error::BuddyAllocatorError;
