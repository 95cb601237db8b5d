//! # tagalloc - An Explicit Free-List Allocator
//!
//! This crate provides a general-purpose heap allocator built on **boundary
//! tags** and an **explicit, doubly-linked free list**, managing a single
//! contiguous arena that grows in whole pages.
//!
//! ## Overview
//!
//! ```text
//!   Arena Layout:
//!
//!   ┌──────┬────────┬──────────────┬────────┬──────────────────┬──────────┐
//!   │ head │ used A │    free B    │ used C │      free D      │ sentinel │
//!   └──┬───┴────────┴──────────────┴────────┴──────────────────┴──────────┘
//!      │                   ▲                         ▲
//!      │                   │ prev          next      │
//!      └───────────────────┼─────────────────────────┘
//!                          └─────────── D ───────────┘
//!
//!   head      - first word of the arena, offset of the first free block
//!   sentinel  - last word of the arena, always tagged USED
//! ```
//!
//! Free blocks are linked in **LIFO** order: a freed block goes to the head
//! of the list and is the first candidate for the next allocation. Blocks
//! that are neighbours in memory are merged as soon as one of them is freed,
//! so two free blocks are never adjacent.
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Layout constants, tag bits, Block handle
//!   ├── region     - Region trait, ReservedRegion (mmap), ProgramBreak (sbrk)
//!   ├── arena      - Word access by offset (internal)
//!   ├── free_list  - search / insert / remove (internal)
//!   ├── allocator  - FreeListAllocator: allocate, free, coalesce, grow
//!   ├── check      - Heap consistency checker
//!   ├── dump       - Block walker and heap listing
//!   └── global     - GlobalAlloc adapter
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::{FreeListAllocator, ReservedRegion};
//!
//! let region = ReservedRegion::new(1 << 20).unwrap();
//! let mut allocator = FreeListAllocator::new(region).unwrap();
//!
//! let ptr = allocator.allocate(64).unwrap().as_ptr().cast::<u64>();
//!
//! unsafe {
//!     *ptr = 42;
//!     assert_eq!(*ptr, 42);
//!
//!     allocator.free(ptr.cast()).unwrap();
//! }
//!
//! assert!(allocator.check_consistency());
//! ```
//!
//! ## How It Works
//!
//! Every block starts with a header word holding its size and two flags in
//! the low bits. Free blocks repeat the header in their last word:
//!
//! ```text
//!   size_and_tags:
//!   ┌───────────────────────────────────────────────┐
//!   │ 63 │ 62 │  . . . .  │ 4 │ 3 │ 2 │  1  │   0   │
//!   └───────────────────────────────────────────────┘
//!     └──── block size ─────┘   └─0─┘    │      │
//!                                        │      └── USED
//!                                        └── PRECEDING_USED
//! ```
//!
//! `PRECEDING_USED` tells whether the block before this one is free. If it
//! is, the word right before this header is that block's footer, which gives
//! its size and therefore its start. This is what makes backward coalescing
//! O(1) without an address-ordered list.
//!
//! Allocation rounds the request up (header included, at least
//! [`MIN_BLOCK_SIZE`](block::MIN_BLOCK_SIZE)), takes the first large enough
//! block from the list, grows the arena by whole pages on a miss, and splits
//! off the tail when the remainder can hold a block of its own.
//!
//! ## Features
//!
//! - **Boundary tags**: O(1) merge with both neighbours
//! - **LIFO reuse**: recently freed memory is handed out first
//! - **Pluggable memory source**: any [`Region`] can back the arena
//! - **Consistency checker**: [`FreeListAllocator::check`] verifies every
//!   structural invariant
//! - **Global allocator**: [`GlobalFreeList`] implements `GlobalAlloc`
//!
//! ## Limitations
//!
//! - **Single-threaded core**: [`FreeListAllocator`] needs `&mut self`;
//!   [`GlobalFreeList`] serializes everything behind one lock
//! - **Two-word alignment**: [`GlobalFreeList`] serves stricter layouts by
//!   padding each request with its alignment
//! - **Memory is never returned** to the operating system
//! - **Unix-only**: requires `libc` (`mmap`, `sbrk`, `sysconf`)
//!
//! ## Safety
//!
//! Freeing is `unsafe`: the pointer must come from the same allocator and
//! must not be used afterwards. Null, foreign, misaligned and already-free
//! pointers are reported as [`FreeError`] when they can be recognized.
//! Running out of memory in [`FreeListAllocator::allocate`] aborts the
//! process; use [`FreeListAllocator::try_allocate`] to observe the error.

pub mod align;
mod allocator;
mod arena;
pub mod block;
mod check;
mod dump;
mod error;
mod free_list;
mod global;
pub mod region;

pub use allocator::FreeListAllocator;
pub use dump::{BlockInfo, Blocks};
pub use error::{ArenaError, CheckError, FreeError};
pub use global::GlobalFreeList;
pub use region::{ProgramBreak, Region, ReservedRegion};
