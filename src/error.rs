use crate::block::Block;

/// The arena could not be set up or grown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
  #[error("arena exhausted: cannot extend by {requested} bytes")]
  Exhausted { requested: usize },
  #[error("arena region did not grow contiguously")]
  Discontiguous,
  #[error("allocation request of {size} bytes is too large")]
  RequestTooLarge { size: usize },
}

/// Misuse of [`free`](crate::FreeListAllocator::free) that can be detected cheaply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FreeError {
  #[error("attempted to free a null pointer")]
  Null,
  #[error("pointer {0:#x} does not belong to this arena")]
  OutOfBounds(usize),
  #[error("pointer {0:#x} is not a payload address")]
  Misaligned(usize),
  #[error("block {0} is not allocated")]
  NotAllocated(Block),
}

/// A broken heap invariant found by [`check`](crate::FreeListAllocator::check).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
  #[error("arena of {len} bytes is too small to hold a block")]
  ArenaTooSmall { len: usize },
  #[error("block {0} has an invalid size")]
  BadSize(Block),
  #[error("block {0} runs past the sentinel word")]
  Overrun(Block),
  #[error("free block {0} has a footer that differs from its header")]
  FooterMismatch(Block),
  #[error("free block {0} is adjacent to another free block")]
  Uncoalesced(Block),
  #[error("block {0} has a stale preceding-used flag")]
  PrecedingUsedMismatch(Block),
  #[error("sentinel word is not tagged used")]
  SentinelNotUsed,
  #[error("free list references {0}, which is not a free block")]
  ListEntryNotFree(Block),
  #[error("free list node {0} has a wrong back link")]
  BrokenBackLink(Block),
  #[error("free list holds {listed} blocks but the arena has {free} free blocks")]
  ListCountMismatch { listed: usize, free: usize },
}
