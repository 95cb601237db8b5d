//! Heap consistency checker.

use std::collections::BTreeSet;

use log::warn;

use crate::{
  allocator::FreeListAllocator,
  arena::FIRST_BLOCK,
  block::{Block, MIN_BLOCK_SIZE, Tags, WORD_SIZE},
  error::CheckError,
  region::Region,
};

impl<R: Region> FreeListAllocator<R> {
  /// Walks the whole arena and the free list and reports the first broken
  /// invariant.
  ///
  /// Verified: blocks tile the arena exactly up to the sentinel, every free
  /// block has a matching footer, no two free blocks are adjacent, every
  /// preceding-used flag matches its neighbour, the sentinel is tagged used,
  /// and the free list holds exactly the free blocks, each once, with
  /// consistent back links.
  pub fn check(&self) -> Result<(), CheckError> {
    let arena = &self.arena;

    let len = arena.len();
    if len < 2 * WORD_SIZE + MIN_BLOCK_SIZE {
      return Err(CheckError::ArenaTooSmall { len });
    }

    let sentinel = arena.sentinel_offset();
    let mut free = BTreeSet::new();
    let mut preceding_used = true;
    let mut block = FIRST_BLOCK;

    while block.offset() < sentinel {
      let tags = arena.tags(block);
      let size = tags.size();

      if size < MIN_BLOCK_SIZE {
        return Err(CheckError::BadSize(block));
      }
      if block.offset().checked_add(size).is_none_or(|end| end > sentinel) {
        return Err(CheckError::Overrun(block));
      }
      if tags.preceding_used() != preceding_used {
        return Err(CheckError::PrecedingUsedMismatch(block));
      }

      if !tags.is_used() {
        if !preceding_used {
          return Err(CheckError::Uncoalesced(block));
        }
        if arena.word(block.footer_offset(size)) != tags.bits() {
          return Err(CheckError::FooterMismatch(block));
        }
        free.insert(block);
      }

      preceding_used = tags.is_used();
      block = block.following(size);
    }

    let sentinel_tags = Tags::from_bits(arena.word(sentinel));
    if !sentinel_tags.is_used() {
      return Err(CheckError::SentinelNotUsed);
    }
    if sentinel_tags.preceding_used() != preceding_used {
      return Err(CheckError::PrecedingUsedMismatch(Block::at(sentinel)));
    }

    let mut listed = 0;
    let mut prev = None;
    let mut cursor = arena.head();

    while let Some(node) = cursor {
      if !free.contains(&node) {
        return Err(CheckError::ListEntryNotFree(node));
      }
      if arena.prev_free(node) != prev {
        return Err(CheckError::BrokenBackLink(node));
      }

      listed += 1;
      // More entries than free blocks means a cycle.
      if listed > free.len() {
        break;
      }

      prev = Some(node);
      cursor = arena.next_free(node);
    }

    if listed != free.len() {
      return Err(CheckError::ListCountMismatch {
        listed,
        free: free.len(),
      });
    }

    Ok(())
  }

  /// [`check`](Self::check) as a boolean, logging the violation if any.
  pub fn check_consistency(&self) -> bool {
    match self.check() {
      Ok(()) => true,
      Err(err) => {
        warn!("heap inconsistent: {err}");
        false
      }
    }
  }
}
