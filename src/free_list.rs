//! Explicit doubly-linked list of free blocks.
//!
//! Blocks are pushed at the head (LIFO) and searched head-first, so the most
//! recently freed block that fits is reused first. List order says nothing
//! about address order.
//!
//! All three operations assume their argument is a well-formed free block;
//! `remove` additionally assumes it is currently linked.

use crate::{arena::Arena, block::Block, region::Region};

impl<R: Region> Arena<R> {
  /// First block in list order whose size is at least `min_size`.
  pub(crate) fn search(
    &self,
    min_size: usize,
  ) -> Option<Block> {
    let mut cursor = self.head();

    while let Some(block) = cursor {
      if self.tags(block).size() >= min_size {
        return Some(block);
      }
      cursor = self.next_free(block);
    }

    None
  }

  /// Pushes `block` at the head of the list.
  pub(crate) fn insert(
    &mut self,
    block: Block,
  ) {
    let old_head = self.head();

    self.set_next_free(block, old_head);
    if let Some(old_head) = old_head {
      self.set_prev_free(old_head, Some(block));
    }
    self.set_prev_free(block, None);
    self.set_head(Some(block));
  }

  /// Unlinks `block` from the list.
  pub(crate) fn remove(
    &mut self,
    block: Block,
  ) {
    let next = self.next_free(block);
    let prev = self.prev_free(block);

    if let Some(next) = next {
      self.set_prev_free(next, prev);
    }

    // The head is a bare link in the arena, not a list node.
    if self.head() == Some(block) {
      self.set_head(next);
    } else if let Some(prev) = prev {
      self.set_next_free(prev, next);
    }
  }

  /// Walks the list from the head.
  pub(crate) fn free_list(&self) -> FreeList<'_, R> {
    FreeList {
      arena: self,
      cursor: self.head(),
    }
  }
}

pub(crate) struct FreeList<'a, R: Region> {
  arena: &'a Arena<R>,
  cursor: Option<Block>,
}

impl<R: Region> Iterator for FreeList<'_, R> {
  type Item = Block;

  fn next(&mut self) -> Option<Block> {
    let block = self.cursor?;
    self.cursor = self.arena.next_free(block);
    Some(block)
  }
}
