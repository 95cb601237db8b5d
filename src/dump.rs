//! Linear walk over the arena for diagnostics.
//!
//! Nothing here is used by allocation or deallocation.

use std::{fmt, io};

use log::{Level, debug, log_enabled};

use crate::{
  allocator::FreeListAllocator,
  arena::{Arena, FIRST_BLOCK},
  block::Block,
  region::Region,
};

/// Snapshot of one block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
  pub block: Block,
  pub size: usize,
  pub used: bool,
  pub preceding_used: bool,
  /// Free-list links, only meaningful while the block is free.
  pub next: Option<Block>,
  pub prev: Option<Block>,
}

impl fmt::Display for BlockInfo {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "{}: {} {} {}\t",
      self.block,
      self.size,
      u8::from(self.preceding_used),
      u8::from(self.used)
    )?;

    if self.used {
      write!(f, "ALLOCATED")
    } else {
      write!(
        f,
        "FREE\tnext: {:#x}, prev: {:#x}",
        Block::to_link(self.next),
        Block::to_link(self.prev)
      )
    }
  }
}

/// Blocks of an arena in address order.
pub struct Blocks<'a, R: Region> {
  arena: &'a Arena<R>,
  cursor: usize,
}

impl<R: Region> Iterator for Blocks<'_, R> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    let sentinel = self.arena.sentinel_offset();
    if self.cursor >= sentinel {
      return None;
    }

    let block = Block::at(self.cursor);
    let tags = self.arena.tags(block);

    // A zero size would loop forever on a corrupted heap.
    self.cursor = if tags.size() == 0 {
      sentinel
    } else {
      self.cursor.saturating_add(tags.size())
    };

    let (next, prev) = if tags.is_used() || tags.size() == 0 {
      (None, None)
    } else {
      (self.arena.next_free(block), self.arena.prev_free(block))
    };

    Some(BlockInfo {
      block,
      size: tags.size(),
      used: tags.is_used(),
      preceding_used: tags.preceding_used(),
      next,
      prev,
    })
  }
}

impl<R: Region> FreeListAllocator<R> {
  /// Iterates over every block between the list head and the sentinel.
  pub fn blocks(&self) -> Blocks<'_, R> {
    Blocks {
      arena: &self.arena,
      cursor: FIRST_BLOCK.offset(),
    }
  }

  /// Prints every block with its size, tag bits and, if free, its links.
  pub fn dump<W: io::Write>(
    &self,
    out: &mut W,
  ) -> io::Result<()> {
    writeln!(
      out,
      "arena {:p}, {} bytes, free list head: {:#x}",
      self.arena.region().start(),
      self.arena.len(),
      Block::to_link(self.arena.head())
    )?;

    for info in self.blocks() {
      writeln!(out, "{info}")?;
    }

    writeln!(out, "END OF HEAP")
  }

  /// Emits the [`dump`](Self::dump) listing at debug level.
  pub fn log_heap(&self) {
    if !log_enabled!(Level::Debug) {
      return;
    }

    debug!(
      "free list head: {:#x}",
      Block::to_link(self.arena.head())
    );
    for info in self.blocks() {
      debug!("{info}");
    }
  }
}
