//! Word-level access to the managed region by byte offset.
//!
//! ```text
//!   offset 0    WORD_SIZE                                len - WORD_SIZE
//!   ┌──────────┬──────────────────┬─────┬──────────────┬──────────┐
//!   │ list head│     block        │ ... │    block     │ sentinel │
//!   └──────────┴──────────────────┴─────┴──────────────┴──────────┘
//! ```
//!
//! Every access is bounds-checked against the current region length, so a
//! corrupted size or link panics instead of reading outside the arena.

use std::ptr::NonNull;

use crate::{
  block::{ALIGNMENT, Block, NEXT_OFFSET, PREV_OFFSET, Tags, WORD_SIZE},
  error::FreeError,
  region::Region,
};

const HEAD_OFFSET: usize = 0;

/// Offset of the first block in any arena.
pub(crate) const FIRST_BLOCK: Block = Block::at(WORD_SIZE);

pub struct Arena<R: Region> {
  region: R,
}

impl<R: Region> Arena<R> {
  pub(crate) fn new(region: R) -> Self {
    Self { region }
  }

  pub fn region(&self) -> &R {
    &self.region
  }

  pub(crate) fn region_mut(&mut self) -> &mut R {
    &mut self.region
  }

  /// Current size of the arena in bytes, reserved words included.
  pub fn len(&self) -> usize {
    self.region.len()
  }

  /// Offset of the always-used word past the last block.
  pub(crate) fn sentinel_offset(&self) -> usize {
    self.len() - WORD_SIZE
  }

  #[inline]
  fn check_word(
    &self,
    offset: usize,
  ) {
    assert!(
      offset % WORD_SIZE == 0
        && offset
          .checked_add(WORD_SIZE)
          .is_some_and(|end| end <= self.len()),
      "word {offset:#x} lies outside the arena of {} bytes",
      self.len()
    );
  }

  #[inline]
  pub(crate) fn word(
    &self,
    offset: usize,
  ) -> usize {
    self.check_word(offset);
    unsafe { self.region.start().add(offset).cast::<usize>().read() }
  }

  #[inline]
  pub(crate) fn set_word(
    &mut self,
    offset: usize,
    value: usize,
  ) {
    self.check_word(offset);
    unsafe { self.region.start().add(offset).cast::<usize>().write(value) }
  }

  #[inline]
  pub(crate) fn tags(
    &self,
    block: Block,
  ) -> Tags {
    Tags::from_bits(self.word(block.offset()))
  }

  #[inline]
  pub(crate) fn set_tags(
    &mut self,
    block: Block,
    tags: Tags,
  ) {
    self.set_word(block.offset(), tags.bits());
  }

  /// Writes `tags` into the boundary tag of `block`, located by `tags.size()`.
  #[inline]
  pub(crate) fn set_footer(
    &mut self,
    block: Block,
    tags: Tags,
  ) {
    self.set_word(block.footer_offset(tags.size()), tags.bits());
  }

  /// Reads the boundary tag sitting one word before `block`.
  #[inline]
  pub(crate) fn preceding_footer(
    &self,
    block: Block,
  ) -> Tags {
    Tags::from_bits(self.word(block.offset() - WORD_SIZE))
  }

  pub(crate) fn head(&self) -> Option<Block> {
    Block::from_link(self.word(HEAD_OFFSET))
  }

  pub(crate) fn set_head(
    &mut self,
    head: Option<Block>,
  ) {
    self.set_word(HEAD_OFFSET, Block::to_link(head));
  }

  pub(crate) fn next_free(
    &self,
    block: Block,
  ) -> Option<Block> {
    Block::from_link(self.word(block.offset() + NEXT_OFFSET))
  }

  pub(crate) fn set_next_free(
    &mut self,
    block: Block,
    next: Option<Block>,
  ) {
    self.set_word(block.offset() + NEXT_OFFSET, Block::to_link(next));
  }

  pub(crate) fn prev_free(
    &self,
    block: Block,
  ) -> Option<Block> {
    Block::from_link(self.word(block.offset() + PREV_OFFSET))
  }

  pub(crate) fn set_prev_free(
    &mut self,
    block: Block,
    prev: Option<Block>,
  ) {
    self.set_word(block.offset() + PREV_OFFSET, Block::to_link(prev));
  }

  /// Address of the payload of `block`.
  pub(crate) fn payload(
    &self,
    block: Block,
  ) -> NonNull<u8> {
    let offset = block.payload_offset();
    assert!(offset < self.len());

    // Safety: the region is non-empty, so its start is non-null.
    unsafe { NonNull::new_unchecked(self.region.start().add(offset)) }
  }

  /// Recovers the block owning a payload address handed out by [`payload`](Self::payload).
  pub(crate) fn block_of(
    &self,
    ptr: *mut u8,
  ) -> Result<Block, FreeError> {
    if ptr.is_null() {
      return Err(FreeError::Null);
    }

    let addr = ptr.addr();
    let start = self.region.start().addr();

    let offset = match addr.checked_sub(start) {
      Some(offset) if offset >= FIRST_BLOCK.payload_offset() && offset < self.sentinel_offset() => {
        offset
      }
      _ => return Err(FreeError::OutOfBounds(addr)),
    };

    if addr % ALIGNMENT != 0 || offset % WORD_SIZE != 0 {
      return Err(FreeError::Misaligned(addr));
    }

    Ok(Block::at(offset - WORD_SIZE))
  }
}
