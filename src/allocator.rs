use std::ptr::NonNull;

use log::{debug, error, trace};

use crate::{
  align,
  arena::{Arena, FIRST_BLOCK},
  block::{ALIGNMENT, Block, MIN_BLOCK_SIZE, TAG_USED, Tags, WORD_SIZE},
  error::{ArenaError, FreeError},
  region::{Region, page_rounded},
};

/// Explicit free-list allocator with boundary tags and eager coalescing.
///
/// All state lives inside the arena: word `0` holds the free-list head, the
/// last word is a sentinel tagged used, and everything in between is a
/// sequence of blocks.
pub struct FreeListAllocator<R: Region> {
  pub(crate) arena: Arena<R>,
  logging: bool,
}

impl<R: Region> FreeListAllocator<R> {
  /// Takes a fresh, empty `region` and lays out an arena holding a single
  /// minimum-sized free block.
  pub fn new(region: R) -> Result<Self, ArenaError> {
    Self::init(region, true)
  }

  /// Like [`new`](Self::new), but the allocator never emits log records.
  ///
  /// Used where a logger that allocates would re-enter the allocator.
  pub fn new_quiet(region: R) -> Result<Self, ArenaError> {
    Self::init(region, false)
  }

  fn init(
    mut region: R,
    logging: bool,
  ) -> Result<Self, ArenaError> {
    let init_size = WORD_SIZE + MIN_BLOCK_SIZE + WORD_SIZE;

    let start = region.extend(init_size)?;
    if start.as_ptr() != region.start() {
      return Err(ArenaError::Discontiguous);
    }

    let mut arena = Arena::new(region);

    let tags = Tags::new(MIN_BLOCK_SIZE, false, true);
    arena.set_tags(FIRST_BLOCK, tags);
    arena.set_footer(FIRST_BLOCK, tags);
    arena.set_next_free(FIRST_BLOCK, None);
    arena.set_prev_free(FIRST_BLOCK, None);

    let sentinel = arena.sentinel_offset();
    arena.set_word(sentinel, TAG_USED);
    arena.set_head(Some(FIRST_BLOCK));

    if logging {
      debug!("arena initialized at {:p} with {init_size} bytes", start);
    }

    Ok(Self { arena, logging })
  }

  /// Block size needed to serve a payload of `size` bytes.
  fn request_size(size: usize) -> Result<usize, ArenaError> {
    let size = size
      .checked_add(WORD_SIZE)
      .filter(|&size| size <= isize::MAX as usize - ALIGNMENT)
      .ok_or(ArenaError::RequestTooLarge { size })?;

    if size <= MIN_BLOCK_SIZE {
      Ok(MIN_BLOCK_SIZE)
    } else {
      Ok(align!(size))
    }
  }

  /// Allocates `size` bytes, reporting arena exhaustion as an error.
  ///
  /// Returns `Ok(None)` for a zero-sized request without touching the arena.
  pub fn try_allocate(
    &mut self,
    size: usize,
  ) -> Result<Option<NonNull<u8>>, ArenaError> {
    if size == 0 {
      return Ok(None);
    }

    let req_size = Self::request_size(size)?;

    let block = match self.arena.search(req_size) {
      Some(block) => block,
      None => self.grow(req_size)?,
    };

    let tags = self.arena.tags(block);
    let block_size = tags.size();

    self.arena.remove(block);

    if block_size >= req_size + MIN_BLOCK_SIZE {
      self
        .arena
        .set_tags(block, Tags::new(req_size, true, tags.preceding_used()));

      let rest = block.following(req_size);
      let rest_tags = Tags::new(block_size - req_size, false, true);
      self.arena.set_tags(rest, rest_tags);
      self.arena.set_footer(rest, rest_tags);
      self.arena.insert(rest);
    } else {
      let following = block.following(block_size);
      let following_tags = self.arena.tags(following);
      self
        .arena
        .set_tags(following, following_tags.with_preceding_used(true));
      self.arena.set_tags(block, tags.with_used(true));
    }

    if self.logging {
      trace!(
        "allocate({size}) -> block {block} of {} bytes",
        self.arena.tags(block).size()
      );
    }

    Ok(Some(self.arena.payload(block)))
  }

  /// Allocates `size` bytes. Returns `None` only for `size == 0`.
  ///
  /// Running out of memory is unrecoverable: the process is aborted.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Option<NonNull<u8>> {
    match self.try_allocate(size) {
      Ok(ptr) => ptr,
      Err(err) => {
        error!("allocate({size}) failed: {err}");
        std::process::abort();
      }
    }
  }

  /// Returns the block behind `ptr` to the free list and merges it with its
  /// free neighbours.
  ///
  /// Null pointers, pointers outside the arena, misaligned pointers and blocks
  /// not tagged used are rejected without touching the arena.
  ///
  /// # Safety
  ///
  /// `ptr` must have been returned by [`allocate`](Self::allocate) or
  /// [`try_allocate`](Self::try_allocate) on this allocator and must not be
  /// used afterwards.
  pub unsafe fn free(
    &mut self,
    ptr: *mut u8,
  ) -> Result<(), FreeError> {
    let block = self.arena.block_of(ptr)?;
    let tags = self.arena.tags(block);
    let size = tags.size();

    let sentinel = self.arena.sentinel_offset();
    if !tags.is_used()
      || size < MIN_BLOCK_SIZE
      || block.offset().checked_add(size).is_none_or(|end| end > sentinel)
    {
      return Err(FreeError::NotAllocated(block));
    }

    let following = block.following(size);
    let following_tags = self.arena.tags(following);
    self
      .arena
      .set_tags(following, following_tags.with_preceding_used(false));

    let freed = tags.with_used(false);
    self.arena.set_tags(block, freed);
    self.arena.set_footer(block, freed);

    self.arena.insert(block);
    let merged = self.coalesce(block);

    if self.logging {
      trace!("free({ptr:p}) -> block {merged} of {} bytes", self.arena.tags(merged).size());
    }

    Ok(())
  }

  /// Merges `block`, which must be free and linked, with every free block
  /// adjacent to it in memory. Returns the block that now covers it.
  fn coalesce(
    &mut self,
    block: Block,
  ) -> Block {
    let old_size = self.arena.tags(block).size();
    let mut new_size = old_size;

    let mut cursor = block;
    while !self.arena.tags(cursor).preceding_used() {
      let size = self.arena.preceding_footer(cursor).size();
      let preceding = Block::at(cursor.offset() - size);

      self.arena.remove(preceding);
      new_size += size;
      cursor = preceding;
    }
    let merged = cursor;

    let mut cursor = block.following(old_size);
    loop {
      let tags = self.arena.tags(cursor);
      if tags.is_used() {
        break;
      }

      self.arena.remove(cursor);
      new_size += tags.size();
      cursor = cursor.following(tags.size());
    }

    if new_size == old_size {
      return block;
    }

    self.arena.remove(block);

    // Anything before the merged range must be used, or it would have been absorbed.
    let tags = Tags::new(new_size, false, true);
    self.arena.set_tags(merged, tags);
    self.arena.set_footer(merged, tags);
    self.arena.insert(merged);

    if self.logging {
      debug!("coalesced block {block} into {merged} of {new_size} bytes");
    }

    merged
  }

  /// Extends the arena by whole pages covering `req_size` and returns the
  /// free block holding the new space.
  fn grow(
    &mut self,
    req_size: usize,
  ) -> Result<Block, ArenaError> {
    let total = page_rounded(self.arena.region(), req_size)
      .ok_or(ArenaError::RequestTooLarge { size: req_size })?;

    self.arena.region_mut().extend(total)?;

    // The new block starts at the previous sentinel word.
    let block = Block::at(self.arena.sentinel_offset() - total);
    let inherited = self.arena.tags(block).preceding_used();

    let tags = Tags::new(total, false, inherited);
    self.arena.set_tags(block, tags);
    self.arena.set_footer(block, tags);

    let sentinel = self.arena.sentinel_offset();
    self.arena.set_word(sentinel, TAG_USED);

    self.arena.insert(block);

    if self.logging {
      debug!(
        "arena grew by {total} bytes to {} bytes",
        self.arena.len()
      );
    }

    Ok(self.coalesce(block))
  }

  /// The region backing the arena.
  pub fn region(&self) -> &R {
    self.arena.region()
  }

  /// Current arena size in bytes, including the head and sentinel words.
  pub fn heap_size(&self) -> usize {
    self.arena.len()
  }

  /// Total size of all free blocks, headers and footers included.
  pub fn free_bytes(&self) -> usize {
    self
      .arena
      .free_list()
      .map(|block| self.arena.tags(block).size())
      .sum()
  }

  /// Number of blocks on the free list.
  pub fn free_blocks(&self) -> usize {
    self.arena.free_list().count()
  }
}
