//! Block layout and boundary-tag encoding.
//!
//! ```text
//!   Free block:                         Used block:
//!   ┌──────────────────────┐            ┌──────────────────────┐
//!   │ size | tags (header) │            │ size | tags (header) │
//!   ├──────────────────────┤            ├──────────────────────┤
//!   │ next free (offset)   │            │                      │ <- payload
//!   ├──────────────────────┤            │                      │
//!   │ prev free (offset)   │            │   payload + padding  │
//!   ├──────────────────────┤            │                      │
//!   │        ...           │            │                      │
//!   ├──────────────────────┤            │                      │
//!   │ size | tags (footer) │            │                      │
//!   └──────────────────────┘            └──────────────────────┘
//! ```

use std::{fmt, mem};

/// Size of a machine word. Headers, footers and links are one word each.
pub const WORD_SIZE: usize = mem::size_of::<usize>();

/// Alignment of every block size and every returned payload address.
///
/// Two words, the same guarantee the system `malloc` gives.
pub const ALIGNMENT: usize = 2 * WORD_SIZE;

/// Header, two free-list links and the footer.
pub const MIN_BLOCK_SIZE: usize = 4 * WORD_SIZE;

/// The block itself is occupied.
pub const TAG_USED: usize = 1;

/// The block immediately before this one in memory is occupied.
pub const TAG_PRECEDING_USED: usize = 2;

pub(crate) const NEXT_OFFSET: usize = WORD_SIZE;
pub(crate) const PREV_OFFSET: usize = 2 * WORD_SIZE;

const TAG_MASK: usize = ALIGNMENT - 1;

const _: () = assert!(ALIGNMENT.is_power_of_two());
const _: () = assert!(ALIGNMENT >= 4);
const _: () = assert!(TAG_USED | TAG_PRECEDING_USED <= TAG_MASK);
const _: () = assert!(MIN_BLOCK_SIZE % ALIGNMENT == 0);
// The first block starts one word in, so its payload lands on `ALIGNMENT`.
const _: () = assert!((WORD_SIZE + WORD_SIZE) % ALIGNMENT == 0);

/// Extracts the block size from a header or footer word.
#[inline]
pub const fn size_of(tags: usize) -> usize {
  tags & !TAG_MASK
}

/// Typed view of a header or footer word.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Tags(usize);

impl Tags {
  #[inline]
  pub const fn from_bits(bits: usize) -> Self {
    Self(bits)
  }

  /// Builds a tag word for a block of `size` bytes. `size` must be aligned.
  #[inline]
  pub const fn new(
    size: usize,
    used: bool,
    preceding_used: bool,
  ) -> Self {
    debug_assert!(size & TAG_MASK == 0);

    let mut bits = size;
    if used {
      bits |= TAG_USED;
    }
    if preceding_used {
      bits |= TAG_PRECEDING_USED;
    }
    Self(bits)
  }

  #[inline]
  pub const fn bits(self) -> usize {
    self.0
  }

  #[inline]
  pub const fn size(self) -> usize {
    size_of(self.0)
  }

  #[inline]
  pub const fn is_used(self) -> bool {
    self.0 & TAG_USED != 0
  }

  #[inline]
  pub const fn preceding_used(self) -> bool {
    self.0 & TAG_PRECEDING_USED != 0
  }

  #[inline]
  pub const fn with_used(
    self,
    used: bool,
  ) -> Self {
    if used { Self(self.0 | TAG_USED) } else { Self(self.0 & !TAG_USED) }
  }

  #[inline]
  pub const fn with_preceding_used(
    self,
    preceding_used: bool,
  ) -> Self {
    if preceding_used {
      Self(self.0 | TAG_PRECEDING_USED)
    } else {
      Self(self.0 & !TAG_PRECEDING_USED)
    }
  }
}

impl fmt::Debug for Tags {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("Tags")
      .field("size", &self.size())
      .field("used", &self.is_used())
      .field("preceding_used", &self.preceding_used())
      .finish()
  }
}

/// A block, identified by the byte offset of its header from the arena start.
///
/// Offset `0` holds the free-list head and is never a block, so it doubles
/// as the null link inside the arena.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Block(usize);

impl Block {
  #[inline]
  pub(crate) const fn at(offset: usize) -> Self {
    Self(offset)
  }

  /// Decodes a link word.
  #[inline]
  pub(crate) const fn from_link(link: usize) -> Option<Self> {
    if link == 0 { None } else { Some(Self(link)) }
  }

  /// Encodes an optional block as a link word.
  #[inline]
  pub(crate) const fn to_link(block: Option<Self>) -> usize {
    match block {
      Some(block) => block.0,
      None => 0,
    }
  }

  /// Byte offset of the header from the arena start.
  #[inline]
  pub const fn offset(self) -> usize {
    self.0
  }

  /// Byte offset of the payload handed out to callers.
  #[inline]
  pub const fn payload_offset(self) -> usize {
    self.0 + WORD_SIZE
  }

  /// The block starting `size` bytes after this one.
  #[inline]
  pub(crate) const fn following(
    self,
    size: usize,
  ) -> Self {
    Self(self.0 + size)
  }

  /// Offset of the footer of this block when it is `size` bytes long.
  #[inline]
  pub(crate) const fn footer_offset(
    self,
    size: usize,
  ) -> usize {
    self.0 + size - WORD_SIZE
  }
}

impl fmt::Display for Block {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "{:#x}", self.0)
  }
}
