//! Sources of raw memory for the arena.
//!
//! The allocator never talks to the operating system directly. It asks a
//! [`Region`] to extend a single contiguous range and reads the page size
//! from it to decide how much to ask for.

use std::ptr::{self, NonNull};

use libc::{c_void, intptr_t, sbrk};

use crate::{align, align_to, error::ArenaError};

/// Reservation size used by the global allocator adapter.
pub const DEFAULT_MAX_HEAP: usize = 20 * (1 << 20);

const FALLBACK_PAGE_SIZE: usize = 4096;

/// A contiguous range of memory that can only grow at its end.
pub trait Region {
  /// Extends the region by exactly `bytes` and returns the previous end.
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, ArenaError>;

  /// Granularity used to round growth requests.
  fn page_size(&self) -> usize;

  /// First byte of the region.
  fn start(&self) -> *mut u8;

  /// One past the last byte of the region.
  fn end(&self) -> *mut u8;

  fn len(&self) -> usize {
    self.end().addr() - self.start().addr()
  }

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Returns the system page size.
pub fn page_size() -> usize {
  let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

  match usize::try_from(size) {
    Ok(size) if size.is_power_of_two() => size,
    _ => FALLBACK_PAGE_SIZE,
  }
}

/// A fixed virtual reservation handed out through a simulated program break.
///
/// The whole capacity is mapped once with `mmap(MAP_NORESERVE)`, so physical
/// pages are only committed when touched. Growing past the capacity fails
/// with [`ArenaError::Exhausted`].
pub struct ReservedRegion {
  base: NonNull<u8>,
  capacity: usize,
  brk: usize,
  page_size: usize,
}

// Safety: the mapping is owned exclusively by this value.
unsafe impl Send for ReservedRegion {}

impl ReservedRegion {
  pub fn new(capacity: usize) -> Result<Self, ArenaError> {
    let page_size = page_size();

    let Some(rounded) = capacity.max(1).checked_add(page_size - 1) else {
      return Err(ArenaError::Exhausted {
        requested: capacity,
      });
    };
    let capacity = rounded & !(page_size - 1);

    let ptr = unsafe {
      libc::mmap(
        ptr::null_mut(),
        capacity,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
        -1,
        0,
      )
    };

    if ptr == libc::MAP_FAILED {
      return Err(ArenaError::Exhausted {
        requested: capacity,
      });
    }

    let base = NonNull::new(ptr.cast::<u8>()).ok_or(ArenaError::Exhausted {
      requested: capacity,
    })?;

    Ok(Self {
      base,
      capacity,
      brk: 0,
      page_size,
    })
  }

  /// Total bytes the region may ever grow to.
  pub fn capacity(&self) -> usize {
    self.capacity
  }
}

impl Drop for ReservedRegion {
  fn drop(&mut self) {
    unsafe { libc::munmap(self.base.as_ptr().cast::<c_void>(), self.capacity) };
  }
}

impl Region for ReservedRegion {
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, ArenaError> {
    let brk = self
      .brk
      .checked_add(bytes)
      .filter(|&brk| brk <= self.capacity)
      .ok_or(ArenaError::Exhausted { requested: bytes })?;

    let previous = unsafe { self.base.add(self.brk) };
    self.brk = brk;

    Ok(previous)
  }

  fn page_size(&self) -> usize {
    self.page_size
  }

  fn start(&self) -> *mut u8 {
    self.base.as_ptr()
  }

  fn end(&self) -> *mut u8 {
    unsafe { self.base.as_ptr().add(self.brk) }
  }
}

/// The process data segment, grown with `sbrk(2)`.
///
/// Any other user of `brk`/`sbrk` in the process (including the system
/// `malloc`) may move the break between two growths. That is reported as
/// [`ArenaError::Discontiguous`].
pub struct ProgramBreak {
  start: *mut u8,
  end: *mut u8,
  page_size: usize,
}

impl ProgramBreak {
  pub fn new() -> Self {
    Self {
      start: ptr::null_mut(),
      end: ptr::null_mut(),
      page_size: page_size(),
    }
  }

  /// Moves the break up to the next [`ALIGNMENT`](crate::block::ALIGNMENT)
  /// boundary and records it as the region start.
  unsafe fn claim_start(&mut self) -> Result<(), ArenaError> {
    unsafe {
      let current = sbrk(0);
      if current == usize::MAX as *mut c_void {
        return Err(ArenaError::Exhausted { requested: 0 });
      }

      let current = current.cast::<u8>();
      let padding = align!(current.addr()) - current.addr();

      if padding != 0 && sbrk(padding as intptr_t) != current.cast::<c_void>() {
        return Err(ArenaError::Discontiguous);
      }

      self.start = current.add(padding);
      self.end = self.start;
    }

    Ok(())
  }
}

impl Default for ProgramBreak {
  fn default() -> Self {
    Self::new()
  }
}

impl Region for ProgramBreak {
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, ArenaError> {
    if self.start.is_null() {
      unsafe { self.claim_start()? };
    }

    let increment =
      intptr_t::try_from(bytes).map_err(|_| ArenaError::Exhausted { requested: bytes })?;

    let previous = unsafe { sbrk(increment) };

    if previous == usize::MAX as *mut c_void {
      return Err(ArenaError::Exhausted { requested: bytes });
    }

    if previous.cast::<u8>() != self.end {
      return Err(ArenaError::Discontiguous);
    }

    self.end = unsafe { self.end.add(bytes) };

    NonNull::new(previous.cast::<u8>()).ok_or(ArenaError::Discontiguous)
  }

  fn page_size(&self) -> usize {
    self.page_size
  }

  fn start(&self) -> *mut u8 {
    self.start
  }

  fn end(&self) -> *mut u8 {
    self.end
  }
}

/// Rounds a growth request up to whole pages of `region`.
pub(crate) fn page_rounded<R: Region>(
  region: &R,
  bytes: usize,
) -> Option<usize> {
  let page = region.page_size();
  bytes.checked_add(page - 1).map(|_| align_to!(bytes, page))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{allocator::FreeListAllocator, block::ALIGNMENT};

  #[test]
  fn test_page_size() {
    let page = page_size();

    assert!(page.is_power_of_two());
    assert!(page >= 4096);
  }

  #[test]
  fn test_reserved_region_grows_contiguously() {
    let mut region = ReservedRegion::new(4 * page_size()).unwrap();

    assert!(region.is_empty());
    assert_eq!(region.start().addr() % page_size(), 0);

    let first = region.extend(48).unwrap();
    assert_eq!(first.as_ptr(), region.start());
    assert_eq!(region.len(), 48);

    let second = region.extend(4096).unwrap();
    assert_eq!(second.as_ptr().addr(), region.start().addr() + 48);
    assert_eq!(region.len(), 48 + 4096);
    assert_eq!(region.end().addr(), region.start().addr() + 48 + 4096);
  }

  #[test]
  fn test_reserved_region_exhaustion() {
    let page = page_size();
    let mut region = ReservedRegion::new(page).unwrap();

    assert_eq!(region.capacity(), page);
    assert!(region.extend(page).is_ok());
    assert_eq!(
      region.extend(1),
      Err(ArenaError::Exhausted { requested: 1 })
    );
    assert_eq!(
      region.extend(usize::MAX),
      Err(ArenaError::Exhausted {
        requested: usize::MAX
      })
    );
    assert_eq!(region.len(), page);
  }

  #[test]
  fn test_reserved_region_memory_is_writable() {
    let mut region = ReservedRegion::new(page_size()).unwrap();
    let ptr = region.extend(64).unwrap().as_ptr();

    unsafe {
      ptr::write_bytes(ptr, 0xAB, 64);
      assert_eq!(*ptr.add(63), 0xAB);
    }
  }

  #[test]
  fn test_page_rounded() {
    let region = ReservedRegion::new(page_size()).unwrap();
    let page = region.page_size();

    assert_eq!(page_rounded(&region, 1), Some(page));
    assert_eq!(page_rounded(&region, page), Some(page));
    assert_eq!(page_rounded(&region, page + 1), Some(2 * page));
    assert_eq!(page_rounded(&region, usize::MAX), None);
  }

  #[test]
  fn test_program_break_first_growth_is_aligned() {
    let mut region = ProgramBreak::new();

    match region.extend(region.page_size()) {
      Ok(previous) => {
        assert_eq!(previous.as_ptr(), region.start());
        assert_eq!(region.start().addr() % ALIGNMENT, 0);
        assert_eq!(region.len(), region.page_size());
      }
      // Another thread moved the break in between.
      Err(err) => assert_eq!(err, ArenaError::Discontiguous),
    }
  }

  #[test]
  fn test_program_break_grows_in_pages() {
    let page = page_size();

    let mut alloc = match FreeListAllocator::new(ProgramBreak::new()) {
      Ok(alloc) => alloc,
      Err(err) => {
        assert_eq!(err, ArenaError::Discontiguous);
        return;
      }
    };
    let initial = alloc.heap_size();

    // Each request outgrows the free tail, so both rounds extend the break.
    for pages in 1..=2 {
      let heap_size = alloc.heap_size();
      let size = pages * page;

      match alloc.try_allocate(size) {
        Ok(Some(ptr)) => {
          unsafe { ptr::write_bytes(ptr.as_ptr(), 0xC3, size) };

          let grown = alloc.heap_size() - heap_size;
          assert!(grown > size);
          assert_eq!(grown % page, 0);
          assert_eq!(ptr.as_ptr().addr() % ALIGNMENT, 0);
          assert_eq!(alloc.check(), Ok(()));
        }
        Ok(None) => unreachable!("non-zero request"),
        // Another thread moved the break in between.
        Err(err) => {
          assert_eq!(err, ArenaError::Discontiguous);
          return;
        }
      }
    }

    assert_eq!(alloc.heap_size() - initial, 5 * page);
  }
}
