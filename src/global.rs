//! [`GlobalAlloc`] adapter.
//!
//! The allocator itself is single-threaded. Here the whole arena sits behind
//! one spin lock, so allocation and deallocation from different threads are
//! serialized.
//!
//! The arena is built with [`FreeListAllocator::new_quiet`], so nothing is
//! logged while the lock is held and a logger that allocates cannot re-enter
//! it. The only record, a rejected `dealloc`, is emitted after unlocking.

use std::{
  alloc::{GlobalAlloc, Layout},
  ptr::{self, NonNull},
};

use log::warn;
use spin::Mutex;

use crate::{
  allocator::FreeListAllocator,
  block::ALIGNMENT,
  region::{DEFAULT_MAX_HEAP, ReservedRegion},
};

/// A lazily initialized, lock-protected [`FreeListAllocator`].
///
/// ```rust,ignore
/// #[global_allocator]
/// static ALLOCATOR: tagalloc::GlobalFreeList = tagalloc::GlobalFreeList::new();
/// ```
///
/// Layouts aligned up to [`ALIGNMENT`] map straight onto arena blocks.
/// Stricter layouts are padded and record their block in the word before the
/// returned pointer.
pub struct GlobalFreeList {
  heap: Mutex<Option<FreeListAllocator<ReservedRegion>>>,
  capacity: usize,
}

impl GlobalFreeList {
  /// Reserves [`DEFAULT_MAX_HEAP`] bytes on first use.
  pub const fn new() -> Self {
    Self::with_capacity(DEFAULT_MAX_HEAP)
  }

  /// Reserves `capacity` bytes on first use.
  pub const fn with_capacity(capacity: usize) -> Self {
    Self {
      heap: Mutex::new(None),
      capacity,
    }
  }

  fn with_heap<T>(
    &self,
    f: impl FnOnce(&mut FreeListAllocator<ReservedRegion>) -> T,
  ) -> Option<T> {
    let mut heap = self.heap.lock();

    if heap.is_none() {
      *heap = ReservedRegion::new(self.capacity)
        .and_then(FreeListAllocator::new_quiet)
        .ok();
    }

    (*heap).as_mut().map(f)
  }

  fn allocate(
    &self,
    size: usize,
  ) -> *mut u8 {
    self
      .with_heap(|heap| heap.try_allocate(size))
      .and_then(|result| result.ok().flatten())
      .map_or(ptr::null_mut(), NonNull::as_ptr)
  }
}

impl Default for GlobalFreeList {
  fn default() -> Self {
    Self::new()
  }
}

unsafe impl GlobalAlloc for GlobalFreeList {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    let size = layout.size().max(1);
    let align = layout.align();

    if align <= ALIGNMENT {
      return self.allocate(size);
    }

    // Pad by `align` and keep the payload address one word below the aligned
    // pointer. Payloads are `ALIGNMENT`-aligned, so that word is inside the block.
    let Some(padded) = size.checked_add(align) else {
      return ptr::null_mut();
    };

    let payload = self.allocate(padded);
    if payload.is_null() {
      return payload;
    }

    unsafe {
      let aligned = payload.add(align - payload.addr() % align);
      aligned.cast::<*mut u8>().sub(1).write(payload);
      aligned
    }
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
  ) {
    let result = {
      let mut heap = self.heap.lock();

      // A heap that was never created owns no pointer.
      let Some(heap) = (*heap).as_mut() else {
        return;
      };

      let payload = if layout.align() > ALIGNMENT {
        unsafe { ptr.cast::<*mut u8>().sub(1).read() }
      } else {
        ptr
      };

      unsafe { heap.free(payload) }
    };

    if let Err(err) = result {
      warn!("dealloc ignored: {err}");
    }
  }
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;

  use log::{LevelFilter, Log, Metadata, Record};

  use super::*;

  thread_local! {
    static RECORDS: Cell<usize> = const { Cell::new(0) };
  }

  /// Target of [`AllocatingLogger`]'s own allocations.
  static LOGGER_HEAP: GlobalFreeList = GlobalFreeList::with_capacity(1 << 20);

  /// Counts records per thread and allocates from [`LOGGER_HEAP`] for each one.
  struct AllocatingLogger;

  impl Log for AllocatingLogger {
    fn enabled(
      &self,
      _metadata: &Metadata,
    ) -> bool {
      true
    }

    fn log(
      &self,
      _record: &Record,
    ) {
      let layout = Layout::new::<[u64; 4]>();
      unsafe {
        let ptr = LOGGER_HEAP.alloc(layout);
        assert!(!ptr.is_null());
        LOGGER_HEAP.dealloc(ptr, layout);
      }

      RECORDS.set(RECORDS.get() + 1);
    }

    fn flush(&self) {}
  }

  static LOGGER: AllocatingLogger = AllocatingLogger;

  fn install_logger() {
    // Another test may have installed it already.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Trace);
  }

  fn records() -> usize {
    RECORDS.get()
  }

  #[test]
  fn test_alloc_and_dealloc() {
    let allocator = GlobalFreeList::with_capacity(1 << 20);
    let layout = Layout::new::<u64>();

    unsafe {
      let ptr = allocator.alloc(layout).cast::<u64>();
      assert!(!ptr.is_null());

      *ptr = 3;
      assert_eq!(*ptr, 3);

      allocator.dealloc(ptr.cast(), layout);

      let again = allocator.alloc(layout).cast::<u64>();
      assert_eq!(again, ptr);
      allocator.dealloc(again.cast(), layout);
    }

    assert_eq!(allocator.with_heap(|heap| heap.check()), Some(Ok(())));
  }

  #[test]
  fn test_zero_sized_layout_gets_a_pointer() {
    let allocator = GlobalFreeList::with_capacity(1 << 20);
    let layout = Layout::from_size_align(0, 1).unwrap();

    unsafe {
      let ptr = allocator.alloc(layout);
      assert!(!ptr.is_null());
      allocator.dealloc(ptr, layout);
    }
  }

  #[test]
  fn test_over_aligned_layouts_are_padded() {
    let allocator = GlobalFreeList::with_capacity(1 << 20);

    for align in [4 * ALIGNMENT, 128, 4096] {
      let layout = Layout::from_size_align(100, align).unwrap();

      unsafe {
        let ptr = allocator.alloc(layout);
        assert!(!ptr.is_null());
        assert_eq!(ptr.addr() % align, 0, "align {align}");

        ptr::write_bytes(ptr, 0x77, layout.size());
        assert_eq!(allocator.with_heap(|heap| heap.check()), Some(Ok(())));

        allocator.dealloc(ptr, layout);
      }
    }

    assert_eq!(allocator.with_heap(|heap| heap.free_blocks()), Some(1));
    assert_eq!(allocator.with_heap(|heap| heap.check()), Some(Ok(())));
  }

  #[test]
  fn test_over_aligned_realloc_keeps_alignment() {
    let allocator = GlobalFreeList::with_capacity(1 << 20);
    let layout = Layout::from_size_align(32, 256).unwrap();

    unsafe {
      let ptr = allocator.alloc(layout);
      ptr::write_bytes(ptr, 0x42, 32);

      let grown = allocator.realloc(ptr, layout, 3000);
      assert_eq!(grown.addr() % 256, 0);
      assert!((0..32).all(|i| *grown.add(i) == 0x42));

      allocator.dealloc(grown, Layout::from_size_align(3000, 256).unwrap());
    }

    assert_eq!(allocator.with_heap(|heap| heap.free_blocks()), Some(1));
  }

  #[test]
  fn test_realloc_preserves_contents() {
    let allocator = GlobalFreeList::with_capacity(1 << 20);
    let layout = Layout::array::<u16>(8).unwrap();

    unsafe {
      let ptr = allocator.alloc(layout).cast::<u16>();
      for i in 0..8 {
        ptr.add(i).write(i as u16 + 1);
      }

      let grown = allocator.realloc(ptr.cast(), layout, 4096).cast::<u16>();
      assert!(!grown.is_null());
      for i in 0..8 {
        assert_eq!(grown.add(i).read(), i as u16 + 1);
      }

      allocator.dealloc(grown.cast(), Layout::from_size_align(4096, layout.align()).unwrap());
    }

    assert_eq!(allocator.with_heap(|heap| heap.free_blocks()), Some(1));
  }

  #[test]
  fn test_exhaustion_returns_null() {
    let allocator = GlobalFreeList::with_capacity(1 << 16);
    let layout = Layout::from_size_align(1 << 20, 8).unwrap();

    assert!(unsafe { allocator.alloc(layout) }.is_null());
  }

  #[test]
  fn test_shared_between_threads() {
    static ALLOCATOR: GlobalFreeList = GlobalFreeList::with_capacity(4 << 20);

    let handles: Vec<_> = (0..4u8)
      .map(|id| {
        std::thread::spawn(move || {
          let layout = Layout::array::<u8>(48).unwrap();
          for _ in 0..200 {
            unsafe {
              let ptr = ALLOCATOR.alloc(layout);
              ptr::write_bytes(ptr, id, 48);
              assert!((0..48).all(|i| *ptr.add(i) == id));
              ALLOCATOR.dealloc(ptr, layout);
            }
          }
        })
      })
      .collect();

    for handle in handles {
      handle.join().unwrap();
    }

    assert_eq!(ALLOCATOR.with_heap(|heap| heap.check()), Some(Ok(())));
  }

  #[test]
  fn test_two_word_alignment_is_served() {
    let allocator = GlobalFreeList::with_capacity(1 << 20);
    let layout = Layout::from_size_align(64, ALIGNMENT).unwrap();

    unsafe {
      let ptrs: Vec<_> = (0..16).map(|_| allocator.alloc(layout)).collect();

      for &ptr in &ptrs {
        assert!(!ptr.is_null());
        assert_eq!(ptr.addr() % layout.align(), 0);
        ptr::write_bytes(ptr, 0xEE, layout.size());
      }
      for ptr in ptrs {
        allocator.dealloc(ptr, layout);
      }
    }

    assert_eq!(allocator.with_heap(|heap| heap.check()), Some(Ok(())));
  }

  #[test]
  fn test_dealloc_before_first_alloc_leaves_heap_uncreated() {
    let allocator = GlobalFreeList::with_capacity(1 << 20);
    let mut local = 0u64;

    unsafe { allocator.dealloc((&raw mut local).cast(), Layout::new::<u64>()) };

    assert!(allocator.heap.lock().is_none());
  }

  #[test]
  fn test_adapter_never_logs_under_lock() {
    install_logger();
    let allocator = GlobalFreeList::with_capacity(1 << 20);
    let layout = Layout::array::<u8>(5000).unwrap();

    let before = records();
    unsafe {
      let ptr = allocator.alloc(layout);
      assert!(!ptr.is_null());
      allocator.dealloc(ptr, layout);
    }
    assert_eq!(records(), before);

    // A rejected pointer is reported, and the logger may allocate from the
    // same adapter without spinning on its lock.
    let layout = Layout::new::<u64>();
    let mut local = 0u64;
    unsafe {
      let live = LOGGER_HEAP.alloc(layout);
      LOGGER_HEAP.dealloc((&raw mut local).cast(), layout);
      LOGGER_HEAP.dealloc(live, layout);
    }
    assert_eq!(records(), before + 1);
  }

  #[test]
  fn test_plain_allocator_still_logs() {
    install_logger();
    let before = records();

    let mut heap = FreeListAllocator::new(ReservedRegion::new(1 << 20).unwrap()).unwrap();
    let ptr = heap.allocate(64).unwrap();
    unsafe { heap.free(ptr.as_ptr()).unwrap() };

    assert!(records() > before);
  }
}
