/// Rounds the given size up to the allocator's alignment unit,
/// [`ALIGNMENT`](crate::block::ALIGNMENT).
///
/// # Examples
///
/// ```rust
/// use tagalloc::{align, block::ALIGNMENT};
///
/// assert_eq!(align!(1), ALIGNMENT);
/// assert_eq!(align!(ALIGNMENT), ALIGNMENT);
/// assert_eq!(align!(ALIGNMENT + 1), 2 * ALIGNMENT);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::block::ALIGNMENT)
  };
}

/// Rounds `value` up to the next multiple of `unit`, which must be a power of two.
///
/// ```rust
/// use tagalloc::align_to;
///
/// assert_eq!(align_to!(1, 4096), 4096);
/// assert_eq!(align_to!(4096, 4096), 4096);
/// assert_eq!(align_to!(4097, 4096), 8192);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $unit:expr) => {
    ($value + $unit - 1) & !($unit - 1)
  };
}
