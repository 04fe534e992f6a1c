/// Calculates the machine word alignment for the given size.
///
/// # Examples
///
/// ```rust
/// use rpool::align;
///
/// match std::mem::size_of::<usize>() {
///     8 => assert_eq!(align!(13), 16), // 64 bit machine.
///     4 => assert_eq!(align!(11), 12), // 32 bit machine.
///     _ => {},
/// };
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, ::core::mem::size_of::<usize>())
  };
}

/// Rounds `value` up to the next multiple of `align`, which must be a power
/// of two.
///
/// ```rust
/// use rpool::align_to;
///
/// assert_eq!(align_to!(17, 8), 24);
/// assert_eq!(align_to!(32, 16), 32);
/// assert_eq!(align_to!(0, 16), 0);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + ($align - 1)) & !($align - 1)
  };
}

/// Checked variant of [`align_to!`] for addresses near the top of the
/// address space.
#[inline]
pub(crate) const fn checked_align_to(
  value: usize,
  align: usize,
) -> Option<usize> {
  debug_assert!(align.is_power_of_two());
  match value.checked_add(align - 1) {
    Some(v) => Some(v & !(align - 1)),
    None => None,
  }
}
