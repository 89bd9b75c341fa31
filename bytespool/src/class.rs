//! Size-class arithmetic.
//!
//! Classes are consecutive powers of two starting at a base size: class `i`
//! holds buffers of exactly `base << i` bytes. A request of `size` bytes is
//! served from the smallest class that fits it.

/// Size of the smallest class with the default configuration (1 KiB).
pub const BASE_SIZE: usize = 1024;

/// Number of classes with the default configuration.
pub const NUM_CLASSES: usize = 18;

/// Size of the largest class with the default configuration (128 MiB).
pub const MAX_SIZE: usize = BASE_SIZE << (NUM_CLASSES - 1);

/// Builds a [core::num::NonZeroUsize], panicking if the value is zero.
///
/// Usable in `const` contexts.
#[macro_export]
macro_rules! NZUsize {
    ($val:expr) => {
        match ::core::num::NonZeroUsize::new($val) {
            Some(v) => v,
            None => panic!("value must be non-zero"),
        }
    };
}

/// Returns the index of the smallest class (starting at `base`) that can hold
/// `size` bytes.
///
/// Sizes at or below `base` map to class 0. Above it, `size` is halved
/// (rounding up) until it fits, so the result is `ceil(log2(size / base))`.
/// The result is not bounded by any class count; callers must check `size`
/// against their largest class first.
#[inline]
pub const fn bucket_index(base: usize, mut size: usize) -> usize {
    let mut index = 0;
    while size > base {
        size = size.div_ceil(2);
        index += 1;
    }
    index
}

/// Returns the buffer length of class `index`.
///
/// # Panics
///
/// Panics if `base << index` does not fit in a `usize`.
#[inline]
pub const fn class_size(base: usize, index: usize) -> usize {
    assert!(
        index < usize::BITS as usize && base.leading_zeros() as usize >= index,
        "class size overflows usize"
    );
    base << index
}

/// Returns the class a buffer of exactly `len` bytes belongs to, if any.
///
/// A length belongs to a class only if it is a power of two in
/// `[base, base << (num_classes - 1)]`.
#[inline]
pub const fn class_of_len(base: usize, num_classes: usize, len: usize) -> Option<usize> {
    let max = class_size(base, num_classes - 1);
    if len < base || len > max || !len.is_power_of_two() {
        return None;
    }
    Some(bucket_index(base, len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_default_constants() {
        assert_eq!(BASE_SIZE, 1024);
        assert_eq!(NUM_CLASSES, 18);
        assert_eq!(MAX_SIZE, 128 * 1024 * 1024);
    }

    #[test_case(0, 0; "empty")]
    #[test_case(1, 0; "one byte")]
    #[test_case(1023, 0; "just below base")]
    #[test_case(1024, 0; "exactly base")]
    #[test_case(1025, 1; "just above base")]
    #[test_case(2048, 1; "second class")]
    #[test_case(2049, 2; "just above second class")]
    #[test_case(3000, 2; "between classes")]
    #[test_case(4096, 2; "third class")]
    #[test_case(1 << 20, 10; "one mebibyte")]
    #[test_case((1 << 20) + 1, 11; "just above one mebibyte")]
    #[test_case(MAX_SIZE - 1, 17; "just below max")]
    #[test_case(MAX_SIZE, 17; "exactly max")]
    fn test_bucket_index(size: usize, expected: usize) {
        assert_eq!(bucket_index(BASE_SIZE, size), expected);
    }

    #[test]
    fn test_bucket_index_powers_of_two() {
        for k in 0..NUM_CLASSES {
            let size = BASE_SIZE << k;
            assert_eq!(bucket_index(BASE_SIZE, size), k, "size {size}");
            assert_eq!(bucket_index(BASE_SIZE, size + 1), k + 1, "size {}", size + 1);
        }
    }

    #[test]
    fn test_bucket_index_is_smallest_fitting_class() {
        let mut size = 0;
        while size <= 1 << 16 {
            let index = bucket_index(BASE_SIZE, size);
            assert!(class_size(BASE_SIZE, index) >= size);
            if index > 0 {
                assert!(class_size(BASE_SIZE, index - 1) < size);
            }
            size += 97;
        }
    }

    #[test]
    fn test_bucket_index_near_usize_max() {
        // Halving must not overflow at the top of the range.
        let index = bucket_index(BASE_SIZE, usize::MAX);
        assert_eq!(index, usize::BITS as usize - BASE_SIZE.trailing_zeros() as usize);
    }

    #[test]
    fn test_class_of_len() {
        assert_eq!(class_of_len(BASE_SIZE, NUM_CLASSES, BASE_SIZE), Some(0));
        assert_eq!(class_of_len(BASE_SIZE, NUM_CLASSES, 4096), Some(2));
        assert_eq!(class_of_len(BASE_SIZE, NUM_CLASSES, MAX_SIZE), Some(17));

        // Too small
        assert_eq!(class_of_len(BASE_SIZE, NUM_CLASSES, 0), None);
        assert_eq!(class_of_len(BASE_SIZE, NUM_CLASSES, 512), None);

        // Too large
        assert_eq!(class_of_len(BASE_SIZE, NUM_CLASSES, MAX_SIZE * 2), None);

        // Not a power of two
        assert_eq!(class_of_len(BASE_SIZE, NUM_CLASSES, 1025), None);
        assert_eq!(class_of_len(BASE_SIZE, NUM_CLASSES, 3 * 1024), None);
    }

    #[test]
    fn test_class_size_largest_fitting() {
        let top = BASE_SIZE.leading_zeros() as usize;
        assert_eq!(class_size(BASE_SIZE, top), 1 << (usize::BITS - 1));
    }

    #[test]
    #[should_panic(expected = "class size overflows usize")]
    fn test_class_size_value_overflow() {
        class_size(BASE_SIZE, BASE_SIZE.leading_zeros() as usize + 1);
    }

    #[test]
    #[should_panic(expected = "class size overflows usize")]
    fn test_class_size_shift_past_width() {
        class_size(1, 70);
    }

    #[test]
    fn test_nzusize_macro() {
        const N: core::num::NonZeroUsize = NZUsize!(42);
        assert_eq!(N.get(), 42);
    }

    #[test]
    #[should_panic(expected = "value must be non-zero")]
    fn test_nzusize_macro_zero() {
        let zero = 0;
        let _ = NZUsize!(zero);
    }
}
