use crate::types::SequenceNumber;

/// Sequence numbers live in a 31-bit space; the top bit of the wire field is
/// reserved for the new-generation hint.
pub const SEQUENCE_MASK: SequenceNumber = 0x7FFF_FFFF;
const HALF_RANGE: SequenceNumber = 1 << 30;
const FULL_RANGE: i64 = 1 << 31;

/// Returns the sequence number following `s`, wrapping inside the 31-bit space
pub fn next_sequence(s: SequenceNumber) -> SequenceNumber {
    s.wrapping_add(1) & SEQUENCE_MASK
}

/// Returns whether or not a wrapping sequence number is greater than another
/// sequence_greater_than(2,1) will return true
/// sequence_greater_than(1,2) will return false
/// sequence_greater_than(1,1) will return false
pub fn sequence_greater_than(s1: SequenceNumber, s2: SequenceNumber) -> bool {
    let s1 = s1 & SEQUENCE_MASK;
    let s2 = s2 & SEQUENCE_MASK;
    ((s1 > s2) && (s1 - s2 <= HALF_RANGE)) || ((s1 < s2) && (s2 - s1 > HALF_RANGE))
}

/// Returns whether or not a wrapping sequence number is less than another
/// sequence_less_than(1,2) will return true
/// sequence_less_than(2,1) will return false
/// sequence_less_than(1,1) will return false
pub fn sequence_less_than(s1: SequenceNumber, s2: SequenceNumber) -> bool {
    sequence_greater_than(s2, s1)
}

/// Retrieves the wrapping difference `b - a` between 2 sequence numbers.
///
/// # Examples
/// ```
/// # use actorfabric_shared::wrapping_diff;
/// assert_eq!(wrapping_diff(1, 2), 1);
/// assert_eq!(wrapping_diff(2, 1), -1);
/// assert_eq!(wrapping_diff(0x7FFF_FFFF, 0), 1);
/// assert_eq!(wrapping_diff(0, 0x7FFF_FFFF), -1);
/// ```
pub fn wrapping_diff(a: SequenceNumber, b: SequenceNumber) -> i32 {
    let raw = i64::from(b.wrapping_sub(a) & SEQUENCE_MASK);
    if raw > i64::from(HALF_RANGE) {
        (raw - FULL_RANGE) as i32
    } else {
        raw as i32
    }
}

#[cfg(test)]
mod sequence_compare_tests {
    use super::{next_sequence, sequence_greater_than, sequence_less_than, SEQUENCE_MASK};

    #[test]
    fn greater_is_greater() {
        assert!(sequence_greater_than(2, 1));
    }

    #[test]
    fn greater_is_not_equal() {
        assert!(!sequence_greater_than(2, 2));
    }

    #[test]
    fn greater_is_not_less() {
        assert!(!sequence_greater_than(1, 2));
    }

    #[test]
    fn less_is_less() {
        assert!(sequence_less_than(1, 2));
    }

    #[test]
    fn less_is_not_equal() {
        assert!(!sequence_less_than(2, 2));
    }

    #[test]
    fn less_is_not_greater() {
        assert!(!sequence_less_than(2, 1));
    }

    #[test]
    fn greater_across_wrap() {
        assert!(sequence_greater_than(0, SEQUENCE_MASK));
        assert!(sequence_greater_than(3, SEQUENCE_MASK - 3));
    }

    #[test]
    fn next_wraps_to_zero() {
        assert_eq!(next_sequence(SEQUENCE_MASK), 0);
        assert_eq!(next_sequence(41), 42);
    }

    #[test]
    fn generation_bit_is_ignored() {
        assert!(sequence_greater_than(0x8000_0002, 1));
    }
}

#[cfg(test)]
mod wrapping_diff_tests {
    use super::{wrapping_diff, SEQUENCE_MASK};

    #[test]
    fn simple() {
        assert_eq!(wrapping_diff(10, 12), 2);
    }

    #[test]
    fn simple_backwards() {
        assert_eq!(wrapping_diff(12, 10), -2);
    }

    #[test]
    fn max_wrap() {
        let a = SEQUENCE_MASK;
        let b = 1;

        assert_eq!(wrapping_diff(a, b), 2);
    }

    #[test]
    fn min_wrap_backwards() {
        let a = 1;
        let b = SEQUENCE_MASK;

        assert_eq!(wrapping_diff(a, b), -2);
    }

    #[test]
    fn medium_wrap() {
        let diff: u32 = (1 << 30) - 5;
        let a: u32 = SEQUENCE_MASK - 2;
        let b: u32 = a.wrapping_add(diff) & SEQUENCE_MASK;

        assert_eq!(wrapping_diff(a, b), diff as i32);
        assert_eq!(wrapping_diff(b, a), -(diff as i32));
    }
}
