//! Wrapping 16-bit sequence numbers.
//!
//! RTP sequence numbers, SMPTE 2022-1 FEC sequence numbers and the receiver's
//! output position all live on the same modulo 2^16 ring. Every comparison or
//! offset goes through [`SequenceNumber`] so wraparound is handled in one place.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};

/// A sequence number on the modulo 2^16 ring.
///
/// Deliberately not `Ord`: "before" and "after" only make sense within half
/// the ring (RFC 3550 appendix A.1), see [`SequenceNumber::cmp_wrapping`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNumber(u16);

impl SequenceNumber {
    /// Half of the sequence space, used for before/after decisions.
    pub const HALF_RANGE: u16 = 0x8000;

    /// Wrap a raw value.
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Raw value.
    pub const fn value(self) -> u16 {
        self.0
    }

    /// The following sequence number.
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// `self + n mod 2^16`.
    pub const fn wrapping_add(self, n: u16) -> Self {
        Self(self.0.wrapping_add(n))
    }

    /// `self - n mod 2^16`.
    pub const fn wrapping_sub(self, n: u16) -> Self {
        Self(self.0.wrapping_sub(n))
    }

    /// Forward distance from `base` to `self`, i.e. `(self - base) mod 2^16`.
    pub const fn distance_from(self, base: SequenceNumber) -> u16 {
        self.0.wrapping_sub(base.0)
    }

    /// Returns true if `self` precedes `other` by less than half the ring.
    pub fn is_before(self, other: SequenceNumber) -> bool {
        self.cmp_wrapping(other) == Ordering::Less
    }

    /// Returns true if `self` follows `other` by less than half the ring.
    pub fn is_after(self, other: SequenceNumber) -> bool {
        self.cmp_wrapping(other) == Ordering::Greater
    }

    /// Serial number comparison (RFC 1982 style).
    ///
    /// The exact half-way point is treated as "after".
    pub fn cmp_wrapping(self, other: SequenceNumber) -> Ordering {
        match self.distance_from(other) {
            0 => Ordering::Equal,
            d if d < Self::HALF_RANGE => Ordering::Greater,
            _ => Ordering::Less,
        }
    }

    /// Circular inclusive range test, see [`validity_window`].
    pub fn in_window(self, start: SequenceNumber, end: SequenceNumber) -> bool {
        validity_window(self, start, end)
    }
}

/// Returns true if `current` lies in the circular window `[start, end]`.
///
/// Two cases (window drawn as `[===]`):
///
/// ```text
/// start=6     end=9 :  0 1 2 3 4 5 [=======] 10 ... 65533 65534 65535
/// start=65534 end=1 :  ==] 2 3 4 5 6 7 8 9 10 ... 65533 [==========
/// ```
///
/// # Example
///
/// ```
/// use smpte2022_fec::rtp::{validity_window, SequenceNumber as S};
///
/// assert!(validity_window(S::new(0), S::new(65534), S::new(2)));
/// assert!(!validity_window(S::new(5), S::new(65534), S::new(2)));
/// assert!(validity_window(S::new(8), S::new(5), S::new(10)));
/// ```
pub fn validity_window(current: SequenceNumber, start: SequenceNumber, end: SequenceNumber) -> bool {
    if end.0 >= start.0 {
        start.0 <= current.0 && current.0 <= end.0
    } else {
        current.0 <= end.0 || current.0 >= start.0
    }
}

impl From<u16> for SequenceNumber {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<SequenceNumber> for u16 {
    fn from(seq: SequenceNumber) -> Self {
        seq.0
    }
}

impl Add<u16> for SequenceNumber {
    type Output = SequenceNumber;

    fn add(self, rhs: u16) -> SequenceNumber {
        self.wrapping_add(rhs)
    }
}

impl Sub<u16> for SequenceNumber {
    type Output = SequenceNumber;

    fn sub(self, rhs: u16) -> SequenceNumber {
        self.wrapping_sub(rhs)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
