//! 16-bit link sequence numbers with modular ordering.
//!
//! Sequence numbers wrap, so plain integer comparison is meaningless across
//! the wrap point. Ordering is defined over the shortest distance on the
//! 65536-element ring: `a` is less than `b` when `b` lies within the half
//! window ahead of `a`. At exactly half the ring apart the numerically larger
//! value is treated as the earlier one, which keeps `less` antisymmetric for
//! every pair of distinct values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

const HALF_WINDOW: u16 = 1 << 15;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeqNo(u16);

impl SeqNo {
    /// Largest representable sequence number.
    pub const MAX: u16 = u16::MAX;

    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u16 {
        self.0
    }

    /// Strict modular "earlier than".
    pub fn less(self, other: SeqNo) -> bool {
        let distance = other.0.wrapping_sub(self.0);
        distance != 0
            && (distance < HALF_WINDOW || (distance == HALF_WINDOW && self.0 > other.0))
    }

    pub fn less_eq(self, other: SeqNo) -> bool {
        self == other || self.less(other)
    }

    /// Strict modular "later than".
    pub fn more(self, other: SeqNo) -> bool {
        other.less(self)
    }

    /// The earlier of two sequence numbers under modular ordering.
    pub fn earliest(self, other: SeqNo) -> SeqNo {
        if other.less(self) {
            other
        } else {
            self
        }
    }
}

impl Add<u16> for SeqNo {
    type Output = SeqNo;

    fn add(self, rhs: u16) -> SeqNo {
        SeqNo(self.0.wrapping_add(rhs))
    }
}

impl Sub<u16> for SeqNo {
    type Output = SeqNo;

    fn sub(self, rhs: u16) -> SeqNo {
        SeqNo(self.0.wrapping_sub(rhs))
    }
}

impl From<u16> for SeqNo {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
