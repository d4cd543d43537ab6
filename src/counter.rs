//! Saturating counters.
//!
//! Every bounded statistic kept on a session is a [`Counter`]. Incrementing a
//! counter that already holds its width's maximum value leaves it unchanged,
//! so counters are monotonically non-decreasing and never wrap.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer widths usable as counter storage.
pub trait CounterWidth: Copy + Default + Ord + fmt::Debug + fmt::Display {
    const MAX: Self;

    fn checked_add(self, rhs: Self) -> Option<Self>;

    fn one() -> Self;
}

macro_rules! counter_width {
    ($($t:ty),*) => {
        $(
            impl CounterWidth for $t {
                const MAX: Self = <$t>::MAX;

                #[inline]
                fn checked_add(self, rhs: Self) -> Option<Self> {
                    <$t>::checked_add(self, rhs)
                }

                #[inline]
                fn one() -> Self {
                    1
                }
            }
        )*
    };
}

counter_width!(u8, u16, u32, u64);

/// A counter that saturates at `T::MAX` instead of overflowing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Counter<T: CounterWidth>(T);

impl<T: CounterWidth> Counter<T> {
    pub fn new() -> Self {
        Self(T::default())
    }

    /// Adds one. A no-op once the counter holds `T::MAX`.
    #[inline]
    pub fn incr(&mut self) {
        self.add(T::one());
    }

    /// Adds `n`. If the sum is not representable the counter is left as is.
    #[inline]
    pub fn add(&mut self, n: T) {
        if let Some(v) = self.0.checked_add(n) {
            self.0 = v;
        }
    }

    /// Adds one when `cond` holds.
    #[inline]
    pub fn incr_if(&mut self, cond: bool) {
        if cond {
            self.incr();
        }
    }

    #[inline]
    pub fn get(&self) -> T {
        self.0
    }

    pub fn is_saturated(&self) -> bool {
        self.0 == T::MAX
    }
}

impl<T: CounterWidth> fmt::Display for Counter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<T: CounterWidth> From<T> for Counter<T> {
    fn from(v: T) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_stops_at_max() {
        let mut c: Counter<u8> = Counter::new();
        for _ in 0..1000 {
            c.incr();
        }
        assert_eq!(c.get(), u8::MAX);
        assert!(c.is_saturated());
    }

    #[test]
    fn test_counter_u16_exact_max_after_excess_increments() {
        let mut c: Counter<u16> = Counter::new();
        let n = u16::MAX as u32 + 10;
        let mut previous = 0u16;
        for _ in 0..n {
            c.incr();
            assert!(c.get() >= previous);
            previous = c.get();
        }
        assert_eq!(c.get(), u16::MAX);
    }

    #[test]
    fn test_add_that_would_overflow_is_noop() {
        let mut c = Counter::from(u32::MAX - 1);
        c.add(5);
        assert_eq!(c.get(), u32::MAX - 1);
        c.incr();
        assert_eq!(c.get(), u32::MAX);
        c.incr();
        assert_eq!(c.get(), u32::MAX);
    }

    #[test]
    fn test_incr_if() {
        let mut c: Counter<u32> = Counter::new();
        c.incr_if(false);
        c.incr_if(true);
        assert_eq!(c.get(), 1);
    }
}
