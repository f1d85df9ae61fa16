//! Overflow-checked arithmetic for offset computations.
//!
//! Header fields are attacker-controlled, so every derived offset goes
//! through these helpers instead of plain `+`/`*`.

use crate::error::{BufferErrc, Result};
use std::fmt;

/// Check whether `a + b` fits in the type.
#[inline(always)]
pub fn is_sum_safe<T: SafeInt>(a: T, b: T) -> bool {
    a.checked_add_(b).is_some()
}

/// `a + b`, failing with `IntegerOverflow` instead of wrapping.
#[inline(always)]
pub fn checked_add<T: SafeInt>(a: T, b: T) -> Result<T> {
    a.checked_add_(b)
        .ok_or_else(|| BufferErrc::IntegerOverflow.into())
}

/// `a * b`, failing with `IntegerOverflow` instead of wrapping.
#[inline(always)]
pub fn checked_mul<T: SafeInt>(a: T, b: T) -> Result<T> {
    a.checked_mul_(b)
        .ok_or_else(|| BufferErrc::IntegerOverflow.into())
}

/// Check if a value is aligned to the size of `A`.
#[inline(always)]
pub fn is_aligned<A>(value: u64) -> bool {
    value % std::mem::size_of::<A>() as u64 == 0
}

#[inline(always)]
pub fn is_power_of_2(value: u64) -> bool {
    value != 0 && value & (value - 1) == 0
}

/// Align a value up to the specified alignment.
///
/// Returns `None` when the aligned value does not fit. An alignment of zero
/// leaves the value untouched.
#[inline(always)]
pub fn align_up(value: u32, alignment: u32) -> Option<u32> {
    if alignment == 0 {
        return Some(value);
    }
    let rem = value % alignment;
    if rem == 0 {
        Some(value)
    } else {
        value.checked_add(alignment - rem)
    }
}

#[inline(always)]
pub fn align_down(value: u32, alignment: u32) -> u32 {
    if alignment == 0 {
        value
    } else {
        value - value % alignment
    }
}

/// Unsigned integer types usable with the checked helpers.
pub trait SafeInt: Copy + Ord + fmt::Debug {
    fn checked_add_(self, rhs: Self) -> Option<Self>;
    fn checked_mul_(self, rhs: Self) -> Option<Self>;
}

macro_rules! impl_safe_int {
    ($($t:ty),*) => {
        $(
            impl SafeInt for $t {
                #[inline(always)]
                fn checked_add_(self, rhs: Self) -> Option<Self> {
                    self.checked_add(rhs)
                }

                #[inline(always)]
                fn checked_mul_(self, rhs: Self) -> Option<Self> {
                    self.checked_mul(rhs)
                }
            }
        )*
    };
}

impl_safe_int!(u8, u16, u32, u64, usize);

/// Accumulator that refuses to wrap.
///
/// ```
/// use peimage::math::SafeUint;
///
/// let mut pos = SafeUint::new(0x1000usize);
/// pos.add(0x20usize).unwrap();
/// assert_eq!(pos.value(), 0x1020);
/// assert!(SafeUint::new(usize::MAX).add(1usize).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct SafeUint<T: SafeInt> {
    value: T,
}

impl<T: SafeInt> SafeUint<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }

    pub fn value(&self) -> T {
        self.value
    }

    /// Add `rhs` in place. Accepts any unsigned value that converts
    /// losslessly into `T`.
    pub fn add<U>(&mut self, rhs: U) -> Result<&mut Self>
    where
        T: TryFrom<U>,
    {
        let rhs = T::try_from(rhs).map_err(|_| BufferErrc::IntegerOverflow)?;
        self.value = checked_add(self.value, rhs)?;
        Ok(self)
    }

    pub fn mul<U>(&mut self, rhs: U) -> Result<&mut Self>
    where
        T: TryFrom<U>,
    {
        let rhs = T::try_from(rhs).map_err(|_| BufferErrc::IntegerOverflow)?;
        self.value = checked_mul(self.value, rhs)?;
        Ok(self)
    }
}

/// Lossless `u64 -> usize` conversion, failing on 32-bit hosts for values
/// that do not fit.
#[inline(always)]
pub fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| BufferErrc::IntegerOverflow.into())
}
