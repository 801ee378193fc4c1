// Implements the Q24 fixed-point number used across the measurement pipeline.

// Key Features:
// - 32-bit signed storage with 24 fractional bits (range -128.0 .. +128.0)
// - Multiplication through a 64-bit intermediate, checked for overflow in debug builds
// - Float conversion for slow paths and coefficient setup
// - `verify()` compares a materialized Q24 value with its float source (relative tolerance)

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Q24 fixed-point value.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Iq24(i32);

impl Iq24 {
    pub const SHIFT: u32 = 24;
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(1 << Self::SHIFT);
    pub const MAX: Self = Self(i32::MAX);
    pub const MIN: Self = Self(i32::MIN);

    const SCALE: f64 = (1u32 << Self::SHIFT) as f64; // 16777216.0

    /// Wraps a raw Q24 word.
    #[inline(always)]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Raw Q24 word.
    #[inline(always)]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Converts a float, truncating toward zero and saturating at the range limits.
    #[inline(always)]
    pub fn from_f32(value: f32) -> Self {
        Self((value as f64 * Self::SCALE) as i32)
    }

    #[inline(always)]
    pub fn to_f32(self) -> f32 {
        (self.0 as f64 / Self::SCALE) as f32
    }

    /// Q24 x Q24 multiply.
    #[inline(always)]
    pub fn mpy(self, other: Self) -> Self {
        let prod = (self.0 as i64 * other.0 as i64) >> Self::SHIFT;
        debug_assert!(prod >= i32::MIN as i64 && prod <= i32::MAX as i64);
        Self(prod as i32)
    }

    /// Q24 x integer multiply, the result stays in Q24.
    #[inline(always)]
    pub fn mpy_i32(self, value: i32) -> Self {
        let prod = self.0 as i64 * value as i64;
        debug_assert!(prod >= i32::MIN as i64 && prod <= i32::MAX as i64);
        Self(prod as i32)
    }

    /// Q24 / Q24 division, returns `None` on a zero divisor.
    pub fn div(self, other: Self) -> Option<Self> {
        if other.0 == 0 {
            return None;
        }
        let quot = ((self.0 as i64) << Self::SHIFT) / other.0 as i64;
        Some(Self(quot.clamp(i32::MIN as i64, i32::MAX as i64) as i32))
    }

    /// Square root of a non-negative Q24 value (negative inputs yield zero).
    pub fn sqrt(self) -> Self {
        if self.0 <= 0 {
            return Self::ZERO;
        }
        Self::from_f32(libm::sqrtf(self.to_f32()))
    }

    #[inline(always)]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    #[inline(always)]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    #[inline(always)]
    pub const fn abs(self) -> Self {
        Self(self.0.saturating_abs())
    }

    /// Checks that the fixed-point value represents `reference` within the relative `tolerance`.
    ///
    /// A zero reference only accepts an exact zero. This is the gate used after every
    /// coefficient materialization.
    pub fn verify(self, reference: f32, tolerance: f32) -> bool {
        let value = self.to_f32();
        if reference == 0.0 {
            return self.0 == 0;
        }
        if !reference.is_finite() {
            return false;
        }
        libm::fabsf((value - reference) / reference) <= tolerance
    }
}

impl Add for Iq24 {
    type Output = Self;

    #[inline(always)]
    fn add(self, other: Self) -> Self {
        Self(self.0.wrapping_add(other.0))
    }
}

impl AddAssign for Iq24 {
    #[inline(always)]
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Sub for Iq24 {
    type Output = Self;

    #[inline(always)]
    fn sub(self, other: Self) -> Self {
        Self(self.0.wrapping_sub(other.0))
    }
}

impl SubAssign for Iq24 {
    #[inline(always)]
    fn sub_assign(&mut self, other: Self) {
        *self = *self - other;
    }
}

impl Neg for Iq24 {
    type Output = Self;

    #[inline(always)]
    fn neg(self) -> Self {
        Self(self.0.wrapping_neg())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_conversion() {
        assert_eq!(Iq24::from_f32(0.25).raw(), 0x0040_0000);
        assert_eq!(Iq24::from_f32(-1.0).raw(), -0x0100_0000);
        assert_eq!(Iq24::ONE.to_f32(), 1.0);
        assert!((Iq24::from_f32(0.123).to_f32() - 0.123).abs() < 1e-6);

        // Out of range values saturate
        assert_eq!(Iq24::from_f32(1000.0), Iq24::MAX);
        assert_eq!(Iq24::from_f32(-1000.0), Iq24::MIN);
    }

    #[test]
    fn test_mpy() {
        let a = Iq24::from_f32(0.5);
        let b = Iq24::from_f32(-0.25);
        assert_eq!(a.mpy(b), Iq24::from_f32(-0.125));
        assert_eq!(Iq24::from_raw(4096).mpy_i32(1024), Iq24::from_f32(0.25));
    }

    #[test]
    fn test_div_and_sqrt() {
        let a = Iq24::from_f32(0.5);
        assert_eq!(a.div(Iq24::from_f32(2.0)), Some(Iq24::from_f32(0.25)));
        assert_eq!(a.div(Iq24::ZERO), None);

        let r = Iq24::from_f32(0.25).sqrt().to_f32();
        assert!((r - 0.5).abs() < 1e-5);
        assert_eq!(Iq24::from_f32(-0.25).sqrt(), Iq24::ZERO);
    }

    #[test]
    fn test_verify() {
        assert!(Iq24::from_f32(0.3).verify(0.3, 0.01));
        assert!(!Iq24::from_f32(0.3).verify(0.31, 0.01));
        assert!(Iq24::ZERO.verify(0.0, 0.01));

        // Tiny coefficients lose too much precision in Q24
        let tiny = 1.0e-7;
        assert!(!Iq24::from_f32(tiny).verify(tiny, 0.01));
    }
}
