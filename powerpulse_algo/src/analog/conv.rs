// Implements the measurement conversion engine: raw counts <-> normalized Q24 <-> physical units.

// Key Features:
// - Capture parameters (resolution and full-scale range) set by the platform layer
// - Four layered normalization sets (HAPI, MEM, USR, CALIB); exactly one is active
// - Fixed-point raw -> normalized path for ISR use, float normalized -> physical path
// - Optional custom normalized <-> physical law (e.g. NTC curves)
// - Inversion applied symmetrically in both raw directions

// Detailed Operation:
// `update()` selects a normalization set and materializes the active transform
//   gain = Q24((1 + gain_c/65535) / res)
// which makes a full-scale raw span map to 1.0 in Q24. The active transform is replaced as
// a whole, so readers never observe a half-updated offset/gain pair.

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

use crate::math_integer::iq::Iq24;

/// Source of the normalization parameters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConvSrc {
    #[default]
    None,
    Hapi,  // Platform defaults
    Mem,   // Stored calibration (EEPROM)
    Usr,   // Operator supplied over CAN
    Calib, // Result of an on-board calibration
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConvError {
    /// `ConvSrc::None` cannot be activated
    InvalidSource,
    /// Capture resolution is zero
    InvalidResolution,
    /// Gain vanishes in Q24
    InvalidGain,
}

/// Capture parameters.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ConvCop {
    pub res: u32, // Measurement resolution (number of bins)
    pub fs: f32,  // Full-scale range of the physical quantity
}

/// Normalization parameters of one source.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConvNop {
    pub offset: i16, // Raw offset
    pub gain_c: i16, // Gain correction, 1 + gain_c/65535 => [0.5, 1.5]
}

/// Active raw <-> normalized transform.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConvRnt {
    pub src: ConvSrc,
    pub offset: i16,
    pub gain: Iq24,
}

/// Custom normalized <-> physical law.
pub trait PhysicalLaw {
    fn n2p(&self, norm: Iq24) -> f32;
    fn p2n(&self, phy: f32) -> Iq24;
}

/// Stored calibration records (the MEM layer).
pub trait ConvStore {
    /// Normalization data of record `index` of object `id`, if a valid record exists.
    fn load(&mut self, id: u16, index: usize) -> Option<ConvNop>;
}

/// Conversion object of one measured signal.
#[derive(Copy, Clone, Default)]
pub struct Conv {
    pub cop: ConvCop,
    pub hapi: ConvNop,
    pub mem: ConvNop,
    pub usr: ConvNop,
    pub calib: ConvNop,
    rnt: ConvRnt,
    npt: Option<&'static dyn PhysicalLaw>,
    pub invert: bool,
}

impl Conv {
    /// Conversion with capture parameters and HAPI normalization data.
    pub const fn new(res: u32, fs: f32, hapi: ConvNop) -> Self {
        Self {
            cop: ConvCop { res, fs },
            hapi,
            mem: ConvNop { offset: 0, gain_c: 0 },
            usr: ConvNop { offset: 0, gain_c: 0 },
            calib: ConvNop { offset: 0, gain_c: 0 },
            rnt: ConvRnt {
                src: ConvSrc::None,
                offset: 0,
                gain: Iq24::ZERO,
            },
            npt: None,
            invert: false,
        }
    }

    /// Installs a custom normalized <-> physical law.
    pub fn set_law(&mut self, law: &'static dyn PhysicalLaw) {
        self.npt = Some(law);
    }

    pub fn clear_law(&mut self) {
        self.npt = None;
    }

    /// Normalization set of `src`.
    pub fn nop(&self, src: ConvSrc) -> Option<&ConvNop> {
        match src {
            ConvSrc::Hapi => Some(&self.hapi),
            ConvSrc::Mem => Some(&self.mem),
            ConvSrc::Usr => Some(&self.usr),
            ConvSrc::Calib => Some(&self.calib),
            ConvSrc::None => None,
        }
    }

    pub fn nop_mut(&mut self, src: ConvSrc) -> Option<&mut ConvNop> {
        match src {
            ConvSrc::Hapi => Some(&mut self.hapi),
            ConvSrc::Mem => Some(&mut self.mem),
            ConvSrc::Usr => Some(&mut self.usr),
            ConvSrc::Calib => Some(&mut self.calib),
            ConvSrc::None => None,
        }
    }

    /// Activates the normalization set of `src`.
    pub fn update(&mut self, src: ConvSrc) -> Result<(), ConvError> {
        let nop = *self.nop(src).ok_or(ConvError::InvalidSource)?;

        if self.cop.res == 0 {
            return Err(ConvError::InvalidResolution);
        }

        let gain_c = 1.0 + nop.gain_c as f64 / 65535.0;
        let gain = Iq24::from_f32((gain_c / self.cop.res as f64) as f32);
        if gain == Iq24::ZERO {
            return Err(ConvError::InvalidGain);
        }

        self.rnt = ConvRnt {
            src,
            offset: nop.offset,
            gain,
        };
        Ok(())
    }

    /// Active transform.
    #[inline(always)]
    pub fn rnt(&self) -> ConvRnt {
        self.rnt
    }

    /// Raw counts to normalized Q24.
    #[inline(always)]
    pub fn r2n(&self, raw: u32) -> Iq24 {
        debug_assert!(self.rnt.src != ConvSrc::None);
        let raw_0 = raw as i32 - self.rnt.offset as i32;
        let norm = self.rnt.gain.mpy_i32(raw_0);
        if self.invert {
            -norm
        } else {
            norm
        }
    }

    /// Normalized Q24 to raw counts; saturates at zero and returns the offset when no
    /// transform is active.
    pub fn n2r(&self, norm: Iq24) -> u32 {
        let gain = self.rnt.gain.raw();
        if gain == 0 {
            return self.rnt.offset.max(0) as u32;
        }
        let norm = if self.invert { -norm } else { norm };
        let raw = norm.raw() as i64 / gain as i64 + self.rnt.offset as i64;
        raw.clamp(0, u32::MAX as i64) as u32
    }

    /// Normalized Q24 to physical units.
    pub fn n2p(&self, norm: Iq24) -> f32 {
        match self.npt {
            Some(law) => law.n2p(norm),
            None => norm.to_f32() * self.cop.fs,
        }
    }

    /// Physical units to normalized Q24 (zero when the full scale is not configured).
    pub fn p2n(&self, phy: f32) -> Iq24 {
        match self.npt {
            Some(law) => law.p2n(phy),
            None if self.cop.fs > 0.0 => Iq24::from_f32(phy / self.cop.fs),
            None => Iq24::ZERO,
        }
    }
}
