// Implements non-recursive Q24 filters: a slew-rate limiter and a moving average.

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

use crate::math_integer::fifo_buffer::BufferFIFO;
use crate::math_integer::iq::Iq24;

/// Filter response.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FirType {
    #[default]
    None,
    /// Rate limiter. Requires TS and rate.
    Rlim,
    /// Moving average. Requires size (2..=N).
    Mav,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct FirUsr {
    pub ts: f32,     // Sample time (s)
    pub rate: f32,   // Rate of change (1/s, in normalized units)
    pub size: usize, // Moving average window
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FirError {
    InvalidType,
    InvalidParameter,
}

/// Rate limiter or moving average over at most `N` samples.
pub struct FilterFIR<const N: usize> {
    kind: FirType,
    rate: Iq24,                 // Largest step per sample
    buffer: BufferFIFO<Iq24, N>, // Moving average delay line
    acc: i64,                   // Running sum of the delay line
    u: Iq24,
    y: Iq24,
}

impl<const N: usize> FilterFIR<N> {
    pub fn new() -> Self {
        Self {
            kind: FirType::None,
            rate: Iq24::ZERO,
            buffer: BufferFIFO::new(),
            acc: 0,
            u: Iq24::ZERO,
            y: Iq24::ZERO,
        }
    }

    pub fn setup(&mut self, kind: FirType, usr: &FirUsr) -> Result<(), FirError> {
        self.kind = FirType::None;

        match kind {
            FirType::None => return Err(FirError::InvalidType),
            FirType::Rlim => {
                if !(usr.ts > 0.0) || !(usr.rate > 0.0) {
                    return Err(FirError::InvalidParameter);
                }
                self.rate = Iq24::from_f32(usr.rate * usr.ts);
                if self.rate == Iq24::ZERO {
                    return Err(FirError::InvalidParameter);
                }
            }
            FirType::Mav => {
                if usr.size < 2 || !self.buffer.resize(usr.size) {
                    return Err(FirError::InvalidParameter);
                }
            }
        }

        self.kind = kind;
        self.reset();
        Ok(())
    }

    #[inline(always)]
    pub fn reset(&mut self) {
        self.force(Iq24::ZERO);
    }

    /// Presets the output (and the whole averaging window) to `u0`.
    pub fn force(&mut self, u0: Iq24) {
        self.u = u0;
        self.y = u0;
        if self.kind == FirType::Mav {
            self.buffer.fill(u0);
            self.acc = u0.raw() as i64 * self.buffer.len() as i64;
        }
    }

    pub fn tick(&mut self, u0: Iq24) -> Iq24 {
        self.u = u0;

        self.y = match self.kind {
            FirType::Rlim => {
                let delta = self.u.saturating_sub(self.y);
                if delta > self.rate {
                    self.y + self.rate
                } else if delta < -self.rate {
                    self.y - self.rate
                } else {
                    self.u
                }
            }
            FirType::Mav => {
                let oldest = self.buffer.pop(u0);
                self.acc += u0.raw() as i64 - oldest.raw() as i64;
                Iq24::from_raw((self.acc / self.buffer.len() as i64) as i32)
            }
            FirType::None => self.u,
        };

        self.y
    }

    #[inline(always)]
    pub fn output(&self) -> Iq24 {
        self.y
    }
}

impl<const N: usize> Default for FilterFIR<N> {
    fn default() -> Self {
        Self::new()
    }
}
