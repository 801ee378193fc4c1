// Implements RMS measurement of the AC component of ADC signals.

// Detailed Operation:
// The DC part of a signal is its filtered value, so `ac = norm - flt`. The squared AC
// waveform is averaged by a slow first-order low-pass (0.25 Hz at 1 ms); its DC level is the
// mean square and the RMS value is its square root. The physical value reuses the
// conversion object of the observed ADC variable.

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

use super::adc::{Adc, AdcMeas};
use crate::math_integer::filters::iir::{FilterIIR, IirError, IirType, IirUsr};
use crate::math_integer::iq::Iq24;

/// Mean-square averaging filter: 0.25 Hz at a 1 ms sample time.
pub const RMS_IIR_USR: IirUsr = IirUsr::low_pass(0.001, 0.25);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RmsError {
    /// Observed ADC variable does not exist
    InvalidIndex,
    Filter(IirError),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RmsOp {
    Update,
    Physical,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct RmsMeas {
    pub norm: Iq24,
    pub phy: f32,
}

/// RMS of one ADC variable. Each variable owns its filter.
#[derive(Clone)]
pub struct RmsVar {
    pub meas: RmsMeas,
    adc: usize, // Index of the observed ADC variable
    iir: FilterIIR,
}

impl RmsVar {
    pub const fn new(adc: usize) -> Self {
        Self {
            meas: RmsMeas { norm: Iq24::ZERO, phy: 0.0 },
            adc,
            iir: FilterIIR::new(),
        }
    }

    #[inline(always)]
    pub fn adc(&self) -> usize {
        self.adc
    }

    fn update(&mut self, adc: &AdcMeas) -> Iq24 {
        // Remove DC component from the AC measurement
        let ac = adc.norm - adc.flt;
        let mse = self.iir.tick(ac.mpy(ac));
        mse.sqrt()
    }
}

pub struct Rms<const N: usize> {
    pub vars: [RmsVar; N],
    init: bool,
}

impl<const N: usize> Rms<N> {
    pub fn new(vars: [RmsVar; N]) -> Self {
        Self { vars, init: false }
    }

    /// Arms the averaging filters; every variable must observe an existing ADC variable.
    pub fn init<const M: usize>(&mut self, adc: &Adc<M>) -> Result<(), RmsError> {
        self.init = false;

        for var in self.vars.iter_mut() {
            if var.adc >= adc.len() {
                warn!("RMS: ADC variable {} out of range", var.adc);
                return Err(RmsError::InvalidIndex);
            }
            var.iir
                .setup(IirType::LowPass, &RMS_IIR_USR)
                .map_err(RmsError::Filter)?;
        }

        self.init = true;
        Ok(())
    }

    pub fn run<const M: usize>(&mut self, op: RmsOp, adc: &Adc<M>) {
        if !self.init {
            return;
        }

        for var in self.vars.iter_mut() {
            let Some(src) = adc.vars.get(var.adc).filter(|src| src.enable) else {
                continue;
            };
            match op {
                RmsOp::Update => var.meas.norm = var.update(&src.meas),
                RmsOp::Physical => var.meas.phy = src.conv.n2p(var.meas.norm),
            }
        }
    }

    #[inline(always)]
    pub fn is_init(&self) -> bool {
        self.init
    }
}
