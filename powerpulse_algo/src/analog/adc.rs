// Implements the ADC abstraction: per-signal measurement state and the four-stage pipeline.

// Key Features:
// - Raw samples averaged over 1, 2, 4 or 8 start-of-conversion (SOC) channels
// - Fixed-point normalization through the signal's conversion object
// - Per-variable Q24 low-pass filter (Bessel, 1 Hz at 1 ms by default)
// - Physical value computed from the filtered signal on the slow path
// - Stored (MEM) calibration loaded on init; a failed load is flagged, not fatal

// Detailed Operation:
// `init()` pulls capture parameters and platform normalization data from the `AdcHapi`
// implementation, arms the filters and activates the HAPI conversion. It then tries the
// `ConvStore` records: when every enabled variable has one, the MEM source becomes active,
// otherwise `mem_fault()` is raised and HAPI stays in effect.
// `run()` never fails. UPDATE reads the SOCs and then normalizes; FILTER and PHYSICAL are
// separate calls so the ISR and the task can split the work.

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

use heapless::Vec;

use super::conv::{Conv, ConvError, ConvSrc, ConvStore};
use crate::math_integer::filters::iir::{FilterIIR, IirError, IirType, IirUsr};
use crate::math_integer::iq::Iq24;

/// Largest number of SOCs averaged into one raw sample.
pub const ADC_SOC_MAX: usize = 8;

/// Default measurement filter: 1 Hz at a 1 ms sample time.
pub const ADC_IIR_USR: IirUsr = IirUsr::low_pass(0.001, 1.0);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcError {
    /// Platform layer has no data for this ADC
    Hapi,
    /// SOC list longer than `ADC_SOC_MAX` or its length is not 1, 2, 4 or 8
    InvalidSoc,
    Filter(IirError),
    Conv(ConvError),
    /// Stored calibration record missing
    Mem,
}

impl From<IirError> for AdcError {
    fn from(err: IirError) -> Self {
        AdcError::Filter(err)
    }
}

impl From<ConvError> for AdcError {
    fn from(err: ConvError) -> Self {
        AdcError::Conv(err)
    }
}

/// Pipeline stage.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcOp {
    /// Read SOCs into `raw`, then normalize
    Update,
    Normalize,
    Filter,
    Physical,
}

/// Measurement values of one signal.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct AdcMeas {
    pub raw: u32,  // Averaged raw counts
    pub norm: Iq24, // Normalized value
    pub flt: Iq24,  // Filtered normalized value
    pub phy: f32,   // Filtered value in physical units
}

/// One measured signal.
#[derive(Clone)]
pub struct AdcVar {
    pub enable: bool,
    pub meas: AdcMeas,
    pub iir: Option<FilterIIR>,
    pub conv: Conv,
    pub socs: Vec<u16, ADC_SOC_MAX>,
    soc_overflow: bool, // More SOCs given than `socs` holds
}

impl AdcVar {
    /// Enabled variable with the default measurement filter and no SOCs.
    pub fn new(conv: Conv) -> Self {
        Self {
            enable: true,
            meas: AdcMeas::default(),
            iir: Some(FilterIIR::new()),
            conv,
            socs: Vec::new(),
            soc_overflow: false,
        }
    }

    /// Variable read by averaging `socs`. `Adc::init()` rejects lists longer than `ADC_SOC_MAX`.
    pub fn with_socs(conv: Conv, socs: &[u16]) -> Self {
        let mut var = Self::new(conv);
        match Vec::from_slice(socs) {
            Ok(list) => var.socs = list,
            Err(()) => var.soc_overflow = true,
        }
        var
    }

    /// Drops the measurement filter; `flt` then follows `norm`.
    pub fn without_filter(mut self) -> Self {
        self.iir = None;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enable = false;
        self
    }
}

/// Platform side of the ADC.
pub trait AdcHapi {
    /// Fills capture parameters and HAPI normalization data of every variable of ADC `id`.
    fn adc_data(&mut self, id: u16, vars: &mut [AdcVar]) -> Result<(), AdcError>;

    /// Result register of one SOC.
    fn adc_read(&mut self, soc: u16) -> u16;
}

/// Ordered list of `N` measured signals.
pub struct Adc<const N: usize> {
    pub vars: [AdcVar; N],
    id: u16,
    init: bool,
    mem_fault: bool,
}

impl<const N: usize> Adc<N> {
    pub fn new(id: u16, vars: [AdcVar; N]) -> Self {
        Self {
            vars,
            id,
            init: false,
            mem_fault: false,
        }
    }

    pub fn init<H: AdcHapi, S: ConvStore>(&mut self, hapi: &mut H, store: &mut S) -> Result<(), AdcError> {
        self.init = false;
        self.mem_fault = false;

        if let Err(err) = hapi.adc_data(self.id, &mut self.vars) {
            error!("ADC {}: no platform data", self.id);
            return Err(err);
        }

        for var in self.vars.iter_mut().filter(|var| var.enable) {
            if var.soc_overflow || (!var.socs.is_empty() && !var.socs.len().is_power_of_two()) {
                error!("ADC {}: invalid SOC list", self.id);
                return Err(AdcError::InvalidSoc);
            }
            if let Some(iir) = var.iir.as_mut() {
                iir.setup(IirType::Bessel, &ADC_IIR_USR)?;
            }
        }

        self.conv(ConvSrc::Hapi)?;
        self.init = true;

        if self.load_mem(store).is_err() {
            warn!("ADC {}: stored calibration unavailable", self.id);
            self.mem_fault = true;
            // Keep the platform defaults in effect
            self.conv(ConvSrc::Hapi)?;
        }

        info!("ADC {}: {} variables ready", self.id, N);
        Ok(())
    }

    fn load_mem<S: ConvStore>(&mut self, store: &mut S) -> Result<(), AdcError> {
        for (index, var) in self.vars.iter_mut().enumerate() {
            if !var.enable {
                continue;
            }
            var.conv.mem = store.load(self.id, index).ok_or(AdcError::Mem)?;
        }
        self.conv(ConvSrc::Mem)
    }

    /// Activates normalization source `src` on every enabled variable.
    pub fn conv(&mut self, src: ConvSrc) -> Result<(), AdcError> {
        for var in self.vars.iter_mut().filter(|var| var.enable) {
            var.conv.update(src)?;
        }
        Ok(())
    }

    /// Runs one pipeline stage over the enabled variables.
    pub fn run<H: AdcHapi>(&mut self, op: AdcOp, hapi: &mut H) {
        if !self.init {
            return;
        }

        for var in self.vars.iter_mut() {
            if !var.enable {
                continue;
            }

            let meas = &mut var.meas;
            match op {
                AdcOp::Update => {
                    if !var.socs.is_empty() {
                        let sum: u32 = var.socs.iter().map(|&soc| hapi.adc_read(soc) as u32).sum();
                        meas.raw = sum >> var.socs.len().trailing_zeros();
                    }
                    meas.norm = var.conv.r2n(meas.raw);
                }
                AdcOp::Normalize => meas.norm = var.conv.r2n(meas.raw),
                AdcOp::Filter => {
                    meas.flt = match var.iir.as_mut() {
                        Some(iir) => iir.tick(meas.norm),
                        None => meas.norm,
                    }
                }
                AdcOp::Physical => meas.phy = var.conv.n2p(meas.flt),
            }
        }
    }

    /// Presets every filter to the current normalized value.
    pub fn force_filters(&mut self) {
        for var in self.vars.iter_mut().filter(|var| var.enable) {
            var.meas.flt = var.meas.norm;
            if let Some(iir) = var.iir.as_mut() {
                iir.force(var.meas.norm);
            }
        }
    }

    #[inline(always)]
    pub fn id(&self) -> u16 {
        self.id
    }

    #[inline(always)]
    pub fn is_init(&self) -> bool {
        self.init
    }

    /// Stored calibration could not be applied at init.
    #[inline(always)]
    pub fn mem_fault(&self) -> bool {
        self.mem_fault
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        N
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        N == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analog::conv::ConvNop;

    struct Board {
        socs: [u16; 16],
        fail: bool,
    }

    impl AdcHapi for Board {
        fn adc_data(&mut self, _id: u16, vars: &mut [AdcVar]) -> Result<(), AdcError> {
            if self.fail {
                return Err(AdcError::Hapi);
            }
            for var in vars.iter_mut() {
                var.conv.cop.res = 4096;
                var.conv.cop.fs = 300.0;
                var.conv.hapi = ConvNop {
                    offset: 2048,
                    gain_c: 0,
                };
            }
            Ok(())
        }

        fn adc_read(&mut self, soc: u16) -> u16 {
            self.socs[soc as usize]
        }
    }

    struct Eeprom(Option<ConvNop>);

    impl ConvStore for Eeprom {
        fn load(&mut self, _id: u16, _index: usize) -> Option<ConvNop> {
            self.0
        }
    }

    fn board() -> Board {
        Board {
            socs: [0; 16],
            fail: false,
        }
    }

    #[test]
    fn test_update_averages_socs() {
        let mut hw = board();
        hw.socs[0] = 3000;
        hw.socs[1] = 3144;
        hw.socs[2] = 3072;

        let mut adc = Adc::new(
            1,
            [
                AdcVar::with_socs(Conv::default(), &[0, 1]),
                AdcVar::with_socs(Conv::default(), &[2]),
            ],
        );
        assert!(adc.init(&mut hw, &mut Eeprom(None)).is_ok());
        assert!(adc.mem_fault());
        assert_eq!(adc.vars[0].conv.rnt().src, ConvSrc::Hapi);

        adc.run(AdcOp::Update, &mut hw);
        assert_eq!(adc.vars[0].meas.raw, 3072);
        assert_eq!(adc.vars[1].meas.raw, 3072);
        assert_eq!(adc.vars[0].meas.norm, Iq24::from_f32(0.25));
    }

    #[test]
    fn test_pipeline_settles_to_physical() {
        let mut hw = board();
        hw.socs[3] = 3072;

        let mut adc = Adc::new(2, [AdcVar::with_socs(Conv::default(), &[3])]);
        assert!(adc.init(&mut hw, &mut Eeprom(None)).is_ok());

        for _ in 0..5000 {
            adc.run(AdcOp::Update, &mut hw);
            adc.run(AdcOp::Filter, &mut hw);
        }
        adc.run(AdcOp::Physical, &mut hw);
        assert!((adc.vars[0].meas.phy - 75.0).abs() < 0.75);
    }

    #[test]
    fn test_unfiltered_variable_follows_norm() {
        let mut hw = board();
        let mut adc = Adc::new(3, [AdcVar::new(Conv::default()).without_filter()]);
        assert!(adc.init(&mut hw, &mut Eeprom(None)).is_ok());

        // Raw written directly, as an ISR would
        adc.vars[0].meas.raw = 1024;
        adc.run(AdcOp::Normalize, &mut hw);
        adc.run(AdcOp::Filter, &mut hw);
        adc.run(AdcOp::Physical, &mut hw);
        assert_eq!(adc.vars[0].meas.flt, Iq24::from_f32(-0.25));
        assert_eq!(adc.vars[0].meas.phy, -75.0);
    }

    #[test]
    fn test_disabled_variable_is_skipped() {
        let mut hw = board();
        hw.socs[0] = 4000;
        let mut adc = Adc::new(
            4,
            [
                AdcVar::with_socs(Conv::default(), &[0]),
                AdcVar::with_socs(Conv::default(), &[0]).disabled(),
            ],
        );
        assert!(adc.init(&mut hw, &mut Eeprom(None)).is_ok());

        adc.run(AdcOp::Update, &mut hw);
        assert_eq!(adc.vars[0].meas.raw, 4000);
        assert_eq!(adc.vars[1].meas, AdcMeas::default());
        assert_eq!(adc.vars[1].conv.rnt().src, ConvSrc::None);
    }

    #[test]
    fn test_mem_calibration_applied() {
        let mut hw = board();
        let stored = ConvNop {
            offset: 2000,
            gain_c: 0,
        };
        let mut adc = Adc::new(5, [AdcVar::new(Conv::default())]);
        assert!(adc.init(&mut hw, &mut Eeprom(Some(stored))).is_ok());
        assert!(!adc.mem_fault());
        assert_eq!(adc.vars[0].conv.rnt().src, ConvSrc::Mem);
        assert_eq!(adc.vars[0].conv.rnt().offset, 2000);
    }

    #[test]
    fn test_init_failures() {
        let mut hw = Board {
            socs: [0; 16],
            fail: true,
        };
        let mut adc = Adc::new(6, [AdcVar::new(Conv::default())]);
        assert_eq!(adc.init(&mut hw, &mut Eeprom(None)), Err(AdcError::Hapi));
        assert!(!adc.is_init());

        // Uninitialized objects ignore the pipeline
        adc.vars[0].meas.raw = 3072;
        adc.run(AdcOp::Normalize, &mut hw);
        assert_eq!(adc.vars[0].meas.norm, Iq24::ZERO);

        let mut hw = board();
        let mut adc = Adc::new(7, [AdcVar::with_socs(Conv::default(), &[0, 1, 2])]);
        assert_eq!(adc.init(&mut hw, &mut Eeprom(None)), Err(AdcError::InvalidSoc));
    }

    #[test]
    fn test_init_rejects_oversized_soc_list() {
        let mut hw = board();
        let socs = [0, 1, 2, 3, 4, 5, 6, 7, 8];

        // Nine SOCs never shrink to a valid list of eight
        let var = AdcVar::with_socs(Conv::default(), &socs);
        assert!(var.socs.is_empty());
        let mut adc = Adc::new(8, [var]);
        assert_eq!(adc.init(&mut hw, &mut Eeprom(None)), Err(AdcError::InvalidSoc));
        assert!(!adc.is_init());

        let mut adc = Adc::new(8, [AdcVar::with_socs(Conv::default(), &socs[..ADC_SOC_MAX])]);
        assert!(adc.init(&mut hw, &mut Eeprom(None)).is_ok());
        assert_eq!(adc.vars[0].socs.len(), ADC_SOC_MAX);
    }

    #[test]
    fn test_pipeline_first_filter_step() {
        let mut hw = board();
        hw.socs[0] = 3072;
        let mut adc = Adc::new(9, [AdcVar::with_socs(Conv::default(), &[0])]);
        assert!(adc.init(&mut hw, &mut Eeprom(None)).is_ok());

        adc.run(AdcOp::Update, &mut hw);
        let norm = adc.vars[0].meas.norm;
        assert_eq!(norm, Iq24::from_f32(0.25));

        // One step of a zero-initialized filter scales the input by its first-step gain
        let mut iir = FilterIIR::new();
        assert!(iir.setup(IirType::Bessel, &ADC_IIR_USR).is_ok());
        let expected = iir.tick(norm);
        adc.run(AdcOp::Filter, &mut hw);
        assert_eq!(adc.vars[0].meas.flt, expected);
        assert!(expected > Iq24::ZERO && expected < norm);

        // Physical value of the normalized sample: (raw - offset) * fs / res within one LSB
        adc.force_filters();
        adc.run(AdcOp::Physical, &mut hw);
        let lsb = 300.0 / 4096.0;
        assert!((adc.vars[0].meas.phy - 75.0).abs() <= lsb);
    }

    #[test]
    fn test_physical_follows_gain_correction() {
        let mut hw = board();
        hw.socs[0] = 3072;
        let stored = ConvNop {
            offset: 2048,
            gain_c: 1000,
        };
        let mut adc = Adc::new(10, [AdcVar::with_socs(Conv::default(), &[0])]);
        assert!(adc.init(&mut hw, &mut Eeprom(Some(stored))).is_ok());
        assert_eq!(adc.vars[0].conv.rnt().src, ConvSrc::Mem);

        adc.run(AdcOp::Update, &mut hw);
        adc.force_filters();
        adc.run(AdcOp::Physical, &mut hw);

        let expected = 1024.0 * 300.0 / 4096.0 * (1.0 + 1000.0 / 65535.0);
        let lsb = 300.0 / 4096.0;
        assert!((adc.vars[0].meas.phy - expected).abs() <= lsb);
    }
}
