// Implements the software window comparator (WCS) over filtered measurements.

// Key Features:
// - Low and high comparator per variable, each optionally inverted
// - Two reference sets per comparator: system (application) and user (operator, over CAN)
// - The more restrictive set is selected on every UPDATE
// - Faults latch until CLEAR or RESET; STATUS aggregates them per variable and per object

// Detailed Operation:
// References are given in physical units and normalized through the conversion object of
// the observed signal, so a calibration change only needs another UPDATE. STATUS compares
// the normalized measurement with the active reference:
//   low:  fault = meas < ref
//   high: fault = meas > ref
// An inverted comparator faults when it is NOT tripped.

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

use crate::analog::adc::Adc;
use crate::analog::conv::Conv;
use crate::analog::rms::Rms;
use crate::math_integer::iq::Iq24;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WcsError {
    /// Platform layer has no data for this WCS
    Hapi,
    /// Observed measurement does not exist
    InvalidIndex,
    /// Low reference above high reference
    InvalidReference,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WcsOp {
    /// Re-normalize references and select the active set
    Update,
    /// Overwrite user references with system ones, then clear
    Reset,
    /// Clear latched faults
    Clear,
    /// Evaluate comparators and latch faults
    Status,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum WcsType {
    Low,
    High,
}

/// Source of the compared value.
pub trait Measurement {
    /// Normalized value and conversion object of measurement `index`; `None` while it is disabled.
    fn measurement(&self, index: usize) -> Option<(Iq24, &Conv)>;

    /// Measurement `index` exists, enabled or not.
    fn contains(&self, index: usize) -> bool {
        self.measurement(index).is_some()
    }
}

/// Filtered value of an ADC variable.
impl<const N: usize> Measurement for Adc<N> {
    fn measurement(&self, index: usize) -> Option<(Iq24, &Conv)> {
        let var = self.vars.get(index).filter(|var| var.enable)?;
        Some((var.meas.flt, &var.conv))
    }

    fn contains(&self, index: usize) -> bool {
        index < N
    }
}

/// RMS value of an ADC variable, with the conversion of the underlying ADC variable.
pub struct RmsMeasurement<'a, const N: usize, const M: usize> {
    pub rms: &'a Rms<N>,
    pub adc: &'a Adc<M>,
}

impl<const N: usize, const M: usize> Measurement for RmsMeasurement<'_, N, M> {
    fn measurement(&self, index: usize) -> Option<(Iq24, &Conv)> {
        let var = self.rms.vars.get(index)?;
        let adc = self.adc.vars.get(var.adc()).filter(|adc| adc.enable)?;
        Some((var.meas.norm, &adc.conv))
    }

    fn contains(&self, index: usize) -> bool {
        matches!(self.rms.vars.get(index), Some(var) if var.adc() < M)
    }
}

/// Platform side of the WCS.
pub trait WcsHapi {
    /// Fills the system references (physical units) of every variable.
    fn wcs_data(&mut self, vars: &mut [WcsVar]) -> Result<(), WcsError>;
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct WcsRef {
    pub norm: Iq24,
    pub phy: f32,
}

impl WcsRef {
    pub const fn new(phy: f32) -> Self {
        Self {
            norm: Iq24::ZERO,
            phy,
        }
    }
}

/// Which reference set is active.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WcsSel {
    #[default]
    Sys,
    Usr,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct WcsCmp {
    pub enable: bool,
    pub invert: bool,
    pub fault: bool,
    pub sys: WcsRef, // Application-defined reference
    pub usr: WcsRef, // Operator-defined reference
    sel: WcsSel,
}

impl WcsCmp {
    pub const fn new(enable: bool, invert: bool) -> Self {
        Self {
            enable,
            invert,
            fault: false,
            sys: WcsRef::new(0.0),
            usr: WcsRef::new(0.0),
            sel: WcsSel::Sys,
        }
    }

    /// Active reference.
    #[inline(always)]
    pub fn reference(&self) -> &WcsRef {
        match self.sel {
            WcsSel::Sys => &self.sys,
            WcsSel::Usr => &self.usr,
        }
    }

    #[inline(always)]
    pub fn selected(&self) -> WcsSel {
        self.sel
    }

    fn update(&mut self, conv: &Conv, kind: WcsType) {
        self.sys.norm = conv.p2n(self.sys.phy);
        self.usr.norm = conv.p2n(self.usr.phy);

        // Pick the more restrictive reference set
        self.sel = match kind {
            WcsType::Low if self.usr.phy > self.sys.phy => WcsSel::Usr,
            WcsType::High if self.usr.phy < self.sys.phy => WcsSel::Usr,
            _ => WcsSel::Sys,
        };
    }

    fn reset(&mut self) {
        self.sel = WcsSel::Sys;
        self.usr = self.sys;
    }

    fn status(&mut self, meas: Iq24, kind: WcsType) {
        let reference = self.reference().norm;
        let tripped = match kind {
            WcsType::Low => meas < reference,
            WcsType::High => meas > reference,
        };
        self.fault |= self.enable && (tripped != self.invert);
    }
}

/// Window comparator over one measurement.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WcsVar {
    meas: usize, // Index of the observed measurement
    pub cmpl: WcsCmp,
    pub cmph: WcsCmp,
    pub fault: bool,
}

impl WcsVar {
    /// Comparator pair over measurement `meas`, both enabled and not inverted.
    pub const fn new(meas: usize) -> Self {
        Self::with_comparators(meas, WcsCmp::new(true, false), WcsCmp::new(true, false))
    }

    pub const fn with_comparators(meas: usize, cmpl: WcsCmp, cmph: WcsCmp) -> Self {
        Self {
            meas,
            cmpl,
            cmph,
            fault: false,
        }
    }

    /// Sets the system window in physical units.
    pub fn set_limits(&mut self, low: f32, high: f32) -> Result<(), WcsError> {
        if low > high {
            return Err(WcsError::InvalidReference);
        }
        self.cmpl.sys.phy = low;
        self.cmph.sys.phy = high;
        Ok(())
    }

    /// Sets the operator window in physical units. Takes effect on the next UPDATE.
    pub fn set_user(&mut self, low: f32, high: f32) -> Result<(), WcsError> {
        if low > high {
            return Err(WcsError::InvalidReference);
        }
        self.cmpl.usr.phy = low;
        self.cmph.usr.phy = high;
        Ok(())
    }

    #[inline(always)]
    pub fn meas(&self) -> usize {
        self.meas
    }

    fn clear(&mut self) {
        self.cmpl.fault = false;
        self.cmph.fault = false;
        self.fault = false;
    }

    fn status(&mut self, meas: Iq24) -> bool {
        self.cmpl.status(meas, WcsType::Low);
        self.cmph.status(meas, WcsType::High);

        let fault = self.cmpl.fault || self.cmph.fault;
        self.fault |= fault;
        fault
    }
}

pub struct Wcs<const N: usize> {
    pub vars: [WcsVar; N],
    init: bool,
    fault: bool,
}

impl<const N: usize> Wcs<N> {
    pub const fn new(vars: [WcsVar; N]) -> Self {
        Self {
            vars,
            init: false,
            fault: false,
        }
    }

    /// Pulls the system references from the platform, checks the observed measurements, then
    /// resets and updates all references.
    pub fn init<H: WcsHapi, M: Measurement>(&mut self, hapi: &mut H, input: &M) -> Result<(), WcsError> {
        self.init = false;

        if let Err(err) = hapi.wcs_data(&mut self.vars) {
            error!("WCS: no platform data");
            return Err(err);
        }

        if let Some(var) = self.vars.iter().find(|var| !input.contains(var.meas)) {
            warn!("WCS: measurement {} out of range", var.meas);
            return Err(WcsError::InvalidIndex);
        }

        self.init = true;
        self.run(WcsOp::Reset, input);
        self.run(WcsOp::Update, input);
        Ok(())
    }

    /// Runs one operation over all variables; returns the combined fault of a STATUS pass.
    pub fn run<M: Measurement>(&mut self, op: WcsOp, input: &M) -> bool {
        if !self.init {
            return false;
        }

        let mut fault = false;

        for var in self.vars.iter_mut() {
            match op {
                WcsOp::Update => {
                    if let Some((_, conv)) = input.measurement(var.meas) {
                        var.cmpl.update(conv, WcsType::Low);
                        var.cmph.update(conv, WcsType::High);
                    }
                }
                WcsOp::Reset => {
                    var.cmpl.reset();
                    var.cmph.reset();
                    var.clear();
                }
                WcsOp::Clear => var.clear(),
                WcsOp::Status => {
                    if let Some((meas, _)) = input.measurement(var.meas) {
                        fault |= var.status(meas);
                    }
                }
            }
        }

        match op {
            WcsOp::Reset | WcsOp::Clear => self.fault = false,
            WcsOp::Status => self.fault |= fault,
            WcsOp::Update => {}
        }

        fault
    }

    /// Latched fault of the whole object.
    #[inline(always)]
    pub fn fault(&self) -> bool {
        self.fault
    }

    #[inline(always)]
    pub fn is_init(&self) -> bool {
        self.init
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analog::conv::{ConvNop, ConvSrc};

    /// Fixed measurements with a +-100 full-scale conversion.
    struct Probe {
        meas: [Iq24; 2],
        conv: Conv,
    }

    impl Probe {
        fn new() -> Self {
            let mut conv = Conv::new(4096, 100.0, ConvNop { offset: 2048, gain_c: 0 });
            assert!(conv.update(ConvSrc::Hapi).is_ok());
            Self {
                meas: [Iq24::ZERO; 2],
                conv,
            }
        }

        fn set(&mut self, index: usize, phy: f32) {
            self.meas[index] = self.conv.p2n(phy);
        }
    }

    impl Measurement for Probe {
        fn measurement(&self, index: usize) -> Option<(Iq24, &Conv)> {
            self.meas.get(index).map(|&meas| (meas, &self.conv))
        }
    }

    /// Platform without WCS data of its own; windows come from the test tables.
    struct Board;

    impl WcsHapi for Board {
        fn wcs_data(&mut self, _vars: &mut [WcsVar]) -> Result<(), WcsError> {
            Ok(())
        }
    }

    fn window(meas: usize, low: f32, high: f32) -> WcsVar {
        let mut var = WcsVar::new(meas);
        assert!(var.set_limits(low, high).is_ok());
        var
    }

    #[test]
    fn test_user_window_trip_and_clear() {
        let mut probe = Probe::new();
        let mut wcs = Wcs::new([window(0, -10.0, 10.0)]);
        assert!(wcs.init(&mut Board, &probe).is_ok());
        assert_eq!(wcs.vars[0].cmph.selected(), WcsSel::Sys);

        assert!(wcs.vars[0].set_user(-5.0, 5.0).is_ok());
        wcs.run(WcsOp::Update, &probe);
        assert_eq!(wcs.vars[0].cmpl.selected(), WcsSel::Usr);
        assert_eq!(wcs.vars[0].cmph.selected(), WcsSel::Usr);

        probe.set(0, 6.0);
        assert!(wcs.run(WcsOp::Status, &probe));
        assert!(wcs.vars[0].cmph.fault);
        assert!(!wcs.vars[0].cmpl.fault);
        assert!(wcs.vars[0].fault);
        assert!(wcs.fault());

        wcs.run(WcsOp::Clear, &probe);
        assert!(!wcs.vars[0].cmph.fault);
        assert!(!wcs.vars[0].cmpl.fault);
        assert!(!wcs.vars[0].fault);
        assert!(!wcs.fault());
    }

    #[test]
    fn test_looser_user_window_is_ignored() {
        let mut probe = Probe::new();
        let mut wcs = Wcs::new([window(0, -10.0, 10.0)]);
        assert!(wcs.init(&mut Board, &probe).is_ok());

        assert!(wcs.vars[0].set_user(-20.0, 20.0).is_ok());
        wcs.run(WcsOp::Update, &probe);
        assert_eq!(wcs.vars[0].cmpl.selected(), WcsSel::Sys);
        assert_eq!(wcs.vars[0].cmph.selected(), WcsSel::Sys);

        probe.set(0, -15.0);
        assert!(wcs.run(WcsOp::Status, &probe));
        assert!(wcs.vars[0].cmpl.fault);
    }

    #[test]
    fn test_fault_latches_until_cleared() {
        let mut probe = Probe::new();
        let mut wcs = Wcs::new([window(0, -10.0, 10.0), window(1, 0.0, 50.0)]);
        assert!(wcs.init(&mut Board, &probe).is_ok());

        probe.set(0, 12.0);
        probe.set(1, 25.0);
        assert!(wcs.run(WcsOp::Status, &probe));
        assert!(!wcs.vars[1].fault);

        // Back inside the window, the fault stays latched
        probe.set(0, 0.0);
        assert!(wcs.run(WcsOp::Status, &probe));
        assert!(wcs.vars[0].fault);

        wcs.run(WcsOp::Clear, &probe);
        assert!(!wcs.run(WcsOp::Status, &probe));
    }

    #[test]
    fn test_inverted_and_disabled_comparators() {
        let mut probe = Probe::new();
        let mut var = WcsVar::with_comparators(0, WcsCmp::new(false, false), WcsCmp::new(true, true));
        assert!(var.set_limits(-10.0, 10.0).is_ok());
        let mut wcs = Wcs::new([var]);
        assert!(wcs.init(&mut Board, &probe).is_ok());

        // Inverted high comparator faults while the value stays below the reference
        probe.set(0, -50.0);
        assert!(wcs.run(WcsOp::Status, &probe));
        assert!(wcs.vars[0].cmph.fault);
        assert!(!wcs.vars[0].cmpl.fault);

        wcs.run(WcsOp::Clear, &probe);
        probe.set(0, 20.0);
        assert!(!wcs.run(WcsOp::Status, &probe));
    }

    #[test]
    fn test_reset_restores_system_window() {
        let probe = Probe::new();
        let mut wcs = Wcs::new([window(0, -10.0, 10.0)]);
        assert!(wcs.init(&mut Board, &probe).is_ok());

        assert!(wcs.vars[0].set_user(-1.0, 1.0).is_ok());
        wcs.run(WcsOp::Update, &probe);
        wcs.run(WcsOp::Reset, &probe);
        assert_eq!(wcs.vars[0].cmph.selected(), WcsSel::Sys);
        assert_eq!(wcs.vars[0].cmph.usr.phy, 10.0);
        assert_eq!(wcs.vars[0].cmpl.usr.phy, -10.0);
    }

    #[test]
    fn test_init_rejects_unknown_measurement() {
        let probe = Probe::new();
        let mut wcs = Wcs::new([window(2, -1.0, 1.0)]);
        assert_eq!(wcs.init(&mut Board, &probe), Err(WcsError::InvalidIndex));
        assert!(!wcs.run(WcsOp::Status, &probe));
    }

    #[test]
    fn test_set_user_rejects_inverted_window() {
        let mut var = WcsVar::new(0);
        assert_eq!(var.set_user(5.0, -5.0), Err(WcsError::InvalidReference));
    }

    /// Platform that owns the system window of every variable.
    struct Limits {
        window: Option<(f32, f32)>,
    }

    impl WcsHapi for Limits {
        fn wcs_data(&mut self, vars: &mut [WcsVar]) -> Result<(), WcsError> {
            let (low, high) = self.window.ok_or(WcsError::Hapi)?;
            for var in vars.iter_mut() {
                var.set_limits(low, high)?;
            }
            Ok(())
        }
    }

    #[test]
    fn test_init_pulls_platform_window() {
        let mut probe = Probe::new();
        let mut wcs = Wcs::new([WcsVar::new(0)]);
        let mut hapi = Limits {
            window: Some((-20.0, 20.0)),
        };
        assert!(wcs.init(&mut hapi, &probe).is_ok());
        assert_eq!(wcs.vars[0].cmph.sys.phy, 20.0);
        // Reset on init copies the platform window into the user set
        assert_eq!(wcs.vars[0].cmpl.usr.phy, -20.0);

        probe.set(0, 15.0);
        assert!(!wcs.run(WcsOp::Status, &probe));
        probe.set(0, 25.0);
        assert!(wcs.run(WcsOp::Status, &probe));

        let mut wcs = Wcs::new([WcsVar::new(0)]);
        assert_eq!(wcs.init(&mut Limits { window: None }, &probe), Err(WcsError::Hapi));
        assert!(!wcs.is_init());
    }

    mod adc_input {
        use super::*;
        use crate::analog::adc::{AdcError, AdcHapi, AdcVar};
        use crate::analog::conv::ConvStore;
        use crate::analog::rms::{Rms, RmsVar};

        struct AdcBoard;

        impl AdcHapi for AdcBoard {
            fn adc_data(&mut self, _id: u16, vars: &mut [AdcVar]) -> Result<(), AdcError> {
                for var in vars.iter_mut() {
                    var.conv.cop.res = 4096;
                    var.conv.cop.fs = 100.0;
                    var.conv.hapi = ConvNop { offset: 2048, gain_c: 0 };
                }
                Ok(())
            }

            fn adc_read(&mut self, _soc: u16) -> u16 {
                2048
            }
        }

        struct NoStore;

        impl ConvStore for NoStore {
            fn load(&mut self, _id: u16, _index: usize) -> Option<ConvNop> {
                None
            }
        }

        #[test]
        fn test_disabled_adc_variable_never_trips() {
            let mut adc = Adc::new(
                1,
                [
                    AdcVar::with_socs(Conv::default(), &[0]),
                    AdcVar::with_socs(Conv::default(), &[1]).disabled(),
                ],
            );
            assert!(adc.init(&mut AdcBoard, &mut NoStore).is_ok());

            // Both windows exclude the zero reading of the ADC
            let mut wcs = Wcs::new([window(0, 10.0, 50.0), window(1, 10.0, 50.0)]);
            assert!(wcs.init(&mut Board, &adc).is_ok());
            assert!(adc.measurement(1).is_none());

            assert!(wcs.run(WcsOp::Status, &adc));
            assert!(wcs.vars[0].cmpl.fault);
            assert!(!wcs.vars[1].fault);
            assert!(!wcs.vars[1].cmpl.fault);

            // Only the disabled variable observed: no fault at all
            let mut wcs = Wcs::new([window(1, 10.0, 50.0)]);
            assert!(wcs.init(&mut Board, &adc).is_ok());
            assert!(!wcs.run(WcsOp::Status, &adc));
            assert!(!wcs.fault());
        }

        #[test]
        fn test_rms_of_disabled_adc_variable_is_skipped() {
            let mut adc = Adc::new(2, [AdcVar::new(Conv::default()).disabled()]);
            assert!(adc.init(&mut AdcBoard, &mut NoStore).is_ok());
            let mut rms = Rms::new([RmsVar::new(0)]);
            assert!(rms.init(&adc).is_ok());

            let input = RmsMeasurement { rms: &rms, adc: &adc };
            assert!(input.contains(0));
            assert!(input.measurement(0).is_none());

            let mut wcs = Wcs::new([window(0, 10.0, 50.0)]);
            assert!(wcs.init(&mut Board, &input).is_ok());
            assert!(!wcs.run(WcsOp::Status, &input));
        }
    }
}
