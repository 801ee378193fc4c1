// Implements the hardware window comparator (WCH): DAC-driven comparator pairs with latched faults.

// Key Features:
// - Low and high comparator per variable, each with its own conversion object
// - Thresholds in physical units, written to the DACs as raw codes on UPDATE
// - Hardware latches read by STATUS and cleared by CLEAR
// - Blocking trip test and a step-wise calibration state machine with a step budget

// Detailed Operation:
// The safe reference of a low comparator is DAC code 0 and of a high comparator code
// res-1; neither can trip there. The trip test sweeps every comparator from its safe end
// toward the other end, one code per TEST operation, and records the code at which the
// latch fires.
//
// Calibration runs that sweep with the analog inputs at their zero point:
//   START     -> enter calibration mode, arm the low sweep
//   CALIBRATE -> one sweep point per `calibrate()` call; low comparators first, then high
//   done      -> calib.offset = trip code, gain_c = 0, switch to the CALIB source, back to START
// A sweep reaching the far end, or a calibration exceeding its step budget, moves the
// machine to ERROR. ERROR is sticky until `reset_calibration()`.

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

use embedded_hal::delay::DelayNs;

use crate::analog::conv::{Conv, ConvSrc, ConvStore};
use crate::math_integer::iq::Iq24;

/// Status bit of the low comparator latch.
pub const CMPSS_STS_LOW: u16 = 0x0200;
/// Status bit of the high comparator latch.
pub const CMPSS_STS_HIGH: u16 = 0x0002;

/// DAC and comparator subsystem. `base` selects the comparator module of a variable.
pub trait Cmpss {
    fn set_dac_low(&mut self, base: usize, raw: u16);
    fn set_dac_high(&mut self, base: usize, raw: u16);
    fn set_max_ramp(&mut self, base: usize, raw: u16);
    /// Latch status bits (`CMPSS_STS_LOW`, `CMPSS_STS_HIGH`).
    fn get_status(&mut self, base: usize) -> u16;
    fn clear_latch_low(&mut self, base: usize);
    fn clear_latch_high(&mut self, base: usize);
    /// Routes the comparator inputs to their calibration reference.
    fn calibration_mode(&mut self, enable: bool);
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WchError {
    Null,
    Type,
    InitSize,
    /// Conversion data update failed
    InitData,
    /// A comparator did not trip over its whole range, or the calibration timed out
    TestFail,
    CalPoint,
    CalLock,
    /// Calibration result rejected by the conversion object
    CalConv,
    CalState,
    /// Calibration is stuck in the error state
    CalError,
}

impl WchError {
    /// Legacy numeric return code.
    pub const fn code(self) -> i32 {
        match self {
            WchError::Null => -1,
            WchError::Type => -2,
            WchError::InitSize => -3,
            WchError::InitData => -4,
            WchError::TestFail => -5,
            WchError::CalPoint => -6,
            WchError::CalLock => -7,
            WchError::CalConv => -8,
            WchError::CalState => -9,
            WchError::CalError => -10,
        }
    }
}

/// Non-error outcome of a calibration step.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WchStatus {
    /// Calibration in progress, call again
    CalCont = 1,
    Success = 0,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WchOp {
    /// Convert physical references and write them to the DACs
    Update,
    /// Move references to their safe ends, settle and clear latches
    Reset,
    /// Clear latches
    Clear,
    /// Write the current references, settle and read the latches
    Test,
    /// Read the latches
    Status,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WchState {
    #[default]
    Start,
    Calibrate,
    Error,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WchType {
    Low,
    High,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WchConfig {
    pub settle_ms: u32,   // Comparator debounce settle time
    pub step_budget: u32, // Calibration steps before timing out
}

impl Default for WchConfig {
    fn default() -> Self {
        Self {
            settle_ms: 10,
            step_budget: 2 * 4096 + 8,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct WchRef {
    pub raw: u32,
    pub nrm: Iq24,
    pub phy: f32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct WchTest {
    pub enable: bool,
    pub raw: u32, // DAC code that tripped the comparator
}

#[derive(Copy, Clone)]
pub struct WchCmp {
    kind: WchType,
    pub enable: bool,
    pub fault: bool,
    pub reference: WchRef,
    pub test: WchTest,
    pub conv: Conv,
}

impl WchCmp {
    pub fn new(kind: WchType, conv: Conv) -> Self {
        Self {
            kind,
            enable: true,
            fault: false,
            reference: WchRef::default(),
            test: WchTest::default(),
            conv,
        }
    }

    #[inline(always)]
    pub fn kind(&self) -> WchType {
        self.kind
    }

    #[inline(always)]
    fn max_raw(&self) -> u32 {
        self.conv.cop.res.saturating_sub(1)
    }

    fn update(&mut self) {
        if !self.enable {
            self.reset();
            return;
        }
        self.reference.nrm = self.conv.p2n(self.reference.phy);
        self.reference.raw = self.conv.n2r(self.reference.nrm);
        self.limit();
    }

    fn reset(&mut self) {
        self.reference.raw = match self.kind {
            WchType::Low => 0,
            WchType::High => self.max_raw(),
        };
    }

    #[inline(always)]
    fn limit(&mut self) {
        self.reference.raw = self.reference.raw.min(self.max_raw());
    }

    /// Moves the reference one code away from the safe end; false at the far end.
    fn step(&mut self) -> bool {
        match self.kind {
            WchType::Low if self.reference.raw < self.max_raw() => self.reference.raw += 1,
            WchType::High if self.reference.raw > 0 => self.reference.raw -= 1,
            _ => return false,
        }
        true
    }
}

/// Comparator pair over one analog input.
#[derive(Copy, Clone)]
pub struct WchVar {
    pub fault: bool,
    pub cmpl: WchCmp,
    pub cmph: WchCmp,
}

impl WchVar {
    /// Both comparators share the capture parameters of `conv`.
    pub fn new(conv: Conv) -> Self {
        Self {
            fault: false,
            cmpl: WchCmp::new(WchType::Low, conv),
            cmph: WchCmp::new(WchType::High, conv),
        }
    }

    /// Sets physical thresholds; run UPDATE to write them to the hardware.
    pub fn set_reference(&mut self, upper: f32, lower: f32) -> Result<(), WchError> {
        if upper < lower {
            return Err(WchError::InitData);
        }
        self.cmph.reference.phy = upper;
        self.cmpl.reference.phy = lower;
        Ok(())
    }

    fn cmp_mut(&mut self, kind: WchType) -> &mut WchCmp {
        match kind {
            WchType::Low => &mut self.cmpl,
            WchType::High => &mut self.cmph,
        }
    }
}

/// Outcome of one sweep point over the comparators of one type.
enum Sweep {
    Running,
    Done,
    Failed,
}

pub struct Wch<C: Cmpss, D: DelayNs, const N: usize> {
    pub vars: [WchVar; N],
    cmpss: C,
    delay: D,
    config: WchConfig,
    id: u16,
    init: bool,
    mem_fault: bool,
    state: WchState,
    phase: WchType, // Comparator type being calibrated
    steps: u32,     // Calibration steps taken
}

impl<C: Cmpss, D: DelayNs, const N: usize> Wch<C, D, N> {
    pub fn new(id: u16, vars: [WchVar; N], cmpss: C, delay: D, config: WchConfig) -> Self {
        Self {
            vars,
            cmpss,
            delay,
            config,
            id,
            init: false,
            mem_fault: false,
            state: WchState::Start,
            phase: WchType::Low,
            steps: 0,
        }
    }

    /// Activates the HAPI conversion, then the stored one when every comparator has a record.
    /// Moves all references to their safe ends and clears the latches.
    pub fn init<S: ConvStore>(&mut self, store: &mut S) -> Result<(), WchError> {
        self.init = false;
        self.mem_fault = false;
        self.state = WchState::Start;

        for var in self.vars.iter_mut() {
            var.fault = false;
            for cmp in [&mut var.cmpl, &mut var.cmph] {
                cmp.fault = false;
                cmp.reference = WchRef::default();
                cmp.test = WchTest::default();
            }
        }

        self.conv(ConvSrc::Hapi)?;
        self.init = true;

        if self.load_mem(store).is_err() {
            warn!("WCH {}: stored calibration unavailable", self.id);
            self.mem_fault = true;
            self.conv(ConvSrc::Hapi)?;
        }

        self.run(WchOp::Reset);
        Ok(())
    }

    fn load_mem<S: ConvStore>(&mut self, store: &mut S) -> Result<(), WchError> {
        for (index, var) in self.vars.iter_mut().enumerate() {
            var.cmpl.conv.mem = store.load(self.id, 2 * index).ok_or(WchError::InitData)?;
            var.cmph.conv.mem = store.load(self.id, 2 * index + 1).ok_or(WchError::InitData)?;
        }
        self.conv(ConvSrc::Mem)
    }

    /// Activates normalization source `src` on both comparators of every variable.
    pub fn conv(&mut self, src: ConvSrc) -> Result<(), WchError> {
        for var in self.vars.iter_mut() {
            var.cmpl.conv.update(src).map_err(|_| WchError::InitData)?;
            var.cmph.conv.update(src).map_err(|_| WchError::InitData)?;
        }
        Ok(())
    }

    pub fn run(&mut self, op: WchOp) {
        if !self.init {
            return;
        }

        for var in self.vars.iter_mut() {
            match op {
                WchOp::Update => {
                    var.cmpl.update();
                    var.cmph.update();
                }
                WchOp::Reset => {
                    var.cmpl.reset();
                    var.cmph.reset();
                }
                WchOp::Test => {
                    var.cmpl.limit();
                    var.cmph.limit();
                }
                WchOp::Clear | WchOp::Status => {}
            }
        }

        match op {
            WchOp::Update => self.write(),
            WchOp::Reset => {
                self.write();
                self.delay.delay_ms(self.config.settle_ms);
                self.clear();
            }
            WchOp::Clear => self.clear(),
            WchOp::Test => {
                self.write();
                self.delay.delay_ms(self.config.settle_ms);
                self.status();
            }
            WchOp::Status => self.status(),
        }
    }

    fn write(&mut self) {
        for (base, var) in self.vars.iter().enumerate() {
            self.cmpss.set_dac_low(base, var.cmpl.reference.raw as u16);
            self.cmpss.set_dac_high(base, var.cmph.reference.raw as u16);
            self.cmpss.set_max_ramp(base, (var.cmph.reference.raw << 4) as u16);
        }
    }

    fn clear(&mut self) {
        for (base, var) in self.vars.iter_mut().enumerate() {
            self.cmpss.clear_latch_low(base);
            self.cmpss.clear_latch_high(base);
            var.cmpl.fault = false;
            var.cmph.fault = false;
            var.fault = false;
        }
    }

    fn status(&mut self) {
        for (base, var) in self.vars.iter_mut().enumerate() {
            let sts = self.cmpss.get_status(base);
            var.cmpl.fault = sts & CMPSS_STS_LOW != 0;
            var.cmph.fault = sts & CMPSS_STS_HIGH != 0;
            var.fault = var.cmpl.fault || var.cmph.fault;
        }
    }

    /// Combined fault of all variables, as of the last STATUS or TEST.
    pub fn fault(&self) -> bool {
        self.vars.iter().any(|var| var.fault)
    }

    /// Evaluates one TEST point for the comparators of type `kind` still under test.
    fn sweep_point(&mut self, kind: WchType) -> Sweep {
        self.run(WchOp::Test);

        let mut done = true;
        for var in self.vars.iter_mut() {
            let cmp = var.cmp_mut(kind);
            if !cmp.test.enable {
                continue;
            }
            if cmp.fault {
                // Latch the reference which tripped the comparator
                cmp.test.raw = cmp.reference.raw;
                cmp.test.enable = false;
                continue;
            }
            if !cmp.step() {
                return Sweep::Failed;
            }
            done = false;
        }

        if done {
            Sweep::Done
        } else {
            Sweep::Running
        }
    }

    fn arm_test(&mut self) {
        for var in self.vars.iter_mut() {
            var.cmpl.test.enable = var.cmpl.enable;
            var.cmph.test.enable = var.cmph.enable;
        }
    }

    fn sweep(&mut self, kind: WchType) -> Result<(), WchError> {
        self.run(WchOp::Reset);
        loop {
            match self.sweep_point(kind) {
                Sweep::Running => continue,
                Sweep::Done => return Ok(()),
                Sweep::Failed => return Err(WchError::TestFail),
            }
        }
    }

    /// Sweeps every enabled comparator until it trips, then returns to the safe state.
    ///
    /// Each sweep ends at the far end of the DAC range, so the loop is bounded by `res`.
    pub fn test(&mut self) -> Result<(), WchError> {
        if !self.init {
            return Err(WchError::Null);
        }

        self.arm_test();
        let low = self.sweep(WchType::Low);
        let high = self.sweep(WchType::High);
        self.run(WchOp::Reset);

        if low.is_err() || high.is_err() {
            error!("WCH {}: comparator test failed", self.id);
            return Err(WchError::TestFail);
        }
        Ok(())
    }

    /// Advances the calibration by one sweep point.
    pub fn calibrate(&mut self) -> Result<WchStatus, WchError> {
        if !self.init {
            return Err(WchError::Null);
        }

        match self.state {
            WchState::Error => return Err(WchError::CalError),
            WchState::Start => {
                info!("WCH {}: calibration started", self.id);
                self.cmpss.calibration_mode(true);
                self.arm_test();
                self.phase = WchType::Low;
                self.steps = 0;
                self.state = WchState::Calibrate;
                self.run(WchOp::Reset);
            }
            WchState::Calibrate => {}
        }

        self.steps += 1;
        if self.steps > self.config.step_budget {
            return self.fail(WchError::TestFail);
        }

        match self.sweep_point(self.phase) {
            Sweep::Running => Ok(WchStatus::CalCont),
            Sweep::Failed => self.fail(WchError::TestFail),
            Sweep::Done if self.phase == WchType::Low => {
                self.phase = WchType::High;
                self.run(WchOp::Reset);
                Ok(WchStatus::CalCont)
            }
            Sweep::Done => self.finish(),
        }
    }

    fn finish(&mut self) -> Result<WchStatus, WchError> {
        self.run(WchOp::Reset);

        for var in self.vars.iter_mut() {
            for cmp in [&mut var.cmpl, &mut var.cmph] {
                cmp.conv.calib.offset = cmp.test.raw.min(i16::MAX as u32) as i16;
                cmp.conv.calib.gain_c = 0;
            }
        }

        if self.conv(ConvSrc::Calib).is_err() {
            return self.fail(WchError::CalConv);
        }

        self.cmpss.calibration_mode(false);
        self.state = WchState::Start;
        info!("WCH {}: calibration done in {} steps", self.id, self.steps);
        Ok(WchStatus::Success)
    }

    fn fail(&mut self, err: WchError) -> Result<WchStatus, WchError> {
        error!("WCH {}: calibration failed with code {}", self.id, err.code());
        self.state = WchState::Error;
        self.cmpss.calibration_mode(false);
        self.run(WchOp::Reset);
        Err(err)
    }

    /// Leaves the ERROR state.
    pub fn reset_calibration(&mut self) {
        self.state = WchState::Start;
        self.steps = 0;
    }

    #[inline(always)]
    pub fn state(&self) -> WchState {
        self.state
    }

    #[inline(always)]
    pub fn mem_fault(&self) -> bool {
        self.mem_fault
    }

    pub fn cmpss(&self) -> &C {
        &self.cmpss
    }

    pub fn cmpss_mut(&mut self) -> &mut C {
        &mut self.cmpss
    }
}
