// Implements the start/stop sequencing of a slave power stage driven by a master board.

// Detailed Operation:
// Called at 1 kHz. A start request first publishes setpoints for 200 ms so the slave can
// settle on them, then switches the module on in the requested mode. Dropping the request
// switches the module off and holds 200 ms before a new start is accepted. Setpoints track
// the references in every state that publishes them.

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

/// Cool-down between setpoints and start, and after stop (ticks at 1 kHz).
pub const SLAVE_COOLDOWN_TICKS: u32 = 200;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlaveMode {
    #[default]
    Dc,
    Ac,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlaveState {
    #[default]
    Idle,
    Setpoints,
    Start,
    Run,
    Stop,
    StopWait,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SlaveCtl {
    pub module_on: bool,
    pub mode: SlaveMode,
    pub current_setpoint: f32,
    pub voltage_setpoint: f32,
    state: SlaveState,
    cooldown: u32,
}

impl SlaveCtl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the sequence by one 1 kHz tick.
    pub fn tick(&mut self, mode: SlaveMode, start: bool, current_ref: f32, voltage_ref: f32) {
        match self.state {
            SlaveState::Idle => {
                if start {
                    self.state = SlaveState::Setpoints;
                    self.cooldown = SLAVE_COOLDOWN_TICKS;
                }
            }
            SlaveState::Setpoints => {
                self.track(current_ref, voltage_ref);
                if self.countdown() {
                    self.state = SlaveState::Start;
                }
            }
            SlaveState::Start => {
                self.mode = mode;
                self.module_on = true;
                self.track(current_ref, voltage_ref);
                self.state = SlaveState::Run;
            }
            SlaveState::Run => {
                self.track(current_ref, voltage_ref);
                if !start {
                    self.state = SlaveState::Stop;
                }
            }
            SlaveState::Stop => {
                self.cooldown = SLAVE_COOLDOWN_TICKS;
                self.module_on = false;
                self.state = SlaveState::StopWait;
            }
            SlaveState::StopWait => {
                if self.countdown() {
                    self.state = SlaveState::Idle;
                }
            }
        }
    }

    #[inline(always)]
    fn track(&mut self, current_ref: f32, voltage_ref: f32) {
        self.current_setpoint = current_ref;
        self.voltage_setpoint = voltage_ref;
    }

    /// True once the cool-down has run out.
    fn countdown(&mut self) -> bool {
        if self.cooldown == 0 {
            return true;
        }
        self.cooldown -= 1;
        false
    }

    #[inline(always)]
    pub fn state(&self) -> SlaveState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticks(ctl: &mut SlaveCtl, n: u32, start: bool) {
        for _ in 0..n {
            ctl.tick(SlaveMode::Ac, start, 5.0, 400.0);
        }
    }

    #[test]
    fn test_start_sequence() {
        let mut ctl = SlaveCtl::new();
        ticks(&mut ctl, 10, false);
        assert_eq!(ctl.state(), SlaveState::Idle);

        ticks(&mut ctl, 1, true);
        assert_eq!(ctl.state(), SlaveState::Setpoints);

        // Setpoints are published during the cool-down, the module stays off
        ticks(&mut ctl, SLAVE_COOLDOWN_TICKS, true);
        assert_eq!(ctl.state(), SlaveState::Setpoints);
        assert_eq!(ctl.voltage_setpoint, 400.0);
        assert!(!ctl.module_on);

        ticks(&mut ctl, 1, true);
        assert_eq!(ctl.state(), SlaveState::Start);
        ticks(&mut ctl, 1, true);
        assert_eq!(ctl.state(), SlaveState::Run);
        assert!(ctl.module_on);
        assert_eq!(ctl.mode, SlaveMode::Ac);
    }

    #[test]
    fn test_stop_sequence() {
        let mut ctl = SlaveCtl::new();
        ticks(&mut ctl, SLAVE_COOLDOWN_TICKS + 3, true);
        assert_eq!(ctl.state(), SlaveState::Run);

        ctl.tick(SlaveMode::Dc, true, 7.5, 380.0);
        assert_eq!(ctl.current_setpoint, 7.5);

        ticks(&mut ctl, 2, false);
        assert_eq!(ctl.state(), SlaveState::StopWait);
        assert!(!ctl.module_on);

        // A start request is ignored until the cool-down ends
        ticks(&mut ctl, SLAVE_COOLDOWN_TICKS, true);
        assert_eq!(ctl.state(), SlaveState::StopWait);
        ticks(&mut ctl, 1, true);
        assert_eq!(ctl.state(), SlaveState::Idle);
    }
}
