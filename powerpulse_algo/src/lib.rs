// Measurement and protection pipeline for power converter firmware.

// Key Features:
// - Q24 fixed-point arithmetic, IIR/FIR filters and a PI/PR controller
// - Layered raw <-> normalized <-> physical conversion with four calibration sources
// - ADC pipeline (UPDATE, NORMALIZE, FILTER, PHYSICAL) and RMS measurement
// - Hardware (WCH) and software (WCS) window comparators
// - Cooperative task scheduler, module information and slave start/stop sequencing

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

#![cfg_attr(not(feature = "std"), no_std)]

// This mod MUST go first, so that the others see its macros.
mod fmt;

#[cfg(feature = "rtt")]
use defmt_rtt as _; // Use the defmt_rtt crate for logging via RTT (Real-Time Transfer)

pub mod analog;
pub mod math_integer;
pub mod nfo;
pub mod protection;
pub mod slave_ctl;
pub mod task;

pub use analog::adc::{Adc, AdcHapi, AdcOp, AdcVar};
pub use analog::conv::{Conv, ConvNop, ConvSrc, ConvStore};
pub use math_integer::iq::Iq24;
