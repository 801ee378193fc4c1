// Implements a Q24 discrete controller in direct form with clamped output.

// Key Features:
// - PI and real proportional-resonant (PR) responses
// - Discretized with the bilinear transform s <- (2/TS)*(z-1)/(z+1)
// - Output clamped to [low, high]
// - `force()` for bumpless transfer onto a known output

// Detailed Operation:
// The controller computes
//   u(k) = b0*e(k) + b1*e(k-1) + b2*e(k-2) + a1*u(k-1) + a2*u(k-2)
// where the stored u(k-1) is the clamped output, which gives the PI anti-windup for free.
// Real PR:
//   G(s) = KP + KR*(WB*s) / (s^2 + WB*s + WR^2)

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

use crate::math_integer::iq::Iq24;

const C_2PI: f32 = 6.283_185_3;

/// Relative tolerance accepted when materializing coefficients in Q24.
const COEF_TOLERANCE: f32 = 0.02;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pid2Type {
    #[default]
    None,
    /// Requires TS>0, KP!=0, TI!=0
    Pi,
    Pd,
    Pid,
    PrIdeal,
    /// Requires TS>0, KR!=0, FR>0, FB>0
    PrReal,
    Lead,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PidError {
    InvalidType,
    /// Response has no discretization
    Unsupported,
    InvalidParameter,
    /// A coefficient cannot be represented in Q24 within tolerance
    Precision,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Pid2Usr {
    pub ts: f32,   // Sample time (s)
    pub kp: f32,   // Proportional gain (-)
    pub ti: f32,   // Integral time constant (s)
    pub kr: f32,   // Resonant gain (-)
    pub fr: f32,   // Resonant frequency (Hz)
    pub fb: f32,   // Resonant bandwidth (Hz)
    pub low: f32,  // Output low limit (-)
    pub high: f32, // Output high limit (-)
}

impl Default for Pid2Usr {
    fn default() -> Self {
        Self {
            ts: 0.0,
            kp: 0.0,
            ti: 0.0,
            kr: 0.0,
            fr: 0.0,
            fb: 0.0,
            low: -1.0,
            high: 1.0,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Pid2 {
    kind: Pid2Type,
    low: Iq24,
    high: Iq24,
    b: [Iq24; 3], // Error multipliers
    a: [Iq24; 3], // Output multipliers, a[0] unused
    e: [Iq24; 3], // e[i] is e(k-i)
    u: [Iq24; 3], // u[i] is u(k-i)
}

impl Pid2 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn setup(&mut self, kind: Pid2Type, usr: &Pid2Usr) -> Result<(), PidError> {
        self.kind = Pid2Type::None;

        let (b, a) = Self::discretize(kind, usr)?;
        if !(usr.low < usr.high) {
            return Err(PidError::InvalidParameter);
        }

        let bq = b.map(Iq24::from_f32);
        let aq = a.map(Iq24::from_f32);
        let exact = bq.iter().zip(b.iter()).chain(aq.iter().zip(a.iter()))
            .all(|(q, f)| q.verify(*f, COEF_TOLERANCE));
        if !exact {
            warn!("PID2: coefficients do not fit in Q24");
            return Err(PidError::Precision);
        }

        self.b = bq;
        self.a = aq;
        self.low = Iq24::from_f32(usr.low);
        self.high = Iq24::from_f32(usr.high);
        self.kind = kind;
        self.reset();
        Ok(())
    }

    fn discretize(kind: Pid2Type, usr: &Pid2Usr) -> Result<([f32; 3], [f32; 3]), PidError> {
        match kind {
            Pid2Type::None => Err(PidError::InvalidType),

            Pid2Type::Pi => {
                if !(usr.ts > 0.0) || usr.kp == 0.0 || usr.ti == 0.0 {
                    return Err(PidError::InvalidParameter);
                }
                let alpha0 = 2.0 * usr.ti;
                let beta0 = 2.0 * usr.kp * usr.ti + usr.kp * usr.ts;
                let beta1 = usr.kp * usr.ts - 2.0 * usr.kp * usr.ti;
                Ok(([beta0 / alpha0, beta1 / alpha0, 0.0], [0.0, 1.0, 0.0]))
            }

            Pid2Type::PrReal => {
                if !(usr.ts > 0.0) || usr.kr == 0.0 || !(usr.fr > 0.0) || !(usr.fb > 0.0) {
                    return Err(PidError::InvalidParameter);
                }
                let t = usr.ts;
                let wr = usr.fr * C_2PI;
                let wb = usr.fb * C_2PI;

                let alpha0 = 4.0 + 2.0 * wb * t + wr * wr * t * t;
                let alpha1 = 2.0 * wr * wr * t * t - 8.0;
                let alpha2 = 4.0 - 2.0 * wb * t + wr * wr * t * t;
                let beta0 = usr.kp * alpha0 + usr.kr * wb * 2.0 * t;
                let beta1 = usr.kp * alpha1;
                let beta2 = usr.kp * alpha2 - usr.kr * wb * 2.0 * t;

                Ok((
                    [beta0 / alpha0, beta1 / alpha0, beta2 / alpha0],
                    [0.0, -alpha1 / alpha0, -alpha2 / alpha0],
                ))
            }

            Pid2Type::Pd | Pid2Type::Pid | Pid2Type::PrIdeal | Pid2Type::Lead => Err(PidError::Unsupported),
        }
    }

    pub fn reset(&mut self) {
        self.e = [Iq24::ZERO; 3];
        self.u = [Iq24::ZERO; 3];
    }

    /// Presets the output history so that the next output at zero error is `u0`.
    pub fn force(&mut self, u0: Iq24) {
        self.e = [Iq24::ZERO; 3];
        self.u[0] = u0;
        match self.kind {
            Pid2Type::PrReal => {
                let half = u0.mpy(Iq24::from_f32(0.5));
                self.u[1] = half.div(self.a[1]).unwrap_or(u0);
                self.u[2] = half.div(self.a[2]).unwrap_or(u0);
            }
            _ => {
                self.u[1] = u0.div(self.a[1]).unwrap_or(u0);
                self.u[2] = Iq24::ZERO;
            }
        }
    }

    /// Runs one control step on `error` and returns the clamped output.
    pub fn tick(&mut self, error: Iq24) -> Iq24 {
        let sum = match self.kind {
            Pid2Type::Pi => {
                self.b[0].mpy(error) + self.b[1].mpy(self.e[1]) + self.a[1].mpy(self.u[1])
            }
            Pid2Type::PrReal => {
                self.b[0].mpy(error)
                    + self.b[1].mpy(self.e[1])
                    + self.b[2].mpy(self.e[2])
                    + self.a[1].mpy(self.u[1])
                    + self.a[2].mpy(self.u[2])
            }
            _ => return Iq24::ZERO,
        };

        self.u[0] = sum.clamp(self.low, self.high);
        self.u[2] = self.u[1];
        self.u[1] = self.u[0];
        self.e[2] = self.e[1];
        self.e[1] = error;

        self.u[0]
    }

    #[inline(always)]
    pub fn output(&self) -> Iq24 {
        self.u[0]
    }

    #[inline(always)]
    pub fn kind(&self) -> Pid2Type {
        self.kind
    }
}
