// Implements first- and second-order IIR filters in Q24 fixed point.

// Key Features:
// - Lead-lag, first-order low-pass, Bessel, Butterworth, band-stop and band-pass responses
// - Coefficients discretized with the bilinear transform 1/s <- (TS/2)*(z+1)/(z-1)
// - Every coefficient is checked against its float source before the filter is armed
// - `force()` preloads the whole state for bumpless start-up

// Detailed Operation:
// All responses share one difference equation written in increments, which keeps the
// fixed-point products small for slow filters:
//   y(k) = U01*(u(k)-u(k-1)) + U21*(u(k-2)-u(k-1)) + UY1*(u(k-1)-y(k-1))
//        + Y12*(y(k-1)-y(k-2)) + Y1*y(k-1)
// First-order responses leave U21 and Y12 at zero and skip those products.

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

use crate::math_integer::iq::Iq24;

const C_2PI: f32 = 6.283_185_3;
const C_SQRT2: f32 = 1.414_213_5;
const C_SQRT3: f32 = 1.732_050_8;

/// Relative tolerance accepted when materializing coefficients in Q24.
const COEF_TOLERANCE: f32 = 0.01;

/// Filter response.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IirType {
    #[default]
    None,
    /// G(s) = (1 + s*ALPHA*TLL) / (1 + s*TLL). Requires TS, TLL, ALPHA.
    LeadLag,
    /// G(s) = 1 / (s/WC + 1). Requires TS, FC.
    LowPass,
    /// G(s) = 1 / ((s/(sqrt(3)*WC))^2 + s/WC + 1). Requires TS, FC.
    Bessel,
    /// G(s) = 1 / ((s/WC)^2 + sqrt(2)*s/WC + 1). Requires TS, FC.
    Butterworth,
    /// G(s) = ((s/WC)^2 + 1) / ((s/WC)^2 + (WB/WC)*(s/WC) + 1). Requires TS, FC, FB.
    BandStop,
    /// G(s) = ((WB/WC)*(s/WC)) / ((s/WC)^2 + (WB/WC)*(s/WC) + 1). Requires TS, FC, FB.
    BandPass,
}

/// User parameters, all in SI units.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct IirUsr {
    pub ts: f32,    // Sample time (s)
    pub tll: f32,   // Lead-lag time constant (s)
    pub alpha: f32, // Lead-lag ratio (-)
    pub fc: f32,    // Cut-off (or center) frequency (Hz)
    pub fb: f32,    // -3 dB bandwidth for band filters (Hz)
}

impl IirUsr {
    /// Sample time and cut-off only, for the low-pass family.
    pub const fn low_pass(ts: f32, fc: f32) -> Self {
        Self {
            ts,
            tll: 0.0,
            alpha: 0.0,
            fc,
            fb: 0.0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IirError {
    /// `IirType::None` cannot be set up
    InvalidType,
    /// Parameter out of range for the requested response
    InvalidParameter,
    /// A coefficient cannot be represented in Q24 within tolerance
    Precision,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
struct Coefs {
    u01: f32,
    u21: f32,
    uy1: f32,
    y12: f32,
    y1: f32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct CoefsQ24 {
    u01: Iq24, // Multiplier for u(k)-u(k-1)
    u21: Iq24, // Multiplier for u(k-2)-u(k-1)
    uy1: Iq24, // Multiplier for u(k-1)-y(k-1)
    y12: Iq24, // Multiplier for y(k-1)-y(k-2)
    y1: Iq24,  // Multiplier for y(k-1)
}

/// Q24 IIR filter with up to two states.
#[derive(Clone, Debug, Default)]
pub struct FilterIIR {
    kind: IirType,
    prm: CoefsQ24,
    u: [Iq24; 3], // u[i] is u(k-i)
    y: [Iq24; 3], // y[i] is y(k-i)
}

impl FilterIIR {
    /// Creates a disarmed filter; `tick()` returns zero until `setup()` succeeds.
    pub const fn new() -> Self {
        Self {
            kind: IirType::None,
            prm: CoefsQ24 {
                u01: Iq24::ZERO,
                u21: Iq24::ZERO,
                uy1: Iq24::ZERO,
                y12: Iq24::ZERO,
                y1: Iq24::ZERO,
            },
            u: [Iq24::ZERO; 3],
            y: [Iq24::ZERO; 3],
        }
    }

    /// Computes the coefficients for `kind` and arms the filter with a zero state.
    ///
    /// On failure the filter is left disarmed (`IirType::None`).
    pub fn setup(&mut self, kind: IirType, usr: &IirUsr) -> Result<(), IirError> {
        self.kind = IirType::None;

        let coefs = Self::discretize(kind, usr)?;

        let prm = CoefsQ24 {
            u01: Iq24::from_f32(coefs.u01),
            u21: Iq24::from_f32(coefs.u21),
            uy1: Iq24::from_f32(coefs.uy1),
            y12: Iq24::from_f32(coefs.y12),
            y1: Iq24::from_f32(coefs.y1),
        };

        let exact = prm.u01.verify(coefs.u01, COEF_TOLERANCE)
            && prm.u21.verify(coefs.u21, COEF_TOLERANCE)
            && prm.uy1.verify(coefs.uy1, COEF_TOLERANCE)
            && prm.y12.verify(coefs.y12, COEF_TOLERANCE)
            && prm.y1.verify(coefs.y1, COEF_TOLERANCE);
        if !exact {
            warn!("IIR: coefficients do not fit in Q24");
            return Err(IirError::Precision);
        }

        self.prm = prm;
        self.kind = kind;
        self.reset();
        Ok(())
    }

    fn discretize(kind: IirType, usr: &IirUsr) -> Result<Coefs, IirError> {
        if !(usr.ts > 0.0) {
            return Err(IirError::InvalidParameter);
        }
        let tsby2 = usr.ts / 2.0;

        let coefs = match kind {
            IirType::None => return Err(IirError::InvalidType),

            IirType::LeadLag => {
                if !(usr.tll > 0.0) || usr.alpha == 0.0 {
                    return Err(IirError::InvalidParameter);
                }
                let den = 1.0 + usr.tll / tsby2;
                Coefs {
                    u01: (1.0 + (usr.alpha * usr.tll) / tsby2) / den,
                    u21: 0.0,
                    uy1: 2.0 / den,
                    y12: 0.0,
                    y1: 1.0,
                }
            }

            IirType::LowPass => {
                if !(usr.fc > 0.0) {
                    return Err(IirError::InvalidParameter);
                }
                let wc = C_2PI * usr.fc * tsby2;
                let den = 1.0 + wc;
                Coefs {
                    u01: wc / den,
                    u21: 0.0,
                    uy1: (2.0 * wc) / den,
                    y12: 0.0,
                    y1: 1.0,
                }
            }

            IirType::Bessel | IirType::Butterworth => {
                if !(usr.fc > 0.0) {
                    return Err(IirError::InvalidParameter);
                }
                let (wc, wb) = if kind == IirType::Bessel {
                    let wc = C_SQRT3 * C_2PI * usr.fc * tsby2;
                    (wc, C_SQRT3 * wc)
                } else {
                    let wc = C_2PI * usr.fc * tsby2;
                    (wc, C_SQRT2 * wc)
                };
                let wc2 = wc * wc;
                let den = 1.0 + wb + wc2;
                Coefs {
                    u01: wc2 / den,
                    u21: wc2 / den,
                    uy1: (4.0 * wc2) / den,
                    y12: (1.0 - wb + wc2) / den,
                    y1: 1.0,
                }
            }

            IirType::BandStop | IirType::BandPass => {
                if !(usr.fc > 0.0) || !(usr.fb > 0.0) {
                    return Err(IirError::InvalidParameter);
                }
                let wc = C_2PI * usr.fc * tsby2;
                let wb = C_2PI * usr.fb * tsby2;
                let wc2 = wc * wc;
                let den = 1.0 + wb + wc2;
                if kind == IirType::BandStop {
                    Coefs {
                        u01: (1.0 + wc2) / den,
                        u21: (1.0 + wc2) / den,
                        uy1: (4.0 * wc2) / den,
                        y12: (1.0 - wb + wc2) / den,
                        y1: 1.0,
                    }
                } else {
                    Coefs {
                        u01: wb / den,
                        u21: -wb / den,
                        uy1: 0.0,
                        y12: (1.0 - wb + wc2) / den,
                        y1: (1.0 + wb - 3.0 * wc2) / den,
                    }
                }
            }
        };

        Ok(coefs)
    }

    /// Forces input and output history to zero.
    #[inline(always)]
    pub fn reset(&mut self) {
        self.force(Iq24::ZERO);
    }

    /// Forces input and output history to `u0`.
    pub fn force(&mut self, u0: Iq24) {
        self.u = [u0; 3];
        self.y = [u0; 3];
    }

    /// Runs one filter step and returns the new output.
    pub fn tick(&mut self, u0: Iq24) -> Iq24 {
        let prm = &self.prm;
        self.u[0] = u0;

        self.y[0] = match self.kind {
            IirType::LeadLag | IirType::LowPass => {
                prm.u01.mpy(self.u[0] - self.u[1])
                    + prm.uy1.mpy(self.u[1] - self.y[1])
                    + prm.y1.mpy(self.y[1])
            }
            IirType::Bessel | IirType::Butterworth | IirType::BandStop | IirType::BandPass => {
                prm.u01.mpy(self.u[0] - self.u[1])
                    + prm.u21.mpy(self.u[2] - self.u[1])
                    + prm.uy1.mpy(self.u[1] - self.y[1])
                    + prm.y12.mpy(self.y[1] - self.y[2])
                    + prm.y1.mpy(self.y[1])
            }
            IirType::None => Iq24::ZERO,
        };

        // Shift memory elements
        self.u[2] = self.u[1];
        self.u[1] = self.u[0];
        self.y[2] = self.y[1];
        self.y[1] = self.y[0];

        self.y[0]
    }

    /// Last filter output.
    #[inline(always)]
    pub fn output(&self) -> Iq24 {
        self.y[0]
    }

    /// Armed filter response (`IirType::None` when not set up).
    #[inline(always)]
    pub fn kind(&self) -> IirType {
        self.kind
    }
}
