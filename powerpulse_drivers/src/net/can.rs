// Implements CAN frame types, acceptance filtering and the bit timing search.

// Key Features:
// - Extended (29-bit) frames with up to 8 data bytes
// - Acceptance filter: (rx_id ^ id) & mask == 0
// - Bit timing search over controller limits minimizing the bit rate error

// Detailed Operation:
// The bit timing search walks the allowed number of time quanta per bit. For every candidate
// the prescaler is rounded to the nearest integer, the resulting bit rate error is computed and
// the remaining segments are split around the sample point: tSeg2 takes half of the time after
// sync and propagation (clamped), tSeg1 takes the rest plus propagation. The first candidate
// with the lowest error wins; an exact match stops the search.

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

use super::{NetConfig, NetError};

pub const CAN_ID_MASK: u32 = 0x1FFF_FFFF;
pub const CAN_DATA_MAX: usize = 8;

const T_SYNC: u16 = 1;
const T_PROP: u16 = 2;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanFrame {
    pub id: u32,                   // Extended identifier (29 bits)
    pub len: u16,                  // Data length (bytes)
    pub data: [u8; CAN_DATA_MAX], // Data buffer
}

impl CanFrame {
    /// Builds a frame; `None` when the payload is longer than 8 bytes.
    pub fn new(id: u32, payload: &[u8]) -> Option<Self> {
        if payload.len() > CAN_DATA_MAX {
            return None;
        }
        let mut data = [0u8; CAN_DATA_MAX];
        data[..payload.len()].copy_from_slice(payload);
        Some(Self {
            id: id & CAN_ID_MASK,
            len: payload.len() as u16,
            data,
        })
    }

    #[inline(always)]
    pub fn payload(&self) -> &[u8] {
        &self.data[..(self.len as usize).min(CAN_DATA_MAX)]
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanUsr {
    pub bitrate: u32, // Communication speed (bps)
    pub id: u32,      // Acceptance filter identifier
    pub mask: u32,    // Acceptance filter mask, 0 accepts everything
}

impl Default for CanUsr {
    fn default() -> Self {
        Self {
            bitrate: 500_000,
            id: 0,
            mask: 0,
        }
    }
}

impl NetConfig for CanUsr {
    fn validate(&self) -> Result<(), NetError> {
        if self.bitrate == 0 {
            return Err(NetError::InvalidConfig);
        }
        Ok(())
    }
}

impl CanUsr {
    #[inline(always)]
    pub fn accepts(&self, id: u32) -> bool {
        can_accept(id, self.id, self.mask)
    }
}

/// True when `rx_id` matches `id` on every bit set in `mask`.
#[inline(always)]
pub const fn can_accept(rx_id: u32, id: u32, mask: u32) -> bool {
    ((rx_id ^ id) & mask) == 0
}

/// Controller limits as inclusive `[min, max]` ranges.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CanBtl {
    pub nq: [u16; 2],    // Time quanta per bit
    pub brp: [u16; 2],   // Baud rate prescaler
    pub tseg1: [u16; 2], // Time segment before the sample point
    pub tseg2: [u16; 2], // Time segment after the sample point
    pub sjw: [u16; 2],   // Synchronization jump width
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanBtp {
    pub nq: u16,
    pub brp: u16,
    pub tprop: u16,
    pub tseg1: u16,
    pub tseg2: u16,
    pub sjw: u16,
    pub sp: u16,  // Sample point (%)
    pub err: u16, // Absolute bit rate error (%)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CanTiming {
    Exact(CanBtp),
    /// Closest reachable bit rate
    Approx(CanBtp),
}

impl CanTiming {
    pub fn btp(&self) -> &CanBtp {
        match self {
            CanTiming::Exact(btp) | CanTiming::Approx(btp) => btp,
        }
    }
}

#[inline(always)]
fn div_round(num: u32, den: u32) -> u32 {
    (num + den / 2) / den
}

/// Searches bit timing parameters for `bitrate` on a controller clocked at `clk`.
pub fn can_bit_timing(btl: &CanBtl, clk: u32, bitrate: u32) -> Result<CanTiming, NetError> {
    if clk == 0 || bitrate == 0 {
        return Err(NetError::InvalidConfig);
    }

    let mut best: Option<(CanBtp, u32)> = None;

    for nq in btl.nq[0]..=btl.nq[1] {
        if nq <= T_SYNC + T_PROP {
            continue;
        }
        let quanta = nq as u32 * bitrate;
        let brp = div_round(clk, quanta);
        if brp < btl.brp[0] as u32 || brp > btl.brp[1] as u32 || brp == 0 {
            continue;
        }

        let actual = div_round(clk, nq as u32 * brp);
        let error = bitrate.abs_diff(actual);
        if matches!(best, Some((_, best_error)) if error >= best_error) {
            continue;
        }

        let tseg = nq - (T_SYNC + T_PROP);
        let tseg2 = (tseg / 2).clamp(btl.tseg2[0], btl.tseg2[1]);
        let Some(rest) = tseg.checked_sub(tseg2) else {
            continue;
        };
        let tseg1 = rest + T_PROP;
        if tseg1 < btl.tseg1[0] || tseg1 > btl.tseg1[1] {
            continue;
        }
        let sjw = tseg2.clamp(btl.sjw[0], btl.sjw[1]);

        let btp = CanBtp {
            nq,
            brp: brp as u16,
            tprop: T_PROP,
            tseg1,
            tseg2,
            sjw,
            sp: div_round((1 + tseg1 as u32) * 100, nq as u32) as u16,
            err: div_round(error * 100, bitrate) as u16,
        };
        best = Some((btp, error));

        if error == 0 {
            break;
        }
    }

    match best {
        Some((btp, 0)) => Ok(CanTiming::Exact(btp)),
        Some((btp, _)) => Ok(CanTiming::Approx(btp)),
        None => {
            warn!("CAN: no bit timing for {} bps at {} Hz", bitrate, clk);
            Err(NetError::InvalidConfig)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Limits of a classic bxCAN-like controller
    const BTL: CanBtl = CanBtl {
        nq: [8, 25],
        brp: [1, 64],
        tseg1: [1, 16],
        tseg2: [1, 8],
        sjw: [1, 4],
    };

    #[test]
    fn test_frame_new() {
        let frame = CanFrame::new(0xFFFF_FFFF, &[1, 2, 3]);
        assert!(frame.is_some());
        if let Some(frame) = frame {
            assert_eq!(frame.id, CAN_ID_MASK);
            assert_eq!(frame.payload(), &[1, 2, 3]);
        }
        assert!(CanFrame::new(0x100, &[0; 9]).is_none());
    }

    #[test]
    fn test_acceptance_filter() {
        let usr = CanUsr {
            bitrate: 250_000,
            id: 0x0012_0000,
            mask: 0x00FF_0000,
        };
        assert!(usr.accepts(0x0012_ABCD));
        assert!(!usr.accepts(0x0013_ABCD));
        assert!(can_accept(0x1234, 0x4321, 0));
    }

    #[test]
    fn test_usr_validation() {
        assert!(CanUsr::default().validate().is_ok());
        let usr = CanUsr {
            bitrate: 0,
            ..Default::default()
        };
        assert_eq!(usr.validate(), Err(NetError::InvalidConfig));
    }

    #[test]
    fn test_bit_timing_exact() {
        // 60 MHz / 500 kbps = 120 quanta -> nq 8, brp 15 is the first exact split
        let timing = can_bit_timing(&BTL, 60_000_000, 500_000);
        let Ok(CanTiming::Exact(btp)) = timing else {
            panic!("expected an exact timing, got {:?}", timing);
        };
        assert_eq!(btp.nq, 8);
        assert_eq!(btp.brp, 15);
        assert_eq!(btp.tseg2, 2);
        assert_eq!(btp.tseg1, 5);
        assert_eq!(btp.sjw, 2);
        assert_eq!(btp.sp, 75);
        assert_eq!(btp.err, 0);
        assert_eq!(T_SYNC + btp.tseg1 + btp.tseg2, btp.nq);
    }

    #[test]
    fn test_bit_timing_approx_and_failure() {
        // 10 MHz / 115 kbps has no integer split
        let timing = can_bit_timing(&BTL, 10_000_000, 115_000);
        assert!(matches!(timing, Ok(CanTiming::Approx(_))));
        if let Ok(timing) = timing {
            assert!(timing.btp().err <= 2);
        }

        // Prescaler limits make 10 kbps unreachable at 80 MHz
        let narrow = CanBtl { brp: [1, 4], ..BTL };
        assert_eq!(can_bit_timing(&narrow, 80_000_000, 10_000), Err(NetError::InvalidConfig));
        assert_eq!(can_bit_timing(&BTL, 0, 500_000), Err(NetError::InvalidConfig));
    }
}
