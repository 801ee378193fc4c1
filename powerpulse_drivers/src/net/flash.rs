// Implements the on-chip Flash transport and the sector map range check.

// Key Features:
// - Word (16-bit) addressed frames checked against the sector map before reaching the array
// - Sector maps listed in increasing or decreasing address order
// - Sector erase through the opened net

// Detailed Operation:
// `flash_check` walks the map in increasing address order, skipping empty sectors. The range
// is consumed sector by sector: once the start address lands in a sector, the part that fits is
// cut off and the rest must continue in the immediately following sector. A gap, an overlap
// between sectors or running off the map rejects the range.

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

use super::{Net, NetDriver, NetError, NetTransfer, NetType};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashSector {
    pub address: u32, // Sector start address
    pub length: u32,  // Sector length (16-bit words)
}

impl FlashSector {
    pub const fn new(address: u32, length: u32) -> Self {
        Self { address, length }
    }

    #[inline(always)]
    fn end(&self) -> u32 {
        self.address.saturating_add(self.length - 1)
    }
}

/// Flash array primitives provided by the platform.
pub trait FlashArray {
    fn read(&mut self, address: u32, data: &mut [u16]) -> Result<(), NetError>;

    /// Programs `data`; `WouldBlock` while the state machine is busy.
    fn program(&mut self, address: u32, data: &[u16]) -> nb::Result<(), NetError>;

    fn erase(&mut self, sector: &FlashSector) -> Result<(), NetError>;
}

/// True when `[address, address + length)` lies inside the sectors of `map` without crossing a gap.
/// Sector maps carry no access rights, so `_rw` does not change the outcome.
pub fn flash_check(map: &[FlashSector], address: u32, length: u32, _rw: bool) -> bool {
    let count = map.len();
    if count == 0 || length == 0 {
        return false;
    }
    let increasing = map[0].address <= map[count - 1].address;

    let mut address = address;
    let mut length = length;
    let mut end: Option<u32> = None;
    let mut found = false;

    for i in 0..count {
        let sector = if increasing { &map[i] } else { &map[count - 1 - i] };
        if sector.length == 0 {
            continue;
        }
        if matches!(end, Some(end) if sector.address <= end) {
            return false;
        }
        let sector_end = sector.end();
        end = Some(sector_end);

        if address >= sector.address && address <= sector_end {
            found = true;
            let residual = sector_end - address + 1;
            if length <= residual {
                return true;
            }
            let Some(next) = sector_end.checked_add(1) else {
                return false;
            };
            address = next;
            length -= residual;
        } else if found {
            // Rest of the range falls into a gap
            return false;
        }
    }

    false
}

pub struct FlashFrame<'f> {
    pub address: u32,
    pub data: &'f mut [u16],
}

pub struct Flash<A> {
    array: A,
    map: &'static [FlashSector],
}

impl<A: FlashArray> Flash<A> {
    pub fn new(array: A, map: &'static [FlashSector]) -> Self {
        Self { array, map }
    }

    #[inline(always)]
    pub fn map(&self) -> &'static [FlashSector] {
        self.map
    }

    #[inline(always)]
    pub fn check(&self, address: u32, length: u32, rw: bool) -> bool {
        flash_check(self.map, address, length, rw)
    }

    pub fn array(&self) -> &A {
        &self.array
    }

    fn frame_check(&self, frame: &FlashFrame<'_>, rw: bool) -> Result<(), NetError> {
        let length = u32::try_from(frame.data.len()).map_err(|_| NetError::InvalidAddress)?;
        if !self.check(frame.address, length, rw) {
            return Err(NetError::InvalidAddress);
        }
        Ok(())
    }
}

impl<A: FlashArray> NetDriver for Flash<A> {
    type Usr = ();
    const TYPE: NetType = NetType::Flash;
    const IO: usize = 0;

    fn open(&mut self, _usr: &()) -> Result<(), NetError> {
        if self.map.iter().all(|sector| sector.length == 0) {
            return Err(NetError::InvalidConfig);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), NetError> {
        Ok(())
    }
}

impl<'f, A: FlashArray> NetTransfer<FlashFrame<'f>> for Flash<A> {
    fn read(&mut self, frames: &mut [FlashFrame<'f>]) -> nb::Result<(), NetError> {
        for frame in frames.iter_mut() {
            self.frame_check(frame, true)?;
            self.array.read(frame.address, &mut *frame.data)?;
        }
        Ok(())
    }

    fn write(&mut self, frames: &mut [FlashFrame<'f>]) -> nb::Result<(), NetError> {
        for frame in frames.iter() {
            self.frame_check(frame, false)?;
        }
        for frame in frames.iter() {
            self.array.program(frame.address, &*frame.data)?;
        }
        Ok(())
    }
}

impl<A: FlashArray> Net<Flash<A>> {
    /// Erases sector `sector` of the map.
    pub fn erase(&mut self, sector: usize) -> Result<(), NetError> {
        if !self.is_open() {
            return Err(NetError::NotOpen);
        }
        let drv = self.driver_mut();
        let target = drv.map.get(sector).copied().ok_or(NetError::InvalidAddress)?;
        if target.length == 0 {
            return Err(NetError::InvalidAddress);
        }
        info!("Flash: erase sector {}", sector);
        drv.array.erase(&target)
    }
}
