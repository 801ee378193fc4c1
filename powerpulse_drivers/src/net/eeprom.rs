// Implements the external EEPROM transport over an opened I2C net.

// Key Features:
// - Byte addressed frames checked against the readable and writable memory blocks
// - Writes limited to a single page, with acknowledge polling while the page is programmed
// - The 32-bit serial number slot stays writable for parts shipped without one

// Detailed Operation:
// Every access starts with the 16-bit memory address (MSB first). Reads follow it with a read
// in the same transaction. Writes append the data without a repeated START, then poll the part
// with address-only writes until it acknowledges again or `wait_us` runs out.

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{I2c, Operation};

use super::i2c::{I2cFrame, I2cNet, I2cUsr};
use super::{Net, NetConfig, NetDriver, NetError, NetTransfer, NetType};

const EEPROM_POLL_US: u32 = 100;

/// Default page size (bytes).
pub const MEM_PAGE: u16 = 64;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MemBlock {
    pub address: u16, // Block start address
    pub length: u16,  // Block length (bytes)
}

/// Memory layout and bus parameters of one EEPROM part.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MemMap {
    pub rd: MemBlock,  // Readable block
    pub wr: MemBlock,  // Writable block
    pub serial: u16,   // Address of the 32-bit serial number
    pub page: u16,     // Page size (bytes), 0 disables the page check
    pub wait_us: u32,  // Page write time
    pub address: u8,   // 8-bit physical bus address
    pub bitrate: u32,  // Bus speed (bps)
}

impl Default for MemMap {
    fn default() -> Self {
        Self {
            rd: MemBlock { address: 0, length: 0x2000 },
            wr: MemBlock { address: 0, length: 0x1F00 },
            serial: 0x1FFC,
            page: MEM_PAGE,
            wait_us: 5000,
            address: 0xA0,
            bitrate: 400_000,
        }
    }
}

impl NetConfig for MemMap {
    fn validate(&self) -> Result<(), NetError> {
        if self.bitrate == 0 || self.address == 0 {
            return Err(NetError::InvalidConfig);
        }
        Ok(())
    }
}

impl MemMap {
    /// True when `length` bytes at `address` may be read (`rw`) or written (`!rw`).
    pub fn check(&self, address: u16, length: u16, rw: bool) -> bool {
        let block = if rw { &self.rd } else { &self.wr };

        if !rw && address == self.serial && length == 4 {
            return true;
        }
        if length == 0 || length > block.length || address < block.address {
            return false;
        }
        if address - block.address > block.length - length {
            return false;
        }
        if !rw && self.page > 0 {
            let last = address as u32 + length as u32 - 1;
            if address as u32 / self.page as u32 != last / self.page as u32 {
                return false;
            }
        }
        true
    }

    #[inline(always)]
    fn slave(&self) -> u8 {
        self.address >> 1
    }
}

pub struct EepromFrame<'f> {
    pub address: u16,
    pub data: &'f mut [u8],
}

pub struct Eeprom<B: I2c, D> {
    i2c: Net<I2cNet<B>>,
    delay: D,
    mem: Option<MemMap>,
}

impl<B: I2c, D: DelayNs> Eeprom<B, D> {
    /// Wraps a connected I2C net; the EEPROM opens and closes it.
    pub fn new(i2c: Net<I2cNet<B>>, delay: D) -> Self {
        Self { i2c, delay, mem: None }
    }

    pub fn release(self) -> Net<I2cNet<B>> {
        self.i2c
    }

    fn access(&mut self, frame: &mut EepromFrame<'_>, rw: bool) -> nb::Result<(), NetError> {
        let mem = self.mem.ok_or(NetError::NotOpen)?;
        if frame.data.len() > u16::MAX as usize || !mem.check(frame.address, frame.data.len() as u16, rw) {
            return Err(nb::Error::Other(NetError::InvalidAddress));
        }

        let header = frame.address.to_be_bytes();
        if rw {
            let mut ops = [Operation::Write(&header), Operation::Read(&mut *frame.data)];
            self.i2c.write(&mut [I2cFrame { address: mem.slave(), ops: &mut ops }])?;
            return Ok(());
        }

        let mut ops = [Operation::Write(&header), Operation::Write(&*frame.data)];
        self.i2c.write(&mut [I2cFrame { address: mem.slave(), ops: &mut ops }])?;
        self.poll(&mem, &header)
    }

    /// Waits for the part to acknowledge after a page write.
    fn poll(&mut self, mem: &MemMap, header: &[u8; 2]) -> nb::Result<(), NetError> {
        let mut waited = 0;
        loop {
            let mut ops = [Operation::Write(header)];
            if self.i2c.write(&mut [I2cFrame { address: mem.slave(), ops: &mut ops }]).is_ok() {
                return Ok(());
            }
            if waited >= mem.wait_us {
                warn!("EEPROM: no acknowledge after {} us", waited);
                return Err(nb::Error::Other(NetError::Bus));
            }
            self.delay.delay_us(EEPROM_POLL_US);
            waited += EEPROM_POLL_US;
        }
    }
}

impl<B: I2c, D: DelayNs> NetDriver for Eeprom<B, D> {
    type Usr = MemMap;
    const TYPE: NetType = NetType::Eeprom;
    const IO: usize = 0;

    fn open(&mut self, usr: &MemMap) -> Result<(), NetError> {
        let i2c = I2cUsr {
            bitrate: usr.bitrate,
            bitcount: 8,
        };
        self.i2c.open(&i2c)?;
        self.mem = Some(*usr);
        Ok(())
    }

    fn close(&mut self) -> Result<(), NetError> {
        self.mem = None;
        self.i2c.close()
    }
}

impl<'f, B: I2c, D: DelayNs> NetTransfer<EepromFrame<'f>> for Eeprom<B, D> {
    fn read(&mut self, frames: &mut [EepromFrame<'f>]) -> nb::Result<(), NetError> {
        for frame in frames.iter_mut() {
            self.access(frame, true)?;
        }
        Ok(())
    }

    fn write(&mut self, frames: &mut [EepromFrame<'f>]) -> nb::Result<(), NetError> {
        for frame in frames.iter_mut() {
            self.access(frame, false)?;
        }
        Ok(())
    }
}
