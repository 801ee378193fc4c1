// Implements the I2C transport on top of an `embedded-hal` I2C bus.

// Key Features:
// - Two I/O pins (SDA, SCL) reserved through the net lifecycle
// - Each frame is one bus transaction addressed to a 7-bit slave
// - Consecutive writes inside a frame go out without a repeated START

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

use embedded_hal::i2c::{I2c, Operation};

use super::{NetConfig, NetDriver, NetError, NetTransfer, NetType};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct I2cUsr {
    pub bitrate: u32,  // Communication speed (bps)
    pub bitcount: u16, // Bits per data byte (1..8)
}

impl Default for I2cUsr {
    fn default() -> Self {
        Self {
            bitrate: 400_000,
            bitcount: 8,
        }
    }
}

impl NetConfig for I2cUsr {
    fn validate(&self) -> Result<(), NetError> {
        if self.bitrate == 0 || !(1..=8).contains(&self.bitcount) {
            return Err(NetError::InvalidConfig);
        }
        Ok(())
    }
}

/// One transaction: `ops` run back to back on the slave at `address`.
pub struct I2cFrame<'f, 'o> {
    pub address: u8,
    pub ops: &'f mut [Operation<'o>],
}

pub struct I2cNet<B> {
    bus: B,
    io: [u16; 2], // SDA, SCL
    bitrate: u32,
}

impl<B: I2c> I2cNet<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            io: [0; 2],
            bitrate: 0,
        }
    }

    #[inline(always)]
    pub fn io(&self) -> [u16; 2] {
        self.io
    }

    #[inline(always)]
    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn release(self) -> B {
        self.bus
    }

    fn run(&mut self, frames: &mut [I2cFrame<'_, '_>]) -> nb::Result<(), NetError> {
        for frame in frames.iter_mut() {
            if frame.ops.is_empty() {
                continue;
            }
            self.bus.transaction(frame.address, &mut *frame.ops).map_err(|_| {
                debug!("I2C: transaction to {} failed", frame.address);
                nb::Error::Other(NetError::Bus)
            })?;
        }
        Ok(())
    }
}

impl<B: I2c> NetDriver for I2cNet<B> {
    type Usr = I2cUsr;
    const TYPE: NetType = NetType::I2c;
    const IO: usize = 2;

    fn open(&mut self, usr: &I2cUsr) -> Result<(), NetError> {
        // The bus arrives configured; only the requested rate is kept for reference
        self.bitrate = usr.bitrate;
        Ok(())
    }

    fn close(&mut self) -> Result<(), NetError> {
        self.bitrate = 0;
        Ok(())
    }

    fn connect(&mut self, io: &[u16]) -> Result<(), NetError> {
        self.io.copy_from_slice(io);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), NetError> {
        self.io = [0; 2];
        Ok(())
    }
}

impl<'f, 'o, B: I2c> NetTransfer<I2cFrame<'f, 'o>> for I2cNet<B> {
    fn read(&mut self, frames: &mut [I2cFrame<'f, 'o>]) -> nb::Result<(), NetError> {
        self.run(frames)
    }

    fn write(&mut self, frames: &mut [I2cFrame<'f, 'o>]) -> nb::Result<(), NetError> {
        self.run(frames)
    }
}
