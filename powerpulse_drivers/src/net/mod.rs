// Implements the transport-independent network object shared by every communication driver.

// Key Features:
// - One lifecycle for CAN, I2C, EEPROM, Flash and FSI: connect -> open -> read/write -> close -> disconnect
// - Transport drivers plug in through `NetDriver` (lifecycle) and `NetTransfer<F>` (frames)
// - Transfers follow the `nb` convention: `Ok` moved data, `WouldBlock` nothing to move right now

// Detailed Operation:
// `Net<D>` owns the driver and tracks the `open` and `connect` flags. The wrapper rejects any call
// that does not fit the current state before the driver sees it:
//   connect:    not yet connected, exactly `D::IO` pins given
//   open:       connected, configuration accepted by `NetConfig::validate`
//   read/write: open, at least one frame
//   close:      open
//   disconnect: connected and closed
// Drivers without I/O pins (`D::IO == 0`) start connected and ignore connect/disconnect.

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

pub mod can;
pub mod eeprom;
pub mod flash;
pub mod fsi;
pub mod i2c;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetType {
    #[default]
    None,
    Can,
    I2c,
    Flash,
    Eeprom,
    File,
    Spi,
    Fsi,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetError {
    /// Operation requires connected I/O pins
    NotConnected,
    AlreadyConnected,
    /// Operation requires an opened driver
    NotOpen,
    /// Disconnect requested while the driver is still open
    StillOpen,
    /// Wrong number of I/O pins for this transport
    InvalidIo,
    /// Empty frame list
    Empty,
    /// Configuration rejected before reaching the driver
    InvalidConfig,
    /// Address range outside of the accessible memory
    InvalidAddress,
    /// Driver or bus level failure
    Bus,
}

/// Driver configuration passed to `open`.
pub trait NetConfig {
    fn validate(&self) -> Result<(), NetError> {
        Ok(())
    }
}

impl NetConfig for () {}

/// Lifecycle half of a transport driver.
pub trait NetDriver {
    type Usr: NetConfig;

    const TYPE: NetType;

    /// Number of I/O pins reserved by `connect`, 0 when the transport has none.
    const IO: usize;

    fn open(&mut self, usr: &Self::Usr) -> Result<(), NetError>;

    fn close(&mut self) -> Result<(), NetError>;

    fn connect(&mut self, _io: &[u16]) -> Result<(), NetError> {
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), NetError> {
        Ok(())
    }
}

/// Frame half of a transport driver; one driver may move several frame kinds.
pub trait NetTransfer<F>: NetDriver {
    fn read(&mut self, frames: &mut [F]) -> nb::Result<(), NetError>;

    fn write(&mut self, frames: &mut [F]) -> nb::Result<(), NetError>;
}

pub struct Net<D: NetDriver> {
    drv: D,
    open: bool,
    connect: bool,
}

impl<D: NetDriver> Net<D> {
    pub fn new(drv: D) -> Self {
        Self {
            drv,
            open: false,
            connect: D::IO == 0,
        }
    }

    #[inline(always)]
    pub fn kind(&self) -> NetType {
        D::TYPE
    }

    #[inline(always)]
    pub fn is_open(&self) -> bool {
        self.open
    }

    #[inline(always)]
    pub fn is_connected(&self) -> bool {
        self.connect
    }

    /// Reserves the transport I/O pins.
    pub fn connect(&mut self, io: &[u16]) -> Result<(), NetError> {
        if D::IO == 0 {
            return Ok(());
        }
        if self.connect {
            return Err(NetError::AlreadyConnected);
        }
        if io.len() != D::IO {
            return Err(NetError::InvalidIo);
        }

        self.drv.connect(io)?;
        self.connect = true;
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<(), NetError> {
        if D::IO == 0 {
            return Ok(());
        }
        if !self.connect {
            return Err(NetError::NotConnected);
        }
        if self.open {
            return Err(NetError::StillOpen);
        }

        // Pins are released even when the driver reports a failure
        self.connect = false;
        self.drv.disconnect()
    }

    pub fn open(&mut self, usr: &D::Usr) -> Result<(), NetError> {
        if !self.connect {
            return Err(NetError::NotConnected);
        }
        usr.validate()?;

        match self.drv.open(usr) {
            Ok(()) => {
                self.open = true;
                Ok(())
            }
            Err(e) => {
                warn!("Net {}: open failed", D::TYPE as u8);
                self.open = false;
                Err(e)
            }
        }
    }

    pub fn close(&mut self) -> Result<(), NetError> {
        if !self.open {
            return Err(NetError::NotOpen);
        }
        self.open = false;
        self.drv.close()
    }

    pub fn read<F>(&mut self, frames: &mut [F]) -> nb::Result<(), NetError>
    where
        D: NetTransfer<F>,
    {
        self.check(frames.len())?;
        self.drv.read(frames)
    }

    pub fn write<F>(&mut self, frames: &mut [F]) -> nb::Result<(), NetError>
    where
        D: NetTransfer<F>,
    {
        self.check(frames.len())?;
        self.drv.write(frames)
    }

    fn check(&self, count: usize) -> Result<(), NetError> {
        if !self.open {
            return Err(NetError::NotOpen);
        }
        if count == 0 {
            return Err(NetError::Empty);
        }
        Ok(())
    }

    /// Driver access for transport-specific operations.
    #[inline(always)]
    pub fn driver(&self) -> &D {
        &self.drv
    }

    #[inline(always)]
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.drv
    }
}

/// Integer disposition of a transfer: 1 data moved, 0 nothing to move, -1 error.
pub fn disposition(result: &nb::Result<(), NetError>) -> i32 {
    match result {
        Ok(()) => 1,
        Err(nb::Error::WouldBlock) => 0,
        Err(nb::Error::Other(_)) => -1,
    }
}
