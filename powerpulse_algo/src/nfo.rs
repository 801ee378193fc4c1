// Implements module information: device identifier, hardware data, bus address and firmware
// version/timestamp packed for transmission as 16-bit words.

// Detailed Operation:
// Firmware version (a 32-bit commit hash) and build timestamp (Unix epoch) are rendered as
// 14-character strings, "1234abcd" padded with NULs and "%Y%m%d%H%M%S" respectively, and
// packed two characters per word, low byte first, into seven 16-bit words.
// The registry holds the application and the bootloader records; which one a module
// identifier resolves to depends on whether the image is the bootloader.

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

/// Default serial number.
pub const NFO_SN_DEFAULT: u32 = 0x00C0_FFEE;
/// Default hardware revision and variant.
pub const NFO_HW_DEFAULT: u16 = 0x00FF;
/// Characters in a version or timestamp string.
pub const NFO_STR_LEN: usize = 14;
/// Largest bus address (exclusive) and stack size (inclusive).
pub const NFO_ADDRESS_MAX: u16 = 32;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NfoError {
    /// Identifier already set to a different module
    IdMismatch,
    /// Address or stack size out of range
    InvalidAddress,
}

/// Module identifier.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum NfoId {
    #[default]
    None = 0x00,
    Boot = 0xAA,
    Lf45 = 0x01,     // Line filter (45 A)
    Up25 = 0x02,     // Unidirectional PFC/boost converter (25 kW)
    Ll25 = 0x03,     // Unidirectional LLC converter (25 kW)
    Bc25 = 0x04,     // Unidirectional buck converter (25 kW)
    Bp25 = 0x07,     // Bidirectional PFC/AFE converter (25 kW)
    Bi25 = 0x08,     // Bidirectional isolated converter (25 kW)
    Sfra = 0x09,     // Software frequency response analyzer
    Dlog = 0x0A,     // Advanced diagnostics
    Logging = 0x0B,  // Text log over CAN
    Vg11Fm01 = 0x0C, // Bidirectional charger (11 kW), primary side
    Vg11Fm02 = 0x0D, // Bidirectional charger (11 kW), secondary side
    Cb01 = 0x0E,     // Combiner board
    Tbt = 0x10,      // Thermal bar tester
    Fan1 = 0x11,     // Fan controller
    Tbte = 0x12,     // ADC test board
    Fp = 0x42,       // Front panel
}

impl NfoId {
    #[inline(always)]
    pub const fn code(self) -> u16 {
        self as u16
    }

    pub const fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0x00 => NfoId::None,
            0xAA => NfoId::Boot,
            0x01 => NfoId::Lf45,
            0x02 => NfoId::Up25,
            0x03 => NfoId::Ll25,
            0x04 => NfoId::Bc25,
            0x07 => NfoId::Bp25,
            0x08 => NfoId::Bi25,
            0x09 => NfoId::Sfra,
            0x0A => NfoId::Dlog,
            0x0B => NfoId::Logging,
            0x0C => NfoId::Vg11Fm01,
            0x0D => NfoId::Vg11Fm02,
            0x0E => NfoId::Cb01,
            0x10 => NfoId::Tbt,
            0x11 => NfoId::Fan1,
            0x12 => NfoId::Tbte,
            0x42 => NfoId::Fp,
            _ => return None,
        })
    }
}

/// Module information record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Nfo {
    pub id: NfoId,
    pub serial: u32,
    pub version: [u16; 7],   // Commit hash, packed
    pub timestamp: [u16; 7], // Build time %Y%m%d%H%M%S, packed
    pub variant: u16,
    pub revision: u16,
    pub address: u16,
    pub stack_size: u16,
}

impl Nfo {
    pub const fn new(id: NfoId) -> Self {
        Self {
            id,
            serial: NFO_SN_DEFAULT,
            version: [0; 7],
            timestamp: [0; 7],
            variant: NFO_HW_DEFAULT,
            revision: NFO_HW_DEFAULT,
            address: 0,
            stack_size: 1,
        }
    }

    /// Stamps the firmware version hash and build epoch.
    pub fn set_firmware(&mut self, version: u32, epoch: u32) {
        self.version = pack(&version_str(version));
        self.timestamp = pack(&timestamp_str(epoch));
    }

    /// Sets identifier and hardware data. Returns whether anything changed.
    pub fn set_hardware(&mut self, id: NfoId, revision: u16, variant: u16) -> Result<bool, NfoError> {
        if self.id != id && self.id != NfoId::None {
            return Err(NfoError::IdMismatch);
        }
        if self.id == id && self.revision == revision && self.variant == variant {
            return Ok(false);
        }
        self.id = id;
        self.revision = revision;
        self.variant = variant;
        Ok(true)
    }

    /// Sets the bus address. Returns whether anything changed.
    pub fn set_address(&mut self, address: u16, stack_size: u16) -> Result<bool, NfoError> {
        if address >= NFO_ADDRESS_MAX || stack_size == 0 || stack_size > NFO_ADDRESS_MAX {
            return Err(NfoError::InvalidAddress);
        }
        if self.address == address && self.stack_size == stack_size {
            return Ok(false);
        }
        self.address = address;
        self.stack_size = stack_size;
        Ok(true)
    }
}

/// Application and bootloader records of one image.
pub struct NfoRegistry {
    app: Nfo,
    boot: Nfo,
    bootloader: bool, // Image is the bootloader
}

impl NfoRegistry {
    pub fn new(bootloader: bool, version: u32, epoch: u32) -> Self {
        let mut registry = Self {
            app: Nfo::new(NfoId::None),
            boot: Nfo::new(NfoId::Boot),
            bootloader,
        };
        if bootloader {
            registry.boot.set_firmware(version, epoch);
        } else {
            registry.app.set_firmware(version, epoch);
        }
        registry
    }

    /// Record describing module `id`.
    ///
    /// The application image resolves BOOT to the bootloader record and any other identifier
    /// to its own record, which takes `id`. The bootloader resolves NONE to the application
    /// record and anything else to its own.
    pub fn get(&mut self, id: NfoId) -> &mut Nfo {
        if self.bootloader {
            if id == NfoId::None {
                &mut self.app
            } else {
                &mut self.boot
            }
        } else if id == NfoId::Boot {
            &mut self.boot
        } else {
            self.app.id = id;
            &mut self.app
        }
    }
}

/// Splits a word into two characters, low byte first.
#[inline(always)]
pub fn unpack16(data: u16) -> [u8; 2] {
    data.to_le_bytes()
}

#[inline(always)]
fn pack16(data: [u8; 2]) -> u16 {
    u16::from_le_bytes(data)
}

fn pack(source: &[u8; NFO_STR_LEN]) -> [u16; 7] {
    let mut target = [0u16; 7];
    for (word, pair) in target.iter_mut().zip(source.chunks_exact(2)) {
        *word = pack16([pair[0], pair[1]]);
    }
    target
}

/// Unpacks a version or timestamp into its 14 characters.
pub fn firmware_unpack16(source: &[u16; 7]) -> [u8; NFO_STR_LEN] {
    let mut target = [0u8; NFO_STR_LEN];
    for (pair, &word) in target.chunks_exact_mut(2).zip(source.iter()) {
        pair.copy_from_slice(&unpack16(word));
    }
    target
}

/// Lower-case hex digits of `version`, NUL padded.
fn version_str(version: u32) -> [u8; NFO_STR_LEN] {
    let mut buffer = [0u8; NFO_STR_LEN];
    for i in 0..8 {
        let digit = ((version >> (4 * i)) & 0xF) as u8;
        buffer[7 - i] = if digit < 10 { b'0' + digit } else { b'a' + digit - 10 };
    }
    buffer
}

fn is_leap(year: u32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Unix epoch as "%Y%m%d%H%M%S".
fn timestamp_str(epoch: u32) -> [u8; NFO_STR_LEN] {
    const DAYS_IN_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

    let second = epoch % 60;
    let minute = (epoch / 60) % 60;
    let hour = (epoch / 3600) % 24;
    let mut day = epoch / 86400 + 1; // 1-based day counter

    let mut year = 1970;
    loop {
        let days = if is_leap(year) { 366 } else { 365 };
        if day <= days {
            break;
        }
        day -= days;
        year += 1;
    }

    let mut month = 1;
    for (index, &days) in DAYS_IN_MONTH.iter().enumerate() {
        let days = if index == 1 && is_leap(year) { days + 1 } else { days };
        if day <= days {
            break;
        }
        day -= days;
        month += 1;
    }

    let mut buffer = [b'0'; NFO_STR_LEN];
    let fields = [(year, 4), (month, 2), (day, 2), (hour, 2), (minute, 2), (second, 2)];
    let mut end = 0;
    for (mut value, width) in fields {
        end += width;
        for slot in buffer[end - width..end].iter_mut().rev() {
            *slot = b'0' + (value % 10) as u8;
            value /= 10;
        }
    }
    buffer
}
