// Communication layer for power converter firmware.

// Key Features:
// - Uniform net abstraction over CAN, I2C, EEPROM, Flash and FSI transports
// - CAN bit timing search and sector-map range checks for on-chip Flash
// - CAN and FSI message databases bound to the application's top-level object

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

#![cfg_attr(not(feature = "std"), no_std)]

// This mod MUST go first, so that the others see its macros.
mod fmt;

pub mod crc;
pub mod db;
pub mod net;

pub use db::{db_run, Database, DbError, DbId, DbMsg, DbPayload, DbTable};
pub use net::can::{can_bit_timing, CanFrame, CanUsr};
pub use net::flash::{flash_check, FlashSector};
pub use net::{Net, NetDriver, NetError, NetTransfer, NetType};
