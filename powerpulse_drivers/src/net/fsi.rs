// Implements the FSI (fast serial interface) transport and its link handshake.

// Key Features:
// - Frames of 16 data words tagged with a 16-bit id
// - Master and slave handshake over ping tags 0 and 1 before data may flow
// - Automatic ping with watchdog once operational; a lost link restarts the handshake

// Detailed Operation:
// `run()` is called at 1 kHz and advances the handshake:
//   Master: IDLE sends TAG0 -> WAIT_TAG_0 answers a TAG0 with TAG1 -> WAIT_TAG_1 resends TAG1
//           every 200 ms until a TAG1 arrives -> OPERATION
//   Slave:  IDLE -> WAIT_TAG_0 echoes TAG0 -> WAIT_TAG_1 re-echoes TAG0 every 200 ms until a
//           TAG1 arrives, echoes it -> EXTRA_WAIT (one tick) -> OPERATION
// Each waiting state gives up after 200 ms without progress on TAG0, and the whole handshake
// after 1 s. Frames only move in OPERATION; before that transfers report `WouldBlock`.

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

use super::{Net, NetConfig, NetDriver, NetError, NetTransfer, NetType};

pub const FSI_FRAME_WORDS: usize = 16;

/// Handshake budget in `run()` calls (1 s at 1 kHz).
pub const FSI_HANDSHAKE_TIMEOUT: u32 = 1000;

/// Per-state budget in `run()` calls (200 ms at 1 kHz).
pub const FSI_STATE_TIMEOUT: u32 = 200;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FsiType {
    #[default]
    Master,
    Slave,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FsiState {
    #[default]
    Idle,
    HandshakeWaitTag0,
    HandshakeWaitTag1,
    HandshakeExtraWait,
    Operation,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FsiTag {
    Tag0,
    Tag1,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FsiUsr {
    pub kind: FsiType,
    pub clk_freq: u32, // TX clock (Hz)
    pub trg_src: u16,  // Trigger source of the ping frame
}

impl NetConfig for FsiUsr {
    fn validate(&self) -> Result<(), NetError> {
        if self.clk_freq == 0 {
            return Err(NetError::InvalidConfig);
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FsiFrame {
    pub id: u16,
    pub len: u16,
    pub data: [u16; FSI_FRAME_WORDS],
}

/// FSI peripheral primitives provided by the platform.
pub trait FsiLink {
    /// Configures the controller for `usr`.
    fn setup(&mut self, usr: &FsiUsr) -> Result<(), NetError>;
    /// Software triggered pings, watchdog off.
    fn set_sw_mode(&mut self);
    /// Hardware triggered pings with the RX ping watchdog armed.
    fn set_ping_mode(&mut self);
    fn flush(&mut self);
    fn send_ping(&mut self, tag: FsiTag);
    /// Consumes pending RX events; true when they were exactly one ping with `tag`.
    fn ping_received(&mut self, tag: FsiTag) -> bool;
    fn watchdog_expired(&mut self) -> bool;
    /// RX error events that need a controller reset.
    fn needs_reset(&mut self) -> bool;
    fn reset(&mut self);
    fn transmit(&mut self, frame: &FsiFrame) -> nb::Result<(), NetError>;
    fn receive(&mut self) -> nb::Result<FsiFrame, NetError>;
}

pub struct Fsi<L> {
    link: L,
    kind: FsiType,
    state: FsiState,
    timeout: u32,       // Ticks since the handshake started
    timeout_local: u32, // Ticks since the last handshake step
    io: [u16; 4],       // TX clock, TX data 0, RX clock, RX data 0
}

impl<L: FsiLink> Fsi<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            kind: FsiType::Master,
            state: FsiState::Idle,
            timeout: 0,
            timeout_local: 0,
            io: [0; 4],
        }
    }

    #[inline(always)]
    pub fn state(&self) -> FsiState {
        self.state
    }

    #[inline(always)]
    pub fn io(&self) -> [u16; 4] {
        self.io
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    fn enter(&mut self, state: FsiState) {
        if state != self.state {
            info!("FSI: state {} -> {}", self.state as u8, state as u8);
        }
        self.state = state;
    }

    fn restart(&mut self) {
        self.timeout = 0;
        self.timeout_local = 0;
        self.enter(FsiState::HandshakeWaitTag0);
    }

    /// Advances the link state machine by one tick.
    fn step(&mut self) -> FsiState {
        match self.state {
            FsiState::Idle => {
                self.link.set_sw_mode();
                if self.kind == FsiType::Master {
                    self.link.flush();
                    self.link.send_ping(FsiTag::Tag0);
                }
                self.restart();
            }
            FsiState::HandshakeWaitTag0 | FsiState::HandshakeWaitTag1 | FsiState::HandshakeExtraWait => {
                match self.kind {
                    FsiType::Master => self.handshake_master(),
                    FsiType::Slave => self.handshake_slave(),
                }
            }
            FsiState::Operation => self.operation(),
        }
        self.state
    }

    fn operation(&mut self) {
        if self.link.watchdog_expired() {
            warn!("FSI: ping watchdog expired");
            self.enter(FsiState::Idle);
        } else if self.link.needs_reset() {
            warn!("FSI: RX error, resetting");
            self.link.reset();
            self.enter(FsiState::Idle);
        }
    }

    fn handshake_master(&mut self) {
        self.timeout += 1;
        self.timeout_local += 1;

        match self.state {
            FsiState::HandshakeWaitTag0 => {
                if self.timeout > FSI_HANDSHAKE_TIMEOUT || self.timeout_local > FSI_STATE_TIMEOUT {
                    self.enter(FsiState::Idle);
                } else if self.link.ping_received(FsiTag::Tag0) {
                    self.link.send_ping(FsiTag::Tag1);
                    self.timeout_local = 0;
                    self.enter(FsiState::HandshakeWaitTag1);
                }
            }
            FsiState::HandshakeWaitTag1 => {
                if self.timeout > FSI_HANDSHAKE_TIMEOUT {
                    self.enter(FsiState::Idle);
                } else if self.timeout_local > FSI_STATE_TIMEOUT {
                    self.link.send_ping(FsiTag::Tag1);
                    self.timeout_local = 0;
                } else if self.link.ping_received(FsiTag::Tag1) {
                    self.link.set_ping_mode();
                    self.enter(FsiState::Operation);
                }
            }
            // Master has no extra wait
            _ => self.enter(FsiState::Operation),
        }
    }

    fn handshake_slave(&mut self) {
        self.timeout += 1;
        self.timeout_local += 1;

        match self.state {
            FsiState::HandshakeWaitTag0 => {
                if self.timeout > FSI_HANDSHAKE_TIMEOUT || self.timeout_local > FSI_STATE_TIMEOUT {
                    self.enter(FsiState::Idle);
                } else if self.link.ping_received(FsiTag::Tag0) {
                    self.link.flush();
                    self.link.send_ping(FsiTag::Tag0);
                    self.timeout_local = 0;
                    self.enter(FsiState::HandshakeWaitTag1);
                }
            }
            FsiState::HandshakeWaitTag1 => {
                if self.timeout > FSI_HANDSHAKE_TIMEOUT {
                    self.enter(FsiState::Idle);
                } else if self.timeout_local > FSI_STATE_TIMEOUT {
                    self.link.flush();
                    self.link.send_ping(FsiTag::Tag0);
                    self.timeout_local = 0;
                } else if self.link.ping_received(FsiTag::Tag1) {
                    self.link.send_ping(FsiTag::Tag1);
                    self.link.set_ping_mode();
                    // One more tick so the application does not write into the handshake
                    self.enter(FsiState::HandshakeExtraWait);
                }
            }
            _ => self.enter(FsiState::Operation),
        }
    }
}

impl<L: FsiLink> NetDriver for Fsi<L> {
    type Usr = FsiUsr;
    const TYPE: NetType = NetType::Fsi;
    const IO: usize = 4;

    fn open(&mut self, usr: &FsiUsr) -> Result<(), NetError> {
        self.link.setup(usr)?;
        self.kind = usr.kind;
        self.state = FsiState::Idle;
        Ok(())
    }

    fn close(&mut self) -> Result<(), NetError> {
        self.link.set_sw_mode();
        self.state = FsiState::Idle;
        Ok(())
    }

    fn connect(&mut self, io: &[u16]) -> Result<(), NetError> {
        self.io.copy_from_slice(io);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), NetError> {
        self.io = [0; 4];
        Ok(())
    }
}

impl<L: FsiLink> NetTransfer<FsiFrame> for Fsi<L> {
    fn read(&mut self, frames: &mut [FsiFrame]) -> nb::Result<(), NetError> {
        if self.state != FsiState::Operation {
            return Err(nb::Error::WouldBlock);
        }
        for frame in frames.iter_mut() {
            *frame = self.link.receive()?;
        }
        Ok(())
    }

    fn write(&mut self, frames: &mut [FsiFrame]) -> nb::Result<(), NetError> {
        if self.state != FsiState::Operation {
            return Err(nb::Error::WouldBlock);
        }
        for frame in frames.iter() {
            self.link.transmit(frame)?;
        }
        Ok(())
    }
}

impl<L: FsiLink> Net<Fsi<L>> {
    /// Runs one handshake/supervision tick; call at 1 kHz.
    pub fn run(&mut self) -> Result<FsiState, NetError> {
        if !self.is_open() {
            return Err(NetError::NotOpen);
        }
        Ok(self.driver_mut().step())
    }
}
