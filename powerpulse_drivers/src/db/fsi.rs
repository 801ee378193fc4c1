// Implements the FSI message database: round-robin producers and CRC checked consumers.

// Detailed Operation:
// Each call emits at most one producer frame and takes at most one received frame. Producers are
// served round-robin starting after the last one sent. A produced frame carries its id in word 14
// and the CRC-16 of words 0..15 in word 15; a received frame is handed to the consumer with the
// same id only when both words check out.

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

use super::{DbError, DbKind};
use crate::crc::crc16_words;
use crate::net::fsi::{FsiFrame, FSI_FRAME_WORDS};
use crate::net::{Net, NetTransfer};

pub const FSI_ID_WORD: usize = 14;
pub const FSI_CRC_WORD: usize = 15;

/// Payload words available to a message.
pub const FSI_PAYLOAD_WORDS: usize = FSI_ID_WORD;

pub struct FsiMsg<T> {
    kind: DbKind,
    pub enable: bool,
    id: u16,
    size: u16, // Frame length (words)
    callback: fn(&mut T, &mut FsiFrame),
}

impl<T> FsiMsg<T> {
    /// `callback` fills words 0..14 of the outgoing frame from the top-level object.
    pub const fn producer(id: u16, size: u16, callback: fn(&mut T, &mut FsiFrame)) -> Self {
        Self {
            kind: DbKind::Producer,
            enable: true,
            id,
            size,
            callback,
        }
    }

    /// `callback` applies a received, checked frame to the top-level object.
    pub const fn consumer(id: u16, size: u16, callback: fn(&mut T, &mut FsiFrame)) -> Self {
        Self {
            kind: DbKind::Consumer,
            enable: true,
            id,
            size,
            callback,
        }
    }
}

#[inline(always)]
fn seal(frame: &mut FsiFrame) {
    frame.data[FSI_ID_WORD] = frame.id;
    frame.data[FSI_CRC_WORD] = crc16_words(&frame.data[..FSI_CRC_WORD]);
}

#[inline(always)]
fn intact(frame: &FsiFrame) -> bool {
    frame.data[FSI_ID_WORD] == frame.id && frame.data[FSI_CRC_WORD] == crc16_words(&frame.data[..FSI_CRC_WORD])
}

pub struct FsiDatabase<T, const N: usize> {
    pub enable: bool,
    counter: usize, // Last producer served
    msgs: [FsiMsg<T>; N],
}

impl<T, const N: usize> FsiDatabase<T, N> {
    pub fn new(msgs: [FsiMsg<T>; N]) -> Result<Self, DbError> {
        if msgs.iter().any(|m| m.size as usize > FSI_FRAME_WORDS) {
            return Err(DbError::InvalidSize);
        }
        Ok(Self {
            enable: true,
            counter: N.saturating_sub(1),
            msgs,
        })
    }

    pub fn msg_mut(&mut self, index: usize) -> Option<&mut FsiMsg<T>> {
        self.msgs.get_mut(index)
    }

    /// Sends the next producer and handles one received frame; call at 1 kHz after `Net::run`.
    pub fn run<D>(&mut self, net: &mut Net<D>, tlo: &mut T) -> Result<(), DbError>
    where
        D: NetTransfer<FsiFrame>,
    {
        if !self.enable || N == 0 {
            return Ok(());
        }

        let start = (self.counter + 1) % N;
        for i in 0..N {
            let j = (start + i) % N;
            let msg = &self.msgs[j];
            if msg.kind != DbKind::Producer || !msg.enable {
                continue;
            }
            self.counter = j;

            let mut frame = FsiFrame {
                id: msg.id,
                len: msg.size,
                data: [0; FSI_FRAME_WORDS],
            };
            (msg.callback)(tlo, &mut frame);
            seal(&mut frame);
            match net.write(core::slice::from_mut(&mut frame)) {
                Ok(()) => {}
                Err(nb::Error::WouldBlock) => trace!("FSI DB: frame {} dropped", frame.id),
                Err(nb::Error::Other(e)) => return Err(DbError::Net(e)),
            }
            break;
        }

        let mut rx = [FsiFrame::default()];
        match net.read(&mut rx) {
            Ok(()) => {}
            Err(nb::Error::WouldBlock) => return Ok(()),
            Err(nb::Error::Other(e)) => return Err(DbError::Net(e)),
        }
        let frame = &mut rx[0];
        if !intact(frame) {
            debug!("FSI DB: bad frame {}", frame.id);
            return Ok(());
        }
        for msg in self.msgs.iter() {
            if msg.kind == DbKind::Consumer && msg.enable && msg.id == frame.id {
                (msg.callback)(tlo, frame);
            }
        }
        Ok(())
    }
}
