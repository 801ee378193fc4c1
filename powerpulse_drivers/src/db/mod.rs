// Implements the CAN message database: periodic producers and filtered consumers over one CAN net.

// Key Features:
// - Messages grouped per database sharing an identifier mask and a 1 ms counter period
// - Consumers matched on message id, length and device/address overlay
// - Producers emitted on `counter % period == offset`, with one retry tick when the mailbox is full
// - Optional exception filter, multiplexed producers and several databases on a single net

// Detailed Operation:
// `db_run` is called every millisecond. It first drains every received frame and offers it to each
// enabled database: the exception filter may claim it, otherwise each enabled consumer whose
// message id, length and address match unpacks it and runs its callback against the top-level
// object. Then every database with periodic producers advances its counter and each due (or
// retried) producer fills its payload, packs and sends it. A full mailbox marks the message for a
// retry on the next tick and stops the run, returning the low 16 bits of the failed id.
//
// Identifier layout (29 bits):
//   bits 0..15   message index (DB_ID_MSG_M)
//   bits 16..23  device type   (DB_ID_DEV_M)
//   bits 24..28  stack address (DB_ID_ADR_M)

// Licensed under the Apache License, Version 2.0
// Copyright 2024 Anton Khrustalev, creapunk.com

pub mod fsi;

use powerpulse_algo::nfo::NfoId;

use crate::net::can::{can_accept, CanFrame, CAN_DATA_MAX};
use crate::net::{Net, NetError, NetTransfer};

pub const DB_ID_MSG_S: u32 = 0;
pub const DB_ID_MSG_M: u32 = 0x0000_FFFF;

pub const DB_ID_DEV_S: u32 = 16;
pub const DB_ID_DEV_M: u32 = 0x00FF_0000;

pub const DB_ID_ADR_S: u32 = 24;
pub const DB_ID_ADR_M: u32 = 0x1F00_0000;

pub const DB_ID_DEV_ADR_M: u32 = DB_ID_DEV_M | DB_ID_ADR_M;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DbError {
    /// Periodic producer with zero period or a period that does not divide the database period
    InvalidPeriod,
    /// Offset not below the message period
    InvalidOffset,
    /// Multiplexer without values
    InvalidMux,
    /// Message size above 8 bytes
    InvalidSize,
    /// Subscription mask overlaps the message mask
    InvalidMask,
    Pack,
    Unpack,
    Net(NetError),
}

impl From<NetError> for DbError {
    fn from(e: NetError) -> Self {
        DbError::Net(e)
    }
}

/// Identifier filter/overlay; a zero mask accepts every identifier.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DbId {
    pub mask: u32,
    pub id: u32,
}

impl DbId {
    pub const NONE: Self = Self { mask: 0, id: 0 };

    /// Builds the device/address part of an identifier; `mask` keeps only device and address bits.
    pub const fn new(device: NfoId, address: u16, mask: u32) -> Self {
        let id = (((device.code() as u32) << DB_ID_DEV_S) & DB_ID_DEV_M)
            | (((address as u32) << DB_ID_ADR_S) & DB_ID_ADR_M);
        Self {
            mask: mask & DB_ID_DEV_ADR_M,
            id,
        }
    }

    #[inline(always)]
    pub const fn accepts(&self, id: u32) -> bool {
        can_accept(id, self.id, self.mask)
    }

    /// Replaces the masked bits of `id` with this identifier.
    #[inline(always)]
    pub const fn overlay(&self, id: u32) -> u32 {
        (id & !self.mask) | (self.id & self.mask)
    }
}

/// Message payload bound to the top-level object `T`.
pub trait DbPayload<T> {
    /// Serializes the message into `data`, which is exactly the message size long.
    fn pack(&self, data: &mut [u8]) -> Result<(), DbError>;

    fn unpack(&mut self, data: &[u8]) -> Result<(), DbError>;

    /// Producers read their fields from `tlo`; consumers apply the received fields to it.
    fn callback(&mut self, tlo: &mut T);

    /// Selects the multiplexed sub-frame `value` before the next `callback`.
    fn mux(&mut self, _value: u16) {}
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DbKind {
    Producer,
    Consumer,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DbMux {
    ind: usize,
    list: &'static [u16],
}

impl DbMux {
    /// Rotates over `list`, starting with its first value.
    pub const fn new(list: &'static [u16]) -> Self {
        Self {
            ind: list.len().saturating_sub(1),
            list,
        }
    }

    fn next(&mut self) -> Option<u16> {
        if self.list.is_empty() {
            return None;
        }
        self.ind += 1;
        if self.ind >= self.list.len() {
            self.ind = 0;
        }
        Some(self.list[self.ind])
    }
}

pub struct DbMsg<'a, T> {
    kind: DbKind,
    pub enable: bool,
    pub periodic: bool, // Producer runs on its period
    pub global: bool,   // Use the database subscription as address filter/overlay
    pub oneshot: bool,  // Send on the next run (cleared once sent)
    id: u32,            // Extended identifier (29 bits)
    size: u16,          // Payload size (bytes)
    period: u16,        // Period (ms)
    offset: u16,        // Offset inside the period (ms)
    mux: Option<DbMux>,
    local: Option<DbId>, // Per-message address filter/overlay
    payload: &'a mut dyn DbPayload<T>,
}

impl<'a, T> DbMsg<'a, T> {
    /// Periodic producer; `period == 0` makes it event driven (`oneshot` only).
    pub fn producer(id: u32, size: u16, period: u16, offset: u16, payload: &'a mut dyn DbPayload<T>) -> Self {
        Self {
            kind: DbKind::Producer,
            enable: true,
            periodic: period > 0,
            global: true,
            oneshot: false,
            id,
            size,
            period,
            offset,
            mux: None,
            local: None,
            payload,
        }
    }

    pub fn consumer(id: u32, size: u16, payload: &'a mut dyn DbPayload<T>) -> Self {
        Self {
            kind: DbKind::Consumer,
            periodic: false,
            ..Self::producer(id, size, 0, 0, payload)
        }
    }

    pub fn with_mux(mut self, list: &'static [u16]) -> Self {
        self.mux = Some(DbMux::new(list));
        self
    }

    pub fn with_local(mut self, local: DbId) -> Self {
        self.local = Some(local);
        self
    }

    #[inline(always)]
    pub fn kind(&self) -> DbKind {
        self.kind
    }

    #[inline(always)]
    pub fn id(&self) -> u32 {
        self.id
    }

    fn validate(&self, db_period: u32) -> Result<(), DbError> {
        if self.size as usize > CAN_DATA_MAX {
            return Err(DbError::InvalidSize);
        }
        if matches!(self.mux, Some(mux) if mux.list.is_empty()) {
            return Err(DbError::InvalidMux);
        }
        if self.kind == DbKind::Producer && self.periodic {
            let period = self.period as u32;
            if period == 0 || db_period == 0 || db_period % period != 0 {
                return Err(DbError::InvalidPeriod);
            }
            if self.offset >= self.period {
                return Err(DbError::InvalidOffset);
            }
        }
        Ok(())
    }

    /// Address filter for received frames.
    fn addressed(&self, global: &DbId, id: u32) -> bool {
        (self.global && global.accepts(id)) || matches!(self.local, Some(local) if local.accepts(id))
    }
}

/// Transmit hook handed to the producers of each database.
pub type DbSend<'s> = dyn FnMut(&mut CanFrame) -> nb::Result<(), NetError> + 's;

/// One database as seen by `db_run`.
pub trait DbTable<T> {
    fn consume(&mut self, tlo: &mut T, frame: &CanFrame);

    /// Emits due producers; `Some(id)` when the mailbox was full.
    fn produce(&mut self, tlo: &mut T, send: &mut DbSend<'_>) -> Result<Option<u16>, DbError>;
}

pub struct Database<'a, T, const N: usize> {
    pub enable: bool,
    mask: u32,    // Message id acceptance mask
    period: u32,  // Counter period (ms)
    counter: u32, // Counter in 1 ms steps
    id: DbId,     // Subscription (global identifier)
    exception: Option<fn(&mut T, &CanFrame) -> bool>,
    msgs: [DbMsg<'a, T>; N],
}

impl<'a, T, const N: usize> Database<'a, T, N> {
    /// Checks the message table; `period` is the counter period in ms.
    pub fn new(mask: u32, period: u32, msgs: [DbMsg<'a, T>; N]) -> Result<Self, DbError> {
        for (i, msg) in msgs.iter().enumerate() {
            if let Err(e) = msg.validate(period) {
                warn!("DB: message {} rejected", i);
                return Err(e);
            }
        }
        Ok(Self {
            enable: true,
            mask,
            period,
            // First run lands on tick 0
            counter: period.saturating_sub(1),
            id: DbId::NONE,
            exception: None,
            msgs,
        })
    }

    /// Restricts consumers to, and stamps producers with, `device` at `address`.
    pub fn subscribe(&mut self, device: NfoId, address: u16, mask: u32) -> Result<(), DbError> {
        self.unsubscribe();
        if (self.mask & mask) != 0 {
            return Err(DbError::InvalidMask);
        }
        self.id = DbId::new(device, address, mask);
        Ok(())
    }

    pub fn unsubscribe(&mut self) {
        self.id = DbId::NONE;
    }

    #[inline(always)]
    pub fn subscription(&self) -> DbId {
        self.id
    }

    /// Frames claimed by `filter` skip the consumer table.
    pub fn set_exception_filter(&mut self, filter: fn(&mut T, &CanFrame) -> bool) {
        self.exception = Some(filter);
    }

    pub fn msg_mut(&mut self, index: usize) -> Option<&mut DbMsg<'a, T>> {
        self.msgs.get_mut(index)
    }

    /// Requests a send of producer `index` on the next run.
    pub fn trigger(&mut self, index: usize) -> bool {
        match self.msgs.get_mut(index) {
            Some(msg) if msg.kind == DbKind::Producer => {
                msg.oneshot = true;
                true
            }
            _ => false,
        }
    }

    #[inline(always)]
    pub fn counter(&self) -> u32 {
        self.counter
    }

    fn has_periodic(&self) -> bool {
        self.msgs.iter().any(|m| m.kind == DbKind::Producer && m.periodic)
    }

    /// Runs this database alone on `can`.
    pub fn run<D>(&mut self, can: &mut Net<D>, tlo: &mut T) -> Result<Option<u16>, DbError>
    where
        D: NetTransfer<CanFrame>,
    {
        let mut dbs: [&mut dyn DbTable<T>; 1] = [self];
        db_run(can, tlo, &mut dbs)
    }
}

impl<'a, T, const N: usize> DbTable<T> for Database<'a, T, N> {
    fn consume(&mut self, tlo: &mut T, frame: &CanFrame) {
        if !self.enable {
            return;
        }
        if let Some(filter) = self.exception {
            if filter(tlo, frame) {
                return;
            }
        }

        for msg in self.msgs.iter_mut() {
            if msg.kind != DbKind::Consumer || !msg.enable {
                continue;
            }
            // Message index and length first, then device and stack address
            if !can_accept(frame.id, msg.id, self.mask) || frame.len != msg.size {
                continue;
            }
            if !msg.addressed(&self.id, frame.id) {
                continue;
            }
            if msg.payload.unpack(frame.payload()).is_err() {
                warn!("DB: cannot unpack {}", frame.id);
                continue;
            }
            msg.payload.callback(tlo);
        }
    }

    fn produce(&mut self, tlo: &mut T, send: &mut DbSend<'_>) -> Result<Option<u16>, DbError> {
        if !self.enable {
            return Ok(None);
        }

        if self.has_periodic() {
            self.counter += 1;
            if self.counter >= self.period {
                self.counter = 0;
            }
        }

        for msg in self.msgs.iter_mut() {
            if msg.kind != DbKind::Producer || !msg.enable {
                continue;
            }
            let due = msg.periodic && self.counter % msg.period as u32 == msg.offset as u32;
            if !due && !msg.oneshot {
                continue;
            }
            msg.oneshot = false;

            let mut frame = CanFrame {
                id: msg.id & self.mask,
                len: msg.size,
                data: [0; CAN_DATA_MAX],
            };
            let overlay = match msg.local {
                Some(local) => Some(local),
                None if msg.global => Some(self.id),
                None => None,
            };
            if let Some(overlay) = overlay {
                frame.id = overlay.overlay(frame.id);
            }

            if let Some(value) = msg.mux.as_mut().and_then(DbMux::next) {
                msg.payload.mux(value);
            }
            msg.payload.callback(tlo);
            msg.payload.pack(&mut frame.data[..msg.size as usize])?;

            match send(&mut frame) {
                Ok(()) => {}
                Err(nb::Error::WouldBlock) => {
                    debug!("DB: mailbox full, retry {}", frame.id);
                    msg.oneshot = true;
                    return Ok(Some((frame.id & DB_ID_MSG_M) as u16));
                }
                Err(nb::Error::Other(e)) => return Err(DbError::Net(e)),
            }
        }
        Ok(None)
    }
}

/// Runs all databases sharing the `can` net for one 1 ms tick.
///
/// Returns `Ok(Some(id))` when a producer hit a full mailbox; it is retried on the next call.
pub fn db_run<D, T>(can: &mut Net<D>, tlo: &mut T, dbs: &mut [&mut dyn DbTable<T>]) -> Result<Option<u16>, DbError>
where
    D: NetTransfer<CanFrame>,
{
    loop {
        let mut rx = [CanFrame::default()];
        match can.read(&mut rx) {
            Ok(()) => {
                for db in dbs.iter_mut() {
                    db.consume(tlo, &rx[0]);
                }
            }
            Err(nb::Error::WouldBlock) => break,
            Err(nb::Error::Other(_e)) => {
                debug!("DB: receive stopped");
                break;
            }
        }
    }

    let mut send = |frame: &mut CanFrame| can.write(core::slice::from_mut(frame));
    for db in dbs.iter_mut() {
        if let Some(id) = db.produce(tlo, &mut send)? {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::can::CanUsr;
    use crate::net::{NetDriver, NetType};

    #[derive(Default)]
    struct Bus {
        rx: heapless::Deque<CanFrame, 8>,
        tx: heapless::Vec<CanFrame, 64>,
        full: bool,
    }

    impl NetDriver for Bus {
        type Usr = CanUsr;
        const TYPE: NetType = NetType::Can;
        const IO: usize = 2;

        fn open(&mut self, _usr: &CanUsr) -> Result<(), NetError> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), NetError> {
            Ok(())
        }
    }

    impl NetTransfer<CanFrame> for Bus {
        fn read(&mut self, frames: &mut [CanFrame]) -> nb::Result<(), NetError> {
            frames[0] = self.rx.pop_front().ok_or(nb::Error::WouldBlock)?;
            Ok(())
        }

        fn write(&mut self, frames: &mut [CanFrame]) -> nb::Result<(), NetError> {
            if self.full {
                return Err(nb::Error::WouldBlock);
            }
            self.tx.push(frames[0]).map_err(|_| nb::Error::Other(NetError::Bus))
        }
    }

    fn can() -> Net<Bus> {
        let mut net = Net::new(Bus::default());
        assert!(net.connect(&[10, 11]).is_ok());
        assert!(net.open(&CanUsr::default()).is_ok());
        net
    }

    #[derive(Default)]
    struct Tlo {
        voltage: u16,
        setpoint: u16,
        seen: u32,
        exceptions: u32,
        mux: heapless::Vec<u16, 8>,
    }

    /// Producer of the output voltage.
    #[derive(Default)]
    struct Status {
        voltage: u16,
        page: u16,
    }

    impl DbPayload<Tlo> for Status {
        fn pack(&self, data: &mut [u8]) -> Result<(), DbError> {
            if data.len() < 4 {
                return Err(DbError::Pack);
            }
            data[..2].copy_from_slice(&self.voltage.to_le_bytes());
            data[2..4].copy_from_slice(&self.page.to_le_bytes());
            Ok(())
        }

        fn unpack(&mut self, _data: &[u8]) -> Result<(), DbError> {
            Err(DbError::Unpack)
        }

        fn callback(&mut self, tlo: &mut Tlo) {
            self.voltage = tlo.voltage;
            let _ = tlo.mux.push(self.page);
        }

        fn mux(&mut self, value: u16) {
            self.page = value;
        }
    }

    /// Consumer of the current setpoint.
    #[derive(Default)]
    struct Setpoint {
        value: u16,
    }

    impl DbPayload<Tlo> for Setpoint {
        fn pack(&self, _data: &mut [u8]) -> Result<(), DbError> {
            Err(DbError::Pack)
        }

        fn unpack(&mut self, data: &[u8]) -> Result<(), DbError> {
            self.value = u16::from_le_bytes([data[0], data[1]]);
            Ok(())
        }

        fn callback(&mut self, tlo: &mut Tlo) {
            tlo.setpoint = self.value;
            tlo.seen += 1;
        }
    }

    const ID_STATUS: u32 = 0x0010;
    const ID_SETPOINT: u32 = 0x0020;

    #[test]
    fn test_db_id_layout() {
        let id = DbId::new(NfoId::Lf45, 3, 0xFFFF_FFFF);
        assert_eq!(id.mask, DB_ID_DEV_ADR_M);
        assert_eq!(id.id & DB_ID_ADR_M, 3 << DB_ID_ADR_S);
        assert_eq!((id.id & DB_ID_DEV_M) >> DB_ID_DEV_S, NfoId::Lf45.code() as u32 & 0xFF);
        assert_eq!(id.overlay(0x1FFF_0010) & DB_ID_MSG_M, 0x0010);
        assert!(DbId::NONE.accepts(0x1234_5678));
    }

    #[test]
    fn test_producer_retry_on_full_mailbox() {
        let mut status = Status::default();
        let mut db = match Database::<Tlo, 1>::new(DB_ID_MSG_M, 1000, [DbMsg::producer(ID_STATUS, 4, 10, 0, &mut status)]) {
            Ok(db) => db,
            Err(e) => panic!("{:?}", e),
        };
        let mut can = can();
        let mut tlo = Tlo::default();
        let mut emitted: heapless::Vec<u32, 8> = heapless::Vec::new();

        for t in 0..=20u32 {
            // Mailbox full at t=0 only
            can.driver_mut().full = t == 0;
            let before = can.driver().tx.len();
            let result = db.run(&mut can, &mut tlo);
            if t == 0 {
                assert_eq!(result, Ok(Some(ID_STATUS as u16)));
            } else {
                assert_eq!(result, Ok(None));
            }
            if can.driver().tx.len() > before {
                let _ = emitted.push(t);
            }
        }
        assert_eq!(emitted.as_slice(), &[1, 10, 20]);
    }

    #[test]
    fn test_producer_offset_and_overlay() {
        let mut status = Status::default();
        let msgs: [DbMsg<Tlo>; 1] = [DbMsg::producer(ID_STATUS, 4, 5, 2, &mut status)];
        let mut db = match Database::<Tlo, 1>::new(DB_ID_MSG_M, 100, msgs) {
            Ok(db) => db,
            Err(e) => panic!("{:?}", e),
        };
        assert!(db.subscribe(NfoId::Up25, 7, DB_ID_DEV_ADR_M).is_ok());

        let mut can = can();
        let mut tlo = Tlo {
            voltage: 400,
            ..Default::default()
        };
        for _ in 0..10 {
            assert_eq!(db.run(&mut can, &mut tlo), Ok(None));
        }

        let tx = &can.driver().tx;
        assert_eq!(tx.len(), 2);
        let expected = DbId::new(NfoId::Up25, 7, DB_ID_DEV_ADR_M).overlay(ID_STATUS);
        assert_eq!(tx[0].id, expected);
        assert_eq!(tx[0].len, 4);
        assert_eq!(u16::from_le_bytes([tx[0].data[0], tx[0].data[1]]), 400);
    }

    #[test]
    fn test_consumer_filtering() {
        let mut setpoint = Setpoint::default();
        let mut db = match Database::<Tlo, 1>::new(DB_ID_MSG_M, 1000, [DbMsg::consumer(ID_SETPOINT, 2, &mut setpoint)]) {
            Ok(db) => db,
            Err(e) => panic!("{:?}", e),
        };
        assert!(db.subscribe(NfoId::Up25, 1, DB_ID_DEV_ADR_M).is_ok());
        let ours = DbId::new(NfoId::Up25, 1, DB_ID_DEV_ADR_M);
        let other = DbId::new(NfoId::Up25, 2, DB_ID_DEV_ADR_M);

        let mut can = can();
        let frames = [
            CanFrame::new(ours.overlay(ID_SETPOINT), &[0x34, 0x12]),
            // Wrong stack address
            CanFrame::new(other.overlay(ID_SETPOINT), &[0x00, 0x01]),
            // Wrong length
            CanFrame::new(ours.overlay(ID_SETPOINT), &[0x00, 0x01, 0x02]),
            // Wrong message index
            CanFrame::new(ours.overlay(ID_STATUS), &[0x00, 0x01]),
        ];
        for frame in frames.into_iter().flatten() {
            assert!(can.driver_mut().rx.push_back(frame).is_ok());
        }

        let mut tlo = Tlo::default();
        assert_eq!(db.run(&mut can, &mut tlo), Ok(None));
        assert_eq!(tlo.seen, 1);
        assert_eq!(tlo.setpoint, 0x1234);
        assert!(can.driver().rx.is_empty());
    }

    fn claim_all(tlo: &mut Tlo, _frame: &CanFrame) -> bool {
        tlo.exceptions += 1;
        true
    }

    #[test]
    fn test_exception_filter_short_circuits() {
        let mut setpoint = Setpoint::default();
        let mut db = match Database::<Tlo, 1>::new(DB_ID_MSG_M, 1000, [DbMsg::consumer(ID_SETPOINT, 2, &mut setpoint)]) {
            Ok(db) => db,
            Err(e) => panic!("{:?}", e),
        };
        db.set_exception_filter(claim_all);

        let mut can = can();
        if let Some(frame) = CanFrame::new(ID_SETPOINT, &[1, 0]) {
            assert!(can.driver_mut().rx.push_back(frame).is_ok());
        }
        let mut tlo = Tlo::default();
        assert_eq!(db.run(&mut can, &mut tlo), Ok(None));
        assert_eq!(tlo.exceptions, 1);
        assert_eq!(tlo.seen, 0);
    }

    static PAGES: [u16; 3] = [0, 1, 2];

    #[test]
    fn test_mux_rotation_and_oneshot() {
        let mut status = Status::default();
        let msgs: [DbMsg<Tlo>; 1] = [DbMsg::producer(ID_STATUS, 4, 0, 0, &mut status).with_mux(&PAGES)];
        let mut db = match Database::<Tlo, 1>::new(DB_ID_MSG_M, 1000, msgs) {
            Ok(db) => db,
            Err(e) => panic!("{:?}", e),
        };
        let mut can = can();
        let mut tlo = Tlo::default();

        // Event driven: silent until triggered
        assert_eq!(db.run(&mut can, &mut tlo), Ok(None));
        assert!(can.driver().tx.is_empty());
        assert_eq!(db.counter(), 999);

        for _ in 0..4 {
            assert!(db.trigger(0));
            assert_eq!(db.run(&mut can, &mut tlo), Ok(None));
        }
        assert_eq!(tlo.mux.as_slice(), &[0, 1, 2, 0]);
        assert_eq!(can.driver().tx.len(), 4);
        assert_eq!(can.driver().tx[1].data[2], 1);
    }

    #[test]
    fn test_multiple_databases_on_one_net() {
        let mut status = Status::default();
        let mut setpoint = Setpoint::default();
        let producers = Database::<Tlo, 1>::new(DB_ID_MSG_M, 10, [DbMsg::producer(ID_STATUS, 4, 1, 0, &mut status)]);
        let consumers = Database::<Tlo, 1>::new(DB_ID_MSG_M, 10, [DbMsg::consumer(ID_SETPOINT, 2, &mut setpoint)]);
        let (Ok(mut producers), Ok(mut consumers)) = (producers, consumers) else {
            panic!("database setup failed");
        };

        let mut can = can();
        if let Some(frame) = CanFrame::new(ID_SETPOINT, &[9, 0]) {
            assert!(can.driver_mut().rx.push_back(frame).is_ok());
        }
        let mut tlo = Tlo::default();
        {
            let mut dbs: [&mut dyn DbTable<Tlo>; 2] = [&mut producers, &mut consumers];
            assert_eq!(db_run(&mut can, &mut tlo, &mut dbs), Ok(None));
        }
        assert_eq!(tlo.setpoint, 9);
        assert_eq!(can.driver().tx.len(), 1);

        // Disabled database neither consumes nor produces
        producers.enable = false;
        assert_eq!(producers.run(&mut can, &mut tlo), Ok(None));
        assert_eq!(can.driver().tx.len(), 1);
    }

    #[test]
    fn test_table_validation() {
        let mut a = Status::default();
        let r = Database::<Tlo, 1>::new(DB_ID_MSG_M, 1000, [DbMsg::producer(ID_STATUS, 4, 10, 10, &mut a)]);
        assert_eq!(r.err(), Some(DbError::InvalidOffset));

        let mut a = Status::default();
        let r = Database::<Tlo, 1>::new(DB_ID_MSG_M, 1000, [DbMsg::producer(ID_STATUS, 4, 300, 0, &mut a)]);
        assert_eq!(r.err(), Some(DbError::InvalidPeriod));

        let mut a = Status::default();
        let r = Database::<Tlo, 1>::new(DB_ID_MSG_M, 1000, [DbMsg::producer(ID_STATUS, 9, 10, 0, &mut a)]);
        assert_eq!(r.err(), Some(DbError::InvalidSize));

        static NO_PAGES: [u16; 0] = [];
        let mut a = Status::default();
        let r = Database::<Tlo, 1>::new(DB_ID_MSG_M, 1000, [DbMsg::producer(ID_STATUS, 4, 0, 0, &mut a).with_mux(&NO_PAGES)]);
        assert_eq!(r.err(), Some(DbError::InvalidMux));

        let mut a = Status::default();
        let r = Database::<Tlo, 1>::new(DB_ID_MSG_M, 1000, [DbMsg::producer(ID_STATUS, 4, 10, 0, &mut a)]);
        let Ok(mut db) = r else {
            panic!("valid table rejected");
        };
        assert_eq!(db.subscribe(NfoId::Lf45, 0, DB_ID_MSG_M), Err(DbError::InvalidMask));
        assert_eq!(db.subscription(), DbId::NONE);
    }
}
