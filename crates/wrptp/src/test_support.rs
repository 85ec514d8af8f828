//! Fakes and scenario builders for port-level tests.
//!
//! Everything here is single-threaded and deterministic. [`FakeTimeOps`] runs on a manual
//! millisecond counter, [`FakeNet`] records what the port sends and hands out a configurable
//! egress timestamp, and [`RecordingLog`] keeps every [`PortEvent`] for later assertions.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use crate::buffer::FRAME_CAPACITY;
use crate::clock::{ClockError, ClockIdentity, ClockQuality, TimeOps, TimeSource};
use crate::datasets::{ClockContext, DefaultDS};
use crate::extension::{Extension, NoExtension};
use crate::foreign::ForeignMasterRecord;
use crate::log::{PortEvent, PortLog, NOOP_CLOCK_METRICS};
use crate::message::{AnnounceMessage, Message, MessageBody, SequenceId};
use crate::port::{
    Channel, DomainNumber, NetOps, PacketCheck, Port, PortIdentity, PortInstance, PortNumber,
    Received, RecvError, RxFrame, SendError, SendResult,
};
use crate::profile::PortProfile;
use crate::servo::{Servo, ServoConfig};
use crate::time::TimeStamp;
use crate::wire::{CorrectionField, MessageHeader, MessageType, PTP_VERSION};

pub struct FakeTimeOps {
    now: Cell<TimeStamp>,
    ticks: Cell<u32>,
    last_freq: Cell<Option<i32>>,
    set_calls: RefCell<Vec<TimeStamp>>,
}

impl FakeTimeOps {
    pub fn new() -> Self {
        Self {
            now: Cell::new(TimeStamp::new(0, 0)),
            ticks: Cell::new(0),
            last_freq: Cell::new(None),
            set_calls: RefCell::new(Vec::new()),
        }
    }

    /// Move both the millisecond counter and the clock forward.
    pub fn advance_ms(&self, ms: u32) {
        self.ticks.set(self.ticks.get().wrapping_add(ms));
        self.now
            .set(self.now.get() + TimeStamp::from_nanos(ms as i64 * 1_000_000));
    }

    pub fn set_ticks(&self, ticks: u32) {
        self.ticks.set(ticks);
    }

    pub fn set_now(&self, now: TimeStamp) {
        self.now.set(now);
    }

    pub fn last_freq(&self) -> Option<i32> {
        self.last_freq.get()
    }

    pub fn set_calls(&self) -> Vec<TimeStamp> {
        self.set_calls.borrow().clone()
    }
}

impl Default for FakeTimeOps {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeOps for FakeTimeOps {
    fn now(&self) -> TimeStamp {
        self.now.get()
    }

    fn set(&self, to: TimeStamp) -> Result<(), ClockError> {
        self.set_calls.borrow_mut().push(to);
        self.now.set(to);
        Ok(())
    }

    fn adjust_offset(&self, picos: i64) -> Result<(), ClockError> {
        self.now
            .set(self.now.get() + TimeStamp::from_picos(picos as i128));
        Ok(())
    }

    fn adjust_freq(&self, ppb: i32) -> Result<(), ClockError> {
        self.last_freq.set(Some(ppb));
        Ok(())
    }

    fn calc_timeout(&self, millis: u32) -> u32 {
        self.ticks.get().wrapping_add(millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub bytes: Vec<u8>,
    pub channel: Channel,
}

/// In-memory network. Clones share the same queues.
#[derive(Clone)]
pub struct FakeNet {
    sent: Rc<RefCell<Vec<SentFrame>>>,
    inbound: Rc<RefCell<VecDeque<(Vec<u8>, TimeStamp)>>>,
    egress: Rc<Cell<TimeStamp>>,
}

impl FakeNet {
    pub fn new() -> Self {
        Self {
            sent: Rc::new(RefCell::new(Vec::new())),
            inbound: Rc::new(RefCell::new(VecDeque::new())),
            egress: Rc::new(Cell::new(TimeStamp::new(0, 0))),
        }
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.sent.borrow().clone()
    }

    pub fn sent_types(&self) -> Vec<MessageType> {
        self.sent
            .borrow()
            .iter()
            .filter_map(|frame| MessageHeader::parse(&frame.bytes).ok())
            .map(|header| header.message_type)
            .collect()
    }

    /// Hand out everything sent so far and forget it.
    pub fn take_sent(&self) -> Vec<SentFrame> {
        std::mem::take(&mut *self.sent.borrow_mut())
    }

    pub fn push_inbound(&self, bytes: Vec<u8>, ingress: TimeStamp) {
        self.inbound.borrow_mut().push_back((bytes, ingress));
    }

    /// Egress timestamp reported for every following send.
    pub fn set_egress(&self, egress: TimeStamp) {
        self.egress.set(egress);
    }
}

impl Default for FakeNet {
    fn default() -> Self {
        Self::new()
    }
}

impl NetOps for FakeNet {
    fn send(&self, frame: &[u8], channel: Channel) -> SendResult {
        self.sent.borrow_mut().push(SentFrame {
            bytes: frame.to_vec(),
            channel,
        });
        Ok(self.egress.get())
    }

    fn recv(&self, buf: &mut [u8]) -> Result<Received, RecvError> {
        let (bytes, timestamp) = self
            .inbound
            .borrow_mut()
            .pop_front()
            .ok_or(RecvError::Empty)?;
        let len = bytes.len().min(buf.len());
        buf[..len].copy_from_slice(&bytes[..len]);
        Ok(Received { len, timestamp })
    }

    fn check_packet(&self, _delay_ms: u32) -> PacketCheck {
        if self.inbound.borrow().is_empty() {
            PacketCheck::Timeout
        } else {
            PacketCheck::Ready
        }
    }
}

/// A link that drops every frame on the floor.
pub struct FailingNet;

impl NetOps for FailingNet {
    fn send(&self, _frame: &[u8], _channel: Channel) -> SendResult {
        Err(SendError::Failed)
    }

    fn recv(&self, _buf: &mut [u8]) -> Result<Received, RecvError> {
        Err(RecvError::Empty)
    }

    fn check_packet(&self, _delay_ms: u32) -> PacketCheck {
        PacketCheck::Timeout
    }
}

/// A link without transmit timestamping.
pub struct NoStampNet;

impl NetOps for NoStampNet {
    fn send(&self, _frame: &[u8], _channel: Channel) -> SendResult {
        Err(SendError::NoStamp)
    }

    fn recv(&self, _buf: &mut [u8]) -> Result<Received, RecvError> {
        Err(RecvError::Empty)
    }

    fn check_packet(&self, _delay_ms: u32) -> PacketCheck {
        PacketCheck::Timeout
    }
}

#[derive(Clone, Default)]
pub struct RecordingLog {
    events: Rc<RefCell<Vec<PortEvent>>>,
}

impl RecordingLog {
    pub fn events(&self) -> Vec<PortEvent> {
        self.events.borrow().clone()
    }
}

impl PortLog for RecordingLog {
    fn port_event(&self, event: PortEvent) {
        self.events.borrow_mut().push(event);
    }
}

pub type FakePort<E = NoExtension, N = FakeNet> = Port<N, FakeTimeOps, E, RecordingLog>;

impl PortIdentity {
    /// An identity no fake clock or fake announce uses.
    pub fn fake() -> Self {
        Self::new(
            ClockIdentity::new(&[0x00, 0x1B, 0x19, 0xFF, 0xFE, 0x00, 0x00, 0x01]),
            PortNumber::new(1),
        )
    }

    /// A second neighbour, distinct from [`PortIdentity::fake`].
    pub fn fake_peer() -> Self {
        Self::new(
            ClockIdentity::new(&[0x00, 0x1B, 0x19, 0xFF, 0xFE, 0x00, 0x00, 0x02]),
            PortNumber::new(1),
        )
    }
}

fn identity(last: u8) -> ClockIdentity {
    ClockIdentity::new(&[0, 0, 0, 0, 0, 0, 0, last])
}

/// Default dataset of an unremarkable clock whose identity ends in `last`.
pub fn fake_default_ds(last: u8, priority1: u8) -> DefaultDS {
    DefaultDS::new(
        identity(last),
        ClockQuality::new(ClockQuality::CLASS_DEFAULT, ClockQuality::ACCURACY_UNKNOWN, 0xFFFF),
        priority1,
        128,
        DomainNumber::new(0),
    )
}

pub fn fake_clock() -> ClockContext {
    ClockContext::new(fake_default_ds(0x42, 128))
}

/// Announce of a grandmaster with identity `last`, sent from its port 1.
pub fn announce_from(last: u8, priority1: u8) -> ForeignMasterRecord {
    ForeignMasterRecord::new(
        PortIdentity::new(identity(last), PortNumber::new(1)),
        0,
        AnnounceMessage {
            origin_timestamp: TimeStamp::new(0, 0),
            current_utc_offset: 0,
            grandmaster_priority1: priority1,
            grandmaster_clock_quality: ClockQuality::new(
                ClockQuality::CLASS_DEFAULT,
                ClockQuality::ACCURACY_UNKNOWN,
                0xFFFF,
            ),
            grandmaster_priority2: 128,
            grandmaster_identity: identity(last),
            steps_removed: 0,
            time_source: TimeSource::INTERNAL_OSCILLATOR,
        },
    )
}

fn port_on<N: NetOps, E: Extension>(
    clock: &ClockContext,
    profile: PortProfile,
    net: N,
    ext: E,
) -> FakePort<E, N> {
    Port::new(
        0,
        clock,
        PortNumber::new(1),
        profile,
        Servo::new(ServoConfig::default(), &NOOP_CLOCK_METRICS),
        net,
        FakeTimeOps::new(),
        ext,
        RecordingLog::default(),
    )
}

pub fn fake_port(clock: &ClockContext, profile: PortProfile) -> FakePort {
    port_on(clock, profile, FakeNet::new(), NoExtension)
}

/// A port on a custom link, such as [`FailingNet`] or [`NoStampNet`].
pub fn fake_port_on<N: NetOps>(
    clock: &ClockContext,
    profile: PortProfile,
    net: N,
) -> FakePort<NoExtension, N> {
    port_on(clock, profile, net, NoExtension)
}

pub fn fake_port_with<E: Extension>(
    clock: &ClockContext,
    profile: PortProfile,
    ext: E,
) -> FakePort<E> {
    port_on(clock, profile, FakeNet::new(), ext)
}

/// Bare port state for exercising extensions without a port around them.
pub fn fake_port_instance() -> PortInstance {
    fake_port(&fake_clock(), PortProfile::default()).instance
}

pub fn test_header(source: PortIdentity, message_type: MessageType, seq: u16) -> MessageHeader {
    MessageHeader {
        transport_specific: 0,
        message_type,
        version: PTP_VERSION,
        message_length: 0,
        domain_number: DomainNumber::new(0),
        flags: 0,
        correction: CorrectionField::ZERO,
        source_port_identity: source,
        sequence_id: SequenceId::new(seq),
        control: 0,
        log_message_interval: 0,
    }
}

pub fn encode(header: MessageHeader, body: MessageBody<'_>) -> Vec<u8> {
    let mut buf = [0u8; FRAME_CAPACITY];
    let len = Message { header, body }
        .encode(&mut buf)
        .expect("test message encodes");
    buf[..len].to_vec()
}

pub fn announce_frame(record: &ForeignMasterRecord, seq: u16) -> Vec<u8> {
    let mut header = test_header(record.source, MessageType::Announce, seq);
    header.flags = record.flags;
    header.log_message_interval = 1;
    encode(header, MessageBody::Announce(record.announce))
}

/// A port that has elected `master` as its parent and finished its first SLAVE pass.
pub fn slave_of(master: &ForeignMasterRecord, profile: PortProfile) -> (ClockContext, FakePort) {
    slave_with(fake_default_ds(0x42, 128), master, profile)
}

pub fn slave_with(
    default_ds: DefaultDS,
    master: &ForeignMasterRecord,
    profile: PortProfile,
) -> (ClockContext, FakePort) {
    let mut clock = ClockContext::new(default_ds);
    let mut port = fake_port(&clock, profile);
    port.state_machine(&mut clock, None);
    port.state_machine(&mut clock, None);

    let frame = announce_frame(master, 1);
    port.state_machine(&mut clock, Some(RxFrame::new(&frame, TimeStamp::new(1, 0))));
    port.state_machine(&mut clock, None);
    (clock, port)
}

pub fn master_port(profile: PortProfile) -> (ClockContext, FakePort) {
    master_port_with(profile, NoExtension)
}

/// A port that timed out of LISTENING and finished its first MASTER pass.
pub fn master_port_with<E: Extension>(
    profile: PortProfile,
    ext: E,
) -> (ClockContext, FakePort<E>) {
    let mut clock = fake_clock();
    let mut port = fake_port_with(&clock, profile, ext);
    port.state_machine(&mut clock, None);
    port.state_machine(&mut clock, None);
    port.time().advance_ms(profile.announce_receipt_timeout_ms());
    port.state_machine(&mut clock, None);
    port.state_machine(&mut clock, None);
    (clock, port)
}
