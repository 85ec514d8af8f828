//! Port identity, the network boundary, and the per-port instance.
//!
//! A [`Port`] owns everything a single PTP port needs: its [`PortInstance`] (state, timeouts,
//! foreign masters, the in-flight exchange, servo) and the collaborators it talks to. These are
//! [`NetOps`] for frames, [`TimeOps`] for the clock, an [`Extension`] for timing-extension hooks
//! and a [`PortLog`] sink. The clock-wide datasets live in a separate
//! [`ClockContext`](crate::datasets::ClockContext) that is passed into every state-machine call.

use core::fmt;

use crate::buffer::FRAME_CAPACITY;
use crate::clock::{ClockIdentity, TimeOps};
use crate::datasets::ClockContext;
use crate::extension::{Extension, ExtensionResult};
use crate::foreign::ForeignMasterTable;
use crate::log::{PortEvent, PortLog};
use crate::message::{Message, MessageBody, SequenceId};
use crate::portstate::PortState;
use crate::profile::{DelayMechanism, PortProfile};
use crate::servo::Servo;
use crate::time::{LogInterval, TimeStamp};
use crate::timeout::{Timeouts, DEFAULT_NEXT_DELAY_MS};
use crate::wire::{CorrectionField, MessageHeader, MessageType, PTP_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PortNumber(u16);

impl PortNumber {
    pub const fn new(n: u16) -> Self {
        Self(n)
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DomainNumber(u8);

impl DomainNumber {
    pub const fn new(n: u8) -> Self {
        Self(n)
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PortIdentity {
    clock_identity: ClockIdentity,
    port_number: PortNumber,
}

impl PortIdentity {
    pub const fn new(clock_identity: ClockIdentity, port_number: PortNumber) -> Self {
        Self {
            clock_identity,
            port_number,
        }
    }

    pub fn clock_identity(&self) -> &ClockIdentity {
        &self.clock_identity
    }

    pub fn port_number(&self) -> PortNumber {
        self.port_number
    }

    pub fn to_bytes(&self) -> [u8; 10] {
        let mut bytes = [0u8; 10];
        bytes[..8].copy_from_slice(self.clock_identity.as_bytes());
        bytes[8..].copy_from_slice(&self.port_number.as_u16().to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; 10]) -> Self {
        let mut id = [0u8; 8];
        id.copy_from_slice(&bytes[..8]);
        Self::new(
            ClockIdentity::new(&id),
            PortNumber::new(u16::from_be_bytes([bytes[8], bytes[9]])),
        )
    }
}

impl fmt::Display for PortIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.clock_identity, self.port_number.as_u16())
    }
}

/// Event messages carry timestamps and use their own channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Event,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The frame did not leave the port.
    Failed,
    /// The frame was sent but no egress timestamp is available.
    NoStamp,
}

pub type SendResult = core::result::Result<TimeStamp, SendError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketCheck {
    Ready,
    Timeout,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub len: usize,
    pub timestamp: TimeStamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    Empty,
    Failed,
}

/// Network operations consumed by a port.
pub trait NetOps {
    /// Send a complete frame and return its egress timestamp.
    fn send(&self, frame: &[u8], channel: Channel) -> SendResult;
    fn recv(&self, buf: &mut [u8]) -> core::result::Result<Received, RecvError>;
    /// Wait up to `delay_ms` for a frame to become readable.
    fn check_packet(&self, delay_ms: u32) -> PacketCheck;
}

impl<N: NetOps + ?Sized> NetOps for &N {
    fn send(&self, frame: &[u8], channel: Channel) -> SendResult {
        (**self).send(frame, channel)
    }

    fn recv(&self, buf: &mut [u8]) -> core::result::Result<Received, RecvError> {
        (**self).recv(buf)
    }

    fn check_packet(&self, delay_ms: u32) -> PacketCheck {
        (**self).check_packet(delay_ms)
    }
}

/// A received frame and its ingress timestamp.
#[derive(Debug, Clone, Copy)]
pub struct RxFrame<'a> {
    pub bytes: &'a [u8],
    pub timestamp: TimeStamp,
}

impl<'a> RxFrame<'a> {
    pub fn new(bytes: &'a [u8], timestamp: TimeStamp) -> Self {
        Self { bytes, timestamp }
    }
}

/// Timestamps and bookkeeping of the synchronization exchange in flight.
///
/// - `t1`/`t2`: Sync origin at the master, Sync ingress here.
/// - `t3`/`t4`: request egress here, request receipt at the responder.
/// - `t5`/`t6`: peer-delay response egress at the peer, response ingress here.
///
/// All timestamps start out incorrect, so a servo update never runs on values that were not
/// captured during the current exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Exchange {
    pub(crate) t1: TimeStamp,
    pub(crate) t2: TimeStamp,
    pub(crate) t3: TimeStamp,
    pub(crate) t4: TimeStamp,
    pub(crate) t5: TimeStamp,
    pub(crate) t6: TimeStamp,
    pub(crate) sync_correction: TimeStamp,
    pub(crate) delay_correction: TimeStamp,
    pub(crate) peer_correction: TimeStamp,
    pub(crate) sync_sequence: SequenceId,
    pub(crate) waiting_follow_up: bool,
    pub(crate) waiting_pdelay_follow_up: bool,
}

impl Exchange {
    pub fn t1(&self) -> TimeStamp {
        self.t1
    }

    pub fn t2(&self) -> TimeStamp {
        self.t2
    }

    pub fn t3(&self) -> TimeStamp {
        self.t3
    }

    pub fn t4(&self) -> TimeStamp {
        self.t4
    }

    pub fn t5(&self) -> TimeStamp {
        self.t5
    }

    pub fn t6(&self) -> TimeStamp {
        self.t6
    }

    pub fn sync_correction(&self) -> TimeStamp {
        self.sync_correction
    }

    pub fn delay_correction(&self) -> TimeStamp {
        self.delay_correction
    }

    pub fn peer_correction(&self) -> TimeStamp {
        self.peer_correction
    }

    pub fn waiting_follow_up(&self) -> bool {
        self.waiting_follow_up
    }
}

/// Last sequence id sent, per message type.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SentSequences([SequenceId; 16]);

impl SentSequences {
    pub(crate) fn issue(&mut self, msg_type: MessageType) -> SequenceId {
        let slot = &mut self.0[msg_type as usize];
        *slot = slot.next();
        *slot
    }

    pub(crate) fn last(&self, msg_type: MessageType) -> SequenceId {
        self.0[msg_type as usize]
    }
}

/// Protocol state of one port.
pub struct PortInstance {
    pub(crate) index: usize,
    pub(crate) identity: PortIdentity,
    pub(crate) domain_number: DomainNumber,
    pub(crate) profile: PortProfile,
    pub(crate) state: PortState,
    pub(crate) is_new_state: bool,
    pub(crate) timeouts: Timeouts,
    pub(crate) foreign: ForeignMasterTable,
    pub(crate) record_update: bool,
    pub(crate) exchange: Exchange,
    pub(crate) sent: SentSequences,
    pub(crate) servo: Servo,
    pub(crate) log_min_delay_req_interval: LogInterval,
    pub(crate) ebest_generation: u32,
}

impl PortInstance {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn identity(&self) -> &PortIdentity {
        &self.identity
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    pub fn is_new_state(&self) -> bool {
        self.is_new_state
    }

    pub fn profile(&self) -> &PortProfile {
        &self.profile
    }

    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    pub fn servo(&self) -> &Servo {
        &self.servo
    }

    pub fn foreign(&self) -> &ForeignMasterTable {
        &self.foreign
    }

    /// Extensions arm and poll their own `Ext*` timeouts through this.
    pub fn timeouts_mut(&mut self) -> &mut Timeouts {
        &mut self.timeouts
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Delay request interval currently in use, possibly adopted from the master.
    pub fn log_min_delay_req_interval(&self) -> LogInterval {
        self.log_min_delay_req_interval
    }

    /// Forget the in-flight exchange and everything the servo learned from it.
    pub(crate) fn reset_exchange(&mut self) {
        self.exchange = Exchange::default();
        self.servo.reset();
    }

    pub(crate) fn request_interval(&self) -> LogInterval {
        match self.profile.delay_mechanism {
            DelayMechanism::E2E => self.log_min_delay_req_interval,
            DelayMechanism::P2P => self.profile.log_min_pdelay_req_interval,
        }
    }
}

/// Header fields of an outgoing message that differ per message.
pub(crate) struct Outgoing<'a> {
    pub(crate) flags: u16,
    pub(crate) correction: CorrectionField,
    pub(crate) sequence_id: SequenceId,
    pub(crate) log_interval: LogInterval,
    pub(crate) body: MessageBody<'a>,
}

pub struct Port<N: NetOps, T: TimeOps, E: Extension, L: PortLog> {
    pub(crate) instance: PortInstance,
    pub(crate) net: N,
    pub(crate) time: T,
    pub(crate) ext: E,
    pub(crate) log: L,
    pub(crate) next_delay_ms: u32,
}

impl<N: NetOps, T: TimeOps, E: Extension, L: PortLog> Port<N, T, E, L> {
    /// Create a port in INITIALIZING.
    ///
    /// `index` is the slot this port occupies in the clock's per-port bookkeeping.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        clock: &ClockContext,
        port_number: PortNumber,
        profile: PortProfile,
        servo: Servo,
        net: N,
        time: T,
        ext: E,
        log: L,
    ) -> Self {
        let default_ds = clock.default_ds();
        let identity = PortIdentity::new(default_ds.clock_identity, port_number);

        Self {
            instance: PortInstance {
                index,
                identity,
                domain_number: default_ds.domain_number,
                profile,
                state: PortState::Initializing,
                is_new_state: true,
                timeouts: Timeouts::new(&default_ds.clock_identity),
                foreign: ForeignMasterTable::new(),
                record_update: false,
                exchange: Exchange::default(),
                sent: SentSequences::default(),
                servo,
                log_min_delay_req_interval: profile.log_min_delay_req_interval,
                ebest_generation: clock.ebest_generation(),
            },
            net,
            time,
            ext,
            log,
            next_delay_ms: 0,
        }
    }

    /// Give the extension a chance to set itself up before the first state-machine pass.
    pub fn open(&mut self, clock: &ClockContext) -> ExtensionResult<()> {
        self.ext.open(clock, &mut self.instance)
    }

    pub fn identity(&self) -> &PortIdentity {
        &self.instance.identity
    }

    pub fn state(&self) -> PortState {
        self.instance.state
    }

    pub fn instance(&self) -> &PortInstance {
        &self.instance
    }

    pub fn exchange(&self) -> &Exchange {
        &self.instance.exchange
    }

    pub fn foreign_count(&self) -> usize {
        self.instance.foreign.len()
    }

    pub fn extension(&self) -> &E {
        &self.ext
    }

    pub fn extension_mut(&mut self) -> &mut E {
        &mut self.ext
    }

    pub fn net(&self) -> &N {
        &self.net
    }

    pub fn time(&self) -> &T {
        &self.time
    }

    pub fn port_log(&self) -> &L {
        &self.log
    }

    /// Poll delay returned by the last state-machine pass.
    pub fn next_delay_ms(&self) -> u32 {
        self.next_delay_ms
    }

    /// Administratively disable the port. It sends and processes nothing until enabled.
    pub fn disable(&mut self) {
        if self.instance.state != PortState::Disabled {
            self.change_state(PortState::Disabled);
            self.next_delay_ms = DEFAULT_NEXT_DELAY_MS;
        }
    }

    pub fn enable(&mut self) {
        if self.instance.state == PortState::Disabled {
            self.change_state(PortState::Initializing);
            self.next_delay_ms = 0;
        }
    }

    pub(crate) fn change_state(&mut self, to: PortState) {
        let from = self.instance.state;
        self.leave_state(from);
        self.log.port_event(PortEvent::StateChanged { from, to });
        self.instance.state = to;
        self.instance.is_new_state = true;
    }

    pub(crate) fn log(&self, event: PortEvent) {
        self.log.port_event(event);
    }

    /// Encode and send a message built from this port's identity and domain.
    ///
    /// A missing egress timestamp is not an error: the returned timestamp is marked incorrect
    /// and the servo skips any update depending on it.
    pub(crate) fn send(&mut self, outgoing: Outgoing<'_>) -> SendResult {
        let mut buf = [0u8; FRAME_CAPACITY];
        let msg_type = outgoing.body.message_type();
        let len = self.encode(outgoing, &mut buf)?;
        self.transmit(&buf[..len], msg_type)
    }

    pub(crate) fn encode(
        &self,
        outgoing: Outgoing<'_>,
        buf: &mut [u8],
    ) -> core::result::Result<usize, SendError> {
        let msg_type = outgoing.body.message_type();
        let message = Message {
            header: MessageHeader {
                transport_specific: self.instance.profile.transport_specific,
                message_type: msg_type,
                version: PTP_VERSION,
                message_length: 0,
                domain_number: self.instance.domain_number,
                flags: outgoing.flags,
                correction: outgoing.correction,
                source_port_identity: self.instance.identity,
                sequence_id: outgoing.sequence_id,
                control: 0,
                log_message_interval: outgoing.log_interval.as_i8(),
            },
            body: outgoing.body,
        };

        message.encode(buf).map_err(|err| {
            self.log(PortEvent::MessageDiscarded(err));
            SendError::Failed
        })
    }

    pub(crate) fn transmit(&mut self, frame: &[u8], msg_type: MessageType) -> SendResult {
        let channel = if msg_type.is_event() {
            Channel::Event
        } else {
            Channel::General
        };

        match self.net.send(frame, channel) {
            Ok(timestamp) => {
                self.log(PortEvent::MessageSent(msg_type));
                Ok(timestamp)
            }
            Err(SendError::NoStamp) => {
                self.log(PortEvent::MessageSent(msg_type));
                Ok(TimeStamp::default())
            }
            Err(SendError::Failed) => Err(SendError::Failed),
        }
    }

    /// Egress timestamp adjusted by the configured outbound latency.
    pub(crate) fn egress(&self, timestamp: TimeStamp) -> TimeStamp {
        timestamp + self.instance.profile.outbound_latency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_identity_bytes_layout() {
        let id = PortIdentity::new(
            ClockIdentity::new(&[1, 2, 3, 4, 5, 6, 7, 8]),
            PortNumber::new(0x0102),
        );

        assert_eq!(id.to_bytes(), [1, 2, 3, 4, 5, 6, 7, 8, 1, 2]);
        assert_eq!(PortIdentity::from_bytes(&id.to_bytes()), id);
    }

    #[test]
    fn sent_sequences_are_tracked_per_type() {
        let mut sent = SentSequences::default();

        assert_eq!(sent.issue(MessageType::Sync), SequenceId::new(1));
        assert_eq!(sent.issue(MessageType::Sync), SequenceId::new(2));
        assert_eq!(sent.issue(MessageType::DelayReq), SequenceId::new(1));
        assert_eq!(sent.last(MessageType::Sync), SequenceId::new(2));
    }
}
