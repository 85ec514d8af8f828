//! Port states and the per-pass state-machine driver.
//!
//! [`Port::state_machine`] is called once per event by the host loop: with the received frame
//! when one arrived, or with `None` when the previous poll delay ran out. It decodes the frame,
//! runs the handler of the current state and either applies the transition the handler asked
//! for or returns the delay until the next deadline of that state.
//!
//! State handlers live in their own modules (`listening`, `master`, `slave`, ...). The pieces
//! they share are here: foreign master bookkeeping, the deferred BMC run and the announce
//! receipt timeout.

use core::fmt;

use crate::bmca;
use crate::clock::TimeOps;
use crate::datasets::ClockContext;
use crate::extension::{Extension, ExtensionError};
use crate::foreign::ForeignMasterRecord;
use crate::log::{PortEvent, PortLog};
use crate::message::{Message, MessageBody, ANNOUNCE_LEN};
use crate::port::{NetOps, Port, RxFrame, SendError};
use crate::profile::PortRole;
use crate::time::TimeStamp;
use crate::timeout::{TimeoutKind, DEFAULT_NEXT_DELAY_MS};
use crate::wire::decode_header;

// Port states as defined in IEEE 1588 Section 9.2.5
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortState {
    Initializing,
    Faulty,
    Disabled,
    Listening,
    PreMaster,
    Master,
    Passive,
    Uncalibrated,
    Slave,
}

impl PortState {
    pub fn name(&self) -> &'static str {
        match self {
            PortState::Initializing => "INITIALIZING",
            PortState::Faulty => "FAULTY",
            PortState::Disabled => "DISABLED",
            PortState::Listening => "LISTENING",
            PortState::PreMaster => "PRE_MASTER",
            PortState::Master => "MASTER",
            PortState::Passive => "PASSIVE",
            PortState::Uncalibrated => "UNCALIBRATED",
            PortState::Slave => "SLAVE",
        }
    }

    /// SLAVE and UNCALIBRATED share one handler and follow a parent.
    pub fn is_slave(&self) -> bool {
        matches!(self, PortState::Slave | PortState::Uncalibrated)
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a state handler asks the driver to do after its pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Next {
    /// Stay and poll again after this many milliseconds.
    Stay(u32),
    Goto(PortState),
}

/// Reasons a handler escalates the port to FAULTY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PortFault {
    Send,
    Extension(ExtensionError),
}

impl From<SendError> for PortFault {
    fn from(_: SendError) -> Self {
        PortFault::Send
    }
}

impl From<ExtensionError> for PortFault {
    fn from(err: ExtensionError) -> Self {
        PortFault::Extension(err)
    }
}

/// Outcome of handling one message: an optional state change, or a fault.
pub(crate) type Handled = core::result::Result<Option<PortState>, PortFault>;

/// A decoded frame that passed the port's acceptance checks.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Incoming<'a> {
    pub(crate) msg: Message<'a>,
    /// Header correction field, already converted.
    pub(crate) correction: TimeStamp,
    pub(crate) from_parent: bool,
    pub(crate) ingress: TimeStamp,
    /// Frame bytes up to `messageLength`.
    pub(crate) bytes: &'a [u8],
}

impl<N: NetOps, T: TimeOps, E: Extension, L: PortLog> Port<N, T, E, L> {
    /// Run one pass of the state machine and return the delay until the next pass.
    ///
    /// After a state change the returned delay is 0: the new state's entry actions should run
    /// right away.
    pub fn state_machine(&mut self, clock: &mut ClockContext, frame: Option<RxFrame<'_>>) -> u32 {
        if self.instance.ebest_generation != clock.ebest_generation() {
            self.instance.ebest_generation = clock.ebest_generation();
            self.instance.record_update = true;
        }

        if self.instance.is_new_state {
            let interval = self.instance.request_interval();
            self.instance.timeouts.configure(
                &self.instance.profile,
                interval,
                clock.current_ds.steps_removed,
            );
            self.instance.timeouts.setall(&self.time);
        }

        let state = self.instance.state;
        let mut incoming = match (state, frame) {
            (PortState::Disabled, _) | (_, None) => None,
            (_, Some(frame)) => self.accept(clock, frame),
        };
        if let Some(MessageBody::Signaling(signaling)) = incoming.map(|i| i.msg.body) {
            incoming = None;
            if let Err(err) = self.ext.handle_signaling(&mut self.instance, &signaling) {
                return self.apply(self.fault(err.into()));
            }
        }

        let next = match state {
            PortState::Initializing => self.initializing_state(clock),
            PortState::Faulty => self.faulty_state(),
            PortState::Disabled => Next::Stay(DEFAULT_NEXT_DELAY_MS),
            PortState::Listening => self.listening_state(clock, incoming),
            PortState::PreMaster => self.premaster_state(clock, incoming),
            PortState::Master => self.master_state(clock, incoming),
            PortState::Passive => self.passive_state(clock, incoming),
            PortState::Uncalibrated | PortState::Slave => self.slave_state(clock, incoming),
        };
        self.apply(next)
    }

    fn apply(&mut self, next: Next) -> u32 {
        self.instance.is_new_state = false;
        self.next_delay_ms = match next {
            Next::Goto(to) if to != self.instance.state => {
                self.change_state(to);
                0
            }
            Next::Goto(_) => self.fold_ext_timeout(DEFAULT_NEXT_DELAY_MS),
            Next::Stay(delay) => self.fold_ext_timeout(delay),
        };
        self.next_delay_ms
    }

    fn fold_ext_timeout(&self, delay: u32) -> u32 {
        match self.ext.calc_timeout(&self.instance) {
            Some(ext) => delay.min(ext),
            None => delay,
        }
    }

    fn accept<'a>(&self, clock: &ClockContext, frame: RxFrame<'a>) -> Option<Incoming<'a>> {
        let decoded = decode_header(
            frame.bytes,
            self.instance.domain_number,
            &self.instance.identity,
            &clock.parent_ds.parent_port_identity,
        )
        .and_then(|received| Ok((received, Message::decode(frame.bytes)?)));

        match decoded {
            Ok((received, msg)) => {
                self.log(PortEvent::MessageReceived(msg.header.message_type));
                Some(Incoming {
                    msg,
                    correction: received.correction,
                    from_parent: received.from_current_parent,
                    ingress: frame.timestamp,
                    bytes: &frame.bytes[..received.header.message_length as usize],
                })
            }
            Err(err) => {
                self.log(PortEvent::MessageDiscarded(err));
                None
            }
        }
    }

    /// Exit actions of `from`, run on every state change.
    pub(crate) fn leave_state(&mut self, from: PortState) {
        match from {
            PortState::Slave | PortState::Uncalibrated => {
                self.instance.timeouts.clear(TimeoutKind::AnnounceReceipt);
                self.instance.timeouts.clear(TimeoutKind::DelayRequest);
                self.instance.servo.reset();
            }
            PortState::Listening => {
                self.instance.timeouts.clear(TimeoutKind::AnnounceReceipt);
            }
            _ => {}
        }
    }

    pub(crate) fn fault(&self, fault: PortFault) -> Next {
        if let PortFault::Extension(_) = fault {
            self.log(PortEvent::Static("extension hook failed"));
        }
        self.log(PortEvent::FaultDetected);
        Next::Goto(PortState::Faulty)
    }

    /// Store the sender of an Announce as a foreign master.
    ///
    /// The BMC is scheduled when the sender is new or announced something different.
    pub(crate) fn add_foreign(&mut self, incoming: &Incoming<'_>) -> Option<ForeignMasterRecord> {
        let MessageBody::Announce(announce) = incoming.msg.body else {
            return None;
        };
        let header = &incoming.msg.header;
        let source = header.source_port_identity;

        let tlvs = incoming.bytes.get(ANNOUNCE_LEN..).unwrap_or_default();
        let mut record = ForeignMasterRecord::new(source, header.flags, announce);
        record.ext_specific = self.ext.unpack_announce(&mut self.instance, tlvs);

        let changed = match self.instance.foreign.get(&source) {
            Some(known) => !same_announcement(known, &record),
            None => true,
        };
        if self.instance.foreign.add(record) {
            self.log(PortEvent::NewForeignMaster { source });
        }
        if changed {
            self.instance.record_update = true;
        }
        Some(record)
    }

    /// Run the BMC if an Announce or an Ebest change asked for it.
    ///
    /// Returns the recommended state when it differs from the current one.
    pub(crate) fn check_record_update(&mut self, clock: &mut ClockContext) -> Option<PortState> {
        if !self.instance.record_update {
            return None;
        }
        self.instance.record_update = false;

        let next = self.bmc(clock);
        (next != self.instance.state).then_some(next)
    }

    /// Announce receipt timeout handling of LISTENING, PASSIVE, UNCALIBRATED and SLAVE.
    ///
    /// All foreign masters are forgotten. A clock that may be master takes over. Otherwise the
    /// port keeps listening.
    pub(crate) fn announce_receipt_expired(
        &mut self,
        clock: &mut ClockContext,
    ) -> Option<PortState> {
        if !self
            .instance
            .timeouts
            .take_expired(TimeoutKind::AnnounceReceipt, &self.time)
        {
            return None;
        }
        self.log(PortEvent::AnnounceReceiptTimeout);

        self.instance.foreign.clear();
        self.instance.record_update = false;
        clock.update_erbest(self.instance.index, None);
        self.instance.ebest_generation = clock.ebest_generation();

        if !clock.default_ds.slave_only && self.instance.profile.role != PortRole::Slave {
            // Another port may still follow a master; the datasets stay with it.
            if clock.ebest().is_none() {
                bmca::m1(clock);
            }
            return Some(PortState::Master);
        }
        self.instance
            .timeouts
            .restart(TimeoutKind::AnnounceReceipt, &self.time);
        Some(PortState::Listening)
    }
}

/// The origin timestamp changes on every Announce and does not count as news.
fn same_announcement(a: &ForeignMasterRecord, b: &ForeignMasterRecord) -> bool {
    let strip = |r: &ForeignMasterRecord| {
        let mut r = *r;
        r.announce.origin_timestamp = TimeStamp::default();
        r
    };
    strip(a) == strip(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::message::SignalingMessage;
    use crate::port::{PortIdentity, PortInstance};
    use crate::profile::PortProfile;
    use crate::result::{Error, ProtocolError};
    use crate::test_support::{
        announce_frame, announce_from, encode, fake_clock, fake_default_ds, fake_port,
        fake_port_with, test_header,
    };
    use crate::wire::MessageType;

    #[test]
    fn portstate_names() {
        assert_eq!(PortState::PreMaster.to_string(), "PRE_MASTER");
        assert!(PortState::Uncalibrated.is_slave());
        assert!(!PortState::Passive.is_slave());
    }

    #[test]
    fn portstate_initializing_moves_to_listening_immediately() {
        let mut clock = fake_clock();
        let mut port = fake_port(&clock, PortProfile::default());

        assert_eq!(port.state_machine(&mut clock, None), 0);
        assert_eq!(port.state(), PortState::Listening);
        assert!(port.port_log().events().contains(&PortEvent::Initialized));
    }

    #[test]
    fn portstate_discards_own_frames() {
        let mut clock = fake_clock();
        let mut port = fake_port(&clock, PortProfile::default());
        port.state_machine(&mut clock, None);

        let mut record = announce_from(1, 100);
        record.source = *port.identity();
        let own = announce_frame(&record, 1);
        port.state_machine(&mut clock, Some(RxFrame::new(&own, TimeStamp::new(1, 0))));

        assert_eq!(port.foreign_count(), 0);
        assert!(port.port_log().events().iter().any(|e| matches!(
            e,
            PortEvent::MessageDiscarded(Error::Protocol(ProtocolError::FromSelf))
        )));
    }

    #[test]
    fn portstate_disabled_ignores_frames_until_enabled() {
        let mut clock = fake_clock();
        let mut port = fake_port(&clock, PortProfile::default());
        port.disable();
        assert_eq!(port.state(), PortState::Disabled);

        let frame = announce_frame(&announce_from(1, 100), 1);
        let delay =
            port.state_machine(&mut clock, Some(RxFrame::new(&frame, TimeStamp::new(1, 0))));

        assert_eq!(delay, DEFAULT_NEXT_DELAY_MS);
        assert_eq!(port.foreign_count(), 0);
        assert!(port.net().sent_types().is_empty());

        port.enable();
        assert_eq!(port.state(), PortState::Initializing);
        port.state_machine(&mut clock, None);
        assert_eq!(port.state(), PortState::Listening);
    }

    #[test]
    fn portstate_ebest_change_reruns_bmc() {
        let mut clock = ClockContext::new(fake_default_ds(0x42, 128).with_number_ports(2));
        let mut port = fake_port(&clock, PortProfile::default());
        port.state_machine(&mut clock, None);
        assert_eq!(port.state(), PortState::Listening);

        clock.update_erbest(1, Some(announce_from(1, 100)));
        port.state_machine(&mut clock, None);

        // Another port holds Ebest: this one has no foreign master and keeps listening.
        assert_eq!(port.state(), PortState::Listening);
        assert_eq!(port.instance().ebest_generation, clock.ebest_generation());
    }

    #[test]
    fn portstate_folds_extension_deadline() {
        struct Tight;
        impl Extension for Tight {
            fn calc_timeout(&self, _port: &PortInstance) -> Option<u32> {
                Some(7)
            }
        }

        let mut clock = fake_clock();
        let mut port = fake_port_with(&clock, PortProfile::default(), Tight);
        port.state_machine(&mut clock, None);

        assert_eq!(port.state_machine(&mut clock, None), 7);
    }

    #[test]
    fn portstate_signaling_reaches_extension() {
        #[derive(Default)]
        struct CountSignaling(u32);
        impl Extension for CountSignaling {
            fn handle_signaling(
                &mut self,
                _port: &mut PortInstance,
                _msg: &SignalingMessage<'_>,
            ) -> crate::extension::ExtensionResult<()> {
                self.0 += 1;
                Ok(())
            }
        }

        let mut clock = fake_clock();
        let mut port = fake_port_with(&clock, PortProfile::default(), CountSignaling::default());
        port.state_machine(&mut clock, None);

        let frame = encode(
            test_header(PortIdentity::fake_peer(), MessageType::Signaling, 1),
            MessageBody::Signaling(SignalingMessage {
                target_port_identity: *port.identity(),
                tlvs: &[],
            }),
        );
        port.state_machine(&mut clock, Some(RxFrame::new(&frame, TimeStamp::new(1, 0))));

        assert_eq!(port.extension().0, 1);
        assert_eq!(port.state(), PortState::Listening);
    }
}
