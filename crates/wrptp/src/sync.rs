//! Announce and Sync traffic on both sides of the link.
//!
//! The master side sends Announce carrying the clock datasets (plus whatever TLVs the extension
//! appends) and two-step Sync followed by Follow_Up. The slave side captures T2 on Sync and T1 on
//! Follow_Up (or on a one-step Sync) and hands the completed pair to the servo.

use crate::buffer::FRAME_CAPACITY;
use crate::clock::TimeOps;
use crate::datasets::ClockContext;
use crate::extension::{Extension, HookFlow};
use crate::log::{PortEvent, PortLog};
use crate::message::{AnnounceMessage, FollowUpMessage, MessageBody, SyncMessage};
use crate::port::{NetOps, Outgoing, Port};
use crate::portstate::{Handled, Incoming, PortFault};
use crate::wire::{set_message_length, CorrectionField, Flags, MessageType};

impl<N: NetOps, T: TimeOps, E: Extension, L: PortLog> Port<N, T, E, L> {
    pub(crate) fn send_announce(&mut self, clock: &ClockContext) -> Result<(), PortFault> {
        let parent = &clock.parent_ds;
        let time_properties = &clock.time_properties_ds;
        let announce = AnnounceMessage {
            origin_timestamp: self.time.now(),
            current_utc_offset: time_properties.current_utc_offset,
            grandmaster_priority1: parent.grandmaster_priority1,
            grandmaster_clock_quality: parent.grandmaster_clock_quality,
            grandmaster_priority2: parent.grandmaster_priority2,
            grandmaster_identity: parent.grandmaster_identity,
            steps_removed: clock.current_ds.steps_removed,
            time_source: time_properties.time_source,
        };

        let sequence_id = self.instance.sent.issue(MessageType::Announce);
        let mut buf = [0u8; FRAME_CAPACITY];
        let len = self.encode(
            Outgoing {
                flags: time_properties.to_flags(),
                correction: CorrectionField::ZERO,
                sequence_id,
                log_interval: self.instance.profile.log_announce_interval,
                body: MessageBody::Announce(announce),
            },
            &mut buf,
        )?;

        // An extension cannot claim more than the space it was given.
        let tlv_len = self
            .ext
            .pack_announce(&self.instance, &mut buf[len..])
            .min(FRAME_CAPACITY - len);
        if tlv_len > 0 {
            set_message_length(&mut buf, len + tlv_len);
        }
        self.transmit(&buf[..len + tlv_len], MessageType::Announce)?;
        Ok(())
    }

    /// Send a two-step Sync and its Follow_Up.
    ///
    /// Without an egress timestamp the Follow_Up is skipped; the slave drops the orphaned Sync
    /// when the next one arrives.
    pub(crate) fn send_sync(&mut self) -> Result<(), PortFault> {
        let sequence_id = self.instance.sent.issue(MessageType::Sync);
        let log_interval = self.instance.profile.log_sync_interval;

        let egress = self.send(Outgoing {
            flags: Flags::TWO_STEP,
            correction: CorrectionField::ZERO,
            sequence_id,
            log_interval,
            body: MessageBody::Sync(SyncMessage {
                origin_timestamp: self.time.now(),
            }),
        })?;
        if !egress.is_correct() {
            self.log(PortEvent::Static("no egress timestamp for Sync"));
            return Ok(());
        }

        self.send(Outgoing {
            flags: 0,
            correction: CorrectionField::ZERO,
            sequence_id,
            log_interval,
            body: MessageBody::FollowUp(FollowUpMessage {
                precise_origin_timestamp: self.egress(egress),
            }),
        })?;
        Ok(())
    }

    pub(crate) fn slave_sync(
        &mut self,
        clock: &mut ClockContext,
        incoming: &Incoming<'_>,
        sync: SyncMessage,
    ) -> Handled {
        if !incoming.from_parent {
            return Ok(None);
        }
        let header = &incoming.msg.header;

        self.instance.exchange.t2 = incoming.ingress;
        self.ext.handle_sync(&mut self.instance, incoming.ingress)?;

        let exchange = &mut self.instance.exchange;
        exchange.sync_correction = incoming.correction;
        exchange.sync_sequence = header.sequence_id;
        if header.has_flag(Flags::TWO_STEP) {
            exchange.waiting_follow_up = true;
            return Ok(None);
        }

        exchange.waiting_follow_up = false;
        exchange.t1 = sync.origin_timestamp;
        self.servo_offset(clock);
        Ok(None)
    }

    pub(crate) fn slave_follow_up(
        &mut self,
        clock: &mut ClockContext,
        incoming: &Incoming<'_>,
        follow_up: FollowUpMessage,
    ) -> Handled {
        let expected = self.instance.exchange.waiting_follow_up
            && incoming.msg.header.sequence_id == self.instance.exchange.sync_sequence;
        if !incoming.from_parent || !expected {
            self.log(PortEvent::ResponseMismatch(MessageType::FollowUp));
            return Ok(None);
        }

        let exchange = &mut self.instance.exchange;
        exchange.waiting_follow_up = false;
        exchange.t1 = follow_up.precise_origin_timestamp;
        exchange.sync_correction = exchange.sync_correction + incoming.correction;

        match self.ext.handle_followup(&mut self.instance)? {
            HookFlow::Continue => {}
            HookFlow::Done => return Ok(None),
            HookFlow::Transition(to) => return Ok(Some(to)),
        }
        self.servo_offset(clock);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::message::{Message, ANNOUNCE_LEN};
    use crate::port::{PortIdentity, PortInstance, RxFrame};
    use crate::portstate::PortState;
    use crate::profile::PortProfile;
    use crate::test_support::{
        announce_from, encode, fake_clock, fake_port, fake_port_with, slave_of, test_header,
        NoStampNet,
    };
    use crate::time::TimeStamp;

    #[test]
    fn sync_announce_carries_clock_datasets() {
        let clock = fake_clock();
        let mut port = fake_port(&clock, PortProfile::default());

        port.send_announce(&clock).unwrap();

        let sent = port.net().sent();
        let msg = Message::decode(&sent[0].bytes).unwrap();
        let MessageBody::Announce(announce) = msg.body else {
            panic!("expected Announce, got {:?}", msg.body);
        };
        assert_eq!(sent[0].bytes.len(), ANNOUNCE_LEN);
        assert_eq!(announce.grandmaster_identity, clock.default_ds().clock_identity);
        assert_eq!(announce.steps_removed, 0);
        assert_eq!(msg.header.log_message_interval, 1);
        assert_eq!(msg.header.sequence_id.as_u16(), 1);
    }

    #[test]
    fn sync_announce_appends_extension_tlv() {
        struct Tlv;
        impl Extension for Tlv {
            fn pack_announce(&mut self, _port: &PortInstance, buf: &mut [u8]) -> usize {
                buf[..4].copy_from_slice(&[0xAB, 0xCD, 0x00, 0x00]);
                4
            }
        }

        let clock = fake_clock();
        let mut port = fake_port_with(&clock, PortProfile::default(), Tlv);
        port.send_announce(&clock).unwrap();

        let sent = port.net().sent();
        let bytes = &sent[0].bytes;
        assert_eq!(bytes.len(), ANNOUNCE_LEN + 4);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]) as usize, ANNOUNCE_LEN + 4);
        assert_eq!(&bytes[ANNOUNCE_LEN..], &[0xAB, 0xCD, 0x00, 0x00]);
    }

    #[test]
    fn sync_announce_clamps_oversized_extension_tlv() {
        struct Greedy;
        impl Extension for Greedy {
            fn pack_announce(&mut self, _port: &PortInstance, _buf: &mut [u8]) -> usize {
                usize::MAX
            }
        }

        let clock = fake_clock();
        let mut port = fake_port_with(&clock, PortProfile::default(), Greedy);
        port.send_announce(&clock).unwrap();

        let sent = port.net().sent();
        assert_eq!(sent[0].bytes.len(), FRAME_CAPACITY);
    }

    #[test]
    fn sync_two_step_follow_up_carries_egress_plus_latency() {
        let clock = fake_clock();
        let profile =
            PortProfile::default().with_outbound_latency(TimeStamp::from_nanos(250));
        let mut port = fake_port(&clock, profile);
        port.net().set_egress(TimeStamp::new(50, 1_000));

        port.send_sync().unwrap();

        let sent = port.net().sent();
        assert_eq!(
            port.net().sent_types(),
            [MessageType::Sync, MessageType::FollowUp]
        );
        let sync = Message::decode(&sent[0].bytes).unwrap();
        let follow_up = Message::decode(&sent[1].bytes).unwrap();
        assert!(sync.header.has_flag(Flags::TWO_STEP));
        assert_eq!(sync.header.sequence_id, follow_up.header.sequence_id);
        assert_eq!(
            follow_up.body,
            MessageBody::FollowUp(FollowUpMessage {
                precise_origin_timestamp: TimeStamp::new(50, 1_250),
            })
        );
    }

    #[test]
    fn sync_without_egress_stamp_skips_follow_up() {
        let clock = fake_clock();
        let mut port =
            crate::test_support::fake_port_on(&clock, PortProfile::default(), NoStampNet);

        assert!(port.send_sync().is_ok());
        assert!(port
            .port_log()
            .events()
            .contains(&PortEvent::MessageSent(MessageType::Sync)));
        assert!(!port
            .port_log()
            .events()
            .contains(&PortEvent::MessageSent(MessageType::FollowUp)));
    }

    fn sync_frame(master: PortIdentity, seq: u16, two_step: bool, origin: TimeStamp) -> Vec<u8> {
        let mut header = test_header(master, MessageType::Sync, seq);
        if two_step {
            header.flags = Flags::TWO_STEP;
        }
        header.correction = CorrectionField::from_nanos(10);
        encode(
            header,
            MessageBody::Sync(SyncMessage {
                origin_timestamp: origin,
            }),
        )
    }

    fn follow_up_frame(master: PortIdentity, seq: u16, origin: TimeStamp) -> Vec<u8> {
        let mut header = test_header(master, MessageType::FollowUp, seq);
        header.correction = CorrectionField::from_nanos(5);
        encode(
            header,
            MessageBody::FollowUp(FollowUpMessage {
                precise_origin_timestamp: origin,
            }),
        )
    }

    #[test]
    fn sync_slave_pairs_two_step_sync_with_follow_up() {
        let master = announce_from(1, 100);
        let (mut clock, mut port) = slave_of(&master, PortProfile::default());

        let sync = sync_frame(master.source, 7, true, TimeStamp::new(0, 0));
        port.state_machine(&mut clock, Some(RxFrame::new(&sync, TimeStamp::new(100, 900))));
        assert!(port.exchange().waiting_follow_up());
        assert_eq!(port.exchange().t2(), TimeStamp::new(100, 900));

        let follow_up = follow_up_frame(master.source, 7, TimeStamp::new(100, 200));
        port.state_machine(&mut clock, Some(RxFrame::new(&follow_up, TimeStamp::new(100, 950))));

        assert!(!port.exchange().waiting_follow_up());
        assert_eq!(port.exchange().t1(), TimeStamp::new(100, 200));
        assert_eq!(port.exchange().sync_correction(), TimeStamp::from_nanos(15));
        // 900 - 200 - 15 with no path delay measured yet.
        assert_eq!(
            port.instance().servo().offset_from_master(),
            TimeStamp::from_nanos(685)
        );
        assert_eq!(
            clock.current_ds().offset_from_master,
            TimeStamp::from_nanos(685)
        );
        assert_eq!(port.state(), PortState::Slave);
    }

    #[test]
    fn sync_slave_ignores_follow_up_with_other_sequence() {
        let master = announce_from(1, 100);
        let (mut clock, mut port) = slave_of(&master, PortProfile::default());

        let sync = sync_frame(master.source, 7, true, TimeStamp::new(0, 0));
        port.state_machine(&mut clock, Some(RxFrame::new(&sync, TimeStamp::new(100, 900))));
        let follow_up = follow_up_frame(master.source, 8, TimeStamp::new(100, 200));
        port.state_machine(&mut clock, Some(RxFrame::new(&follow_up, TimeStamp::new(100, 950))));

        assert!(port.exchange().waiting_follow_up());
        assert!(!port.exchange().t1().is_correct());
        assert!(port
            .port_log()
            .events()
            .contains(&PortEvent::ResponseMismatch(MessageType::FollowUp)));
    }

    #[test]
    fn sync_slave_one_step_updates_offset_immediately() {
        let master = announce_from(1, 100);
        let (mut clock, mut port) = slave_of(&master, PortProfile::default());

        let sync = sync_frame(master.source, 3, false, TimeStamp::new(100, 0));
        port.state_machine(&mut clock, Some(RxFrame::new(&sync, TimeStamp::new(100, 510))));

        assert_eq!(
            port.instance().servo().offset_from_master(),
            TimeStamp::from_nanos(500)
        );
    }

    #[test]
    fn sync_slave_ignores_sync_from_other_master() {
        let master = announce_from(1, 100);
        let (mut clock, mut port) = slave_of(&master, PortProfile::default());

        let sync = sync_frame(PortIdentity::fake_peer(), 3, false, TimeStamp::new(100, 0));
        port.state_machine(&mut clock, Some(RxFrame::new(&sync, TimeStamp::new(100, 510))));

        assert!(!port.exchange().t2().is_correct());
    }
}
