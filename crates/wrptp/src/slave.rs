//! Port states: Slave and Uncalibrated.
//!
//! Both states follow a parent and share one handler. UNCALIBRATED is only entered and left on
//! request of a timing extension; without one a port moves straight to SLAVE.
//!
//! In SLAVE a port is responsible for:
//! - keeping the foreign master table current and rerunning the BMC when it changes,
//! - restarting the announce receipt timeout on every Announce from the parent,
//! - collecting the Sync/Follow_Up and Delay_Req/Delay_Resp (or peer-delay) timestamps and
//!   feeding them to the servo,
//! - issuing delay requests at the (possibly master-imposed) request interval, and
//! - giving up on the parent when its Announces stop arriving.

use crate::clock::TimeOps;
use crate::datasets::ClockContext;
use crate::extension::{Extension, HookFlow};
use crate::log::{PortEvent, PortLog};
use crate::message::MessageBody;
use crate::port::{NetOps, Port};
use crate::portstate::{Handled, Incoming, Next, PortFault};
use crate::profile::DelayMechanism;
use crate::servo::{ClockAction, ServoUpdate, ABORT_DIAGNOSTIC_THRESHOLD};
use crate::timeout::TimeoutKind;

impl<N: NetOps, T: TimeOps, E: Extension, L: PortLog> Port<N, T, E, L> {
    pub(crate) fn slave_state(
        &mut self,
        clock: &mut ClockContext,
        incoming: Option<Incoming<'_>>,
    ) -> Next {
        if self.instance.is_new_state {
            self.instance.reset_exchange();
            if let Err(err) = self.ext.new_slave(&mut self.instance) {
                return self.fault(err.into());
            }
            self.instance
                .timeouts
                .restart(TimeoutKind::AnnounceReceipt, &self.time);
            let interval = self.instance.request_interval();
            self.instance
                .timeouts
                .set_randomized(TimeoutKind::DelayRequest, interval, &self.time);
        }

        if let Some(incoming) = incoming {
            match self.slave_msg(clock, &incoming) {
                Ok(None) => {}
                Ok(Some(to)) => return Next::Goto(to),
                Err(fault) => return self.fault(fault),
            }
        }

        if let Some(next) = self.check_record_update(clock) {
            return Next::Goto(next);
        }

        let check_announce = match self.ext.execute_slave(&mut self.instance) {
            Err(err) => return self.fault(err.into()),
            Ok(HookFlow::Transition(to)) => return Next::Goto(to),
            Ok(HookFlow::Done) => false,
            Ok(HookFlow::Continue) => true,
        };

        if let Err(fault) = self.delay_request_due() {
            return self.fault(fault);
        }

        if check_announce {
            if let Some(next) = self.announce_receipt_expired(clock) {
                return Next::Goto(next);
            }
        }

        Next::Stay(self.instance.timeouts.next_delay(
            &[TimeoutKind::AnnounceReceipt, TimeoutKind::DelayRequest],
            &self.time,
        ))
    }

    fn slave_msg(&mut self, clock: &mut ClockContext, incoming: &Incoming<'_>) -> Handled {
        match incoming.msg.body {
            MessageBody::Announce(_) => {
                self.add_foreign(incoming);
                if incoming.from_parent {
                    self.instance
                        .timeouts
                        .restart(TimeoutKind::AnnounceReceipt, &self.time);
                    self.ext.handle_announce(&mut self.instance)?;
                }
                Ok(None)
            }
            MessageBody::Sync(sync) => self.slave_sync(clock, incoming, sync),
            MessageBody::FollowUp(follow_up) => self.slave_follow_up(clock, incoming, follow_up),
            MessageBody::DelayResp(resp) => self.process_delay_resp(clock, incoming, resp),
            MessageBody::PdelayReq(_) => {
                self.respond_pdelay_req(incoming)?;
                Ok(None)
            }
            MessageBody::PdelayResp(resp) => self.process_pdelay_resp(clock, incoming, resp),
            MessageBody::PdelayRespFollowUp(follow_up) => {
                self.process_pdelay_resp_follow_up(clock, incoming, follow_up)
            }
            _ => Ok(None),
        }
    }

    /// Issue the path delay request of the configured mechanism when its timeout expired.
    pub(crate) fn delay_request_due(&mut self) -> Result<(), PortFault> {
        if !self
            .instance
            .timeouts
            .take_expired(TimeoutKind::DelayRequest, &self.time)
        {
            return Ok(());
        }

        match self.instance.profile.delay_mechanism {
            DelayMechanism::E2E => self.send_delay_req()?,
            DelayMechanism::P2P => self.send_pdelay_req()?,
        }
        let interval = self.instance.request_interval();
        self.instance
            .timeouts
            .set_randomized(TimeoutKind::DelayRequest, interval, &self.time);
        Ok(())
    }

    /// Feed a completed Sync exchange to the servo and steer the clock.
    pub(crate) fn servo_offset(&mut self, clock: &mut ClockContext) {
        let update = self
            .instance
            .servo
            .update_offset(&self.instance.exchange, self.instance.profile.max_delay_ns);
        if !self.servo_diagnostics(update) {
            return;
        }

        match self.instance.servo.update_clock(&self.time) {
            Ok(ClockAction::Stepped { offset }) => self.log(PortEvent::ClockStepped { offset }),
            Ok(_) => {}
            Err(err) => self.log(PortEvent::ClockRejected(err)),
        }
        clock.publish_servo(&self.instance.servo);
    }

    /// Publish the estimates after a path delay update.
    pub(crate) fn servo_updated(&mut self, clock: &mut ClockContext, update: ServoUpdate) {
        if self.servo_diagnostics(update) {
            clock.publish_servo(&self.instance.servo);
        }
    }

    /// Log what went wrong with a servo update. True when the estimates changed.
    pub(crate) fn servo_diagnostics(&self, update: ServoUpdate) -> bool {
        match update {
            ServoUpdate::Updated => true,
            ServoUpdate::Waiting => false,
            ServoUpdate::Rejected => {
                self.log(PortEvent::DelayRejected);
                false
            }
            ServoUpdate::Aborted { consecutive } => {
                self.log(PortEvent::TimestampsIncorrect { consecutive });
                if consecutive > ABORT_DIAGNOSTIC_THRESHOLD {
                    self.log(PortEvent::ServoStalled { consecutive });
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::extension::ExtensionResult;
    use crate::message::{FollowUpMessage, SyncMessage};
    use crate::port::{PortInstance, RxFrame};
    use crate::portstate::PortState;
    use crate::profile::{PortProfile, PortRole};
    use crate::test_support::{
        announce_frame, announce_from, encode, fake_clock, fake_default_ds, fake_port_with,
        slave_of, slave_with, test_header,
    };
    use crate::time::TimeStamp;
    use crate::wire::{Flags, MessageType};

    #[test]
    fn slave_entry_resets_exchange_and_arms_timeouts() {
        let master = announce_from(1, 100);
        let (_clock, port) = slave_of(&master, PortProfile::default());

        assert_eq!(port.state(), PortState::Slave);
        assert_eq!(port.exchange(), &crate::port::Exchange::default());
        assert!(port.instance().timeouts().is_armed(TimeoutKind::AnnounceReceipt));
        assert!(port.instance().timeouts().is_armed(TimeoutKind::DelayRequest));
    }

    #[test]
    fn slave_parent_announce_restarts_receipt_timeout() {
        let master = announce_from(1, 100);
        let (mut clock, mut port) = slave_of(&master, PortProfile::default());

        port.time().advance_ms(5000);
        let frame = announce_frame(&master, 2);
        port.state_machine(&mut clock, Some(RxFrame::new(&frame, TimeStamp::new(5, 0))));
        port.time().advance_ms(5000);
        port.state_machine(&mut clock, None);

        assert_eq!(port.state(), PortState::Slave);
        assert_eq!(
            port.instance().timeouts().time_to(TimeoutKind::AnnounceReceipt, port.time()),
            Some(1000)
        );
    }

    #[test]
    fn slave_announce_timeout_takes_over_as_master() {
        let master = announce_from(1, 100);
        let (mut clock, mut port) = slave_of(&master, PortProfile::default());

        port.time().advance_ms(6000);
        port.state_machine(&mut clock, None);

        assert_eq!(port.state(), PortState::Master);
        assert_eq!(port.foreign_count(), 0);
        assert_eq!(clock.parent_ds().grandmaster_identity, clock.default_ds().clock_identity);
        assert!(port
            .port_log()
            .events()
            .contains(&PortEvent::AnnounceReceiptTimeout));
    }

    #[test]
    fn slave_announce_timeout_on_slave_only_clock_returns_to_listening() {
        let master = announce_from(1, 100);
        let mut ds = fake_default_ds(0x42, 128);
        ds.slave_only = true;
        let (mut clock, mut port) = slave_with(ds, &master, PortProfile::default());

        port.time().advance_ms(6000);
        port.state_machine(&mut clock, None);

        assert_eq!(port.state(), PortState::Listening);
        assert_eq!(port.foreign_count(), 0);
    }

    #[test]
    fn slave_fixed_role_returns_to_listening() {
        let master = announce_from(1, 100);
        let profile = PortProfile::new(PortRole::Slave, Default::default());
        let (mut clock, mut port) = slave_of(&master, profile);

        port.time().advance_ms(6000);
        port.state_machine(&mut clock, None);

        assert_eq!(port.state(), PortState::Listening);
    }

    #[test]
    fn slave_better_master_changes_parent_and_resets_servo() {
        let master = announce_from(1, 100);
        let (mut clock, mut port) = slave_of(&master, PortProfile::default());

        let sync = encode(
            test_header(master.source, MessageType::Sync, 1),
            MessageBody::Sync(SyncMessage {
                origin_timestamp: TimeStamp::new(100, 0),
            }),
        );
        port.state_machine(&mut clock, Some(RxFrame::new(&sync, TimeStamp::new(100, 300))));
        assert!(port.exchange().t2().is_correct());

        let better = announce_from(2, 50);
        let frame = announce_frame(&better, 1);
        port.state_machine(&mut clock, Some(RxFrame::new(&frame, TimeStamp::new(101, 0))));

        assert_eq!(port.state(), PortState::Slave);
        assert_eq!(clock.parent_ds().parent_port_identity, better.source);
        assert!(!port.exchange().t2().is_correct());
        assert_eq!(port.instance().servo().offset_from_master(), TimeStamp::new(0, 0));
    }

    #[test]
    fn slave_step_is_logged() {
        let master = announce_from(1, 100);
        let (mut clock, mut port) = slave_of(&master, PortProfile::default());

        let sync = encode(
            test_header(master.source, MessageType::Sync, 1),
            MessageBody::Sync(SyncMessage {
                origin_timestamp: TimeStamp::new(200, 0),
            }),
        );
        port.state_machine(&mut clock, Some(RxFrame::new(&sync, TimeStamp::new(100, 0))));

        assert!(port.port_log().events().iter().any(|e| matches!(
            e,
            PortEvent::ClockStepped { offset } if offset.seconds() == -100
        )));
        assert_eq!(port.time().set_calls().len(), 1);
    }

    #[test]
    fn slave_repeated_incorrect_timestamps_report_stall() {
        let master = announce_from(1, 100);
        let (mut clock, mut port) = slave_of(&master, PortProfile::default());

        // The Sync ingress timestamp is never captured.
        for seq in 1..=6u16 {
            let mut header = test_header(master.source, MessageType::Sync, seq);
            header.flags = Flags::TWO_STEP;
            let sync = encode(
                header,
                MessageBody::Sync(SyncMessage {
                    origin_timestamp: TimeStamp::new(0, 0),
                }),
            );
            let ingress = TimeStamp::new(1, 0).incorrect();
            port.state_machine(&mut clock, Some(RxFrame::new(&sync, ingress)));
            let follow_up = encode(
                test_header(master.source, MessageType::FollowUp, seq),
                MessageBody::FollowUp(FollowUpMessage {
                    precise_origin_timestamp: TimeStamp::new(1, 0),
                }),
            );
            port.state_machine(&mut clock, Some(RxFrame::new(&follow_up, TimeStamp::new(1, 10))));
        }

        let events = port.port_log().events();
        assert!(events.contains(&PortEvent::TimestampsIncorrect { consecutive: 6 }));
        assert!(events.contains(&PortEvent::ServoStalled { consecutive: 6 }));
        assert_eq!(port.state(), PortState::Slave);
    }

    #[test]
    fn slave_extension_can_hold_off_announce_timeout() {
        struct Calibrating;
        impl Extension for Calibrating {
            fn execute_slave(&mut self, _port: &mut PortInstance) -> ExtensionResult<HookFlow> {
                Ok(HookFlow::Done)
            }
        }

        let mut clock = fake_clock();
        let master = announce_from(1, 100);
        let mut port = fake_port_with(&clock, PortProfile::default(), Calibrating);
        port.state_machine(&mut clock, None);
        port.state_machine(&mut clock, None);
        let frame = announce_frame(&master, 1);
        port.state_machine(&mut clock, Some(RxFrame::new(&frame, TimeStamp::new(1, 0))));
        port.state_machine(&mut clock, None);
        assert_eq!(port.state(), PortState::Slave);

        port.time().advance_ms(7000);
        port.state_machine(&mut clock, None);

        assert_eq!(port.state(), PortState::Slave);
    }

    #[test]
    fn slave_extension_failure_faults_the_port() {
        struct Broken;
        impl Extension for Broken {
            fn new_slave(&mut self, _port: &mut PortInstance) -> ExtensionResult<()> {
                Err(crate::extension::ExtensionError::Failed)
            }
        }

        let mut clock = fake_clock();
        let mut port = fake_port_with(&clock, PortProfile::default(), Broken);
        port.state_machine(&mut clock, None);
        port.state_machine(&mut clock, None);
        let frame = announce_frame(&announce_from(1, 100), 1);
        port.state_machine(&mut clock, Some(RxFrame::new(&frame, TimeStamp::new(1, 0))));
        assert_eq!(port.state(), PortState::Slave);

        port.state_machine(&mut clock, None);

        assert_eq!(port.state(), PortState::Faulty);
        assert!(port.port_log().events().contains(&PortEvent::FaultDetected));
    }
}
