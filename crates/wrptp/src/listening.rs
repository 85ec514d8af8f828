use crate::clock::TimeOps;
use crate::datasets::ClockContext;
use crate::extension::Extension;
use crate::log::PortLog;
use crate::message::MessageBody;
use crate::port::{NetOps, Port};
use crate::portstate::{Incoming, Next, PortState};
use crate::timeout::TimeoutKind;

impl<N: NetOps, T: TimeOps, E: Extension, L: PortLog> Port<N, T, E, L> {
    /// LISTENING: collect Announce messages until the BMC picks a state or nobody shows up.
    pub(crate) fn listening_state(
        &mut self,
        clock: &mut ClockContext,
        incoming: Option<Incoming<'_>>,
    ) -> Next {
        if let Err(err) = self.ext.listening(&mut self.instance) {
            return self.fault(err.into());
        }
        if self.instance.is_new_state {
            self.instance
                .timeouts
                .restart(TimeoutKind::AnnounceReceipt, &self.time);
        }

        if let Some(incoming) = incoming {
            if let MessageBody::Announce(_) = incoming.msg.body {
                self.add_foreign(&incoming);
            }
        }

        if let Some(next) = self.check_record_update(clock) {
            return Next::Goto(next);
        }
        match self.announce_receipt_expired(clock) {
            Some(next) if next != PortState::Listening => return Next::Goto(next),
            _ => {}
        }

        Next::Stay(
            self.instance
                .timeouts
                .next_delay(&[TimeoutKind::AnnounceReceipt], &self.time),
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::datasets::ClockContext;
    use crate::log::PortEvent;
    use crate::port::RxFrame;
    use crate::portstate::PortState;
    use crate::profile::{PortProfile, PortRole};
    use crate::test_support::{
        announce_frame, announce_from, fake_clock, fake_default_ds, fake_port, FakePort,
    };
    use crate::time::TimeStamp;

    fn listening(clock: &mut ClockContext, profile: PortProfile) -> FakePort {
        let mut port = fake_port(clock, profile);
        port.state_machine(clock, None);
        // Entry pass arms the announce receipt timeout.
        port.state_machine(clock, None);
        assert_eq!(port.state(), PortState::Listening);
        port
    }

    #[test]
    fn listening_waits_for_announce_receipt_timeout() {
        let mut clock = fake_clock();
        let mut port = listening(&mut clock, PortProfile::default());

        // 3 announce intervals of 2 s.
        assert_eq!(port.state_machine(&mut clock, None), 6000);
    }

    #[test]
    fn listening_becomes_master_when_nobody_announces() {
        let mut clock = fake_clock();
        let mut port = listening(&mut clock, PortProfile::default());

        port.time().advance_ms(6000);
        port.state_machine(&mut clock, None);

        assert_eq!(port.state(), PortState::Master);
        assert!(port
            .port_log()
            .events()
            .contains(&PortEvent::AnnounceReceiptTimeout));
    }

    #[test]
    fn listening_slave_only_clock_keeps_listening() {
        let mut ds = fake_default_ds(0x42, 128);
        ds.slave_only = true;
        let mut clock = ClockContext::new(ds);
        let mut port = listening(&mut clock, PortProfile::default());

        port.time().advance_ms(6000);
        assert_eq!(port.state_machine(&mut clock, None), 6000);
        assert_eq!(port.state(), PortState::Listening);
    }

    #[test]
    fn listening_slave_role_keeps_listening() {
        let mut clock = fake_clock();
        let mut port = listening(&mut clock, PortProfile::new(PortRole::Slave, Default::default()));

        port.time().advance_ms(6000);
        port.state_machine(&mut clock, None);
        assert_eq!(port.state(), PortState::Listening);
    }

    #[test]
    fn listening_better_announce_selects_slave() {
        let mut clock = fake_clock();
        let mut port = listening(&mut clock, PortProfile::default());

        let better = announce_from(1, 100);
        let frame = announce_frame(&better, 1);
        port.state_machine(&mut clock, Some(RxFrame::new(&frame, TimeStamp::new(1, 0))));

        assert_eq!(port.state(), PortState::Slave);
        assert_eq!(clock.parent_ds().parent_port_identity, better.source);
        assert_eq!(clock.current_ds().steps_removed, 1);
    }

    #[test]
    fn listening_worse_announce_selects_master() {
        let mut clock = fake_clock();
        let mut port = listening(&mut clock, PortProfile::default());

        let frame = announce_frame(&announce_from(9, 200), 1);
        port.state_machine(&mut clock, Some(RxFrame::new(&frame, TimeStamp::new(1, 0))));

        assert_eq!(port.state(), PortState::Master);
        assert_eq!(port.foreign_count(), 1);
    }
}
