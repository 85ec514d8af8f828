//! Peer-to-peer delay mechanism.
//!
//! Every port on a P2P link measures the delay to its neighbour on its own, independent of the
//! master/slave relationship. The requester captures T3 (request egress) and T6 (response
//! ingress). The responder reports T4 (request receipt) in Pdelay_Resp and, being two-step,
//! T5 (response egress) in Pdelay_Resp_Follow_Up.

use crate::clock::TimeOps;
use crate::datasets::ClockContext;
use crate::extension::{Extension, HookFlow};
use crate::log::{PortEvent, PortLog};
use crate::message::{
    MessageBody, PdelayRequestMessage, PdelayResponseFollowUpMessage, PdelayResponseMessage,
};
use crate::port::{NetOps, Outgoing, Port, PortIdentity};
use crate::portstate::{Handled, Incoming, PortFault};
use crate::profile::DelayMechanism;
use crate::time::{LogInterval, TimeStamp};
use crate::wire::{CorrectionField, Flags, MessageType};

impl<N: NetOps, T: TimeOps, E: Extension, L: PortLog> Port<N, T, E, L> {
    pub(crate) fn uses_p2p(&self) -> bool {
        self.instance.profile.delay_mechanism == DelayMechanism::P2P
    }

    /// Peer delay requests go out in every state that measures the link, not only SLAVE.
    pub(crate) fn pdelay_request_due(&mut self) -> Result<(), PortFault> {
        if !self.uses_p2p() {
            return Ok(());
        }
        self.delay_request_due()
    }

    pub(crate) fn send_pdelay_req(&mut self) -> Result<(), PortFault> {
        let sequence_id = self.instance.sent.issue(MessageType::PdelayReq);
        let egress = self.send(Outgoing {
            flags: 0,
            correction: CorrectionField::ZERO,
            sequence_id,
            log_interval: LogInterval::UNSPECIFIED,
            body: MessageBody::PdelayReq(PdelayRequestMessage {
                origin_timestamp: self.time.now(),
            }),
        })?;

        let t3 = self.egress(egress);
        let exchange = &mut self.instance.exchange;
        exchange.t3 = t3;
        exchange.t4 = TimeStamp::default();
        exchange.t5 = TimeStamp::default();
        exchange.t6 = TimeStamp::default();
        exchange.waiting_pdelay_follow_up = false;
        Ok(())
    }

    /// Answer a Pdelay_Req with a two-step Pdelay_Resp and its follow-up.
    pub(crate) fn respond_pdelay_req(&mut self, incoming: &Incoming<'_>) -> Result<(), PortFault> {
        let mut msg = incoming.msg;
        match self
            .ext
            .handle_preq(&mut self.instance, &mut msg, incoming.ingress)?
        {
            HookFlow::Continue => {}
            HookFlow::Done | HookFlow::Transition(_) => return Ok(()),
        }
        let header = msg.header;

        let egress = self.send(Outgoing {
            flags: Flags::TWO_STEP,
            correction: header.correction,
            sequence_id: header.sequence_id,
            log_interval: LogInterval::UNSPECIFIED,
            body: MessageBody::PdelayResp(PdelayResponseMessage {
                request_receipt_timestamp: incoming.ingress,
                requesting_port_identity: header.source_port_identity,
            }),
        })?;
        if !egress.is_correct() {
            self.log(PortEvent::Static("no egress timestamp for Pdelay_Resp"));
            return Ok(());
        }

        self.send(Outgoing {
            flags: 0,
            correction: CorrectionField::ZERO,
            sequence_id: header.sequence_id,
            log_interval: LogInterval::UNSPECIFIED,
            body: MessageBody::PdelayRespFollowUp(PdelayResponseFollowUpMessage {
                response_origin_timestamp: self.egress(egress),
                requesting_port_identity: header.source_port_identity,
            }),
        })?;
        Ok(())
    }

    fn matches_pdelay_req(&self, incoming: &Incoming<'_>, requester: &PortIdentity) -> bool {
        *requester == self.instance.identity
            && incoming.msg.header.sequence_id == self.instance.sent.last(MessageType::PdelayReq)
    }

    pub(crate) fn process_pdelay_resp(
        &mut self,
        clock: &mut ClockContext,
        incoming: &Incoming<'_>,
        resp: PdelayResponseMessage,
    ) -> Handled {
        if !self.matches_pdelay_req(incoming, &resp.requesting_port_identity) {
            self.log(PortEvent::ResponseMismatch(MessageType::PdelayResp));
            return Ok(None);
        }

        let exchange = &mut self.instance.exchange;
        exchange.t4 = resp.request_receipt_timestamp;
        exchange.t6 = incoming.ingress;
        exchange.peer_correction = incoming.correction;

        if incoming.msg.header.has_flag(Flags::TWO_STEP) {
            exchange.waiting_pdelay_follow_up = true;
            return Ok(None);
        }
        self.peer_delay(clock, false)
    }

    pub(crate) fn process_pdelay_resp_follow_up(
        &mut self,
        clock: &mut ClockContext,
        incoming: &Incoming<'_>,
        follow_up: PdelayResponseFollowUpMessage,
    ) -> Handled {
        if !self.instance.exchange.waiting_pdelay_follow_up
            || !self.matches_pdelay_req(incoming, &follow_up.requesting_port_identity)
        {
            self.log(PortEvent::ResponseMismatch(MessageType::PdelayRespFollowUp));
            return Ok(None);
        }

        let exchange = &mut self.instance.exchange;
        exchange.waiting_pdelay_follow_up = false;
        exchange.t5 = follow_up.response_origin_timestamp;
        exchange.peer_correction = exchange.peer_correction + incoming.correction;
        self.peer_delay(clock, true)
    }

    fn peer_delay(&mut self, clock: &mut ClockContext, two_step: bool) -> Handled {
        match self.ext.handle_presp(&mut self.instance)? {
            HookFlow::Continue => {}
            HookFlow::Done => return Ok(None),
            HookFlow::Transition(to) => return Ok(Some(to)),
        }

        let update = self
            .instance
            .servo
            .update_peer_delay(&self.instance.exchange, two_step);
        if self.instance.state.is_slave() {
            self.servo_updated(clock, update);
        } else {
            self.servo_diagnostics(update);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::message::Message;
    use crate::port::RxFrame;
    use crate::portstate::PortState;
    use crate::profile::{PortProfile, PortRole};
    use crate::test_support::{encode, fake_clock, fake_port, master_port, test_header};
    use crate::timeout::TimeoutKind;

    fn p2p() -> PortProfile {
        PortProfile::new(PortRole::Auto, DelayMechanism::P2P)
    }

    fn pdelay_resp_frame(
        peer: PortIdentity,
        requester: PortIdentity,
        seq: u16,
        two_step: bool,
        receipt: TimeStamp,
    ) -> Vec<u8> {
        let mut header = test_header(peer, MessageType::PdelayResp, seq);
        if two_step {
            header.flags = Flags::TWO_STEP;
        }
        header.correction = CorrectionField::from_nanos(20);
        encode(
            header,
            MessageBody::PdelayResp(PdelayResponseMessage {
                request_receipt_timestamp: receipt,
                requesting_port_identity: requester,
            }),
        )
    }

    fn pdelay_follow_up_frame(
        peer: PortIdentity,
        requester: PortIdentity,
        seq: u16,
        origin: TimeStamp,
    ) -> Vec<u8> {
        encode(
            test_header(peer, MessageType::PdelayRespFollowUp, seq),
            MessageBody::PdelayRespFollowUp(PdelayResponseFollowUpMessage {
                response_origin_timestamp: origin,
                requesting_port_identity: requester,
            }),
        )
    }

    #[test]
    fn p2p_request_resets_previous_exchange() {
        let clock = fake_clock();
        let mut port = fake_port(&clock, p2p());
        port.instance.exchange.t5 = TimeStamp::new(1, 0);
        port.net().set_egress(TimeStamp::new(3, 0));

        port.send_pdelay_req().unwrap();

        assert_eq!(port.exchange().t3(), TimeStamp::new(3, 0));
        assert!(!port.exchange().t5().is_correct());
        assert_eq!(port.net().sent_types(), [MessageType::PdelayReq]);
    }

    #[test]
    fn p2p_responder_sends_response_and_follow_up() {
        let (mut clock, mut port) = master_port(p2p());
        let requester = PortIdentity::fake_peer();
        port.net().set_egress(TimeStamp::new(9, 100));

        let req = encode(
            test_header(requester, MessageType::PdelayReq, 5),
            MessageBody::PdelayReq(PdelayRequestMessage {
                origin_timestamp: TimeStamp::new(8, 0),
            }),
        );
        port.state_machine(&mut clock, Some(RxFrame::new(&req, TimeStamp::new(9, 0))));

        let sent = port.net().sent();
        let replies: Vec<_> = sent
            .iter()
            .map(|frame| Message::decode(&frame.bytes).unwrap())
            .filter(|msg| msg.header.sequence_id.as_u16() == 5)
            .map(|msg| (msg.header.flags, msg.body))
            .collect();
        assert_eq!(
            replies,
            [
                (
                    Flags::TWO_STEP,
                    MessageBody::PdelayResp(PdelayResponseMessage {
                        request_receipt_timestamp: TimeStamp::new(9, 0),
                        requesting_port_identity: requester,
                    })
                ),
                (
                    0,
                    MessageBody::PdelayRespFollowUp(PdelayResponseFollowUpMessage {
                        response_origin_timestamp: TimeStamp::new(9, 100),
                        requesting_port_identity: requester,
                    })
                ),
            ]
        );
    }

    #[test]
    fn p2p_two_step_exchange_measures_peer_delay() {
        let (mut clock, mut port) = master_port(p2p());
        let own = *port.identity();
        let peer = PortIdentity::fake_peer();

        port.net().set_egress(TimeStamp::new(10, 0));
        port.send_pdelay_req().unwrap();

        let resp = pdelay_resp_frame(peer, own, 1, true, TimeStamp::new(10, 500));
        port.state_machine(&mut clock, Some(RxFrame::new(&resp, TimeStamp::new(10, 1_820))));
        assert_eq!(port.instance().servo().mean_path_delay(), TimeStamp::new(0, 0));

        let follow_up = pdelay_follow_up_frame(peer, own, 1, TimeStamp::new(10, 1_300));
        port.state_machine(&mut clock, Some(RxFrame::new(&follow_up, TimeStamp::new(10, 1_830))));

        // ((1820 - 0) - (1300 - 500) - 20) / 2
        assert_eq!(port.instance().servo().mean_path_delay(), TimeStamp::from_nanos(500));
    }

    #[test]
    fn p2p_one_step_response_completes_immediately() {
        let (mut clock, mut port) = master_port(p2p());
        let own = *port.identity();

        port.net().set_egress(TimeStamp::new(10, 0));
        port.send_pdelay_req().unwrap();

        let origin = TimeStamp::new(0, 0);
        let resp = pdelay_resp_frame(PortIdentity::fake_peer(), own, 1, false, origin);
        port.state_machine(&mut clock, Some(RxFrame::new(&resp, TimeStamp::new(10, 1_020))));

        assert_eq!(port.instance().servo().mean_path_delay(), TimeStamp::from_nanos(500));
    }

    #[test]
    fn p2p_response_to_other_request_is_ignored() {
        let (mut clock, mut port) = master_port(p2p());
        let own = *port.identity();

        port.send_pdelay_req().unwrap();
        let origin = TimeStamp::new(10, 500);
        let resp = pdelay_resp_frame(PortIdentity::fake_peer(), own, 2, true, origin);
        port.state_machine(&mut clock, Some(RxFrame::new(&resp, TimeStamp::new(10, 1_820))));

        assert!(!port.exchange().t4().is_correct());
        assert!(port
            .port_log()
            .events()
            .contains(&PortEvent::ResponseMismatch(MessageType::PdelayResp)));
    }

    #[test]
    fn p2p_master_sends_pdelay_req_on_timeout() {
        let (mut clock, mut port) = master_port(p2p());
        assert!(port.instance().timeouts().is_armed(TimeoutKind::DelayRequest));

        port.time().advance_ms(1200);
        port.state_machine(&mut clock, None);

        assert_eq!(port.state(), PortState::Master);
        assert!(port.net().sent_types().contains(&MessageType::PdelayReq));
    }
}
