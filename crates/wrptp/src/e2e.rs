//! End-to-end delay request-response mechanism.
//!
//! The slave sends Delay_Req and captures its egress time (T3); the master answers with
//! Delay_Resp carrying the receipt time (T4). Together with the last Sync pair the servo derives
//! the mean path delay.

use crate::clock::TimeOps;
use crate::datasets::ClockContext;
use crate::extension::{Extension, HookFlow};
use crate::log::{PortEvent, PortLog};
use crate::message::{DelayRequestMessage, DelayResponseMessage, MessageBody};
use crate::port::{NetOps, Outgoing, Port};
use crate::portstate::{Handled, Incoming, PortFault};
use crate::time::LogInterval;
use crate::wire::{CorrectionField, MessageType};

impl<N: NetOps, T: TimeOps, E: Extension, L: PortLog> Port<N, T, E, L> {
    pub(crate) fn send_delay_req(&mut self) -> Result<(), PortFault> {
        let sequence_id = self.instance.sent.issue(MessageType::DelayReq);
        let egress = self.send(Outgoing {
            flags: 0,
            correction: CorrectionField::ZERO,
            sequence_id,
            log_interval: LogInterval::UNSPECIFIED,
            body: MessageBody::DelayReq(DelayRequestMessage {
                origin_timestamp: self.time.now(),
            }),
        })?;

        self.instance.exchange.t3 = self.egress(egress);
        Ok(())
    }

    /// Answer a Delay_Req received in MASTER.
    ///
    /// The request's correction field is echoed back, after the extension had the chance to
    /// rewrite it.
    pub(crate) fn respond_delay_req(&mut self, incoming: &Incoming<'_>) -> Result<(), PortFault> {
        let header = &incoming.msg.header;
        self.send(Outgoing {
            flags: 0,
            correction: header.correction,
            sequence_id: header.sequence_id,
            log_interval: self.instance.log_min_delay_req_interval,
            body: MessageBody::DelayResp(DelayResponseMessage {
                receive_timestamp: incoming.ingress,
                requesting_port_identity: header.source_port_identity,
            }),
        })?;
        Ok(())
    }

    pub(crate) fn process_delay_resp(
        &mut self,
        clock: &mut ClockContext,
        incoming: &Incoming<'_>,
        resp: DelayResponseMessage,
    ) -> Handled {
        let header = &incoming.msg.header;
        if !incoming.from_parent
            || resp.requesting_port_identity != self.instance.identity
            || header.sequence_id != self.instance.sent.last(MessageType::DelayReq)
        {
            self.log(PortEvent::ResponseMismatch(MessageType::DelayResp));
            return Ok(None);
        }

        self.instance.exchange.t4 = resp.receive_timestamp;
        self.instance.exchange.delay_correction = incoming.correction;

        let interval = LogInterval::new(header.log_message_interval);
        if interval != LogInterval::UNSPECIFIED {
            self.instance.log_min_delay_req_interval = interval;
        }

        match self.ext.handle_resp(&mut self.instance)? {
            HookFlow::Continue => {}
            HookFlow::Done => return Ok(None),
            HookFlow::Transition(to) => return Ok(Some(to)),
        }

        let update = self
            .instance
            .servo
            .update_delay(&self.instance.exchange, self.instance.profile.max_delay_ns);
        self.servo_updated(clock, update);
        Ok(None)
    }
}
