//! Port state: Master.
//!
//! A port in MASTER is responsible for:
//! - periodically sending Announce messages carrying the clock datasets,
//! - periodically sending two-step Sync followed by Follow_Up,
//! - answering Delay_Req with Delay_Resp, and Pdelay_Req when the link runs P2P,
//! - continuing to evaluate Announce messages so a better master is noticed, and
//! - stepping down to LISTENING when the clock or the port is configured slave-only.
//!
//! Every message goes through the extension's `master_msg` hook first. The extension may consume
//! it, or rewrite it and return the type the default handling below dispatches on.

use crate::clock::TimeOps;
use crate::datasets::ClockContext;
use crate::extension::Extension;
use crate::log::PortLog;
use crate::message::MessageBody;
use crate::port::{NetOps, Port};
use crate::portstate::{Handled, Incoming, Next, PortFault, PortState};
use crate::profile::PortRole;
use crate::timeout::TimeoutKind;
use crate::wire::MessageType;

impl<N: NetOps, T: TimeOps, E: Extension, L: PortLog> Port<N, T, E, L> {
    pub(crate) fn master_state(
        &mut self,
        clock: &mut ClockContext,
        incoming: Option<Incoming<'_>>,
    ) -> Next {
        if clock.default_ds.slave_only || self.instance.profile.role == PortRole::Slave {
            return Next::Goto(PortState::Listening);
        }

        if let Err(fault) = self.master_timers(clock) {
            return self.fault(fault);
        }

        if let Some(incoming) = incoming {
            match self.master_msg(clock, incoming, true) {
                Ok(None) => {}
                Ok(Some(to)) => return Next::Goto(to),
                Err(fault) => return self.fault(fault),
            }
        }

        if let Some(next) = self.check_record_update(clock) {
            return Next::Goto(next);
        }

        let kinds: &[TimeoutKind] = if self.uses_p2p() {
            &[
                TimeoutKind::AnnounceSend,
                TimeoutKind::SyncSend,
                TimeoutKind::DelayRequest,
            ]
        } else {
            &[TimeoutKind::AnnounceSend, TimeoutKind::SyncSend]
        };
        Next::Stay(self.instance.timeouts.next_delay(kinds, &self.time))
    }

    fn master_timers(&mut self, clock: &ClockContext) -> Result<(), PortFault> {
        let profile = self.instance.profile;

        if self
            .instance
            .timeouts
            .take_expired(TimeoutKind::SyncSend, &self.time)
        {
            self.send_sync()?;
            self.instance.timeouts.set_randomized(
                TimeoutKind::SyncSend,
                profile.log_sync_interval,
                &self.time,
            );
        }

        if self
            .instance
            .timeouts
            .take_expired(TimeoutKind::AnnounceSend, &self.time)
        {
            self.send_announce(clock)?;
            self.instance.timeouts.set_randomized(
                TimeoutKind::AnnounceSend,
                profile.log_announce_interval,
                &self.time,
            );
        }

        self.pdelay_request_due()
    }

    /// Message handling shared by MASTER and PRE_MASTER.
    ///
    /// Only a qualified master answers Delay_Req.
    pub(crate) fn master_msg(
        &mut self,
        clock: &mut ClockContext,
        mut incoming: Incoming<'_>,
        answer_delay_req: bool,
    ) -> Handled {
        let ingress = incoming.ingress;
        let Some(msg_type) = self
            .ext
            .master_msg(&mut self.instance, &mut incoming.msg, ingress)?
        else {
            return Ok(None);
        };
        // Dispatch on the type the extension returned. Handlers that read the body only run when
        // the body carries that type.
        match (msg_type, incoming.msg.body) {
            (MessageType::Announce, MessageBody::Announce(_)) => {
                self.add_foreign(&incoming);
                Ok(None)
            }
            (MessageType::DelayReq, _) if answer_delay_req => {
                self.respond_delay_req(&incoming)?;
                Ok(None)
            }
            (MessageType::PdelayReq, _) => {
                self.respond_pdelay_req(&incoming)?;
                Ok(None)
            }
            (MessageType::PdelayResp, MessageBody::PdelayResp(resp)) => {
                self.process_pdelay_resp(clock, &incoming, resp)
            }
            (MessageType::PdelayRespFollowUp, MessageBody::PdelayRespFollowUp(follow_up)) => {
                self.process_pdelay_resp_follow_up(clock, &incoming, follow_up)
            }
            _ => Ok(None),
        }
    }
}
