//! Port state: Passive.
//!
//! The port neither sends Sync nor follows a master; another port of this clock (or a better
//! master on the segment) already covers the path. It keeps tracking Announces so the BMC can
//! bring it back, and still takes part in peer-delay measurement on P2P links.

use crate::clock::TimeOps;
use crate::datasets::ClockContext;
use crate::extension::Extension;
use crate::log::PortLog;
use crate::message::MessageBody;
use crate::port::{NetOps, Port};
use crate::portstate::{Handled, Incoming, Next};
use crate::timeout::TimeoutKind;

impl<N: NetOps, T: TimeOps, E: Extension, L: PortLog> Port<N, T, E, L> {
    pub(crate) fn passive_state(
        &mut self,
        clock: &mut ClockContext,
        incoming: Option<Incoming<'_>>,
    ) -> Next {
        if let Some(incoming) = incoming {
            match self.passive_msg(clock, &incoming) {
                Ok(None) => {}
                Ok(Some(to)) => return Next::Goto(to),
                Err(fault) => return self.fault(fault),
            }
        }

        if let Some(next) = self.check_record_update(clock) {
            return Next::Goto(next);
        }

        if let Err(fault) = self.pdelay_request_due() {
            return self.fault(fault);
        }

        if let Some(next) = self.announce_receipt_expired(clock) {
            return Next::Goto(next);
        }

        let kinds: &[TimeoutKind] = if self.uses_p2p() {
            &[TimeoutKind::AnnounceReceipt, TimeoutKind::DelayRequest]
        } else {
            &[TimeoutKind::AnnounceReceipt]
        };
        Next::Stay(self.instance.timeouts.next_delay(kinds, &self.time))
    }

    fn passive_msg(&mut self, clock: &mut ClockContext, incoming: &Incoming<'_>) -> Handled {
        match incoming.msg.body {
            // Any Announce keeps the port passive, not only the parent's.
            MessageBody::Announce(_) => {
                self.add_foreign(incoming);
                self.instance
                    .timeouts
                    .restart(TimeoutKind::AnnounceReceipt, &self.time);
                Ok(None)
            }
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
}
