//! Port state: Pre-Master.
//!
//! A port the BMC would make master waits here for the qualification timeout before it starts
//! sending Announce and Sync. Announces keep being evaluated in the meantime, and peer-delay
//! requests are answered.

use crate::clock::TimeOps;
use crate::datasets::ClockContext;
use crate::extension::Extension;
use crate::log::{PortEvent, PortLog};
use crate::port::{NetOps, Port};
use crate::portstate::{Incoming, Next, PortState};
use crate::timeout::TimeoutKind;

impl<N: NetOps, T: TimeOps, E: Extension, L: PortLog> Port<N, T, E, L> {
    pub(crate) fn premaster_state(
        &mut self,
        clock: &mut ClockContext,
        incoming: Option<Incoming<'_>>,
    ) -> Next {
        if let Some(incoming) = incoming {
            match self.master_msg(clock, incoming, false) {
                Ok(None) => {}
                Ok(Some(to)) => return Next::Goto(to),
                Err(fault) => return self.fault(fault),
            }
        }

        if let Some(next) = self.check_record_update(clock) {
            return Next::Goto(next);
        }

        if self
            .instance
            .timeouts
            .take_expired(TimeoutKind::Qualification, &self.time)
        {
            self.log(PortEvent::QualifiedMaster);
            return Next::Goto(PortState::Master);
        }

        if let Err(fault) = self.pdelay_request_due() {
            return self.fault(fault);
        }

        let kinds: &[TimeoutKind] = if self.uses_p2p() {
            &[TimeoutKind::Qualification, TimeoutKind::DelayRequest]
        } else {
            &[TimeoutKind::Qualification]
        };
        Next::Stay(self.instance.timeouts.next_delay(kinds, &self.time))
    }
}
