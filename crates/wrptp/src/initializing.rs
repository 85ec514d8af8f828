use crate::clock::TimeOps;
use crate::datasets::ClockContext;
use crate::extension::Extension;
use crate::log::{PortEvent, PortLog};
use crate::port::{NetOps, Port};
use crate::portstate::{Next, PortState};

impl<N: NetOps, T: TimeOps, E: Extension, L: PortLog> Port<N, T, E, L> {
    /// Forget everything learned so far and start listening.
    pub(crate) fn initializing_state(&mut self, clock: &mut ClockContext) -> Next {
        self.instance.foreign.clear();
        self.instance.record_update = false;
        self.instance.reset_exchange();
        self.instance.log_min_delay_req_interval = self.instance.profile.log_min_delay_req_interval;

        clock.update_erbest(self.instance.index, None);
        self.instance.ebest_generation = clock.ebest_generation();

        if let Err(err) = self.ext.init(&mut self.instance) {
            return self.fault(err.into());
        }

        self.log(PortEvent::Initialized);
        Next::Goto(PortState::Listening)
    }
}
