use crate::clock::TimeOps;
use crate::extension::Extension;
use crate::log::PortLog;
use crate::port::{NetOps, Port};
use crate::portstate::{Next, PortState};
use crate::timeout::TimeoutKind;

impl<N: NetOps, T: TimeOps, E: Extension, L: PortLog> Port<N, T, E, L> {
    // The Faulty timeout is armed on entry; the port re-initializes once it expires.
    pub(crate) fn faulty_state(&mut self) -> Next {
        if self
            .instance
            .timeouts
            .take_expired(TimeoutKind::Faulty, &self.time)
        {
            return Next::Goto(PortState::Initializing);
        }
        Next::Stay(
            self.instance
                .timeouts
                .next_delay(&[TimeoutKind::Faulty], &self.time),
        )
    }
}
