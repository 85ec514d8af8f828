//! A clock with one or more ports, served round-robin.
//!
//! [`PtpNode`] owns the [`ClockContext`] and every [`Port`] of the clock. A host calls
//! [`PtpNode::run_once`] whenever a socket became readable or the previous delay ran out. Each
//! port gets one state-machine pass per call, in index order, so the BMC of a later port always
//! sees the `Ebest` left behind by the earlier ones.

use heapless::Vec;

use crate::buffer::FRAME_CAPACITY;
use crate::clock::TimeOps;
use crate::datasets::{ClockContext, MAX_PORTS};
use crate::extension::{Extension, ExtensionError};
use crate::log::{PortEvent, PortLog};
use crate::port::{NetOps, PacketCheck, Port, PortNumber, RxFrame};
use crate::profile::PortProfile;
use crate::result::{Error, ParseError};
use crate::servo::Servo;
use crate::timeout::DEFAULT_NEXT_DELAY_MS;
use crate::wire::HEADER_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeError {
    /// The clock has no free port slot left.
    Full,
    /// The extension refused to open on the new port.
    Extension(ExtensionError),
}

impl From<ExtensionError> for NodeError {
    fn from(err: ExtensionError) -> Self {
        NodeError::Extension(err)
    }
}

pub struct PtpNode<N, T, E, L, const P: usize = MAX_PORTS>
where
    N: NetOps,
    T: TimeOps,
    E: Extension,
    L: PortLog,
{
    clock: ClockContext,
    ports: Vec<Port<N, T, E, L>, P>,
}

impl<N, T, E, L, const P: usize> PtpNode<N, T, E, L, P>
where
    N: NetOps,
    T: TimeOps,
    E: Extension,
    L: PortLog,
{
    pub fn new(clock: ClockContext) -> Self {
        Self {
            clock,
            ports: Vec::new(),
        }
    }

    /// Add a port in INITIALIZING and return its number.
    ///
    /// Ports are numbered from 1 in the order they are added. The clock's `numberPorts` bounds
    /// how many can be added.
    #[allow(clippy::too_many_arguments)]
    pub fn add_port(
        &mut self,
        profile: PortProfile,
        servo: Servo,
        net: N,
        time: T,
        ext: E,
        log: L,
    ) -> Result<PortNumber, NodeError> {
        let index = self.ports.len();
        if index >= self.clock.port_count() {
            return Err(NodeError::Full);
        }

        let number = PortNumber::new(index as u16 + 1);
        let mut port = Port::new(index, &self.clock, number, profile, servo, net, time, ext, log);
        port.open(&self.clock)?;
        self.ports.push(port).map_err(|_| NodeError::Full)?;
        Ok(number)
    }

    pub fn clock(&self) -> &ClockContext {
        &self.clock
    }

    pub fn ports(&self) -> &[Port<N, T, E, L>] {
        &self.ports
    }

    pub fn port(&self, index: usize) -> Option<&Port<N, T, E, L>> {
        self.ports.get(index)
    }

    pub fn port_mut(&mut self, index: usize) -> Option<&mut Port<N, T, E, L>> {
        self.ports.get_mut(index)
    }

    /// Give every port one pass and return the smallest delay any of them asked for.
    ///
    /// A port with a readable frame is handed that frame, every other port runs with `None`.
    /// Frames shorter than a PTP header are dropped before they reach the decoder.
    pub fn run_once(&mut self) -> u32 {
        if self.ports.is_empty() {
            return DEFAULT_NEXT_DELAY_MS;
        }

        let mut delay = u32::MAX;
        let mut buf = [0u8; FRAME_CAPACITY];

        for port in self.ports.iter_mut() {
            let received = match port.net().check_packet(0) {
                PacketCheck::Ready => match port.net().recv(&mut buf) {
                    Ok(rx) if rx.len >= HEADER_LEN => Some(rx),
                    Ok(_) => {
                        port.log(PortEvent::MessageDiscarded(Error::Parse(
                            ParseError::TooShort,
                        )));
                        None
                    }
                    Err(_) => None,
                },
                PacketCheck::Timeout | PacketCheck::Error => None,
            };

            let frame = received.map(|rx| RxFrame::new(&buf[..rx.len], rx.timestamp));
            delay = delay.min(port.state_machine(&mut self.clock, frame));
        }

        delay
    }
}
