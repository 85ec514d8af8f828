//! The async loop around a [`PtpNode`].
//!
//! The core's `run_once` never blocks: it serves every port once and reports how long it can be
//! left alone. [`TokioNode`] sleeps for that long, or until a socket of any port becomes
//! readable, whichever comes first, and then runs the node again.

use std::future::Future;
use std::io::{Error, Result};
use std::time::Duration;

use futures::future::select_all;

use wrptp::datasets::ClockContext;
use wrptp::extension::Extension;
use wrptp::node::PtpNode;
use wrptp::port::{PortIdentity, PortNumber};
use wrptp::profile::PortProfile;
use wrptp::servo::Servo;

use crate::log::TracingPortLog;
use crate::net::{PacketSocket, UdpNet};
use crate::virtualclock::VirtualClock;

pub type DaemonNet<S> = UdpNet<S, VirtualClock>;
pub type DaemonNode<S, E> = PtpNode<DaemonNet<S>, VirtualClock, E, TracingPortLog>;

pub struct TokioNode<S: PacketSocket, E: Extension> {
    node: DaemonNode<S, E>,
}

impl<S: PacketSocket, E: Extension> TokioNode<S, E> {
    pub fn new(clock: ClockContext) -> Self {
        Self {
            node: PtpNode::new(clock),
        }
    }

    /// Add a port whose time is kept by `time`, logging under its own identity.
    pub fn add_port(
        &mut self,
        profile: PortProfile,
        servo: Servo,
        net: DaemonNet<S>,
        time: VirtualClock,
        ext: E,
    ) -> Result<PortNumber> {
        let number = PortNumber::new(self.node.ports().len() as u16 + 1);
        let identity = PortIdentity::new(self.node.clock().default_ds().clock_identity, number);
        self.node
            .add_port(profile, servo, net, time, ext, TracingPortLog::new(identity))
            .map_err(|err| Error::other(format!("cannot add port {}: {:?}", identity, err)))
    }

    pub fn node(&self) -> &DaemonNode<S, E> {
        &self.node
    }

    pub async fn run(&mut self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Drive the node until `shutdown` resolves.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let delay = Duration::from_millis(self.node.run_once() as u64);

            tokio::select! {
                _ = &mut shutdown => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
                ready = readable(&self.node) => {
                    if let Err(err) = ready {
                        tracing::warn!("waiting for frames failed: {}", err);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

/// Resolve as soon as any port may have a frame.
async fn readable<S: PacketSocket, E: Extension>(node: &DaemonNode<S, E>) -> Result<()> {
    if node.ports().is_empty() {
        return std::future::pending().await;
    }
    let waits = node
        .ports()
        .iter()
        .map(|port| Box::pin(port.net().readable()));
    select_all(waits).await.0
}
