//! Daemon-side sinks for `wrptp` domain events.
//!
//! The core reports what happens through [`PortLog`] and [`ClockMetrics`]. This module renders
//! both through `tracing`.

use wrptp::log::{ClockMetrics, PortEvent, PortLog};
use wrptp::port::PortIdentity;
use wrptp::time::TimeStamp;

/// [`PortLog`] that forwards [`PortEvent`]s to `tracing`, prefixed with the port identity.
///
/// State and BMC events go to `info`, faults and diagnostics to `warn`, per-message traffic to
/// `debug`.
#[derive(Clone, Copy, Debug)]
pub struct TracingPortLog {
    port_identity: PortIdentity,
}

impl TracingPortLog {
    pub fn new(port_identity: PortIdentity) -> Self {
        Self { port_identity }
    }
}

impl PortLog for TracingPortLog {
    fn port_event(&self, event: PortEvent) {
        let port = self.port_identity;
        match event {
            PortEvent::Initialized => {
                tracing::info!("{}: Initialized", port);
            }
            PortEvent::StateChanged { from, to } => {
                tracing::info!("{}: {} -> {}", port, from, to);
            }
            PortEvent::RecommendedSlave { parent } => {
                tracing::info!("{}: Recommended Slave, parent {}", port, parent);
            }
            PortEvent::RecommendedMaster => {
                tracing::info!("{}: Recommended Master", port);
            }
            PortEvent::RecommendedPassive => {
                tracing::info!("{}: Recommended Passive", port);
            }
            PortEvent::NewForeignMaster { source } => {
                tracing::info!("{}: New foreign master {}", port, source);
            }
            PortEvent::AnnounceReceiptTimeout => {
                tracing::info!("{}: Announce Receipt Timeout", port);
            }
            PortEvent::QualifiedMaster => {
                tracing::info!("{}: Qualified Master", port);
            }
            PortEvent::FaultDetected => {
                tracing::warn!("{}: Fault detected", port);
            }
            PortEvent::UtcOffsetChanged { from, to } => {
                tracing::info!("{}: UTC offset changed from {} to {}", port, from, to);
            }
            PortEvent::MessageReceived(msg) => {
                tracing::debug!("{}: Message Received: {}", port, msg.name());
            }
            PortEvent::MessageSent(msg) => {
                tracing::debug!("{}: Message Sent: {}", port, msg.name());
            }
            PortEvent::MessageDiscarded(err) => {
                tracing::debug!("{}: Message Discarded: {}", port, err);
            }
            PortEvent::ResponseMismatch(msg) => {
                tracing::debug!("{}: Unexpected {}", port, msg.name());
            }
            PortEvent::TimestampsIncorrect { consecutive } => {
                tracing::warn!("{}: Incorrect timestamps ({} in a row)", port, consecutive);
            }
            PortEvent::ServoStalled { consecutive } => {
                tracing::warn!("{}: Servo stalled after {} aborted updates", port, consecutive);
            }
            PortEvent::DelayRejected => {
                tracing::warn!("{}: Delay above the configured maximum", port);
            }
            PortEvent::ClockStepped { offset } => {
                tracing::info!("{}: Clock stepped by {}", port, -offset);
            }
            PortEvent::ClockRejected(err) => {
                tracing::warn!("{}: Clock adjustment rejected: {:?}", port, err);
            }
            PortEvent::Static(desc) => {
                tracing::info!("{}: {}", port, desc);
            }
        }
    }
}

/// [`ClockMetrics`] that traces every servo sample at `trace` level.
pub struct TracingClockMetrics;

pub static TRACING_CLOCK_METRICS: TracingClockMetrics = TracingClockMetrics;

impl ClockMetrics for TracingClockMetrics {
    fn record_offset_from_master(&self, offset: TimeStamp) {
        tracing::trace!(target: "wrptp::servo", "offset from master {}", offset);
    }

    fn record_mean_path_delay(&self, delay: TimeStamp) {
        tracing::trace!(target: "wrptp::servo", "mean path delay {}", delay);
    }

    fn record_frequency_adjustment(&self, ppb: i32) {
        tracing::trace!(target: "wrptp::servo", "frequency adjustment {} ppb", ppb);
    }
}
