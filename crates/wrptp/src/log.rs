//! Structured domain events.
//!
//! The core never formats text. Ports report what happened through [`PortLog`], and the servo
//! reports its estimates through [`ClockMetrics`]. Hosts decide how to render them.

use crate::clock::ClockError;
use crate::port::PortIdentity;
use crate::portstate::PortState;
use crate::result::Error;
use crate::time::TimeStamp;
use crate::wire::MessageType;

pub trait PortLog {
    fn port_event(&self, event: PortEvent);
}

impl<L: PortLog + ?Sized> PortLog for &L {
    fn port_event(&self, event: PortEvent) {
        (**self).port_event(event)
    }
}

pub struct NoopPortLog;

impl PortLog for NoopPortLog {
    fn port_event(&self, _event: PortEvent) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortEvent {
    Initialized,
    StateChanged { from: PortState, to: PortState },
    RecommendedSlave { parent: PortIdentity },
    RecommendedMaster,
    RecommendedPassive,
    NewForeignMaster { source: PortIdentity },
    AnnounceReceiptTimeout,
    QualifiedMaster,
    FaultDetected,
    UtcOffsetChanged { from: i16, to: i16 },
    MessageReceived(MessageType),
    MessageSent(MessageType),
    MessageDiscarded(Error),
    ResponseMismatch(MessageType),
    TimestampsIncorrect { consecutive: u32 },
    ServoStalled { consecutive: u32 },
    DelayRejected,
    ClockStepped { offset: TimeStamp },
    /// The time collaborator refused an adjustment. The servo keeps running.
    ClockRejected(ClockError),
    Static(&'static str),
}

/// Sink for servo estimates.
pub trait ClockMetrics: Sync {
    fn record_offset_from_master(&self, offset: TimeStamp);
    fn record_mean_path_delay(&self, delay: TimeStamp);
    fn record_frequency_adjustment(&self, ppb: i32);
}

pub struct NoopClockMetrics;

impl ClockMetrics for NoopClockMetrics {
    fn record_offset_from_master(&self, _offset: TimeStamp) {}
    fn record_mean_path_delay(&self, _delay: TimeStamp) {}
    fn record_frequency_adjustment(&self, _ppb: i32) {}
}

pub static NOOP_CLOCK_METRICS: NoopClockMetrics = NoopClockMetrics;
