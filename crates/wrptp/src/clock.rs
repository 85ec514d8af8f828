use core::fmt;

use crate::time::TimeStamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClockIdentity([u8; 8]);

impl ClockIdentity {
    pub const fn new(id: &[u8; 8]) -> Self {
        Self(*id)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Low 32 bits of the identity, used to seed the timeout jitter generator.
    pub fn low_u32(&self) -> u32 {
        u32::from_be_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }
}

impl fmt::Display for ClockIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}.{:02x}{:02x}.{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ClockQuality {
    pub clock_class: u8,
    pub clock_accuracy: u8,
    pub offset_scaled_log_variance: u16,
}

impl ClockQuality {
    /// Clock class reserved for clocks that can never become master.
    pub const CLASS_SLAVE_ONLY: u8 = 255;
    /// Default clock class for ordinary clocks without a time reference.
    pub const CLASS_DEFAULT: u8 = 248;
    /// Classes below this value belong to clocks that must not become slaves.
    pub const CLASS_MASTER_ONLY_LIMIT: u8 = 128;
    pub const ACCURACY_UNKNOWN: u8 = 0xFE;

    pub const fn new(clock_class: u8, clock_accuracy: u8, offset_scaled_log_variance: u16) -> Self {
        Self {
            clock_class,
            clock_accuracy,
            offset_scaled_log_variance,
        }
    }

    pub fn to_wire(&self) -> [u8; 4] {
        let variance = self.offset_scaled_log_variance.to_be_bytes();
        [
            self.clock_class,
            self.clock_accuracy,
            variance[0],
            variance[1],
        ]
    }

    pub fn from_wire(buf: &[u8; 4]) -> Self {
        Self::new(buf[0], buf[1], u16::from_be_bytes([buf[2], buf[3]]))
    }
}

/// Source of time used by the grandmaster (IEEE 1588 Table 6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeSource(pub u8);

impl TimeSource {
    pub const ATOMIC_CLOCK: TimeSource = TimeSource(0x10);
    pub const GPS: TimeSource = TimeSource(0x20);
    pub const TERRESTRIAL_RADIO: TimeSource = TimeSource(0x30);
    pub const PTP: TimeSource = TimeSource(0x40);
    pub const NTP: TimeSource = TimeSource(0x50);
    pub const HAND_SET: TimeSource = TimeSource(0x60);
    pub const OTHER: TimeSource = TimeSource(0x90);
    pub const INTERNAL_OSCILLATOR: TimeSource = TimeSource(0xA0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    Unsupported,
    Rejected,
}

/// Time operations consumed by the protocol core.
///
/// `now` reads the clock being disciplined. `calc_timeout` works on a separate monotonic
/// millisecond counter: it returns the counter value `millis` from now, wrapping on overflow.
pub trait TimeOps {
    fn now(&self) -> TimeStamp;
    fn set(&self, to: TimeStamp) -> Result<(), ClockError>;
    fn adjust_offset(&self, picos: i64) -> Result<(), ClockError>;
    fn adjust_freq(&self, ppb: i32) -> Result<(), ClockError>;
    fn calc_timeout(&self, millis: u32) -> u32;

    /// Called when the grandmaster announces a new UTC offset.
    fn utc_offset_changed(&self, _utc_offset: i16) {}
}

impl<T: TimeOps + ?Sized> TimeOps for &T {
    fn now(&self) -> TimeStamp {
        (**self).now()
    }

    fn set(&self, to: TimeStamp) -> Result<(), ClockError> {
        (**self).set(to)
    }

    fn adjust_offset(&self, picos: i64) -> Result<(), ClockError> {
        (**self).adjust_offset(picos)
    }

    fn adjust_freq(&self, ppb: i32) -> Result<(), ClockError> {
        (**self).adjust_freq(ppb)
    }

    fn calc_timeout(&self, millis: u32) -> u32 {
        (**self).calc_timeout(millis)
    }

    fn utc_offset_changed(&self, utc_offset: i16) {
        (**self).utc_offset_changed(utc_offset)
    }
}
