//! Timestamps and log intervals.
//!
//! A [`TimeStamp`] carries seconds, nanoseconds and a sub-nanosecond `phase` in picoseconds,
//! plus a `correct` flag that tells whether the value was actually captured. Arithmetic always
//! normalizes so that `nanos` stays in `[0, 1e9)` and `phase` in `[0, 1000)`, carrying into the
//! next unit. Negative values are expressed through negative `seconds`.
//!
//! The result of an arithmetic operation is correct only when both operands were.

use core::ops::{Add, Neg, Sub};

use crate::result::ProtocolError;

pub const NANOS_PER_SEC: i64 = 1_000_000_000;
pub const PICOS_PER_NANO: i64 = 1_000;
pub const PICOS_PER_SEC: i64 = NANOS_PER_SEC * PICOS_PER_NANO;

const MAX_WIRE_SECONDS: i64 = (1 << 48) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeStamp {
    seconds: i64,
    nanos: i32,
    phase: i32,
    correct: bool,
}

impl TimeStamp {
    pub fn new(seconds: i64, nanos: i32) -> Self {
        Self::from_parts(seconds, nanos, 0)
    }

    pub fn from_parts(seconds: i64, nanos: i32, phase: i32) -> Self {
        Self {
            seconds,
            nanos,
            phase,
            correct: true,
        }
        .normalize()
    }

    pub fn from_nanos(nanos: i64) -> Self {
        Self::new(
            nanos.div_euclid(NANOS_PER_SEC),
            nanos.rem_euclid(NANOS_PER_SEC) as i32,
        )
    }

    pub fn from_picos(picos: i128) -> Self {
        let seconds = picos.div_euclid(PICOS_PER_SEC as i128);
        let rem = picos.rem_euclid(PICOS_PER_SEC as i128) as i64;
        Self::from_parts(
            seconds as i64,
            (rem / PICOS_PER_NANO) as i32,
            (rem % PICOS_PER_NANO) as i32,
        )
    }

    /// The same instant, flagged as never captured.
    pub fn incorrect(self) -> Self {
        Self {
            correct: false,
            ..self
        }
    }

    pub fn with_phase(self, phase: i32) -> Self {
        Self { phase, ..self }.normalize()
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn nanos(&self) -> i32 {
        self.nanos
    }

    pub fn phase(&self) -> i32 {
        self.phase
    }

    pub fn is_correct(&self) -> bool {
        self.correct
    }

    pub fn normalize(self) -> Self {
        let phase = self.phase as i64;
        let nanos = self.nanos as i64 + phase.div_euclid(PICOS_PER_NANO);
        let seconds = self.seconds.saturating_add(nanos.div_euclid(NANOS_PER_SEC));

        Self {
            seconds,
            nanos: nanos.rem_euclid(NANOS_PER_SEC) as i32,
            phase: phase.rem_euclid(PICOS_PER_NANO) as i32,
            correct: self.correct,
        }
    }

    /// Whole nanoseconds, rounded towards negative infinity.
    pub fn to_nanos(&self) -> i64 {
        self.seconds
            .saturating_mul(NANOS_PER_SEC)
            .saturating_add(self.nanos as i64)
    }

    pub fn to_picos(&self) -> i128 {
        self.seconds as i128 * PICOS_PER_SEC as i128
            + self.nanos as i128 * PICOS_PER_NANO as i128
            + self.phase as i128
    }

    /// Half of this value, rounded towards zero.
    pub fn half(self) -> Self {
        Self {
            correct: self.correct,
            ..Self::from_picos(self.to_picos() / 2)
        }
    }

    /// True when the magnitude is below one second.
    pub fn is_sub_second(&self) -> bool {
        self.to_picos().abs() < PICOS_PER_SEC as i128
    }

    pub fn is_negative(&self) -> bool {
        self.seconds < 0
    }

    /// Encode as the 10-byte wire timestamp (48-bit seconds, 32-bit nanoseconds).
    ///
    /// The phase is not carried on the wire.
    pub fn to_wire(&self) -> core::result::Result<[u8; 10], ProtocolError> {
        if !(0..=MAX_WIRE_SECONDS).contains(&self.seconds) {
            return Err(ProtocolError::InvalidTimestamp);
        }

        let mut buf = [0; 10];
        buf[0..2].copy_from_slice(&((self.seconds >> 32) as u16).to_be_bytes());
        buf[2..6].copy_from_slice(&(self.seconds as u32).to_be_bytes());
        buf[6..10].copy_from_slice(&(self.nanos as u32).to_be_bytes());
        Ok(buf)
    }

    pub fn from_wire(buf: &[u8; 10]) -> core::result::Result<Self, ProtocolError> {
        let seconds_hi = u16::from_be_bytes([buf[0], buf[1]]) as i64;
        let seconds_lo = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]) as i64;
        let nanos = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]);
        if nanos as i64 >= NANOS_PER_SEC {
            return Err(ProtocolError::InvalidTimestamp);
        }

        Ok(Self::new((seconds_hi << 32) | seconds_lo, nanos as i32))
    }
}

impl Add for TimeStamp {
    type Output = TimeStamp;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            seconds: self.seconds.saturating_add(rhs.seconds),
            nanos: self.nanos + rhs.nanos,
            phase: self.phase + rhs.phase,
            correct: self.correct && rhs.correct,
        }
        .normalize()
    }
}

impl Sub for TimeStamp {
    type Output = TimeStamp;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            seconds: self.seconds.saturating_sub(rhs.seconds),
            nanos: self.nanos - rhs.nanos,
            phase: self.phase - rhs.phase,
            correct: self.correct && rhs.correct,
        }
        .normalize()
    }
}

impl Neg for TimeStamp {
    type Output = TimeStamp;

    fn neg(self) -> Self::Output {
        Self {
            seconds: self.seconds.saturating_neg(),
            nanos: -self.nanos,
            phase: -self.phase,
            correct: self.correct,
        }
        .normalize()
    }
}

impl core::fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.seconds < 0 {
            let abs = -*self;
            write!(f, "-{}.{:09}", abs.seconds, abs.nanos)
        } else {
            write!(f, "{}.{:09}", self.seconds, self.nanos)
        }
    }
}

/// Base-2 logarithm of a message interval in seconds, as carried in `logMessageInterval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogInterval(i8);

impl LogInterval {
    /// `logMessageInterval` value for messages that do not carry an interval.
    pub const UNSPECIFIED: LogInterval = LogInterval(0x7F);

    pub const fn new(log: i8) -> Self {
        Self(log)
    }

    pub fn as_i8(&self) -> i8 {
        self.0
    }

    /// Nominal interval in milliseconds, truncated.
    pub fn millis(&self) -> u32 {
        let log = self.0.clamp(-10, 16);
        if log >= 0 {
            1000 << log
        } else {
            1000 >> -log
        }
    }
}

impl From<i8> for LogInterval {
    fn from(log: i8) -> Self {
        Self(log)
    }
}
