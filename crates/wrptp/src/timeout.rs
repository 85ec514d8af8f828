//! Per-port deadlines with protocol jitter.
//!
//! Deadlines live on the wrapping millisecond counter exposed by [`TimeOps::calc_timeout`].
//! Periodic transmissions are jittered to 80–120% of their nominal interval with a small linear
//! congruential generator seeded from the clock identity, so two runs with the same identity
//! produce the same schedule.

use crate::clock::{ClockIdentity, TimeOps};
use crate::profile::PortProfile;
use crate::time::LogInterval;

/// Delay returned when no deadline is armed.
pub const DEFAULT_NEXT_DELAY_MS: u32 = 1000;
/// Backoff spent in FAULTY before re-initializing.
pub const FAULTY_TIMEOUT_MS: u32 = 4000;
/// First Announce after entering MASTER goes out this soon.
pub const FIRST_ANNOUNCE_MS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    DelayRequest,
    SyncSend,
    AnnounceReceipt,
    AnnounceSend,
    Faulty,
    Qualification,
    Ext0,
    Ext1,
    Ext2,
}

impl TimeoutKind {
    pub const COUNT: usize = 9;

    pub const ALL: [TimeoutKind; Self::COUNT] = [
        TimeoutKind::DelayRequest,
        TimeoutKind::SyncSend,
        TimeoutKind::AnnounceReceipt,
        TimeoutKind::AnnounceSend,
        TimeoutKind::Faulty,
        TimeoutKind::Qualification,
        TimeoutKind::Ext0,
        TimeoutKind::Ext1,
        TimeoutKind::Ext2,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Period {
    Unset,
    Fixed(u32),
    Randomized(LogInterval),
}

#[derive(Debug, Clone)]
pub struct Timeouts {
    deadlines: [u32; TimeoutKind::COUNT],
    armed: [bool; TimeoutKind::COUNT],
    periods: [Period; TimeoutKind::COUNT],
    seed: u32,
}

impl Timeouts {
    pub fn new(clock_identity: &ClockIdentity) -> Self {
        Self {
            deadlines: [0; TimeoutKind::COUNT],
            armed: [false; TimeoutKind::COUNT],
            periods: [Period::Unset; TimeoutKind::COUNT],
            seed: clock_identity.low_u32(),
        }
    }

    /// Derive the period of every protocol timeout from the port profile.
    ///
    /// Extension slots keep whatever period was set through [`Timeouts::set_period`].
    pub fn configure(
        &mut self,
        profile: &PortProfile,
        log_request_interval: LogInterval,
        steps_removed: u16,
    ) {
        let qualification = profile
            .log_announce_interval
            .millis()
            .saturating_mul(steps_removed as u32 + 1);

        self.periods[TimeoutKind::DelayRequest.index()] = Period::Randomized(log_request_interval);
        self.periods[TimeoutKind::SyncSend.index()] = Period::Randomized(profile.log_sync_interval);
        self.periods[TimeoutKind::AnnounceReceipt.index()] =
            Period::Fixed(profile.announce_receipt_timeout_ms());
        self.periods[TimeoutKind::AnnounceSend.index()] =
            Period::Randomized(profile.log_announce_interval);
        self.periods[TimeoutKind::Faulty.index()] = Period::Fixed(FAULTY_TIMEOUT_MS);
        self.periods[TimeoutKind::Qualification.index()] = Period::Fixed(qualification);
    }

    /// Set the period later used by [`Timeouts::restart`], typically for extension slots.
    pub fn set_period(&mut self, kind: TimeoutKind, millis: u32) {
        self.periods[kind.index()] = Period::Fixed(millis);
    }

    pub fn set<T: TimeOps + ?Sized>(&mut self, kind: TimeoutKind, millis: u32, time: &T) {
        self.deadlines[kind.index()] = time.calc_timeout(millis);
        self.armed[kind.index()] = true;
    }

    pub fn set_randomized<T: TimeOps + ?Sized>(
        &mut self,
        kind: TimeoutKind,
        log_interval: LogInterval,
        time: &T,
    ) {
        let millis = self.jitter_ms(log_interval);
        self.set(kind, millis, time);
    }

    /// Re-arm a timeout with its configured period.
    pub fn restart<T: TimeOps + ?Sized>(&mut self, kind: TimeoutKind, time: &T) {
        match self.periods[kind.index()] {
            Period::Unset => {}
            Period::Fixed(millis) => self.set(kind, millis, time),
            Period::Randomized(log) => self.set_randomized(kind, log, time),
        }
    }

    /// Re-arm every configured timeout. Run on each state change.
    pub fn setall<T: TimeOps + ?Sized>(&mut self, time: &T) {
        for kind in TimeoutKind::ALL {
            self.restart(kind, time);
        }
        self.set(TimeoutKind::AnnounceSend, FIRST_ANNOUNCE_MS, time);
    }

    pub fn clear(&mut self, kind: TimeoutKind) {
        self.armed[kind.index()] = false;
    }

    pub fn is_armed(&self, kind: TimeoutKind) -> bool {
        self.armed[kind.index()]
    }

    pub fn expired<T: TimeOps + ?Sized>(&self, kind: TimeoutKind, time: &T) -> bool {
        self.armed[kind.index()] && after_eq(time.calc_timeout(0), self.deadlines[kind.index()])
    }

    /// Like [`Timeouts::expired`], but disarms the timeout when it reports expiry.
    pub fn take_expired<T: TimeOps + ?Sized>(&mut self, kind: TimeoutKind, time: &T) -> bool {
        let expired = self.expired(kind, time);
        if expired {
            self.clear(kind);
        }
        expired
    }

    /// Milliseconds until `kind` expires, clamped at zero. `None` when disarmed.
    pub fn time_to<T: TimeOps + ?Sized>(&self, kind: TimeoutKind, time: &T) -> Option<u32> {
        if !self.armed[kind.index()] {
            return None;
        }
        let now = time.calc_timeout(0);
        let remaining = self.deadlines[kind.index()].wrapping_sub(now) as i32;
        Some(remaining.max(0) as u32)
    }

    /// Minimum time to expiry over the armed timeouts in `kinds`.
    pub fn next_delay<T: TimeOps + ?Sized>(&self, kinds: &[TimeoutKind], time: &T) -> u32 {
        kinds
            .iter()
            .filter_map(|kind| self.time_to(*kind, time))
            .min()
            .unwrap_or(DEFAULT_NEXT_DELAY_MS)
    }

    /// Interval in milliseconds in `[0.8, 1.2)` times the nominal `2^log` seconds.
    ///
    /// Exact for `log >= -4`. Shorter intervals lose precision to integer milliseconds.
    pub fn jitter_ms(&mut self, log_interval: LogInterval) -> u32 {
        let mut rval = (self.next_seed() / 65536) % 2048;
        rval = (rval << 10) ^ ((self.next_seed() / 65536) % 1024);

        let log = log_interval.as_i8().clamp(-10, 16);
        let m = (if log >= 0 { 400u32 << log } else { 400u32 >> -log }).max(1);
        2 * m + rval % m
    }

    fn next_seed(&mut self) -> u32 {
        self.seed = self.seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
        self.seed
    }
}

/// Wrap-safe `a >= b` on the millisecond counter.
fn after_eq(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) >= 0
}
