//! Clock servo: path delay and offset estimation, filtering and PI control.
//!
//! The servo works on the timestamps collected in an [`Exchange`]:
//!
//! - `master_to_slave = t2 - t1 - sync correction`
//! - `slave_to_master = t4 - t3 - delay correction` (end-to-end)
//! - `mean_path_delay = (master_to_slave + slave_to_master) / 2`, or the peer delay measured by
//!   the peer-delay mechanism
//! - `offset_from_master = master_to_slave - mean_path_delay`
//!
//! The path delay goes through a low-pass filter whose averaging window ramps up to `2^s`
//! samples. The offset is smoothed with a 2-tap average. A PI controller then turns the offset
//! into a frequency adjustment. Offsets of a second or more bypass the controller and step or
//! saturate the clock.
//!
//! Internal arithmetic uses picoseconds so that sub-nanosecond phase survives filtering.

use crate::clock::{ClockError, TimeOps};
use crate::log::ClockMetrics;
use crate::port::Exchange;
use crate::time::{TimeStamp, PICOS_PER_NANO};

/// Consecutive aborted updates after which the servo reports itself stalled.
pub const ABORT_DIAGNOSTIC_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepPolicy {
    /// Set the clock to the master's time and restart the servo.
    #[default]
    Step,
    /// Never step; drive the frequency to its limit instead.
    Saturate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoConfig {
    /// Proportional attenuation.
    pub ap: i64,
    /// Integral attenuation.
    pub ai: i64,
    /// Maximum delay filter window is `2^delay_filter_shift` samples.
    pub delay_filter_shift: u32,
    pub max_frequency_ppb: i32,
    pub step_policy: StepPolicy,
    /// Estimate only; never touch the clock.
    pub no_adjust: bool,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            ap: 10,
            ai: 1000,
            delay_filter_shift: 6,
            max_frequency_ppb: 512_000,
            step_policy: StepPolicy::Step,
            no_adjust: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoUpdate {
    Updated,
    /// An offset estimate is needed before the delay can be computed.
    Waiting,
    /// Some timestamp was not captured; nothing was changed.
    Aborted { consecutive: u32 },
    /// A delay leg exceeded the configured maximum; nothing was changed.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockAction {
    Idle,
    Adjusted { ppb: i32 },
    Saturated { ppb: i32 },
    Stepped { offset: TimeStamp },
}

#[derive(Debug, Clone, Copy)]
struct DelayFilter {
    y: i64,
    prev: i64,
    s_exp: i64,
    s: u32,
    primed: bool,
}

impl DelayFilter {
    fn new(shift: u32) -> Self {
        Self {
            y: 0,
            prev: 0,
            s_exp: 0,
            s: shift.min(30),
            primed: false,
        }
    }

    fn feed(&mut self, raw: i64) -> i64 {
        let mut raw = if raw < 0 { self.y } else { raw };
        if self.primed && self.y > 0 && raw > 3 * self.y {
            raw = 2 * self.y + (1i64 << self.s) * PICOS_PER_NANO;
        }
        if !self.primed {
            self.prev = raw;
            self.primed = true;
        }

        let y_ns = self.y.abs() / PICOS_PER_NANO;
        while self.s > 0 && (y_ns >> (31 - self.s)) != 0 {
            self.s -= 1;
        }

        let window = 1i64 << self.s;
        if self.s_exp < 1 {
            self.s_exp = 1;
        } else if self.s_exp < window {
            self.s_exp += 1;
        } else if self.s_exp > window {
            self.s_exp = window;
        }

        self.y = ((self.s_exp - 1) * self.y + raw / 2 + self.prev / 2) / self.s_exp;
        self.prev = raw;
        self.y
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct OffsetFilter {
    prev: i64,
    primed: bool,
}

impl OffsetFilter {
    fn feed(&mut self, raw: i64) -> i64 {
        if !self.primed {
            self.prev = raw;
            self.primed = true;
        }
        let y = raw / 2 + self.prev / 2;
        self.prev = raw;
        y
    }
}

pub struct Servo {
    config: ServoConfig,
    metrics: &'static dyn ClockMetrics,
    delay_filter: DelayFilter,
    offset_filter: OffsetFilter,
    integral: i64,
    master_to_slave: TimeStamp,
    mean_path_delay: TimeStamp,
    offset_from_master: TimeStamp,
    offset_updated: bool,
    consecutive_aborts: u32,
    last_adjustment: i32,
}

impl Servo {
    pub fn new(config: ServoConfig, metrics: &'static dyn ClockMetrics) -> Self {
        let config = ServoConfig {
            ap: config.ap.max(1),
            ai: config.ai.max(1),
            ..config
        };

        Self {
            config,
            metrics,
            delay_filter: DelayFilter::new(config.delay_filter_shift),
            offset_filter: OffsetFilter::default(),
            integral: 0,
            master_to_slave: TimeStamp::new(0, 0),
            mean_path_delay: TimeStamp::new(0, 0),
            offset_from_master: TimeStamp::new(0, 0),
            offset_updated: false,
            consecutive_aborts: 0,
            last_adjustment: 0,
        }
    }

    /// Forget all estimates and filter history.
    pub fn reset(&mut self) {
        *self = Self::new(self.config, self.metrics);
    }

    pub fn config(&self) -> &ServoConfig {
        &self.config
    }

    pub fn mean_path_delay(&self) -> TimeStamp {
        self.mean_path_delay
    }

    pub fn offset_from_master(&self) -> TimeStamp {
        self.offset_from_master
    }

    pub fn integral(&self) -> i64 {
        self.integral
    }

    pub fn last_adjustment(&self) -> i32 {
        self.last_adjustment
    }

    /// Recompute the offset from a completed Sync (and Follow_Up).
    pub fn update_offset(&mut self, exchange: &Exchange, max_delay_ns: u64) -> ServoUpdate {
        if !(exchange.t1.is_correct() && exchange.t2.is_correct()) {
            return self.abort();
        }

        let master_to_slave = exchange.t2 - exchange.t1 - exchange.sync_correction;
        if exceeds(master_to_slave, max_delay_ns) {
            return ServoUpdate::Rejected;
        }
        self.master_to_slave = master_to_slave;

        let raw = master_to_slave - self.mean_path_delay;
        self.offset_from_master = if raw.is_sub_second() {
            TimeStamp::from_picos(self.offset_filter.feed(picos(raw)) as i128)
        } else {
            self.offset_filter = OffsetFilter::default();
            raw
        };
        self.offset_updated = true;
        self.consecutive_aborts = 0;
        self.metrics
            .record_offset_from_master(self.offset_from_master);
        ServoUpdate::Updated
    }

    /// Recompute the end-to-end mean path delay from a completed Delay_Req/Delay_Resp.
    pub fn update_delay(&mut self, exchange: &Exchange, max_delay_ns: u64) -> ServoUpdate {
        if !self.offset_updated {
            return ServoUpdate::Waiting;
        }
        let stamps = [exchange.t1, exchange.t2, exchange.t3, exchange.t4];
        if stamps.iter().any(|ts| !ts.is_correct()) {
            return self.abort();
        }

        let slave_to_master = exchange.t4 - exchange.t3 - exchange.delay_correction;
        if exceeds(slave_to_master, max_delay_ns) {
            return ServoUpdate::Rejected;
        }

        let raw = (self.master_to_slave + slave_to_master).half();
        self.filter_delay(raw);
        ServoUpdate::Updated
    }

    /// Recompute the peer mean path delay from a completed Pdelay exchange.
    ///
    /// With a two-step responder the turnaround `t5 - t4` is subtracted explicitly. A one-step
    /// responder folds it into the correction field instead.
    pub fn update_peer_delay(&mut self, exchange: &Exchange, two_step: bool) -> ServoUpdate {
        let mut stamps = [exchange.t3, exchange.t6, exchange.t4, exchange.t5].into_iter();
        let needed = if two_step { 4 } else { 2 };
        if stamps.by_ref().take(needed).any(|ts| !ts.is_correct()) {
            return self.abort();
        }

        let round_trip = exchange.t6 - exchange.t3;
        let raw = if two_step {
            (round_trip - (exchange.t5 - exchange.t4) - exchange.peer_correction).half()
        } else {
            (round_trip - exchange.peer_correction).half()
        };
        self.filter_delay(raw);
        ServoUpdate::Updated
    }

    fn filter_delay(&mut self, raw: TimeStamp) {
        self.mean_path_delay = if raw.is_sub_second() {
            TimeStamp::from_picos(self.delay_filter.feed(picos(raw)) as i128)
        } else {
            self.delay_filter = DelayFilter::new(self.config.delay_filter_shift);
            raw
        };
        self.consecutive_aborts = 0;
        self.metrics.record_mean_path_delay(self.mean_path_delay);
    }

    fn abort(&mut self) -> ServoUpdate {
        self.consecutive_aborts = self.consecutive_aborts.saturating_add(1);
        ServoUpdate::Aborted {
            consecutive: self.consecutive_aborts,
        }
    }

    /// Apply the current offset estimate to the clock.
    pub fn update_clock<T: TimeOps + ?Sized>(
        &mut self,
        time: &T,
    ) -> Result<ClockAction, ClockError> {
        if !self.offset_updated {
            return Ok(ClockAction::Idle);
        }

        let max = self.config.max_frequency_ppb as i64;
        let offset = self.offset_from_master;

        if !offset.is_sub_second() {
            if self.config.no_adjust {
                return Ok(ClockAction::Idle);
            }
            return match self.config.step_policy {
                StepPolicy::Step => {
                    time.set(time.now() - offset)?;
                    // The stepped clock restarts from its nominal rate.
                    time.adjust_freq(0)?;
                    self.reset();
                    self.metrics.record_frequency_adjustment(0);
                    Ok(ClockAction::Stepped { offset })
                }
                StepPolicy::Saturate => {
                    let ppb = (if offset.is_negative() { max } else { -max }) as i32;
                    time.adjust_freq(ppb)?;
                    self.integral = 0;
                    self.last_adjustment = ppb;
                    self.metrics.record_frequency_adjustment(ppb);
                    Ok(ClockAction::Saturated { ppb })
                }
            };
        }

        let offset_ns = offset.to_nanos();
        self.integral = (self.integral + offset_ns / self.config.ai).clamp(-max, max);
        let adjustment = (offset_ns / self.config.ap + self.integral).clamp(-max, max);
        let ppb = -adjustment as i32;
        self.metrics.record_frequency_adjustment(ppb);

        if self.config.no_adjust {
            return Ok(ClockAction::Idle);
        }
        time.adjust_freq(ppb)?;
        self.last_adjustment = ppb;
        Ok(ClockAction::Adjusted { ppb })
    }
}

fn picos(ts: TimeStamp) -> i64 {
    ts.to_picos() as i64
}

fn exceeds(leg: TimeStamp, max_delay_ns: u64) -> bool {
    max_delay_ns != 0 && (!leg.is_sub_second() || leg.to_nanos().unsigned_abs() > max_delay_ns)
}
