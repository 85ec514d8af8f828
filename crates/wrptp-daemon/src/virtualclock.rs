//! A software clock the daemon disciplines instead of a system or hardware clock.
//!
//! [`VirtualClock`] runs on tokio's clock, so it follows paused and advanced time in tests. It
//! keeps a base timestamp, the instant that base was taken and a frequency correction in parts
//! per billion:
//!
//! `now = base + elapsed * (1 + ppb / 1e9)`
//!
//! `set`, `adjust_offset` and `adjust_freq` capture the current value as the new base, so a
//! frequency change never makes the clock jump. The millisecond counter behind `calc_timeout`
//! is the uncorrected elapsed time since creation.

use std::cell::Cell;
use std::rc::Rc;

use tokio::time::Instant;

use wrptp::clock::{ClockError, TimeOps};
use wrptp::time::{TimeStamp, PICOS_PER_NANO};

const NANOS_PER_BILLION: i128 = 1_000_000_000;

struct State {
    base: Cell<TimeStamp>,
    since: Cell<Instant>,
    ppb: Cell<i32>,
    origin: Instant,
}

/// A shared handle to one virtual clock. Clones read and steer the same clock.
#[derive(Clone)]
pub struct VirtualClock {
    state: Rc<State>,
}

impl VirtualClock {
    pub fn new(start: TimeStamp) -> Self {
        let now = Instant::now();
        Self {
            state: Rc::new(State {
                base: Cell::new(start),
                since: Cell::new(now),
                ppb: Cell::new(0),
                origin: now,
            }),
        }
    }

    /// The frequency correction currently applied.
    pub fn ppb(&self) -> i32 {
        self.state.ppb.get()
    }

    fn rebase(&self, base: TimeStamp) {
        self.state.base.set(base);
        self.state.since.set(Instant::now());
    }
}

impl TimeOps for VirtualClock {
    fn now(&self) -> TimeStamp {
        let elapsed = self.state.since.get().elapsed().as_nanos() as i128;
        let corrected = elapsed + elapsed * self.state.ppb.get() as i128 / NANOS_PER_BILLION;
        self.state.base.get() + TimeStamp::from_picos(corrected * PICOS_PER_NANO as i128)
    }

    fn set(&self, to: TimeStamp) -> Result<(), ClockError> {
        tracing::debug!("clock set to {}", to);
        self.rebase(to);
        Ok(())
    }

    fn adjust_offset(&self, picos: i64) -> Result<(), ClockError> {
        self.rebase(self.now() + TimeStamp::from_picos(picos as i128));
        Ok(())
    }

    fn adjust_freq(&self, ppb: i32) -> Result<(), ClockError> {
        self.rebase(self.now());
        self.state.ppb.set(ppb);
        Ok(())
    }

    fn calc_timeout(&self, millis: u32) -> u32 {
        (self.state.origin.elapsed().as_millis() as u32).wrapping_add(millis)
    }

    fn utc_offset_changed(&self, utc_offset: i16) {
        tracing::info!("UTC offset is now {}s", utc_offset);
    }
}
