//! Clock-wide datasets and the context that owns them.
//!
//! A [`ClockContext`] is created once per clock and handed by reference into every state-machine
//! call of every port on that clock. `ParentDS` and `CurrentDS` change only through the
//! [`bmca::m1`](crate::bmca::m1) and [`bmca::s1`](crate::bmca::s1) actions. The one exception is
//! the servo estimates in `CurrentDS`, which the slave publishes after each update.

use heapless::Vec;

use crate::bmca;
use crate::clock::{ClockIdentity, ClockQuality, TimeSource};
use crate::foreign::ForeignMasterRecord;
use crate::port::{DomainNumber, PortIdentity};
use crate::servo::Servo;
use crate::time::TimeStamp;
use crate::wire::Flags;

/// Ports a single clock can host.
pub const MAX_PORTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultDS {
    pub clock_identity: ClockIdentity,
    pub number_ports: u16,
    pub clock_quality: ClockQuality,
    pub priority1: u8,
    pub priority2: u8,
    pub domain_number: DomainNumber,
    pub slave_only: bool,
}

impl DefaultDS {
    pub fn new(
        clock_identity: ClockIdentity,
        clock_quality: ClockQuality,
        priority1: u8,
        priority2: u8,
        domain_number: DomainNumber,
    ) -> Self {
        Self {
            clock_identity,
            number_ports: 1,
            clock_quality,
            priority1,
            priority2,
            domain_number,
            slave_only: clock_quality.clock_class == ClockQuality::CLASS_SLAVE_ONLY,
        }
    }

    pub fn with_number_ports(self, number_ports: u16) -> Self {
        Self {
            number_ports,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentDS {
    pub steps_removed: u16,
    pub offset_from_master: TimeStamp,
    pub mean_path_delay: TimeStamp,
}

impl Default for CurrentDS {
    fn default() -> Self {
        Self {
            steps_removed: 0,
            offset_from_master: TimeStamp::new(0, 0),
            mean_path_delay: TimeStamp::new(0, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParentDS {
    pub parent_port_identity: PortIdentity,
    pub grandmaster_identity: ClockIdentity,
    pub grandmaster_clock_quality: ClockQuality,
    pub grandmaster_priority1: u8,
    pub grandmaster_priority2: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimePropertiesDS {
    pub current_utc_offset: i16,
    pub current_utc_offset_valid: bool,
    pub leap59: bool,
    pub leap61: bool,
    pub time_traceable: bool,
    pub frequency_traceable: bool,
    pub ptp_timescale: bool,
    pub time_source: TimeSource,
}

impl TimePropertiesDS {
    /// Build from the time-properties bits of a header `flagField`.
    pub fn from_flags(flags: u16, current_utc_offset: i16, time_source: TimeSource) -> Self {
        Self {
            current_utc_offset,
            current_utc_offset_valid: flags & Flags::UTC_OFFSET_VALID != 0,
            leap59: flags & Flags::LEAP_59 != 0,
            leap61: flags & Flags::LEAP_61 != 0,
            time_traceable: flags & Flags::TIME_TRACEABLE != 0,
            frequency_traceable: flags & Flags::FREQUENCY_TRACEABLE != 0,
            ptp_timescale: flags & Flags::PTP_TIMESCALE != 0,
            time_source,
        }
    }

    pub fn to_flags(&self) -> u16 {
        let mut flags = 0;
        for (set, bit) in [
            (self.leap61, Flags::LEAP_61),
            (self.leap59, Flags::LEAP_59),
            (self.current_utc_offset_valid, Flags::UTC_OFFSET_VALID),
            (self.ptp_timescale, Flags::PTP_TIMESCALE),
            (self.time_traceable, Flags::TIME_TRACEABLE),
            (self.frequency_traceable, Flags::FREQUENCY_TRACEABLE),
        ] {
            if set {
                flags |= bit;
            }
        }
        flags
    }
}

impl Default for TimePropertiesDS {
    fn default() -> Self {
        Self::from_flags(0, 0, TimeSource::INTERNAL_OSCILLATOR)
    }
}

/// Datasets and cross-port BMC bookkeeping shared by all ports of one clock.
pub struct ClockContext {
    pub(crate) default_ds: DefaultDS,
    pub(crate) current_ds: CurrentDS,
    pub(crate) parent_ds: ParentDS,
    pub(crate) time_properties_ds: TimePropertiesDS,
    erbest: Vec<Option<ForeignMasterRecord>, MAX_PORTS>,
    ebest_idx: Option<usize>,
    ebest_generation: u32,
}

impl ClockContext {
    /// Create the context with the local clock as its own grandmaster.
    ///
    /// `number_ports` beyond [`MAX_PORTS`] is clamped.
    pub fn new(default_ds: DefaultDS) -> Self {
        let ports = (default_ds.number_ports as usize).clamp(1, MAX_PORTS);
        let mut erbest = Vec::new();
        erbest.resize(ports, None).ok();

        let mut clock = Self {
            default_ds,
            current_ds: CurrentDS::default(),
            parent_ds: ParentDS::default(),
            time_properties_ds: TimePropertiesDS::default(),
            erbest,
            ebest_idx: None,
            ebest_generation: 0,
        };
        bmca::m1(&mut clock);
        clock
    }

    pub fn default_ds(&self) -> &DefaultDS {
        &self.default_ds
    }

    pub fn current_ds(&self) -> &CurrentDS {
        &self.current_ds
    }

    pub fn parent_ds(&self) -> &ParentDS {
        &self.parent_ds
    }

    pub fn time_properties_ds(&self) -> &TimePropertiesDS {
        &self.time_properties_ds
    }

    pub fn port_count(&self) -> usize {
        self.erbest.len()
    }

    /// Best foreign master seen on port `index`, if any.
    pub fn erbest(&self, index: usize) -> Option<&ForeignMasterRecord> {
        self.erbest.get(index).and_then(|r| r.as_ref())
    }

    /// Port holding the best foreign master across the clock.
    pub fn ebest_idx(&self) -> Option<usize> {
        self.ebest_idx
    }

    pub fn ebest(&self) -> Option<&ForeignMasterRecord> {
        self.ebest_idx.and_then(|idx| self.erbest(idx))
    }

    /// Bumped every time Ebest changes. Ports compare it against the value they last saw.
    pub fn ebest_generation(&self) -> u32 {
        self.ebest_generation
    }

    /// Record the best foreign master of port `index` and recompute Ebest.
    pub(crate) fn update_erbest(&mut self, index: usize, record: Option<ForeignMasterRecord>) {
        let Some(slot) = self.erbest.get_mut(index) else {
            return;
        };
        if *slot == record {
            return;
        }
        *slot = record;

        let parent = self.parent_ds.parent_port_identity;
        let mut best: Option<(usize, &ForeignMasterRecord)> = None;
        for (idx, candidate) in self.erbest.iter().enumerate() {
            let Some(candidate) = candidate else { continue };
            best = match best {
                Some((_, current))
                    if bmca::compare_records(candidate, current, &parent).is_ge() =>
                {
                    best
                }
                _ => Some((idx, candidate)),
            };
        }

        self.ebest_idx = best.map(|(idx, _)| idx);
        self.ebest_generation = self.ebest_generation.wrapping_add(1);
    }

    /// Publish the servo estimates as the externally visible sync quality.
    pub(crate) fn publish_servo(&mut self, servo: &Servo) {
        self.current_ds.offset_from_master = servo.offset_from_master();
        self.current_ds.mean_path_delay = servo.mean_path_delay();
    }
}
