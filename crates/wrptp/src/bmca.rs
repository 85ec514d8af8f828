//! Best Master Clock algorithm.
//!
//! [`compare`] is the dataset comparison of IEEE 1588 figures 27 and 28. [`state_decision`] is
//! the state decision of figure 26 as a pure function. [`m1`] and [`s1`] are the only places that
//! update `ParentDS` and `CurrentDS`.
//!
//! Lower values win everywhere: an [`Ordering::Less`] result means the first dataset is better.

use core::cmp::Ordering;

use crate::clock::{ClockIdentity, ClockQuality, TimeOps, TimeSource};
use crate::datasets::{ClockContext, CurrentDS, DefaultDS, TimePropertiesDS};
use crate::extension::Extension;
use crate::foreign::ForeignMasterRecord;
use crate::log::{PortEvent, PortLog};
use crate::port::{NetOps, Port, PortIdentity, PortNumber};
use crate::portstate::PortState;
use crate::profile::PortRole;

/// The fields of an Announce (or of the local clock) that take part in the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BmcDataset {
    pub grandmaster_priority1: u8,
    pub grandmaster_identity: ClockIdentity,
    pub grandmaster_clock_quality: ClockQuality,
    pub grandmaster_priority2: u8,
    pub steps_removed: u16,
    pub sender: PortIdentity,
}

impl BmcDataset {
    /// The local clock presented as a candidate grandmaster.
    pub fn local(default_ds: &DefaultDS) -> Self {
        Self {
            grandmaster_priority1: default_ds.priority1,
            grandmaster_identity: default_ds.clock_identity,
            grandmaster_clock_quality: default_ds.clock_quality,
            grandmaster_priority2: default_ds.priority2,
            steps_removed: 0,
            sender: PortIdentity::new(default_ds.clock_identity, PortNumber::new(0)),
        }
    }

    pub fn from_record(record: &ForeignMasterRecord) -> Self {
        let announce = &record.announce;
        Self {
            grandmaster_priority1: announce.grandmaster_priority1,
            grandmaster_identity: announce.grandmaster_identity,
            grandmaster_clock_quality: announce.grandmaster_clock_quality,
            grandmaster_priority2: announce.grandmaster_priority2,
            steps_removed: announce.steps_removed,
            sender: record.source,
        }
    }
}

/// Compare two datasets. `parent` is the current parent port, used to break ties between paths
/// to the same grandmaster that differ by one hop.
pub fn compare(a: &BmcDataset, b: &BmcDataset, parent: &PortIdentity) -> Ordering {
    if a.grandmaster_identity == b.grandmaster_identity {
        return compare_same_grandmaster(a, b, parent);
    }

    let qa = &a.grandmaster_clock_quality;
    let qb = &b.grandmaster_clock_quality;

    a.grandmaster_priority1
        .cmp(&b.grandmaster_priority1)
        .then(qa.clock_class.cmp(&qb.clock_class))
        .then(qa.clock_accuracy.cmp(&qb.clock_accuracy))
        .then(
            qa.offset_scaled_log_variance
                .cmp(&qb.offset_scaled_log_variance),
        )
        .then(a.grandmaster_priority2.cmp(&b.grandmaster_priority2))
        .then(a.grandmaster_identity.cmp(&b.grandmaster_identity))
}

fn compare_same_grandmaster(a: &BmcDataset, b: &BmcDataset, parent: &PortIdentity) -> Ordering {
    let diff = a.steps_removed as i32 - b.steps_removed as i32;
    if diff > 1 {
        return Ordering::Greater;
    }
    if diff < -1 {
        return Ordering::Less;
    }

    let parent_id = parent.clock_identity();
    match diff {
        // Both paths reach us through the same parent clock: indistinguishable.
        1 if a.sender.clock_identity() == parent_id => Ordering::Equal,
        1 => Ordering::Greater,
        -1 if b.sender.clock_identity() == parent_id => Ordering::Equal,
        -1 => Ordering::Less,
        _ => a.sender.clock_identity().cmp(b.sender.clock_identity()),
    }
}

pub fn compare_records(
    a: &ForeignMasterRecord,
    b: &ForeignMasterRecord,
    parent: &PortIdentity,
) -> Ordering {
    compare(
        &BmcDataset::from_record(a),
        &BmcDataset::from_record(b),
        parent,
    )
}

/// Index of the best record. Ties go to the earlier record.
pub fn best_of(records: &[ForeignMasterRecord], parent: &PortIdentity) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, record) in records.iter().enumerate() {
        best = match best {
            Some(b) if compare_records(record, &records[b], parent).is_lt() => Some(i),
            Some(b) => Some(b),
            None => Some(i),
        };
    }
    best
}

/// Outcome of the state decision algorithm, before its dataset actions have run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateDecision {
    Listening,
    /// The local clock is the grandmaster.
    M1Master,
    PreMaster,
    Passive,
    /// Synchronize to this record.
    S1Slave(ForeignMasterRecord),
}

/// Inputs of the state decision for one port.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub default_ds: &'a DefaultDS,
    pub role: PortRole,
    pub state: PortState,
    pub erbest: Option<&'a ForeignMasterRecord>,
    /// This port holds Ebest.
    pub is_ebest_port: bool,
    pub parent: &'a PortIdentity,
}

pub fn state_decision(input: &DecisionInput<'_>) -> StateDecision {
    let erbest = input.erbest;

    if input.role == PortRole::Slave {
        return match erbest {
            Some(record) => StateDecision::S1Slave(*record),
            None => StateDecision::Listening,
        };
    }
    if erbest.is_none() && input.state == PortState::Listening {
        return StateDecision::Listening;
    }
    if input.role == PortRole::Master {
        return StateDecision::M1Master;
    }
    let Some(record) = erbest else {
        return StateDecision::M1Master;
    };

    let local = BmcDataset::local(input.default_ds);
    let ordering = compare(&local, &BmcDataset::from_record(record), input.parent);

    if input.default_ds.clock_quality.clock_class < ClockQuality::CLASS_MASTER_ONLY_LIMIT {
        return match ordering {
            Ordering::Less => StateDecision::M1Master,
            _ => StateDecision::Passive,
        };
    }

    match ordering {
        Ordering::Less => StateDecision::M1Master,
        Ordering::Greater if input.default_ds.number_ports <= 1 || input.is_ebest_port => {
            StateDecision::S1Slave(*record)
        }
        Ordering::Greater => StateDecision::Passive,
        Ordering::Equal => StateDecision::PreMaster,
    }
}

/// The local clock becomes the grandmaster.
pub fn m1(clock: &mut ClockContext) {
    let default_ds = clock.default_ds;

    clock.current_ds = CurrentDS::default();

    clock.parent_ds.parent_port_identity =
        PortIdentity::new(default_ds.clock_identity, PortNumber::new(0));
    clock.parent_ds.grandmaster_identity = default_ds.clock_identity;
    clock.parent_ds.grandmaster_clock_quality = default_ds.clock_quality;
    clock.parent_ds.grandmaster_priority1 = default_ds.priority1;
    clock.parent_ds.grandmaster_priority2 = default_ds.priority2;

    clock.time_properties_ds.time_source = TimeSource::INTERNAL_OSCILLATOR;
}

/// Synchronize the clock datasets to `record`.
///
/// Returns the previous and new UTC offset when the grandmaster announced a change.
pub fn s1(clock: &mut ClockContext, record: &ForeignMasterRecord) -> Option<(i16, i16)> {
    let announce = &record.announce;

    clock.current_ds.steps_removed = announce.steps_removed.saturating_add(1);

    clock.parent_ds.parent_port_identity = record.source;
    clock.parent_ds.grandmaster_identity = announce.grandmaster_identity;
    clock.parent_ds.grandmaster_clock_quality = announce.grandmaster_clock_quality;
    clock.parent_ds.grandmaster_priority1 = announce.grandmaster_priority1;
    clock.parent_ds.grandmaster_priority2 = announce.grandmaster_priority2;

    let previous = clock.time_properties_ds.current_utc_offset;
    clock.time_properties_ds = TimePropertiesDS::from_flags(
        record.flags,
        announce.current_utc_offset,
        announce.time_source,
    );

    (previous != announce.current_utc_offset).then_some((previous, announce.current_utc_offset))
}

impl<N: NetOps, T: TimeOps, E: Extension, L: PortLog> Port<N, T, E, L> {
    /// Run the BMC for this port and return the recommended state.
    ///
    /// Dataset actions (`m1`/`s1`) and the extension's `s1` hook run here. An extension failure
    /// recommends FAULTY.
    pub(crate) fn bmc(&mut self, clock: &mut ClockContext) -> PortState {
        let state = self.instance.state;
        if self.instance.foreign.is_empty() && state == PortState::Master {
            m1(clock);
            return PortState::Master;
        }

        let parent = clock.parent_ds.parent_port_identity;
        let erbest = best_of(self.instance.foreign.records(), &parent)
            .map(|idx| self.instance.foreign.records()[idx]);
        clock.update_erbest(self.instance.index, erbest);
        self.instance.ebest_generation = clock.ebest_generation();

        let decision = state_decision(&DecisionInput {
            default_ds: &clock.default_ds,
            role: self.instance.profile.role,
            state,
            erbest: erbest.as_ref(),
            is_ebest_port: clock.ebest_idx() == Some(self.instance.index),
            parent: &parent,
        });

        match decision {
            StateDecision::Listening => PortState::Listening,
            StateDecision::M1Master => {
                m1(clock);
                self.log(PortEvent::RecommendedMaster);
                PortState::Master
            }
            StateDecision::PreMaster => {
                self.log(PortEvent::RecommendedMaster);
                PortState::PreMaster
            }
            StateDecision::Passive => {
                self.log(PortEvent::RecommendedPassive);
                PortState::Passive
            }
            StateDecision::S1Slave(record) => {
                if let Some((from, to)) = s1(clock, &record) {
                    self.log(PortEvent::UtcOffsetChanged { from, to });
                    self.time.utc_offset_changed(to);
                }
                if self.ext.s1(clock, &mut self.instance, &record).is_err() {
                    self.log(PortEvent::FaultDetected);
                    return PortState::Faulty;
                }
                self.log(PortEvent::RecommendedSlave {
                    parent: record.source,
                });

                let keeps_slave = matches!(state, PortState::Slave | PortState::Uncalibrated);
                if keeps_slave && record.source != parent {
                    self.instance.reset_exchange();
                }
                match state {
                    PortState::Uncalibrated => PortState::Uncalibrated,
                    _ => PortState::Slave,
                }
            }
        }
    }
}
