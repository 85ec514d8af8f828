//! Per-port protocol configuration.

use crate::time::{LogInterval, TimeStamp};

/// Configured role of a port.
///
/// `Auto` lets the BMC decide. `Master` and `Slave` pin the port to that side of the
/// synchronization link regardless of what other clocks announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortRole {
    #[default]
    Auto,
    Master,
    Slave,
}

/// Path delay measurement mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DelayMechanism {
    #[default]
    E2E = 1,
    P2P = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortProfile {
    pub log_announce_interval: LogInterval,
    pub log_sync_interval: LogInterval,
    pub log_min_delay_req_interval: LogInterval,
    pub log_min_pdelay_req_interval: LogInterval,
    /// Number of announce intervals without an Announce before the receipt timeout fires.
    pub announce_receipt_timeout: u8,
    pub delay_mechanism: DelayMechanism,
    pub role: PortRole,
    /// Upper bound for a single delay leg in nanoseconds; 0 disables the check.
    pub max_delay_ns: u64,
    /// Added to every egress timestamp before it is used or sent.
    pub outbound_latency: TimeStamp,
    pub transport_specific: u8,
}

impl PortProfile {
    pub fn new(role: PortRole, delay_mechanism: DelayMechanism) -> Self {
        Self {
            role,
            delay_mechanism,
            ..Self::default()
        }
    }

    pub fn with_announce_interval(self, log: i8) -> Self {
        Self {
            log_announce_interval: LogInterval::new(log),
            ..self
        }
    }

    pub fn with_sync_interval(self, log: i8) -> Self {
        Self {
            log_sync_interval: LogInterval::new(log),
            ..self
        }
    }

    pub fn with_max_delay_ns(self, max_delay_ns: u64) -> Self {
        Self {
            max_delay_ns,
            ..self
        }
    }

    pub fn with_outbound_latency(self, outbound_latency: TimeStamp) -> Self {
        Self {
            outbound_latency,
            ..self
        }
    }

    /// Interval used to pace path-delay requests for the configured mechanism.
    pub fn log_request_interval(&self) -> LogInterval {
        match self.delay_mechanism {
            DelayMechanism::E2E => self.log_min_delay_req_interval,
            DelayMechanism::P2P => self.log_min_pdelay_req_interval,
        }
    }

    /// Announce receipt timeout in milliseconds.
    pub fn announce_receipt_timeout_ms(&self) -> u32 {
        (self.announce_receipt_timeout as u32).saturating_mul(self.log_announce_interval.millis())
    }
}

impl Default for PortProfile {
    fn default() -> Self {
        Self {
            log_announce_interval: LogInterval::new(1),
            log_sync_interval: LogInterval::new(0),
            log_min_delay_req_interval: LogInterval::new(0),
            log_min_pdelay_req_interval: LogInterval::new(0),
            announce_receipt_timeout: 3,
            delay_mechanism: DelayMechanism::E2E,
            role: PortRole::Auto,
            max_delay_ns: 0,
            outbound_latency: TimeStamp::new(0, 0),
            transport_specific: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_announce_receipt_timeout_scales_with_interval() {
        let profile = PortProfile::default();
        assert_eq!(profile.announce_receipt_timeout_ms(), 6000);

        let profile = profile.with_announce_interval(-1);
        assert_eq!(profile.announce_receipt_timeout_ms(), 1500);
    }

    #[test]
    fn profile_request_interval_follows_mechanism() {
        let mut profile = PortProfile::new(PortRole::Auto, DelayMechanism::P2P);
        profile.log_min_pdelay_req_interval = LogInterval::new(2);

        assert_eq!(profile.log_request_interval(), LogInterval::new(2));
    }
}
