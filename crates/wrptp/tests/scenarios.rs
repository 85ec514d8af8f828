//! Two clocks on one simulated segment.
//!
//! Each side is a single-port [`PtpNode`] on a [`FakeNet`]. A step advances both clocks by the
//! same amount, runs both nodes and carries every sent frame to the other side, stamped with the
//! receiver's clock plus a fixed one-way link delay.

use wrptp::clock::{ClockIdentity, TimeOps};
use wrptp::datasets::{ClockContext, DefaultDS};
use wrptp::extension::NoExtension;
use wrptp::log::NOOP_CLOCK_METRICS;
use wrptp::node::PtpNode;
use wrptp::port::{DomainNumber, PortIdentity};
use wrptp::portstate::PortState;
use wrptp::profile::PortProfile;
use wrptp::servo::{Servo, ServoConfig};
use wrptp::test_support::{fake_default_ds, FakeNet, FakeTimeOps, RecordingLog};
use wrptp::time::TimeStamp;

type Node = PtpNode<FakeNet, FakeTimeOps, NoExtension, RecordingLog, 1>;

const STEP_MS: u32 = 10;

/// One-way delay of the simulated link: 500 µs.
fn link_delay() -> TimeStamp {
    TimeStamp::new(0, 500_000)
}

struct Side {
    node: Node,
    net: FakeNet,
    up: bool,
}

impl Side {
    fn new(default_ds: DefaultDS) -> Self {
        let net = FakeNet::new();
        let mut node = Node::new(ClockContext::new(default_ds));
        node.add_port(
            PortProfile::default(),
            Servo::new(ServoConfig::default(), &NOOP_CLOCK_METRICS),
            net.clone(),
            FakeTimeOps::new(),
            NoExtension,
            RecordingLog::default(),
        )
        .unwrap();
        Self { node, net, up: true }
    }

    fn time(&self) -> &FakeTimeOps {
        self.node.port(0).unwrap().time()
    }

    fn state(&self) -> PortState {
        self.node.port(0).unwrap().state()
    }

    fn identity(&self) -> PortIdentity {
        *self.node.port(0).unwrap().identity()
    }

    fn run(&mut self) {
        self.time().advance_ms(STEP_MS);
        self.net.set_egress(self.time().now());
        self.node.run_once();
    }
}

struct Segment {
    a: Side,
    b: Side,
}

impl Segment {
    fn new(a: DefaultDS, b: DefaultDS) -> Self {
        Self {
            a: Side::new(a),
            b: Side::new(b),
        }
    }

    fn carry(from: &Side, to: &Side) {
        let sent = from.net.take_sent();
        if !from.up || !to.up {
            return;
        }
        for frame in sent {
            to.net.push_inbound(frame.bytes, to.time().now() + link_delay());
        }
    }

    fn run_ms(&mut self, ms: u32) {
        for _ in 0..ms / STEP_MS {
            if self.a.up {
                self.a.run();
            }
            if self.b.up {
                self.b.run();
            }
            Self::carry(&self.a, &self.b);
            Self::carry(&self.b, &self.a);
        }
    }
}

fn clock(last: u8, priority1: u8) -> DefaultDS {
    fake_default_ds(last, priority1)
}

#[test]
fn scenario_better_priority_wins_the_election() {
    let mut segment = Segment::new(clock(0x0A, 128), clock(0x0B, 100));

    segment.run_ms(10_000);

    assert_eq!(segment.a.state(), PortState::Slave);
    assert_eq!(segment.b.state(), PortState::Master);

    let a = segment.a.node.clock();
    assert_eq!(a.parent_ds().parent_port_identity, segment.b.identity());
    assert_eq!(
        a.parent_ds().grandmaster_identity,
        ClockIdentity::new(&[0, 0, 0, 0, 0, 0, 0, 0x0B])
    );
    assert_eq!(a.current_ds().steps_removed, 1);
    assert_eq!(segment.b.node.clock().current_ds().steps_removed, 0);
}

#[test]
fn scenario_identity_breaks_a_priority_tie() {
    let mut segment = Segment::new(clock(0x0A, 128), clock(0x0B, 128));

    segment.run_ms(10_000);

    assert_eq!(segment.a.state(), PortState::Master);
    assert_eq!(segment.b.state(), PortState::Slave);
}

#[test]
fn scenario_slave_measures_the_link() {
    let mut segment = Segment::new(clock(0x0A, 128), clock(0x0B, 100));

    segment.run_ms(30_000);

    let port = segment.a.node.port(0).unwrap();
    let servo = port.instance().servo();
    assert_eq!(servo.mean_path_delay(), link_delay());
    assert_eq!(servo.offset_from_master(), TimeStamp::new(0, 0));
    assert!(port.time().set_calls().is_empty());
}

#[test]
fn scenario_slave_takes_over_when_master_disappears() {
    let mut segment = Segment::new(clock(0x0A, 128), clock(0x0B, 100));
    segment.run_ms(10_000);
    assert_eq!(segment.a.state(), PortState::Slave);

    segment.b.up = false;
    segment.run_ms(8_000);

    assert_eq!(segment.a.state(), PortState::Master);
    let a = segment.a.node.clock();
    assert_eq!(a.parent_ds().grandmaster_identity, a.default_ds().clock_identity);
    assert_eq!(a.current_ds().steps_removed, 0);
}

#[test]
fn scenario_returning_master_is_followed_again() {
    let mut segment = Segment::new(clock(0x0A, 128), clock(0x0B, 100));
    segment.run_ms(10_000);
    segment.b.up = false;
    segment.run_ms(8_000);
    assert_eq!(segment.a.state(), PortState::Master);

    segment.b.up = true;
    segment.run_ms(5_000);

    assert_eq!(segment.a.state(), PortState::Slave);
    assert_eq!(segment.b.state(), PortState::Master);
}

#[test]
fn scenario_other_domain_is_not_seen() {
    let mut other = clock(0x0B, 100);
    other.domain_number = DomainNumber::new(1);
    let mut segment = Segment::new(clock(0x0A, 128), other);

    segment.run_ms(10_000);

    assert_eq!(segment.a.state(), PortState::Master);
    assert_eq!(segment.b.state(), PortState::Master);
    assert_eq!(segment.a.node.port(0).unwrap().foreign_count(), 0);
}
