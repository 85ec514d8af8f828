#![cfg_attr(not(any(test, feature = "std")), no_std)]
//! `wrptp` is an IEEE 1588 (PTP) protocol engine with hooks for timing extensions such as
//! White Rabbit and High Accuracy.
//!
//! The crate is the protocol-and-control core: the per-port state machine, the Best Master Clock
//! algorithm, the clock servo, the timeout engine and the wire codec. Everything the core needs
//! from the outside world goes through three small traits, so the same code runs on a daemon, an
//! embedded target or a test harness:
//!
//! - [`port::NetOps`] sends and receives frames and reports egress timestamps,
//! - [`clock::TimeOps`] reads and disciplines the local clock and provides a millisecond counter,
//! - [`extension::Extension`] lets a timing extension observe and steer the state machine.
//!
//! Domain events are reported through [`log::PortLog`]; the core never formats text.
//!
//! ## Where to start
//!
//! - Running a clock: [`node::PtpNode`]
//! - One port and its state machine: [`port::Port`] and [`portstate::PortState`]
//! - Master selection: [`bmca`]
//! - Offset and delay estimation: [`servo::Servo`]
//! - Wire format: [`wire`] and [`message`]
//!
//! The `wrptp-daemon` crate in this workspace wires the engine to UDP multicast on tokio.
//!
//! # Feature flags
//!
//! - `std` (default): builds against the standard library. Without it the crate is `no_std` and
//!   allocation free; all storage is fixed capacity.
//! - `test-support`: exposes [`test_support`], the fakes and scenario builders used by the tests.

pub mod bmca;
pub mod buffer;
pub mod clock;
pub mod datasets;
pub mod extension;
pub mod foreign;
pub mod ha;
pub mod log;
pub mod message;
pub mod node;
pub mod port;
pub mod portstate;
pub mod profile;
pub mod result;
pub mod servo;
pub mod time;
pub mod timeout;
pub mod whiterabbit;
pub mod wire;

mod e2e;
mod faulty;
mod initializing;
mod listening;
mod master;
mod p2p;
mod passive;
mod premaster;
mod slave;
mod sync;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
