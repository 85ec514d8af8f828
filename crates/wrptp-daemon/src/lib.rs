//! Tokio-based host for the `wrptp` protocol engine.
//!
//! The workspace separates the protocol core (`crates/wrptp`) from the host/IO-facing layer in
//! this crate. The core knows nothing about sockets, clocks or runtimes; it asks for them through
//! its `NetOps` and `TimeOps` traits. This crate provides:
//! - sockets and the `NetOps` implementation ([`net`]),
//! - a software clock implementing `TimeOps` ([`virtualclock`]),
//! - `tracing` sinks for the core's domain events ([`log`]), and
//! - the async loop that drives a multi-port clock ([`node`]).

/// Tracing sinks for port events and servo samples.
pub mod log;
/// Multicast and loopback sockets, and the per-port `NetOps`.
pub mod net;
/// The tokio loop around `wrptp::node::PtpNode`.
pub mod node;
/// Software clock disciplined by the servo.
pub mod virtualclock;

use std::fmt;
use std::time::Instant;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;

/// Tracing timer printing process uptime with millisecond precision, e.g. `wrptp[12.034s]`.
struct MillisecondUptime {
    start: Instant,
}

impl MillisecondUptime {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl FormatTime for MillisecondUptime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let elapsed = self.start.elapsed();
        write!(w, "wrptp[{}.{:03}s]", elapsed.as_secs(), elapsed.subsec_millis())
    }
}

/// Install the daemon's tracing subscriber.
///
/// Honors `RUST_LOG` with a default of `info` and writes to stdout. An already installed
/// subscriber (as in tests) is left alone.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_level(false)
        .with_timer(MillisecondUptime::new())
        .try_init();
}
