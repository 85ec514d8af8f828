use std::rc::Rc;

use wrptp::clock::{ClockIdentity, ClockQuality};
use wrptp::datasets::{ClockContext, DefaultDS};
use wrptp::extension::NoExtension;
use wrptp::port::DomainNumber;
use wrptp::profile::PortProfile;
use wrptp::servo::{Servo, ServoConfig};
use wrptp::time::TimeStamp;

use wrptp_daemon::log::TRACING_CLOCK_METRICS;
use wrptp_daemon::net::{DropInjector, MulticastSocket, UdpNet};
use wrptp_daemon::node::TokioNode;
use wrptp_daemon::virtualclock::VirtualClock;

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    wrptp_daemon::init_tracing();

    let default_ds = DefaultDS::new(
        ClockIdentity::new(&[0x00, 0x1B, 0x19, 0xFF, 0xFE, 0x00, 0x00, 0x01]),
        ClockQuality::new(ClockQuality::CLASS_DEFAULT, ClockQuality::ACCURACY_UNKNOWN, 0xFFFF),
        127,
        127,
        DomainNumber::new(0),
    );
    let clock = VirtualClock::new(TimeStamp::new(0, 0));

    let event_socket = Rc::new(MulticastSocket::event().await?);
    let general_socket = Rc::new(MulticastSocket::general().await?);
    let drops = DropInjector::from_env();
    if drops.is_some() {
        tracing::info!("receive drop injection enabled");
    }

    let mut node = TokioNode::new(ClockContext::new(default_ds));
    node.add_port(
        PortProfile::default(),
        Servo::new(ServoConfig::default(), &TRACING_CLOCK_METRICS),
        UdpNet::new(event_socket, general_socket, clock.clone()).with_drops(drops),
        clock,
        NoExtension,
    )?;

    node.run_until(shutdown()).await
}

async fn shutdown() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate() => {}
    }
    tracing::info!("shutting down");
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(err) => {
            tracing::warn!("cannot install SIGTERM handler: {}", err);
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}
