//! Sockets and the [`NetOps`] implementation the daemon hands to each port.
//!
//! A port owns two [`PacketSocket`]s, one per PTP channel. [`MulticastSocket`] is the real thing
//! (UDP on 224.0.1.129, ports 319 and 320). [`LoopbackHub`] connects any number of in-process
//! sockets for tests and experiments.
//!
//! Egress and ingress timestamps are read from the port's clock in software, right after the
//! frame was handed to or taken from the socket.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::io::{ErrorKind, Result};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::rc::Rc;

use tokio::net::UdpSocket;
use tokio::sync::Notify;

use wrptp::buffer::FRAME_CAPACITY;
use wrptp::clock::TimeOps;
use wrptp::port::{Channel, NetOps, PacketCheck, Received, RecvError, SendError, SendResult};
use wrptp::time::TimeStamp;

/// A datagram socket the port loop can poll without blocking.
pub trait PacketSocket {
    fn try_send(&self, bytes: &[u8]) -> Result<usize>;
    /// Receive one datagram, or fail with [`ErrorKind::WouldBlock`].
    fn try_recv(&self, buf: &mut [u8]) -> Result<usize>;
    /// Resolve once a datagram may be waiting.
    fn readable(&self) -> impl Future<Output = Result<()>> + '_;
}

impl<S: PacketSocket> PacketSocket for Rc<S> {
    fn try_send(&self, bytes: &[u8]) -> Result<usize> {
        self.as_ref().try_send(bytes)
    }

    fn try_recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.as_ref().try_recv(buf)
    }

    fn readable(&self) -> impl Future<Output = Result<()>> + '_ {
        self.as_ref().readable()
    }
}

#[derive(Debug)]
pub struct MulticastSocket {
    socket: UdpSocket,
    dest: SocketAddrV4,
}

impl MulticastSocket {
    const PTP_MCAST: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 129);

    pub async fn event() -> Result<Self> {
        Self::bind_v4(Self::PTP_MCAST, 319).await
    }

    pub async fn general() -> Result<Self> {
        Self::bind_v4(Self::PTP_MCAST, 320).await
    }

    async fn bind_v4(multicast: Ipv4Addr, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        socket.join_multicast_v4(multicast, Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_loop_v4(false)?;
        socket.set_multicast_ttl_v4(1)?;
        Ok(Self {
            socket,
            dest: SocketAddrV4::new(multicast, port),
        })
    }
}

impl PacketSocket for MulticastSocket {
    fn try_send(&self, bytes: &[u8]) -> Result<usize> {
        self.socket.try_send_to(bytes, SocketAddr::V4(self.dest))
    }

    fn try_recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.socket.try_recv_from(buf).map(|(len, _peer)| len)
    }

    fn readable(&self) -> impl Future<Output = Result<()>> + '_ {
        self.socket.readable()
    }
}

#[derive(Default)]
struct Mailbox {
    frames: RefCell<VecDeque<Vec<u8>>>,
    notify: Notify,
}

/// An in-memory segment. Every frame sent on one socket reaches all the others.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    members: Rc<RefCell<Vec<Rc<Mailbox>>>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new socket to the segment.
    pub fn socket(&self) -> LoopbackSocket {
        let mailbox = Rc::new(Mailbox::default());
        self.members.borrow_mut().push(mailbox.clone());
        LoopbackSocket {
            hub: self.clone(),
            mailbox,
        }
    }
}

pub struct LoopbackSocket {
    hub: LoopbackHub,
    mailbox: Rc<Mailbox>,
}

impl PacketSocket for LoopbackSocket {
    fn try_send(&self, bytes: &[u8]) -> Result<usize> {
        for member in self.hub.members.borrow().iter() {
            if Rc::ptr_eq(member, &self.mailbox) {
                continue;
            }
            member.frames.borrow_mut().push_back(bytes.to_vec());
            member.notify.notify_one();
        }
        Ok(bytes.len())
    }

    fn try_recv(&self, buf: &mut [u8]) -> Result<usize> {
        let frame = self
            .mailbox
            .frames
            .borrow_mut()
            .pop_front()
            .ok_or(ErrorKind::WouldBlock)?;
        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        Ok(len)
    }

    async fn readable(&self) -> Result<()> {
        while self.mailbox.frames.borrow().is_empty() {
            self.mailbox.notify.notified().await;
        }
        Ok(())
    }
}

/// Seeded receive-side packet dropper for fault injection.
///
/// Drops roughly one frame in [`DropInjector::ONE_IN`], following a fixed pseudo-random sequence
/// so a run can be replayed with the same seed.
#[derive(Debug, Clone, Copy)]
pub struct DropInjector {
    state: u64,
}

impl DropInjector {
    pub const ONE_IN: u64 = 10;
    pub const SEED_VAR: &'static str = "WRPTP_DROP_SEED";

    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// An injector seeded from `WRPTP_DROP_SEED`, if set to a number.
    pub fn from_env() -> Option<Self> {
        let seed = std::env::var(Self::SEED_VAR).ok()?;
        match seed.trim().parse() {
            Ok(seed) => Some(Self::new(seed)),
            Err(_) => {
                tracing::warn!("ignoring {}={:?}: not a number", Self::SEED_VAR, seed);
                None
            }
        }
    }

    pub fn should_drop(&mut self) -> bool {
        // Knuth's MMIX constants.
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.state >> 33) % Self::ONE_IN == 0
    }
}

/// Both channels of one port, stamped with the port's clock.
pub struct UdpNet<S: PacketSocket, C: TimeOps> {
    event: S,
    general: S,
    clock: C,
    pending: RefCell<Option<(Vec<u8>, TimeStamp)>>,
    drops: RefCell<Option<DropInjector>>,
}

impl<S: PacketSocket, C: TimeOps> UdpNet<S, C> {
    pub fn new(event: S, general: S, clock: C) -> Self {
        Self {
            event,
            general,
            clock,
            pending: RefCell::new(None),
            drops: RefCell::new(None),
        }
    }

    pub fn with_drops(self, drops: Option<DropInjector>) -> Self {
        Self {
            drops: RefCell::new(drops),
            ..self
        }
    }

    /// Resolve once either channel may have a frame, or one is already buffered.
    pub async fn readable(&self) -> Result<()> {
        if self.pending.borrow().is_some() {
            return Ok(());
        }
        tokio::select! {
            ready = self.event.readable() => ready,
            ready = self.general.readable() => ready,
        }
    }

    fn socket(&self, channel: Channel) -> &S {
        match channel {
            Channel::Event => &self.event,
            Channel::General => &self.general,
        }
    }

    /// Pull one frame off the sockets into `pending`, event channel first.
    fn poll_sockets(&self) -> Result<bool> {
        let mut buf = [0u8; FRAME_CAPACITY];
        for socket in [&self.event, &self.general] {
            loop {
                let len = match socket.try_recv(&mut buf) {
                    Ok(len) => len,
                    Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                    Err(err) => return Err(err),
                };
                let ingress = self.clock.now();
                if let Some(drops) = self.drops.borrow_mut().as_mut() {
                    if drops.should_drop() {
                        tracing::debug!("dropped {} byte frame", len);
                        continue;
                    }
                }
                *self.pending.borrow_mut() = Some((buf[..len].to_vec(), ingress));
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl<S: PacketSocket, C: TimeOps> NetOps for UdpNet<S, C> {
    fn send(&self, frame: &[u8], channel: Channel) -> SendResult {
        match self.socket(channel).try_send(frame) {
            Ok(_) => Ok(self.clock.now()),
            Err(err) => {
                tracing::warn!("send on {:?} channel failed: {}", channel, err);
                Err(SendError::Failed)
            }
        }
    }

    fn recv(&self, buf: &mut [u8]) -> core::result::Result<Received, RecvError> {
        let (frame, timestamp) = self.pending.borrow_mut().take().ok_or(RecvError::Empty)?;
        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        Ok(Received { len, timestamp })
    }

    /// Never waits: the daemon loop does its waiting on [`UdpNet::readable`].
    fn check_packet(&self, _delay_ms: u32) -> PacketCheck {
        if self.pending.borrow().is_some() {
            return PacketCheck::Ready;
        }
        match self.poll_sockets() {
            Ok(true) => PacketCheck::Ready,
            Ok(false) => PacketCheck::Timeout,
            Err(err) => {
                tracing::warn!("receive failed: {}", err);
                PacketCheck::Error
            }
        }
    }
}
