//! High-Accuracy (L1Sync) extension hooks.
//!
//! Only the L1Sync negotiation visible to the port is implemented: the state enum, parsing of
//! the peer's L1Sync TLV from Signaling messages and the extension deadline. Locking the
//! physical layer is left to the host.

use crate::extension::{Extension, ExtensionResult};
use crate::message::SignalingMessage;
use crate::port::PortInstance;

pub const TLV_TYPE_L1_SYNC: u16 = 0x8001;
/// L1Sync TLV value length: configuration and active bitmasks.
pub const L1_SYNC_TLV_LEN: u16 = 2;
/// The extension has no periodic work of its own yet.
pub const HA_TIMEOUT_MS: u32 = 60_000;

/// Bits of the L1Sync configured and active bitmasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct L1SyncBits(pub u8);

impl L1SyncBits {
    pub const TX_COHERENT: u8 = 0x01;
    pub const RX_COHERENT: u8 = 0x02;
    pub const CONGRUENT: u8 = 0x04;

    pub fn tx_coherent(&self) -> bool {
        self.0 & Self::TX_COHERENT != 0
    }

    pub fn rx_coherent(&self) -> bool {
        self.0 & Self::RX_COHERENT != 0
    }

    pub fn congruent(&self) -> bool {
        self.0 & Self::CONGRUENT != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum L1SyncState {
    Disabled = 1,
    Idle,
    LinkAlive,
    ConfigMatch,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L1SyncPeer {
    pub configured: L1SyncBits,
    pub active: L1SyncBits,
}

pub struct HighAccuracy {
    enabled: bool,
    state: L1SyncState,
    configured: L1SyncBits,
    active: L1SyncBits,
    peer: Option<L1SyncPeer>,
}

impl HighAccuracy {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            state: L1SyncState::Disabled,
            configured: L1SyncBits(L1SyncBits::TX_COHERENT | L1SyncBits::CONGRUENT),
            active: L1SyncBits(L1SyncBits::TX_COHERENT),
            peer: None,
        }
    }

    pub fn state(&self) -> L1SyncState {
        self.state
    }

    pub fn peer(&self) -> Option<L1SyncPeer> {
        self.peer
    }

    /// The L1Sync TLV announcing the local configuration.
    pub fn l1sync_tlv(&self) -> [u8; 6] {
        let mut tlv = [0u8; 6];
        tlv[0..2].copy_from_slice(&TLV_TYPE_L1_SYNC.to_be_bytes());
        tlv[2..4].copy_from_slice(&L1_SYNC_TLV_LEN.to_be_bytes());
        tlv[4] = self.configured.0;
        tlv[5] = self.active.0;
        tlv
    }

    fn advance(&mut self, peer: L1SyncPeer) {
        self.peer = Some(peer);
        if self.state == L1SyncState::Idle {
            self.state = L1SyncState::LinkAlive;
        }
        if self.state == L1SyncState::LinkAlive && peer.configured == self.configured {
            self.state = L1SyncState::ConfigMatch;
        }
    }
}

/// Find the L1Sync TLV in a Signaling TLV list.
fn find_l1sync(mut tlvs: &[u8]) -> Option<L1SyncPeer> {
    while tlvs.len() >= 4 {
        let tlv_type = u16::from_be_bytes([tlvs[0], tlvs[1]]);
        let len = u16::from_be_bytes([tlvs[2], tlvs[3]]) as usize;
        let value = tlvs.get(4..4 + len)?;

        if tlv_type == TLV_TYPE_L1_SYNC {
            if len != L1_SYNC_TLV_LEN as usize {
                return None;
            }
            return Some(L1SyncPeer {
                configured: L1SyncBits(value[0]),
                active: L1SyncBits(value[1]),
            });
        }
        tlvs = &tlvs[4 + len..];
    }
    None
}

impl Extension for HighAccuracy {
    fn init(&mut self, _port: &mut PortInstance) -> ExtensionResult<()> {
        self.peer = None;
        self.state = if self.enabled {
            L1SyncState::Idle
        } else {
            L1SyncState::Disabled
        };
        Ok(())
    }

    fn handle_signaling(
        &mut self,
        _port: &mut PortInstance,
        msg: &SignalingMessage<'_>,
    ) -> ExtensionResult<()> {
        if self.state == L1SyncState::Disabled {
            return Ok(());
        }
        if let Some(peer) = find_l1sync(msg.tlvs) {
            self.advance(peer);
        }
        Ok(())
    }

    fn calc_timeout(&self, _port: &PortInstance) -> Option<u32> {
        Some(HA_TIMEOUT_MS)
    }
}
