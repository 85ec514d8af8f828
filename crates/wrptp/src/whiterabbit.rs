//! White Rabbit extension hooks.
//!
//! The WR link setup handshake and the WR servo run outside the port. This module covers the
//! parts the port sees: the node mode derived from the port role, the WR TLV carried on
//! Announce, the parent's capabilities, the hand-over between SLAVE and UNCALIBRATED while a
//! handshake is pending, and the capture of T1..T6 once WR mode is on.

use crate::datasets::ClockContext;
use crate::extension::{Extension, ExtensionResult, HookFlow};
use crate::foreign::ForeignMasterRecord;
use crate::message::Message;
use crate::port::PortInstance;
use crate::portstate::PortState;
use crate::profile::{DelayMechanism, PortRole};
use crate::time::TimeStamp;
use crate::wire::{CorrectionField, MessageType};

pub const TLV_TYPE_ORG_EXTENSION: u16 = 0x0003;
pub const WR_TLV_ORGANIZATION_ID: u32 = 0x08_00_30;
pub const WR_TLV_MAGIC_NUMBER: u16 = 0xDEAD;
pub const WR_TLV_WR_VERSION_NUMBER: u8 = 0x01;
pub const ANN_SUFIX: u16 = 0x2000;
/// Value length of the Announce WR TLV.
pub const WR_ANNOUNCE_TLV_DATA_LEN: u16 = 10;
/// Whole TLV including its type and length fields.
pub const WR_ANNOUNCE_TLV_LEN: usize = 4 + WR_ANNOUNCE_TLV_DATA_LEN as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum WrMode {
    #[default]
    NonWr = 0,
    MasterOnly = 1,
    SlaveOnly = 2,
    MasterAndSlave = 3,
}

impl WrMode {
    pub fn from_bits(bits: u16) -> Self {
        match bits & WrFlags::NODE_MODE {
            1 => WrMode::MasterOnly,
            2 => WrMode::SlaveOnly,
            3 => WrMode::MasterAndSlave,
            _ => WrMode::NonWr,
        }
    }

    pub fn can_master(&self) -> bool {
        (*self as u8) & (WrMode::MasterOnly as u8) != 0
    }

    pub fn can_slave(&self) -> bool {
        (*self as u8) & (WrMode::SlaveOnly as u8) != 0
    }
}

impl From<PortRole> for WrMode {
    fn from(role: PortRole) -> Self {
        match role {
            PortRole::Master => WrMode::MasterOnly,
            PortRole::Slave => WrMode::SlaveOnly,
            PortRole::Auto => WrMode::MasterAndSlave,
        }
    }
}

/// Bits of `wrFlags` in the Announce TLV.
pub struct WrFlags;

impl WrFlags {
    pub const NODE_MODE: u16 = 0x0003;
    pub const CALIBRATED: u16 = 0x0004;
    pub const WR_MODE_ON: u16 = 0x0008;
}

/// WR capabilities the parent advertised on its Announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WrParent {
    pub config: WrMode,
    pub mode_on: bool,
    pub calibrated: bool,
}

impl WrParent {
    pub fn from_flags(flags: u16) -> Self {
        Self {
            config: WrMode::from_bits(flags),
            mode_on: flags & WrFlags::WR_MODE_ON != 0,
            calibrated: flags & WrFlags::CALIBRATED != 0,
        }
    }

    pub fn is_wr_node(&self) -> bool {
        self.config != WrMode::NonWr
    }
}

/// Timestamps handed to the WR servo instead of the standard one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WrCapture {
    pub t1: TimeStamp,
    pub t2: TimeStamp,
    pub t3: TimeStamp,
    pub t4: TimeStamp,
    pub t5: TimeStamp,
    pub t6: TimeStamp,
    pub delay_correction: TimeStamp,
}

pub struct WhiteRabbit {
    /// `None` keeps the node mode derived from the port role.
    forced: Option<WrMode>,
    config: WrMode,
    mode_on: bool,
    calibrated: bool,
    parent: WrParent,
    handshake_needed: bool,
    restart_requested: bool,
    capture: WrCapture,
}

impl WhiteRabbit {
    pub fn new(calibrated: bool) -> Self {
        Self {
            forced: None,
            config: WrMode::NonWr,
            mode_on: false,
            calibrated,
            parent: WrParent::default(),
            handshake_needed: false,
            restart_requested: false,
            capture: WrCapture::default(),
        }
    }

    /// Disable WR on this port regardless of its role.
    pub fn non_wr() -> Self {
        Self {
            forced: Some(WrMode::NonWr),
            ..Self::new(false)
        }
    }

    pub fn config(&self) -> WrMode {
        self.config
    }

    pub fn parent(&self) -> &WrParent {
        &self.parent
    }

    pub fn is_mode_on(&self) -> bool {
        self.mode_on
    }

    /// Set when the link setup handshake completes or is torn down.
    pub fn set_mode_on(&mut self, on: bool) {
        self.mode_on = on;
        if on {
            self.handshake_needed = false;
        }
    }

    pub fn set_calibrated(&mut self, calibrated: bool) {
        self.calibrated = calibrated;
    }

    pub fn handshake_needed(&self) -> bool {
        self.handshake_needed
    }

    /// Ask the port to go back through INITIALIZING on its next slave pass.
    pub fn request_restart(&mut self) {
        self.restart_requested = true;
    }

    pub fn capture(&self) -> &WrCapture {
        &self.capture
    }

    pub fn flags(&self) -> u16 {
        let mut flags = self.config as u16;
        if self.calibrated {
            flags |= WrFlags::CALIBRATED;
        }
        if self.mode_on {
            flags |= WrFlags::WR_MODE_ON;
        }
        flags
    }

    fn rewrite_correction(msg: &mut Message<'_>, ingress: TimeStamp) {
        msg.header.correction = CorrectionField::from_phase(ingress.phase());
    }
}

/// Parse the WR Announce TLV and return its `wrFlags`.
pub fn parse_announce_tlv(tlvs: &[u8]) -> Option<u16> {
    let tlv = tlvs.get(..WR_ANNOUNCE_TLV_LEN)?;
    let field = |at: usize| u16::from_be_bytes([tlv[at], tlv[at + 1]]);
    let oui = u32::from_be_bytes([0, tlv[4], tlv[5], tlv[6]]);

    let matches = field(0) == TLV_TYPE_ORG_EXTENSION
        && field(2) == WR_ANNOUNCE_TLV_DATA_LEN
        && oui == WR_TLV_ORGANIZATION_ID
        && field(7) == WR_TLV_MAGIC_NUMBER
        && tlv[9] == WR_TLV_WR_VERSION_NUMBER
        && field(10) == ANN_SUFIX;
    matches.then(|| field(12))
}

impl Extension for WhiteRabbit {
    fn open(&mut self, _clock: &ClockContext, port: &mut PortInstance) -> ExtensionResult<()> {
        self.config = self
            .forced
            .unwrap_or_else(|| WrMode::from(port.profile().role));
        Ok(())
    }

    fn init(&mut self, _port: &mut PortInstance) -> ExtensionResult<()> {
        self.mode_on = false;
        self.parent = WrParent::default();
        self.handshake_needed = false;
        Ok(())
    }

    fn listening(&mut self, _port: &mut PortInstance) -> ExtensionResult<()> {
        self.mode_on = false;
        Ok(())
    }

    fn master_msg(
        &mut self,
        _port: &mut PortInstance,
        msg: &mut Message<'_>,
        ingress: TimeStamp,
    ) -> ExtensionResult<Option<MessageType>> {
        let msg_type = msg.header.message_type;
        if matches!(msg_type, MessageType::DelayReq | MessageType::PdelayReq) {
            Self::rewrite_correction(msg, ingress);
        }
        Ok(Some(msg_type))
    }

    fn new_slave(&mut self, _port: &mut PortInstance) -> ExtensionResult<()> {
        self.capture = WrCapture::default();
        Ok(())
    }

    fn s1(
        &mut self,
        _clock: &ClockContext,
        _port: &mut PortInstance,
        erbest: &ForeignMasterRecord,
    ) -> ExtensionResult<()> {
        self.parent = WrParent::from_flags(erbest.ext_specific);
        Ok(())
    }

    fn handle_announce(&mut self, _port: &mut PortInstance) -> ExtensionResult<()> {
        if self.config.can_slave()
            && self.parent.config.can_master()
            && (!self.mode_on || !self.parent.mode_on)
        {
            self.handshake_needed = true;
        }
        Ok(())
    }

    fn handle_followup(&mut self, port: &mut PortInstance) -> ExtensionResult<HookFlow> {
        if !self.mode_on {
            return Ok(HookFlow::Continue);
        }
        let exchange = port.exchange();
        self.capture.t1 = exchange.t1().with_phase(0);
        self.capture.t2 = exchange.t2();
        Ok(HookFlow::Done)
    }

    fn handle_resp(&mut self, port: &mut PortInstance) -> ExtensionResult<HookFlow> {
        if !self.mode_on {
            return Ok(HookFlow::Continue);
        }
        let exchange = port.exchange();
        self.capture.t3 = exchange.t3();
        self.capture.t4 = exchange.t4();
        self.capture.delay_correction = exchange.delay_correction();
        Ok(HookFlow::Done)
    }

    fn handle_preq(
        &mut self,
        _port: &mut PortInstance,
        msg: &mut Message<'_>,
        ingress: TimeStamp,
    ) -> ExtensionResult<HookFlow> {
        Self::rewrite_correction(msg, ingress);
        Ok(HookFlow::Continue)
    }

    fn handle_presp(&mut self, port: &mut PortInstance) -> ExtensionResult<HookFlow> {
        if !self.mode_on || port.profile().delay_mechanism != DelayMechanism::P2P {
            return Ok(HookFlow::Continue);
        }
        let exchange = port.exchange();
        self.capture.t3 = exchange.t3();
        self.capture.t4 = exchange.t4();
        self.capture.t5 = exchange.t5();
        self.capture.t6 = exchange.t6();
        self.capture.delay_correction = exchange.peer_correction();
        Ok(HookFlow::Done)
    }

    fn pack_announce(&mut self, _port: &PortInstance, buf: &mut [u8]) -> usize {
        if matches!(self.config, WrMode::NonWr | WrMode::SlaveOnly) {
            return 0;
        }
        let Some(tlv) = buf.get_mut(..WR_ANNOUNCE_TLV_LEN) else {
            return 0;
        };

        tlv[0..2].copy_from_slice(&TLV_TYPE_ORG_EXTENSION.to_be_bytes());
        tlv[2..4].copy_from_slice(&WR_ANNOUNCE_TLV_DATA_LEN.to_be_bytes());
        tlv[4..7].copy_from_slice(&WR_TLV_ORGANIZATION_ID.to_be_bytes()[1..]);
        tlv[7..9].copy_from_slice(&WR_TLV_MAGIC_NUMBER.to_be_bytes());
        tlv[9] = WR_TLV_WR_VERSION_NUMBER;
        tlv[10..12].copy_from_slice(&ANN_SUFIX.to_be_bytes());
        tlv[12..14].copy_from_slice(&self.flags().to_be_bytes());
        WR_ANNOUNCE_TLV_LEN
    }

    fn unpack_announce(&mut self, _port: &mut PortInstance, tlvs: &[u8]) -> u16 {
        parse_announce_tlv(tlvs).unwrap_or(0)
    }

    fn execute_slave(&mut self, port: &mut PortInstance) -> ExtensionResult<HookFlow> {
        if self.restart_requested {
            self.restart_requested = false;
            return Ok(HookFlow::Transition(PortState::Initializing));
        }

        match port.state() {
            PortState::Slave if self.handshake_needed && !self.mode_on => {
                Ok(HookFlow::Transition(PortState::Uncalibrated))
            }
            PortState::Uncalibrated if self.mode_on => {
                Ok(HookFlow::Transition(PortState::Slave))
            }
            _ => Ok(HookFlow::Continue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_support::{fake_clock, fake_port_instance};

    fn opened(role: PortRole) -> (WhiteRabbit, PortInstance) {
        let mut port = fake_port_instance();
        port.profile.role = role;
        let mut wr = WhiteRabbit::new(true);
        wr.open(&fake_clock(), &mut port).unwrap();
        wr.init(&mut port).unwrap();
        (wr, port)
    }

    #[test]
    fn whiterabbit_mode_follows_role() {
        assert_eq!(opened(PortRole::Master).0.config(), WrMode::MasterOnly);
        assert_eq!(opened(PortRole::Slave).0.config(), WrMode::SlaveOnly);
        assert_eq!(opened(PortRole::Auto).0.config(), WrMode::MasterAndSlave);
    }

    #[test]
    fn whiterabbit_announce_tlv_layout() {
        let (mut wr, port) = opened(PortRole::Master);
        let mut buf = [0u8; 32];

        assert_eq!(wr.pack_announce(&port, &mut buf), WR_ANNOUNCE_TLV_LEN);
        assert_eq!(
            &buf[..14],
            &[0x00, 0x03, 0x00, 0x0A, 0x08, 0x00, 0x30, 0xDE, 0xAD, 0x01, 0x20, 0x00, 0x00, 0x05]
        );
        assert_eq!(parse_announce_tlv(&buf), Some(0x0005));
    }

    #[test]
    fn whiterabbit_slave_only_sends_no_tlv() {
        let (mut wr, port) = opened(PortRole::Slave);
        let mut buf = [0u8; 32];

        assert_eq!(wr.pack_announce(&port, &mut buf), 0);
        assert_eq!(wr.pack_announce(&port, &mut [0u8; 4]), 0);
    }

    #[test]
    fn whiterabbit_rejects_foreign_tlv() {
        let mut tlv = [
            0x00, 0x03, 0x00, 0x0A, 0x08, 0x00, 0x30, 0xDE, 0xAD, 0x01, 0x20, 0x00, 0x00, 0x0F,
        ];
        assert_eq!(parse_announce_tlv(&tlv), Some(0x000F));

        tlv[7] = 0xBE;
        assert_eq!(parse_announce_tlv(&tlv), None);
        assert_eq!(parse_announce_tlv(&tlv[..10]), None);
    }

    #[test]
    fn whiterabbit_handshake_moves_slave_through_uncalibrated() {
        let (mut wr, mut port) = opened(PortRole::Auto);
        let mut parent = crate::test_support::announce_from(1, 100);
        parent.ext_specific = WrMode::MasterOnly as u16 | WrFlags::CALIBRATED;

        wr.s1(&fake_clock(), &mut port, &parent).unwrap();
        assert!(wr.parent().is_wr_node());
        wr.handle_announce(&mut port).unwrap();
        assert!(wr.handshake_needed());

        port.state = PortState::Slave;
        assert_eq!(
            wr.execute_slave(&mut port).unwrap(),
            HookFlow::Transition(PortState::Uncalibrated)
        );

        port.state = PortState::Uncalibrated;
        assert_eq!(wr.execute_slave(&mut port).unwrap(), HookFlow::Continue);
        wr.set_mode_on(true);
        assert_eq!(
            wr.execute_slave(&mut port).unwrap(),
            HookFlow::Transition(PortState::Slave)
        );
    }

    #[test]
    fn whiterabbit_restart_request_reinitializes_once() {
        let (mut wr, mut port) = opened(PortRole::Slave);
        port.state = PortState::Slave;
        wr.request_restart();

        assert_eq!(
            wr.execute_slave(&mut port).unwrap(),
            HookFlow::Transition(PortState::Initializing)
        );
        assert_eq!(wr.execute_slave(&mut port).unwrap(), HookFlow::Continue);
    }

    #[test]
    fn whiterabbit_captures_followup_only_in_wr_mode() {
        let (mut wr, mut port) = opened(PortRole::Slave);
        port.exchange.t1 = TimeStamp::from_parts(10, 5, 300);
        port.exchange.t2 = TimeStamp::new(10, 900);

        assert_eq!(wr.handle_followup(&mut port).unwrap(), HookFlow::Continue);

        wr.set_mode_on(true);
        assert_eq!(wr.handle_followup(&mut port).unwrap(), HookFlow::Done);
        assert_eq!(wr.capture().t1, TimeStamp::new(10, 5));
        assert_eq!(wr.capture().t2, TimeStamp::new(10, 900));
    }
}
