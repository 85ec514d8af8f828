//! PTP common header and field encodings.
//!
//! All messages start with the same 34-byte header (IEEE 1588 Section 13.3). This module parses
//! and writes that header, and implements the acceptance checks a port applies before handing a
//! message to its state handler.

use crate::clock::ClockIdentity;
use crate::message::SequenceId;
use crate::port::{DomainNumber, PortIdentity, PortNumber};
use crate::result::{Error, ParseError, ProtocolError, Result};
use crate::time::TimeStamp;

pub const HEADER_LEN: usize = 34;
pub const PTP_VERSION: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Sync = 0x0,
    DelayReq = 0x1,
    PdelayReq = 0x2,
    PdelayResp = 0x3,
    FollowUp = 0x8,
    DelayResp = 0x9,
    PdelayRespFollowUp = 0xA,
    Announce = 0xB,
    Signaling = 0xC,
    Management = 0xD,
}

impl MessageType {
    pub fn is_event(&self) -> bool {
        (*self as u8) < 0x8
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessageType::Sync => "Sync",
            MessageType::DelayReq => "DelayReq",
            MessageType::PdelayReq => "PdelayReq",
            MessageType::PdelayResp => "PdelayResp",
            MessageType::FollowUp => "FollowUp",
            MessageType::DelayResp => "DelayResp",
            MessageType::PdelayRespFollowUp => "PdelayRespFollowUp",
            MessageType::Announce => "Announce",
            MessageType::Signaling => "Signaling",
            MessageType::Management => "Management",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ParseError;

    fn try_from(value: u8) -> core::result::Result<Self, Self::Error> {
        match value & 0x0F {
            0x0 => Ok(MessageType::Sync),
            0x1 => Ok(MessageType::DelayReq),
            0x2 => Ok(MessageType::PdelayReq),
            0x3 => Ok(MessageType::PdelayResp),
            0x8 => Ok(MessageType::FollowUp),
            0x9 => Ok(MessageType::DelayResp),
            0xA => Ok(MessageType::PdelayRespFollowUp),
            0xB => Ok(MessageType::Announce),
            0xC => Ok(MessageType::Signaling),
            0xD => Ok(MessageType::Management),
            _ => Err(ParseError::BadMessageType),
        }
    }
}

/// Version 1 compatible control field values (IEEE 1588 Table 42).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlField {
    Sync = 0x00,
    DelayReq = 0x01,
    FollowUp = 0x02,
    DelayResp = 0x03,
    Management = 0x04,
    Other = 0x05,
}

impl From<MessageType> for ControlField {
    fn from(msg_type: MessageType) -> Self {
        match msg_type {
            MessageType::Sync => ControlField::Sync,
            MessageType::DelayReq => ControlField::DelayReq,
            MessageType::FollowUp => ControlField::FollowUp,
            MessageType::DelayResp => ControlField::DelayResp,
            MessageType::Management => ControlField::Management,
            _ => ControlField::Other,
        }
    }
}

/// Header flag bits as a big-endian `u16` over bytes 6 and 7.
pub struct Flags;

impl Flags {
    pub const ALTERNATE_MASTER: u16 = 0x0100;
    pub const TWO_STEP: u16 = 0x0200;
    pub const UNICAST: u16 = 0x0400;

    pub const LEAP_61: u16 = 0x0001;
    pub const LEAP_59: u16 = 0x0002;
    pub const UTC_OFFSET_VALID: u16 = 0x0004;
    pub const PTP_TIMESCALE: u16 = 0x0008;
    pub const TIME_TRACEABLE: u16 = 0x0010;
    pub const FREQUENCY_TRACEABLE: u16 = 0x0020;

    pub const TIME_PROPERTIES_MASK: u16 = 0x003F;
}

/// `correctionField`: nanoseconds scaled by 2^16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CorrectionField(i64);

impl CorrectionField {
    pub const ZERO: CorrectionField = CorrectionField(0);

    pub const fn new(scaled_nanos: i64) -> Self {
        Self(scaled_nanos)
    }

    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos.saturating_mul(1 << 16))
    }

    /// Encode a sub-nanosecond phase (picoseconds) as a correction.
    pub fn from_phase(phase_ps: i32) -> Self {
        Self(phase_ps as i64 * 65536 / 1000)
    }

    pub fn scaled_nanos(&self) -> i64 {
        self.0
    }

    /// Convert into a timestamp, rejecting negative corrections.
    ///
    /// The sub-nanosecond part becomes `phase`, rounded towards zero.
    pub fn to_timestamp(&self) -> core::result::Result<TimeStamp, ProtocolError> {
        if self.0 < 0 {
            return Err(ProtocolError::NegativeCorrection);
        }
        let nanos = self.0 >> 16;
        let phase = ((self.0 & 0xFFFF) * 1000) >> 16;
        Ok(TimeStamp::from_nanos(nanos).with_phase(phase as i32))
    }

    pub fn from_timestamp(ts: TimeStamp) -> Self {
        let picos = ts.to_picos();
        Self((picos * 65536 / 1000).clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }
}

impl core::ops::Add for CorrectionField {
    type Output = CorrectionField;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub transport_specific: u8,
    pub message_type: MessageType,
    pub version: u8,
    pub message_length: u16,
    pub domain_number: DomainNumber,
    pub flags: u16,
    pub correction: CorrectionField,
    pub source_port_identity: PortIdentity,
    pub sequence_id: SequenceId,
    pub control: u8,
    pub log_message_interval: i8,
}

impl MessageHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(ParseError::TooShort.into());
        }

        let message_type = MessageType::try_from(bytes[0])?;
        let message_length = u16::from_be_bytes([bytes[2], bytes[3]]);
        if (message_length as usize) < HEADER_LEN || message_length as usize > bytes.len() {
            return Err(ParseError::BadLength.into());
        }

        let mut clock_identity = [0u8; 8];
        clock_identity.copy_from_slice(&bytes[20..28]);

        Ok(Self {
            transport_specific: bytes[0] >> 4,
            message_type,
            version: bytes[1] & 0x0F,
            message_length,
            domain_number: DomainNumber::new(bytes[4]),
            flags: u16::from_be_bytes([bytes[6], bytes[7]]),
            correction: CorrectionField::new(i64::from_be_bytes([
                bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14],
                bytes[15],
            ])),
            source_port_identity: PortIdentity::new(
                ClockIdentity::new(&clock_identity),
                PortNumber::new(u16::from_be_bytes([bytes[28], bytes[29]])),
            ),
            sequence_id: SequenceId::new(u16::from_be_bytes([bytes[30], bytes[31]])),
            control: bytes[32],
            log_message_interval: bytes[33] as i8,
        })
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < HEADER_LEN {
            return Err(ParseError::BufferTooSmall.into());
        }

        buf[0] = (self.transport_specific << 4) | (self.message_type as u8 & 0x0F);
        buf[1] = self.version & 0x0F;
        buf[2..4].copy_from_slice(&self.message_length.to_be_bytes());
        buf[4] = self.domain_number.as_u8();
        buf[5] = 0;
        buf[6..8].copy_from_slice(&self.flags.to_be_bytes());
        buf[8..16].copy_from_slice(&self.correction.scaled_nanos().to_be_bytes());
        buf[16..20].fill(0);
        buf[20..30].copy_from_slice(&self.source_port_identity.to_bytes());
        buf[30..32].copy_from_slice(&self.sequence_id.to_be_bytes());
        buf[32] = self.control;
        buf[33] = self.log_message_interval as u8;
        Ok(())
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag == flag
    }
}

/// Overwrite `messageLength` of an already encoded message.
pub(crate) fn set_message_length(buf: &mut [u8], len: usize) {
    buf[2..4].copy_from_slice(&(len as u16).to_be_bytes());
}

/// A header that passed the port's acceptance checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedHeader {
    pub header: MessageHeader,
    pub correction: TimeStamp,
    pub from_current_parent: bool,
}

/// Parse a header and apply the acceptance checks of a port.
///
/// Messages from another domain, with the alternate-master flag set, or sent by the port itself
/// are rejected. A negative correction field is rejected as well.
pub fn decode_header(
    bytes: &[u8],
    domain_number: DomainNumber,
    own: &PortIdentity,
    parent: &PortIdentity,
) -> Result<ReceivedHeader> {
    let header = MessageHeader::parse(bytes)?;

    if header.domain_number != domain_number {
        return Err(ProtocolError::WrongDomain.into());
    }
    if header.has_flag(Flags::ALTERNATE_MASTER) {
        return Err(ProtocolError::AlternateMaster.into());
    }
    if header.source_port_identity == *own {
        return Err(ProtocolError::FromSelf.into());
    }
    let correction = header.correction.to_timestamp().map_err(Error::from)?;

    // Port number 0 means no parent has been selected yet.
    let from_current_parent = parent.port_number().as_u16() == 0
        || header.source_port_identity == *parent;

    Ok(ReceivedHeader {
        header,
        correction,
        from_current_parent,
    })
}
