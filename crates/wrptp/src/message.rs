//! Message bodies and whole-message encode/decode.
//!
//! Body layouts follow IEEE 1588 Section 13. Every body starts at byte 34, right after the common
//! header. Decoding validates lengths before reading a field. Encoding goes through the typestate
//! writer in [`crate::buffer`].

use crate::buffer::MessageBuffer;
use crate::clock::{ClockIdentity, ClockQuality, TimeSource};
use crate::port::PortIdentity;
use crate::result::{ParseError, Result};
use crate::time::{LogInterval, TimeStamp};
use crate::wire::{ControlField, MessageHeader, MessageType, HEADER_LEN};

pub const SYNC_LEN: usize = 44;
pub const DELAY_REQ_LEN: usize = 44;
pub const FOLLOW_UP_LEN: usize = 44;
pub const DELAY_RESP_LEN: usize = 54;
pub const PDELAY_REQ_LEN: usize = 54;
pub const PDELAY_RESP_LEN: usize = 54;
pub const PDELAY_RESP_FOLLOW_UP_LEN: usize = 54;
pub const ANNOUNCE_LEN: usize = 64;
pub const SIGNALING_MIN_LEN: usize = 44;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct SequenceId(u16);

impl SequenceId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    pub fn to_be_bytes(&self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

impl From<u16> for SequenceId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMessage {
    pub origin_timestamp: TimeStamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRequestMessage {
    pub origin_timestamp: TimeStamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowUpMessage {
    pub precise_origin_timestamp: TimeStamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayResponseMessage {
    pub receive_timestamp: TimeStamp,
    pub requesting_port_identity: PortIdentity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdelayRequestMessage {
    pub origin_timestamp: TimeStamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdelayResponseMessage {
    pub request_receipt_timestamp: TimeStamp,
    pub requesting_port_identity: PortIdentity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdelayResponseFollowUpMessage {
    pub response_origin_timestamp: TimeStamp,
    pub requesting_port_identity: PortIdentity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnounceMessage {
    pub origin_timestamp: TimeStamp,
    pub current_utc_offset: i16,
    pub grandmaster_priority1: u8,
    pub grandmaster_clock_quality: ClockQuality,
    pub grandmaster_priority2: u8,
    pub grandmaster_identity: ClockIdentity,
    pub steps_removed: u16,
    pub time_source: TimeSource,
}

/// Signaling message. The TLVs are left for extensions to interpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalingMessage<'a> {
    pub target_port_identity: PortIdentity,
    pub tlvs: &'a [u8],
}

/// Management message, carried opaquely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagementMessage<'a> {
    pub payload: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageBody<'a> {
    Sync(SyncMessage),
    DelayReq(DelayRequestMessage),
    PdelayReq(PdelayRequestMessage),
    PdelayResp(PdelayResponseMessage),
    FollowUp(FollowUpMessage),
    DelayResp(DelayResponseMessage),
    PdelayRespFollowUp(PdelayResponseFollowUpMessage),
    Announce(AnnounceMessage),
    Signaling(SignalingMessage<'a>),
    Management(ManagementMessage<'a>),
}

impl MessageBody<'_> {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageBody::Sync(_) => MessageType::Sync,
            MessageBody::DelayReq(_) => MessageType::DelayReq,
            MessageBody::PdelayReq(_) => MessageType::PdelayReq,
            MessageBody::PdelayResp(_) => MessageType::PdelayResp,
            MessageBody::FollowUp(_) => MessageType::FollowUp,
            MessageBody::DelayResp(_) => MessageType::DelayResp,
            MessageBody::PdelayRespFollowUp(_) => MessageType::PdelayRespFollowUp,
            MessageBody::Announce(_) => MessageType::Announce,
            MessageBody::Signaling(_) => MessageType::Signaling,
            MessageBody::Management(_) => MessageType::Management,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<'a> {
    pub header: MessageHeader,
    pub body: MessageBody<'a>,
}

impl<'a> Message<'a> {
    /// Decode a complete message. Bytes past `messageLength` are ignored.
    pub fn decode(bytes: &'a [u8]) -> Result<Self> {
        let header = MessageHeader::parse(bytes)?;
        let body = decode_body(header.message_type, &bytes[..header.message_length as usize])?;
        Ok(Self { header, body })
    }

    /// Encode into `buf` and return the number of bytes written.
    ///
    /// `messageLength`, `versionPTP` and `controlField` are derived from the body. The rest of
    /// the header is taken from `self.header`.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let msg_type = self.body.message_type();
        let mut payload = MessageBuffer::new(
            buf,
            self.header.transport_specific,
            self.header.domain_number,
            self.header.source_port_identity,
        )?
        .typed(msg_type, ControlField::from(msg_type))
        .flagged(self.header.flags)
        .corrected(self.header.correction)
        .sequenced(
            self.header.sequence_id,
            LogInterval::new(self.header.log_message_interval),
        )
        .payload();

        let body_len = encode_body(&self.body, payload.buf())?;
        let finalized = payload.finalize(body_len)?;
        Ok(finalized.len())
    }
}

fn need(bytes: &[u8], len: usize) -> Result<()> {
    if bytes.len() < len {
        Err(ParseError::TooShort.into())
    } else {
        Ok(())
    }
}

fn read_timestamp(bytes: &[u8], at: usize) -> Result<TimeStamp> {
    let mut raw = [0u8; 10];
    raw.copy_from_slice(&bytes[at..at + 10]);
    Ok(TimeStamp::from_wire(&raw)?)
}

fn read_port_identity(bytes: &[u8], at: usize) -> PortIdentity {
    let mut raw = [0u8; 10];
    raw.copy_from_slice(&bytes[at..at + 10]);
    PortIdentity::from_bytes(&raw)
}

fn write_timestamp(buf: &mut [u8], at: usize, ts: TimeStamp) -> Result<()> {
    buf[at..at + 10].copy_from_slice(&ts.to_wire()?);
    Ok(())
}

fn decode_body(msg_type: MessageType, bytes: &[u8]) -> Result<MessageBody<'_>> {
    let body = match msg_type {
        MessageType::Sync => {
            need(bytes, SYNC_LEN)?;
            MessageBody::Sync(SyncMessage {
                origin_timestamp: read_timestamp(bytes, 34)?,
            })
        }
        MessageType::DelayReq => {
            need(bytes, DELAY_REQ_LEN)?;
            MessageBody::DelayReq(DelayRequestMessage {
                origin_timestamp: read_timestamp(bytes, 34)?,
            })
        }
        MessageType::FollowUp => {
            need(bytes, FOLLOW_UP_LEN)?;
            MessageBody::FollowUp(FollowUpMessage {
                precise_origin_timestamp: read_timestamp(bytes, 34)?,
            })
        }
        MessageType::DelayResp => {
            need(bytes, DELAY_RESP_LEN)?;
            MessageBody::DelayResp(DelayResponseMessage {
                receive_timestamp: read_timestamp(bytes, 34)?,
                requesting_port_identity: read_port_identity(bytes, 44),
            })
        }
        MessageType::PdelayReq => {
            need(bytes, PDELAY_REQ_LEN)?;
            MessageBody::PdelayReq(PdelayRequestMessage {
                origin_timestamp: read_timestamp(bytes, 34)?,
            })
        }
        MessageType::PdelayResp => {
            need(bytes, PDELAY_RESP_LEN)?;
            MessageBody::PdelayResp(PdelayResponseMessage {
                request_receipt_timestamp: read_timestamp(bytes, 34)?,
                requesting_port_identity: read_port_identity(bytes, 44),
            })
        }
        MessageType::PdelayRespFollowUp => {
            need(bytes, PDELAY_RESP_FOLLOW_UP_LEN)?;
            MessageBody::PdelayRespFollowUp(PdelayResponseFollowUpMessage {
                response_origin_timestamp: read_timestamp(bytes, 34)?,
                requesting_port_identity: read_port_identity(bytes, 44),
            })
        }
        MessageType::Announce => {
            need(bytes, ANNOUNCE_LEN)?;
            let mut quality = [0u8; 4];
            quality.copy_from_slice(&bytes[48..52]);
            let mut grandmaster = [0u8; 8];
            grandmaster.copy_from_slice(&bytes[53..61]);

            MessageBody::Announce(AnnounceMessage {
                origin_timestamp: read_timestamp(bytes, 34)?,
                current_utc_offset: i16::from_be_bytes([bytes[44], bytes[45]]),
                grandmaster_priority1: bytes[47],
                grandmaster_clock_quality: ClockQuality::from_wire(&quality),
                grandmaster_priority2: bytes[52],
                grandmaster_identity: ClockIdentity::new(&grandmaster),
                steps_removed: u16::from_be_bytes([bytes[61], bytes[62]]),
                time_source: TimeSource(bytes[63]),
            })
        }
        MessageType::Signaling => {
            need(bytes, SIGNALING_MIN_LEN)?;
            MessageBody::Signaling(SignalingMessage {
                target_port_identity: read_port_identity(bytes, 34),
                tlvs: &bytes[SIGNALING_MIN_LEN..],
            })
        }
        MessageType::Management => MessageBody::Management(ManagementMessage {
            payload: &bytes[HEADER_LEN..],
        }),
    };
    Ok(body)
}

/// Write the body into `buf` (which starts at byte 34) and return its length.
fn encode_body(body: &MessageBody<'_>, buf: &mut [u8]) -> Result<usize> {
    let at = |offset: usize| offset - HEADER_LEN;
    let body_len = match body {
        MessageBody::Sync(_) => SYNC_LEN,
        MessageBody::DelayReq(_) => DELAY_REQ_LEN,
        MessageBody::FollowUp(_) => FOLLOW_UP_LEN,
        MessageBody::DelayResp(_) => DELAY_RESP_LEN,
        MessageBody::PdelayReq(_) => PDELAY_REQ_LEN,
        MessageBody::PdelayResp(_) => PDELAY_RESP_LEN,
        MessageBody::PdelayRespFollowUp(_) => PDELAY_RESP_FOLLOW_UP_LEN,
        MessageBody::Announce(_) => ANNOUNCE_LEN,
        MessageBody::Signaling(msg) => SIGNALING_MIN_LEN + msg.tlvs.len(),
        MessageBody::Management(msg) => HEADER_LEN + msg.payload.len(),
    } - HEADER_LEN;
    if buf.len() < body_len {
        return Err(ParseError::BufferTooSmall.into());
    }
    buf[..body_len].fill(0);

    match body {
        MessageBody::Sync(msg) => write_timestamp(buf, 0, msg.origin_timestamp)?,
        MessageBody::DelayReq(msg) => write_timestamp(buf, 0, msg.origin_timestamp)?,
        MessageBody::PdelayReq(msg) => write_timestamp(buf, 0, msg.origin_timestamp)?,
        MessageBody::FollowUp(msg) => write_timestamp(buf, 0, msg.precise_origin_timestamp)?,
        MessageBody::DelayResp(msg) => {
            write_timestamp(buf, 0, msg.receive_timestamp)?;
            buf[at(44)..at(54)].copy_from_slice(&msg.requesting_port_identity.to_bytes());
        }
        MessageBody::PdelayResp(msg) => {
            write_timestamp(buf, 0, msg.request_receipt_timestamp)?;
            buf[at(44)..at(54)].copy_from_slice(&msg.requesting_port_identity.to_bytes());
        }
        MessageBody::PdelayRespFollowUp(msg) => {
            write_timestamp(buf, 0, msg.response_origin_timestamp)?;
            buf[at(44)..at(54)].copy_from_slice(&msg.requesting_port_identity.to_bytes());
        }
        MessageBody::Announce(msg) => {
            write_timestamp(buf, 0, msg.origin_timestamp)?;
            buf[at(44)..at(46)].copy_from_slice(&msg.current_utc_offset.to_be_bytes());
            buf[at(47)] = msg.grandmaster_priority1;
            buf[at(48)..at(52)].copy_from_slice(&msg.grandmaster_clock_quality.to_wire());
            buf[at(52)] = msg.grandmaster_priority2;
            buf[at(53)..at(61)].copy_from_slice(msg.grandmaster_identity.as_bytes());
            buf[at(61)..at(63)].copy_from_slice(&msg.steps_removed.to_be_bytes());
            buf[at(63)] = msg.time_source.0;
        }
        MessageBody::Signaling(msg) => {
            buf[..10].copy_from_slice(&msg.target_port_identity.to_bytes());
            buf[10..10 + msg.tlvs.len()].copy_from_slice(msg.tlvs);
        }
        MessageBody::Management(msg) => {
            buf[..msg.payload.len()].copy_from_slice(msg.payload);
        }
    }
    Ok(body_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::port::{DomainNumber, PortNumber};
    use crate::wire::{CorrectionField, Flags};

    fn header(msg_type: MessageType) -> MessageHeader {
        MessageHeader {
            transport_specific: 0,
            message_type: msg_type,
            version: 2,
            message_length: 0,
            domain_number: DomainNumber::new(0),
            flags: 0,
            correction: CorrectionField::ZERO,
            source_port_identity: PortIdentity::new(
                ClockIdentity::new(&[0x10; 8]),
                PortNumber::new(1),
            ),
            sequence_id: SequenceId::new(21),
            control: ControlField::from(msg_type) as u8,
            log_message_interval: 1,
        }
    }

    fn announce() -> AnnounceMessage {
        AnnounceMessage {
            origin_timestamp: TimeStamp::new(1_700_000_000, 5),
            current_utc_offset: 37,
            grandmaster_priority1: 128,
            grandmaster_clock_quality: ClockQuality::new(248, 0xFE, 0xFFFF),
            grandmaster_priority2: 127,
            grandmaster_identity: ClockIdentity::new(&[1, 2, 3, 4, 5, 6, 7, 8]),
            steps_removed: 2,
            time_source: TimeSource::GPS,
        }
    }

    #[test]
    fn message_announce_body_offsets() {
        let msg = Message {
            header: MessageHeader {
                flags: Flags::PTP_TIMESCALE | Flags::UTC_OFFSET_VALID,
                ..header(MessageType::Announce)
            },
            body: MessageBody::Announce(announce()),
        };
        let mut buf = [0u8; 128];
        let len = msg.encode(&mut buf).unwrap();

        assert_eq!(len, ANNOUNCE_LEN);
        assert_eq!(buf[32], 0x05);
        assert_eq!(buf[7], 0x0C);
        assert_eq!(&buf[44..46], &37i16.to_be_bytes());
        assert_eq!(buf[47], 128);
        assert_eq!(&buf[48..52], &[248, 0xFE, 0xFF, 0xFF]);
        assert_eq!(buf[52], 127);
        assert_eq!(&buf[53..61], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&buf[61..63], &[0, 2]);
        assert_eq!(buf[63], 0x20);
    }

    #[test]
    fn message_delay_resp_carries_requester() {
        let requester = PortIdentity::new(ClockIdentity::new(&[0x42; 8]), PortNumber::new(9));
        let msg = Message {
            header: header(MessageType::DelayResp),
            body: MessageBody::DelayResp(DelayResponseMessage {
                receive_timestamp: TimeStamp::new(10, 20),
                requesting_port_identity: requester,
            }),
        };
        let mut buf = [0u8; 128];
        let len = msg.encode(&mut buf).unwrap();

        assert_eq!(len, DELAY_RESP_LEN);
        assert_eq!(buf[32], 0x03);
        assert_eq!(&buf[44..54], &requester.to_bytes());

        let decoded = Message::decode(&buf[..len]).unwrap();
        assert_eq!(decoded.body, msg.body);
    }

    #[test]
    fn message_decode_ignores_bytes_past_length() {
        let msg = Message {
            header: header(MessageType::Sync),
            body: MessageBody::Sync(SyncMessage {
                origin_timestamp: TimeStamp::new(0, 0),
            }),
        };
        let mut buf = [0xEEu8; 60];
        let len = msg.encode(&mut buf).unwrap();
        assert_eq!(len, SYNC_LEN);

        let decoded = Message::decode(&buf).unwrap();
        assert_eq!(decoded.header.message_length as usize, SYNC_LEN);
        assert_eq!(decoded.body, msg.body);
    }

    #[test]
    fn message_decode_rejects_truncated_body() {
        let msg = Message {
            header: header(MessageType::Announce),
            body: MessageBody::Announce(announce()),
        };
        let mut buf = [0u8; 128];
        msg.encode(&mut buf).unwrap();
        buf[2..4].copy_from_slice(&50u16.to_be_bytes());

        assert!(Message::decode(&buf[..50]).is_err());
    }

    #[test]
    fn message_signaling_keeps_tlvs() {
        let tlvs = [0x80, 0x01, 0x00, 0x02, 0x07, 0x03];
        let msg = Message {
            header: header(MessageType::Signaling),
            body: MessageBody::Signaling(SignalingMessage {
                target_port_identity: PortIdentity::new(
                    ClockIdentity::new(&[0xFF; 8]),
                    PortNumber::new(0xFFFF),
                ),
                tlvs: &tlvs,
            }),
        };
        let mut buf = [0u8; 128];
        let len = msg.encode(&mut buf).unwrap();
        assert_eq!(len, 50);

        let decoded = Message::decode(&buf[..len]).unwrap();
        assert_eq!(decoded.body, msg.body);
    }

    #[test]
    fn sequence_id_wraps() {
        assert_eq!(SequenceId::new(u16::MAX).next(), SequenceId::new(0));
    }
}
