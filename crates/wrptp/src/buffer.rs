//! Typestate writer for outgoing messages.
//!
//! Each step fills in one group of header fields and hands over to the next, so a message can
//! only be finalized once type, flags, correction and sequencing are all set:
//!
//! `MessageBuffer::new` → `typed` → `flagged` → `corrected` → `sequenced` → `payload` → `finalize`

use crate::message::SequenceId;
use crate::port::{DomainNumber, PortIdentity};
use crate::result::{ParseError, Result};
use crate::time::LogInterval;
use crate::wire::{ControlField, CorrectionField, MessageType, HEADER_LEN, PTP_VERSION};

/// Large enough for any message this engine sends, including extension TLVs.
pub const FRAME_CAPACITY: usize = 256;

pub struct MessageBuffer<'a> {
    buf: &'a mut [u8],
}

impl<'a> MessageBuffer<'a> {
    pub fn new(
        buf: &'a mut [u8],
        transport_specific: u8,
        domain_number: DomainNumber,
        source_port_identity: PortIdentity,
    ) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(ParseError::BufferTooSmall.into());
        }

        buf[..HEADER_LEN].fill(0);
        buf[0] = (transport_specific & 0x0F) << 4;
        buf[1] = PTP_VERSION;
        buf[4] = domain_number.as_u8();
        buf[20..30].copy_from_slice(&source_port_identity.to_bytes());

        Ok(Self { buf })
    }

    pub fn typed(self, msg_type: MessageType, control: ControlField) -> TypedBuffer<'a> {
        self.buf[0] = (self.buf[0] & 0xF0) | (msg_type as u8 & 0x0F);
        self.buf[32] = control as u8;
        TypedBuffer { buf: self.buf }
    }
}

pub struct TypedBuffer<'a> {
    buf: &'a mut [u8],
}

impl<'a> TypedBuffer<'a> {
    pub fn flagged(self, flags: u16) -> FlaggedBuffer<'a> {
        self.buf[6..8].copy_from_slice(&flags.to_be_bytes());
        FlaggedBuffer { buf: self.buf }
    }
}

pub struct FlaggedBuffer<'a> {
    buf: &'a mut [u8],
}

impl<'a> FlaggedBuffer<'a> {
    pub fn corrected(self, correction: CorrectionField) -> CorrectedBuffer<'a> {
        self.buf[8..16].copy_from_slice(&correction.scaled_nanos().to_be_bytes());
        CorrectedBuffer { buf: self.buf }
    }
}

pub struct CorrectedBuffer<'a> {
    buf: &'a mut [u8],
}

impl<'a> CorrectedBuffer<'a> {
    pub fn sequenced(
        self,
        sequence_id: SequenceId,
        log_message_interval: LogInterval,
    ) -> SequencedBuffer<'a> {
        self.buf[30..32].copy_from_slice(&sequence_id.to_be_bytes());
        self.buf[33] = log_message_interval.as_i8() as u8;
        SequencedBuffer { buf: self.buf }
    }
}

pub struct SequencedBuffer<'a> {
    buf: &'a mut [u8],
}

impl<'a> SequencedBuffer<'a> {
    pub fn payload(self) -> PayloadBuffer<'a> {
        PayloadBuffer { buf: self.buf }
    }
}

pub struct PayloadBuffer<'a> {
    buf: &'a mut [u8],
}

impl<'a> PayloadBuffer<'a> {
    pub fn buf(&mut self) -> &mut [u8] {
        &mut self.buf[HEADER_LEN..]
    }

    pub fn finalize(self, payload_len: usize) -> Result<FinalizedBuffer<'a>> {
        let total_len = HEADER_LEN + payload_len;
        if total_len > self.buf.len() || total_len > u16::MAX as usize {
            return Err(ParseError::BufferTooSmall.into());
        }
        self.buf[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());

        Ok(FinalizedBuffer {
            buf: &mut self.buf[..total_len],
        })
    }
}

pub struct FinalizedBuffer<'a> {
    buf: &'a mut [u8],
}

impl FinalizedBuffer<'_> {
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl AsRef<[u8]> for FinalizedBuffer<'_> {
    fn as_ref(&self) -> &[u8] {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::clock::ClockIdentity;
    use crate::port::PortNumber;

    fn source() -> PortIdentity {
        PortIdentity::new(ClockIdentity::new(&[0xAA; 8]), PortNumber::new(3))
    }

    #[test]
    fn buffer_integrity_delay_req() {
        let mut storage = [0xFFu8; FRAME_CAPACITY];
        let mut payload = MessageBuffer::new(&mut storage, 0, DomainNumber::new(7), source())
            .unwrap()
            .typed(MessageType::DelayReq, ControlField::DelayReq)
            .flagged(0)
            .corrected(CorrectionField::ZERO)
            .sequenced(SequenceId::new(13), LogInterval::UNSPECIFIED)
            .payload();
        payload.buf()[..10].fill(0);
        let wire = payload.finalize(10).unwrap();
        let bytes = wire.as_ref();

        assert_eq!(bytes.len(), 44);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), 44);
        assert_eq!(bytes[0] & 0x0F, 0x01);
        assert_eq!(bytes[1], 0x02);
        assert_eq!(bytes[4], 7);
        assert_eq!(bytes[5], 0);
        assert_eq!(&bytes[16..20], &[0, 0, 0, 0]);
        assert_eq!(bytes[32], 0x01);
        assert_eq!(bytes[33], 0x7F);
    }

    #[test]
    fn buffer_rejects_payload_beyond_capacity() {
        let mut storage = [0u8; 40];
        let payload = MessageBuffer::new(&mut storage, 0, DomainNumber::new(0), source())
            .unwrap()
            .typed(MessageType::Sync, ControlField::Sync)
            .flagged(0)
            .corrected(CorrectionField::ZERO)
            .sequenced(SequenceId::new(1), LogInterval::new(0))
            .payload();

        assert!(payload.finalize(10).is_err());
    }
}
