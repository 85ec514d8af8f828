//! Foreign master tracking.
//!
//! Every valid Announce creates or refreshes a [`ForeignMasterRecord`] keyed by the sender's port
//! identity. The table has a fixed capacity. Once full, a new sender overwrites the slots in
//! round-robin order, oldest insertion first.

use heapless::Vec;

use crate::message::AnnounceMessage;
use crate::port::PortIdentity;

pub const FOREIGN_MASTER_CAPACITY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignMasterRecord {
    pub source: PortIdentity,
    /// Header `flagField` of the Announce, carrying the time-properties bits.
    pub flags: u16,
    pub announce: AnnounceMessage,
    /// Extension data decoded from Announce TLVs.
    pub ext_specific: u16,
}

impl ForeignMasterRecord {
    pub fn new(source: PortIdentity, flags: u16, announce: AnnounceMessage) -> Self {
        Self {
            source,
            flags,
            announce,
            ext_specific: 0,
        }
    }
}

pub struct ForeignMasterTable<const N: usize = FOREIGN_MASTER_CAPACITY> {
    records: Vec<ForeignMasterRecord, N>,
    next: usize,
}

impl<const N: usize> ForeignMasterTable<N> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            next: 0,
        }
    }

    /// Insert or refresh a record. Returns `true` if the sender was not known yet.
    pub fn add(&mut self, record: ForeignMasterRecord) -> bool {
        if let Some(existing) = self
            .records
            .iter_mut()
            .find(|r| r.source == record.source)
        {
            *existing = record;
            return false;
        }

        if let Err(record) = self.records.push(record) {
            if N == 0 {
                return false;
            }
            self.records[self.next] = record;
            self.next = (self.next + 1) % N;
        }
        true
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.next = 0;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ForeignMasterRecord] {
        &self.records
    }

    pub fn get(&self, source: &PortIdentity) -> Option<&ForeignMasterRecord> {
        self.records.iter().find(|r| r.source == *source)
    }
}

impl<const N: usize> Default for ForeignMasterTable<N> {
    fn default() -> Self {
        Self::new()
    }
}
