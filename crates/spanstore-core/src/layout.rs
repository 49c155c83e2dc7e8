//! On-medium layout.
//!
//! ```text
//! offset 0   selector      1 byte   0x00 -> slot A is authoritative, 0x01 -> slot B
//! offset 1   slot A        u64      location of an index block
//! offset 9   slot B        u64      location of an index block
//! offset 17  ...           records and index blocks, anywhere past the header
//!
//! record       [u64 span length, including these 8 bytes][payload]
//! index block  [u64 block length = 8 + 20n][(id u64, location u64, type hash u32) * n]
//! ```
//!
//! All integers are big-endian. Index entries are written in ascending id
//! order. A fresh store is the header with both slots pointing at an empty
//! block at offset 17: 25 bytes.

use serde::Serialize;
use spanstore_types::{RecordId, RecordReader, RecordWriter, TypeHash};

use crate::error::{StoreError, StoreResult};
use crate::medium::Medium;

pub const SELECTOR_OFFSET: u64 = 0;
pub const HEADER_LEN: u64 = 17;
/// Width of the length prefix on records and index blocks.
pub const LEN_PREFIX: u64 = 8;
/// Width of one `(id, location, type hash)` entry.
pub const ENTRY_LEN: u64 = 20;
/// Header plus an empty index block.
pub const MIN_STORE_LEN: u64 = HEADER_LEN + LEN_PREFIX;

/// One of the two index-block pointer slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn from_selector(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Slot::A),
            0x01 => Some(Slot::B),
            _ => None,
        }
    }

    pub fn selector(self) -> u8 {
        match self {
            Slot::A => 0x00,
            Slot::B => 0x01,
        }
    }

    /// Where the slot's pointer lives.
    pub fn offset(self) -> u64 {
        match self {
            Slot::A => 1,
            Slot::B => 9,
        }
    }

    pub fn other(self) -> Self {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }
}

/// The decoded 17-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Header {
    pub active: Slot,
    pub a: u64,
    pub b: u64,
}

impl Header {
    pub fn read<M: Medium>(medium: &M) -> StoreResult<Self> {
        let mut raw = [0u8; HEADER_LEN as usize];
        medium.read_exact_at(SELECTOR_OFFSET, &mut raw)?;
        let active = Slot::from_selector(raw[0])
            .ok_or_else(|| StoreError::Corrupt(format!("invalid selector byte {:#04x}", raw[0])))?;
        let mut r = RecordReader::new(&raw[1..]);
        let a = r.get_u64()?;
        let b = r.get_u64()?;
        Ok(Self { active, a, b })
    }

    pub fn pointer(&self, slot: Slot) -> u64 {
        match slot {
            Slot::A => self.a,
            Slot::B => self.b,
        }
    }

    pub fn set_pointer(&mut self, slot: Slot, loc: u64) {
        match slot {
            Slot::A => self.a = loc,
            Slot::B => self.b = loc,
        }
    }

    /// Location of the authoritative index block.
    pub fn active_block(&self) -> u64 {
        self.pointer(self.active)
    }

    /// Location the non-authoritative slot points at.
    pub fn inactive_block(&self) -> u64 {
        self.pointer(self.active.other())
    }
}

/// Write a fresh, empty store.
pub fn write_initial<M: Medium>(medium: &mut M) -> StoreResult<()> {
    let mut w = RecordWriter::with_capacity(MIN_STORE_LEN as usize);
    w.put_u8(Slot::A.selector())
        .put_u64(HEADER_LEN)
        .put_u64(HEADER_LEN)
        .put_u64(LEN_PREFIX);
    medium.write_all_at(SELECTOR_OFFSET, &w.finish())?;
    Ok(())
}

/// One `(id, location, type hash)` row of an index block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    pub id: RecordId,
    pub loc: u64,
    pub type_hash: TypeHash,
}

impl IndexEntry {
    pub fn to_bytes(&self) -> [u8; ENTRY_LEN as usize] {
        let mut out = [0u8; ENTRY_LEN as usize];
        out[0..8].copy_from_slice(&self.id.to_be_bytes());
        out[8..16].copy_from_slice(&self.loc.to_be_bytes());
        out[16..20].copy_from_slice(&self.type_hash.to_be_bytes());
        out
    }
}

/// Total length of a block holding `count` entries.
pub fn block_len(count: usize) -> u64 {
    LEN_PREFIX + ENTRY_LEN * count as u64
}

/// Where the entry at `rank` sits inside the block at `block`.
pub fn entry_offset(block: u64, rank: usize) -> u64 {
    block + LEN_PREFIX + ENTRY_LEN * rank as u64
}

/// Where the location field of the entry at `rank` sits.
pub fn entry_loc_offset(block: u64, rank: usize) -> u64 {
    entry_offset(block, rank) + 8
}

/// Serialize a block. `entries` must already be in id order.
pub fn encode_block(entries: &[IndexEntry]) -> Vec<u8> {
    let len = block_len(entries.len());
    let mut out = Vec::with_capacity(len as usize);
    out.extend_from_slice(&len.to_be_bytes());
    for entry in entries {
        out.extend_from_slice(&entry.to_bytes());
    }
    out
}

/// Read and structurally check the block at `at`.
///
/// Checks that the block lies inside the medium and past the header and
/// that its length is `8 + 20n`. Record-level checks happen when the store
/// rebuilds its indices.
pub fn read_block<M: Medium>(medium: &M, at: u64) -> StoreResult<Vec<IndexEntry>> {
    let medium_len = medium.len()?;
    if at < HEADER_LEN || at.saturating_add(LEN_PREFIX) > medium_len {
        return Err(StoreError::Corrupt(format!(
            "index block at {at} lies outside the medium ({medium_len} bytes)"
        )));
    }
    let len = medium.read_u64_at(at)?;
    if len < LEN_PREFIX || (len - LEN_PREFIX) % ENTRY_LEN != 0 {
        return Err(StoreError::Corrupt(format!(
            "index block at {at} has invalid length {len}"
        )));
    }
    if at.saturating_add(len) > medium_len {
        return Err(StoreError::Corrupt(format!(
            "index block at {at} of {len} bytes runs past the end of the medium"
        )));
    }

    let body_len = usize::try_from(len - LEN_PREFIX)
        .map_err(|_| StoreError::Corrupt(format!("index block at {at} is too large")))?;
    let body = medium.read_vec_at(at + LEN_PREFIX, body_len)?;
    let mut r = RecordReader::new(&body);
    let count = (len - LEN_PREFIX) / ENTRY_LEN;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        entries.push(IndexEntry {
            id: r.get_u64()?,
            loc: r.get_u64()?,
            type_hash: TypeHash::from_raw(r.get_u32()?),
        });
    }
    r.finish()?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::MemoryMedium;

    #[test]
    fn initial_store_is_25_bytes() {
        let mut medium = MemoryMedium::new();
        write_initial(&mut medium).unwrap();
        let bytes = medium.snapshot().unwrap();
        assert_eq!(bytes.len() as u64, MIN_STORE_LEN);
        assert_eq!(bytes[0], 0x00);
        assert_eq!(&bytes[1..9], &17u64.to_be_bytes());
        assert_eq!(&bytes[9..17], &17u64.to_be_bytes());
        assert_eq!(&bytes[17..25], &8u64.to_be_bytes());

        let header = Header::read(&medium).unwrap();
        assert_eq!(header.active, Slot::A);
        assert_eq!(header.active_block(), 17);
        assert!(read_block(&medium, 17).unwrap().is_empty());
    }

    #[test]
    fn slots_and_selectors() {
        assert_eq!(Slot::from_selector(0), Some(Slot::A));
        assert_eq!(Slot::from_selector(1), Some(Slot::B));
        assert_eq!(Slot::from_selector(2), None);
        assert_eq!(Slot::A.offset(), 1);
        assert_eq!(Slot::B.offset(), 9);
        assert_eq!(Slot::A.other(), Slot::B);
    }

    #[test]
    fn bad_selector_is_corrupt() {
        let mut medium = MemoryMedium::new();
        write_initial(&mut medium).unwrap();
        medium.write_all_at(0, &[7]).unwrap();
        assert!(matches!(Header::read(&medium), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn block_roundtrip_preserves_entries() {
        let entries = vec![
            IndexEntry {
                id: 1,
                loc: 40,
                type_hash: TypeHash::from_raw(0xaabbccdd),
            },
            IndexEntry {
                id: 9,
                loc: 25,
                type_hash: TypeHash::from_raw(7),
            },
        ];
        let block = encode_block(&entries);
        assert_eq!(block.len() as u64, block_len(2));
        assert_eq!(&block[..8], &48u64.to_be_bytes());

        let mut medium = MemoryMedium::new();
        write_initial(&mut medium).unwrap();
        medium.write_all_at(100, &block).unwrap();
        assert_eq!(read_block(&medium, 100).unwrap(), entries);
    }

    #[test]
    fn entry_bytes_match_block_layout() {
        let entry = IndexEntry {
            id: 3,
            loc: 17,
            type_hash: TypeHash::from_raw(5),
        };
        let block = encode_block(&[entry]);
        let at = entry_offset(0, 0) as usize;
        assert_eq!(&block[at..at + ENTRY_LEN as usize], &entry.to_bytes());
        let loc_at = entry_loc_offset(0, 0) as usize;
        assert_eq!(&block[loc_at..loc_at + 8], &17u64.to_be_bytes());
    }

    #[test]
    fn block_with_ragged_length_is_corrupt() {
        let mut medium = MemoryMedium::new();
        write_initial(&mut medium).unwrap();
        medium.write_u64_at(17, 8 + 19).unwrap();
        medium.write_all_at(25, &[0; 19]).unwrap();
        let err = read_block(&medium, 17).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(msg) if msg.contains("invalid length")));
    }

    #[test]
    fn block_past_end_is_corrupt() {
        let mut medium = MemoryMedium::new();
        write_initial(&mut medium).unwrap();
        medium.write_u64_at(17, 8 + 20).unwrap();
        assert!(matches!(read_block(&medium, 17), Err(StoreError::Corrupt(_))));
        assert!(matches!(read_block(&medium, 500), Err(StoreError::Corrupt(_))));
        assert!(matches!(read_block(&medium, 3), Err(StoreError::Corrupt(_))));
    }
}
