//! The chunk offsets index: one signed 64 bit little-endian entry per slot,
//! absolute file positions for the used slots and -1 for the reserved tail
//! that future appends will claim.
//!
//! The writer cannot know any offset before its chunk record is emitted, so
//! the region is first written fully as sentinels and rewritten in place
//! during finalization. A used entry that still reads -1 therefore marks a
//! file whose writer never finished.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{BloscpackError, Result};

const ENTRY_SIZE: usize = 8;
const UNUSED: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offsets {
    entries: Vec<i64>,
}

impl Offsets {
    /// A fresh table of `nchunks + max_app_chunks` sentinel entries.
    pub fn new(nchunks: i64, max_app_chunks: i64) -> Offsets {
        Offsets {
            entries: vec![UNUSED; (nchunks + max_app_chunks) as usize],
        }
    }

    pub fn encoded_size(total_entries: i64) -> usize {
        total_entries as usize * ENTRY_SIZE
    }

    pub fn parse(buf: &[u8], nchunks: i64, max_app_chunks: i64) -> Result<Offsets> {
        let total = (nchunks + max_app_chunks) as usize;
        if buf.len() != total * ENTRY_SIZE {
            return Err(BloscpackError::MalformedHeader(format!(
                "offsets region must be {} bytes for {} entries, got {}",
                total * ENTRY_SIZE,
                total,
                buf.len()
            )));
        }

        let mut entries = vec![0i64; total];
        LittleEndian::read_i64_into(buf, &mut entries);

        for (index, entry) in entries.iter().take(nchunks as usize).enumerate() {
            if *entry < 0 {
                return Err(BloscpackError::MalformedHeader(format!(
                    "offset for chunk '{}' is unwritten, the file was not finalized",
                    index
                )));
            }
        }
        Ok(Offsets { entries })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.entries.len() * ENTRY_SIZE];
        LittleEndian::write_i64_into(&self.entries, &mut buf);
        buf
    }

    pub fn set(&mut self, index: usize, offset: u64) {
        self.entries[index] = offset as i64;
    }

    /// Absolute position of chunk `index`, `None` for out of range or
    /// still-reserved slots.
    pub fn chunk_offset(&self, index: usize) -> Option<u64> {
        match self.entries.get(index) {
            Some(entry) if *entry >= 0 => Some(*entry as u64),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The used prefix, for display purposes.
    pub fn used(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries
            .iter()
            .take_while(|entry| **entry >= 0)
            .map(|entry| *entry as u64)
    }
}

#[cfg(test)]
mod test_offsets {
    use super::*;

    #[test]
    fn new_is_all_sentinels() {
        let offsets = Offsets::new(3, 30);
        assert_eq!(offsets.len(), 33);
        assert_eq!(offsets.chunk_offset(0), None);
        assert_eq!(offsets.serialize()[..8], (-1i64).to_le_bytes());
    }

    #[test]
    fn roundtrip() {
        let mut offsets = Offsets::new(2, 20);
        offsets.set(0, 208);
        offsets.set(1, 1042);

        let buf = offsets.serialize();
        assert_eq!(buf.len(), Offsets::encoded_size(22));

        let parsed = Offsets::parse(&buf, 2, 20).unwrap();
        assert_eq!(parsed, offsets);
        assert_eq!(parsed.chunk_offset(0), Some(208));
        assert_eq!(parsed.chunk_offset(1), Some(1042));
        assert_eq!(parsed.chunk_offset(2), None);
        assert_eq!(parsed.used().collect::<Vec<_>>(), vec![208, 1042]);
    }

    #[test]
    fn unfinalized_file_is_rejected() {
        let offsets = Offsets::new(2, 20);
        // both used entries still read -1
        assert!(matches!(
            Offsets::parse(&offsets.serialize(), 2, 20),
            Err(BloscpackError::MalformedHeader(_))
        ));
    }

    #[test]
    fn wrong_length_is_rejected() {
        let mut offsets = Offsets::new(1, 0);
        offsets.set(0, 32);
        assert!(Offsets::parse(&offsets.serialize(), 1, 1).is_err());
        assert!(Offsets::parse(&offsets.serialize()[..4], 1, 0).is_err());
    }
}
