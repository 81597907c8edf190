//! Fixed-width header codecs for the container.
//!
//! Both headers are exactly 32 bytes with every multi-byte field stored
//! little-endian, so a header written on any platform is byte identical.

use byteorder::{ByteOrder, LittleEndian};

use crate::checksum::Checksum;
use crate::error::{BloscpackError, Result};
use crate::metadata::MetaCodec;

pub const MAGIC: [u8; 4] = *b"blpk";
pub const FORMAT_VERSION: u8 = 3;
pub const HEADER_LENGTH: usize = 32;
pub const METADATA_HEADER_LENGTH: usize = 32;

/// Sentinel for `chunk_size`/`last_chunk` when chunking does not apply.
pub const CHUNK_SIZE_UNKNOWN: u32 = u32::MAX;
/// Sentinel for `nchunks` while a file is still being written.
pub const NCHUNKS_UNKNOWN: i64 = -1;

/// Default magic for the metadata serialization format.
pub const METADATA_MAGIC_JSON: [u8; 8] = *b"JSON\0\0\0\0";

const OPTION_OFFSETS: u8 = 0b0000_0001;
const OPTION_METADATA: u8 = 0b0000_0010;

/// The 32 byte header at the start of every container.
///
/// | Offset | Size | Field          |
/// | -----: | ---: | -------------- |
/// |      0 |    4 | magic `blpk`   |
/// |      4 |    1 | format_version |
/// |      5 |    1 | options        |
/// |      6 |    1 | checksum id    |
/// |      7 |    1 | typesize       |
/// |      8 |    4 | chunk_size     |
/// |     12 |    4 | last_chunk     |
/// |     16 |    8 | nchunks        |
/// |     24 |    8 | max_app_chunks |
///
/// `options` bit 0 is the offsets flag, bit 1 the metadata flag; the
/// remaining bits are reserved and must be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloscpackHeader {
    pub format_version: u8,
    pub offsets: bool,
    pub metadata: bool,
    pub checksum: Checksum,
    pub typesize: u8,
    pub chunk_size: u32,
    pub last_chunk: u32,
    pub nchunks: i64,
    pub max_app_chunks: i64,
}

impl BloscpackHeader {
    pub fn encode(&self) -> [u8; HEADER_LENGTH] {
        let mut buf = [0u8; HEADER_LENGTH];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = self.format_version;
        buf[5] = (if self.offsets { OPTION_OFFSETS } else { 0 })
            | (if self.metadata { OPTION_METADATA } else { 0 });
        buf[6] = self.checksum.id();
        buf[7] = self.typesize;
        LittleEndian::write_u32(&mut buf[8..12], self.chunk_size);
        LittleEndian::write_u32(&mut buf[12..16], self.last_chunk);
        LittleEndian::write_i64(&mut buf[16..24], self.nchunks);
        LittleEndian::write_i64(&mut buf[24..32], self.max_app_chunks);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<BloscpackHeader> {
        if buf.len() != HEADER_LENGTH {
            return Err(BloscpackError::MalformedHeader(format!(
                "bloscpack header must be {} bytes, got {}",
                HEADER_LENGTH,
                buf.len()
            )));
        }
        if buf[0..4] != MAGIC {
            return Err(BloscpackError::BadMagic);
        }
        if buf[4] != FORMAT_VERSION {
            return Err(BloscpackError::UnsupportedVersion(buf[4]));
        }

        let options = buf[5];
        if options & !(OPTION_OFFSETS | OPTION_METADATA) != 0 {
            return Err(BloscpackError::MalformedHeader(format!(
                "reserved options bits are set: {:#010b}",
                options
            )));
        }
        let offsets = options & OPTION_OFFSETS != 0;
        let metadata = options & OPTION_METADATA != 0;

        let checksum = Checksum::from_id(buf[6])?;
        let typesize = buf[7];
        if typesize == 0 {
            return Err(BloscpackError::MalformedHeader(
                "typesize must be nonzero".to_string(),
            ));
        }

        let chunk_size = LittleEndian::read_u32(&buf[8..12]);
        let last_chunk = LittleEndian::read_u32(&buf[12..16]);
        let nchunks = LittleEndian::read_i64(&buf[16..24]);
        let max_app_chunks = LittleEndian::read_i64(&buf[24..32]);

        if (chunk_size == CHUNK_SIZE_UNKNOWN) != (last_chunk == CHUNK_SIZE_UNKNOWN) {
            return Err(BloscpackError::MalformedHeader(
                "chunk_size and last_chunk must both be real sizes or both sentinel".to_string(),
            ));
        }
        if chunk_size != CHUNK_SIZE_UNKNOWN && last_chunk > chunk_size {
            return Err(BloscpackError::MalformedHeader(format!(
                "last_chunk ({}) larger than chunk_size ({})",
                last_chunk, chunk_size
            )));
        }
        if nchunks < NCHUNKS_UNKNOWN {
            return Err(BloscpackError::MalformedHeader(format!(
                "negative nchunks: {}",
                nchunks
            )));
        }
        if max_app_chunks < 0 {
            return Err(BloscpackError::MalformedHeader(format!(
                "negative max_app_chunks: {}",
                max_app_chunks
            )));
        }
        if !offsets && max_app_chunks != 0 {
            return Err(BloscpackError::MalformedHeader(
                "max_app_chunks must be zero when offsets are disabled".to_string(),
            ));
        }

        Ok(BloscpackHeader {
            format_version: buf[4],
            offsets,
            metadata,
            checksum,
            typesize,
            chunk_size,
            last_chunk,
            nchunks,
            max_app_chunks,
        })
    }

    /// Total slots in the offsets region, used plus reserved.
    pub fn total_entries(&self) -> i64 {
        self.nchunks + self.max_app_chunks
    }

    /// Total uncompressed payload, when the geometry is known.
    pub fn expected_nbytes(&self) -> Option<u64> {
        if self.nchunks >= 1 && self.chunk_size != CHUNK_SIZE_UNKNOWN {
            Some((self.nchunks as u64 - 1) * self.chunk_size as u64 + self.last_chunk as u64)
        } else {
            None
        }
    }
}

/// The 32 byte header in front of the metadata section.
///
/// | Offset | Size | Field          |
/// | -----: | ---: | -------------- |
/// |      0 |    8 | magic_format   |
/// |      8 |    1 | meta_options   |
/// |      9 |    1 | checksum id    |
/// |     10 |    1 | codec id       |
/// |     11 |    1 | level          |
/// |     12 |    4 | meta_size      |
/// |     16 |    4 | meta_comp_size |
/// |     20 |    4 | max_meta_size  |
/// |     24 |    8 | user_codec     |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataHeader {
    pub magic_format: [u8; 8],
    pub meta_options: u8,
    pub meta_checksum: Checksum,
    pub meta_codec: MetaCodec,
    pub meta_level: u8,
    pub meta_size: u32,
    pub meta_comp_size: u32,
    pub max_meta_size: u32,
    pub user_codec: [u8; 8],
}

impl MetadataHeader {
    pub fn encode(&self) -> [u8; METADATA_HEADER_LENGTH] {
        let mut buf = [0u8; METADATA_HEADER_LENGTH];
        buf[0..8].copy_from_slice(&self.magic_format);
        buf[8] = self.meta_options;
        buf[9] = self.meta_checksum.id();
        buf[10] = self.meta_codec.id();
        buf[11] = self.meta_level;
        LittleEndian::write_u32(&mut buf[12..16], self.meta_size);
        LittleEndian::write_u32(&mut buf[16..20], self.meta_comp_size);
        LittleEndian::write_u32(&mut buf[20..24], self.max_meta_size);
        buf[24..32].copy_from_slice(&self.user_codec);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<MetadataHeader> {
        if buf.len() != METADATA_HEADER_LENGTH {
            return Err(BloscpackError::MalformedHeader(format!(
                "metadata header must be {} bytes, got {}",
                METADATA_HEADER_LENGTH,
                buf.len()
            )));
        }
        if buf[8] != 0 {
            return Err(BloscpackError::MalformedHeader(format!(
                "reserved metadata options bits are set: {:#010b}",
                buf[8]
            )));
        }

        let header = MetadataHeader {
            magic_format: buf[0..8].try_into().unwrap(),
            meta_options: buf[8],
            meta_checksum: Checksum::from_id(buf[9])?,
            meta_codec: MetaCodec::from_id(buf[10])?,
            meta_level: buf[11],
            meta_size: LittleEndian::read_u32(&buf[12..16]),
            meta_comp_size: LittleEndian::read_u32(&buf[16..20]),
            max_meta_size: LittleEndian::read_u32(&buf[20..24]),
            user_codec: buf[24..32].try_into().unwrap(),
        };
        if header.meta_comp_size > header.max_meta_size {
            return Err(BloscpackError::MalformedHeader(format!(
                "meta_comp_size ({}) larger than max_meta_size ({})",
                header.meta_comp_size, header.max_meta_size
            )));
        }
        Ok(header)
    }
}

#[cfg(test)]
mod test_bloscpack_header {
    use super::*;

    fn sample_header() -> BloscpackHeader {
        BloscpackHeader {
            format_version: FORMAT_VERSION,
            offsets: true,
            metadata: false,
            checksum: Checksum::Adler32,
            typesize: 8,
            chunk_size: 1_048_576,
            last_chunk: 616_448,
            nchunks: 153,
            max_app_chunks: 1530,
        }
    }

    #[test]
    fn exact_bytes() {
        let expected: [u8; HEADER_LENGTH] = [
            b'b', b'l', b'p', b'k', // magic
            3,    // format_version
            0x01, // options: offsets only
            1,    // adler32
            8,    // typesize
            0x00, 0x00, 0x10, 0x00, // chunk_size 1 MiB
            0x00, 0x68, 0x09, 0x00, // last_chunk 616448
            153, 0, 0, 0, 0, 0, 0, 0, // nchunks
            0xFA, 0x05, 0, 0, 0, 0, 0, 0, // max_app_chunks 1530
        ];
        assert_eq!(sample_header().encode(), expected);
    }

    #[test]
    fn roundtrip() {
        let header = sample_header();
        assert_eq!(BloscpackHeader::decode(&header.encode()).unwrap(), header);

        let header = BloscpackHeader {
            offsets: false,
            metadata: true,
            checksum: Checksum::None,
            max_app_chunks: 0,
            ..sample_header()
        };
        assert_eq!(BloscpackHeader::decode(&header.encode()).unwrap(), header);
    }

    #[test]
    fn bad_magic() {
        let mut buf = sample_header().encode();
        buf[0..4].copy_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(
            BloscpackHeader::decode(&buf),
            Err(BloscpackError::BadMagic)
        ));
    }

    #[test]
    fn unsupported_version() {
        let mut buf = sample_header().encode();
        buf[4] = 4;
        assert!(matches!(
            BloscpackHeader::decode(&buf),
            Err(BloscpackError::UnsupportedVersion(4))
        ));
    }

    #[test]
    fn reserved_options_bits() {
        let mut buf = sample_header().encode();
        buf[5] = 0b0000_0100;
        assert!(matches!(
            BloscpackHeader::decode(&buf),
            Err(BloscpackError::MalformedHeader(_))
        ));
    }

    #[test]
    fn unknown_checksum_id() {
        let mut buf = sample_header().encode();
        buf[6] = 200;
        assert!(matches!(
            BloscpackHeader::decode(&buf),
            Err(BloscpackError::UnknownChecksum(_))
        ));
    }

    #[test]
    fn impossible_field_combinations() {
        // last_chunk larger than chunk_size
        let mut header = sample_header();
        header.last_chunk = header.chunk_size + 1;
        assert!(BloscpackHeader::decode(&header.encode()).is_err());

        // max_app_chunks without offsets
        let mut header = sample_header();
        header.offsets = false;
        assert!(BloscpackHeader::decode(&header.encode()).is_err());

        // only one of the size fields is sentinel
        let mut header = sample_header();
        header.chunk_size = CHUNK_SIZE_UNKNOWN;
        assert!(BloscpackHeader::decode(&header.encode()).is_err());

        // zero typesize
        let mut header = sample_header();
        header.typesize = 0;
        assert!(BloscpackHeader::decode(&header.encode()).is_err());
    }

    #[test]
    fn expected_nbytes() {
        assert_eq!(sample_header().expected_nbytes(), Some(160_000_000));

        let header = BloscpackHeader {
            nchunks: NCHUNKS_UNKNOWN,
            ..sample_header()
        };
        assert_eq!(header.expected_nbytes(), None);
    }
}
