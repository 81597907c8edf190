//! Thin adapter over c-blosc, the block codec producing the framed buffers
//! stored as chunk records.
//!
//! Everything that crosses the FFI boundary is confined to this module. The
//! frame emitted by `blosc_compress_ctx` is self describing: its first 16
//! bytes record the uncompressed size (`nbytes`) and the total frame size
//! (`cbytes`), which is what lets readers walk records without an offsets
//! index and size the destination buffer before decompressing.

use std::fmt;
use std::os::raw::{c_char, c_int, c_void};
use std::str::FromStr;

use blosc_sys::{
    blosc_compress_ctx, blosc_decompress_ctx, BLOSC_BLOSCLZ_COMPNAME, BLOSC_LZ4HC_COMPNAME,
    BLOSC_LZ4_COMPNAME, BLOSC_MAX_BUFFERSIZE, BLOSC_MAX_OVERHEAD, BLOSC_MAX_THREADS,
    BLOSC_SNAPPY_COMPNAME, BLOSC_VERSION_FORMAT, BLOSC_ZLIB_COMPNAME,
};
use byteorder::{ByteOrder, LittleEndian};

use crate::error::{BloscpackError, Result};

/// Size of the header blosc places in front of every compressed buffer.
pub const BLOSC_HEADER_LENGTH: usize = 16;
/// Worst-case growth of a compressed buffer over its input.
pub const MAX_OVERHEAD: usize = BLOSC_MAX_OVERHEAD as usize;
/// Largest buffer a single blosc call accepts.
pub const MAX_BUFFERSIZE: usize = BLOSC_MAX_BUFFERSIZE as usize;
pub const MAX_THREADS: usize = BLOSC_MAX_THREADS as usize;
pub const MAX_CLEVEL: u8 = 9;

/// Compressors available inside blosc.
///
/// The chosen compressor is recorded inside each frame by blosc itself, so
/// the container never stores it; a single file may hold chunks written
/// with different codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    BloscLz,
    Lz4,
    Lz4Hc,
    Snappy,
    Zlib,
}

impl Codec {
    pub fn name(&self) -> &'static str {
        match self {
            Codec::BloscLz => "blosclz",
            Codec::Lz4 => "lz4",
            Codec::Lz4Hc => "lz4hc",
            Codec::Snappy => "snappy",
            Codec::Zlib => "zlib",
        }
    }

    fn cname(&self) -> &'static [u8] {
        match self {
            Codec::BloscLz => &BLOSC_BLOSCLZ_COMPNAME[..],
            Codec::Lz4 => &BLOSC_LZ4_COMPNAME[..],
            Codec::Lz4Hc => &BLOSC_LZ4HC_COMPNAME[..],
            Codec::Snappy => &BLOSC_SNAPPY_COMPNAME[..],
            Codec::Zlib => &BLOSC_ZLIB_COMPNAME[..],
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Codec::BloscLz
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Codec {
    type Err = BloscpackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "blosclz" => Ok(Codec::BloscLz),
            "lz4" => Ok(Codec::Lz4),
            "lz4hc" => Ok(Codec::Lz4Hc),
            "snappy" => Ok(Codec::Snappy),
            "zlib" => Ok(Codec::Zlib),
            _ => Err(BloscpackError::UnknownCodec(s.to_string())),
        }
    }
}

/// The decoded 16 byte blosc frame header.
///
/// ```text
/// |-0-|-1-|-2-|-3-|-4-|-5-|-6-|-7-|-8-|-9-|-A-|-B-|-C-|-D-|-E-|-F-|
///   ^   ^   ^   ^ |     nbytes    |   blocksize   |     cbytes    |
///   |   |   |   +--typesize
///   |   |   +------flags
///   |   +----------versionlz
///   +--------------version
/// ```
///
/// All three u32 fields are little-endian; `cbytes` includes the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloscHeader {
    pub version: u8,
    pub versionlz: u8,
    pub flags: u8,
    pub typesize: u8,
    pub nbytes: u32,
    pub blocksize: u32,
    pub cbytes: u32,
}

impl BloscHeader {
    pub fn decode(buf: &[u8]) -> Result<BloscHeader> {
        if buf.len() < BLOSC_HEADER_LENGTH {
            return Err(BloscpackError::Decode(
                "blosc frame shorter than its 16 byte header".to_string(),
            ));
        }
        let header = BloscHeader {
            version: buf[0],
            versionlz: buf[1],
            flags: buf[2],
            typesize: buf[3],
            nbytes: LittleEndian::read_u32(&buf[4..8]),
            blocksize: LittleEndian::read_u32(&buf[8..12]),
            cbytes: LittleEndian::read_u32(&buf[12..16]),
        };
        if (header.cbytes as usize) < BLOSC_HEADER_LENGTH {
            return Err(BloscpackError::Decode(format!(
                "blosc frame claims cbytes {} smaller than its own header",
                header.cbytes
            )));
        }
        Ok(header)
    }
}

/// Thread counts are bounded by blosc's own compile-time limit.
pub fn validate_nthreads(nthreads: usize) -> Result<()> {
    if !(1..=MAX_THREADS).contains(&nthreads) {
        return Err(BloscpackError::NthreadsOutOfRange(nthreads));
    }
    Ok(())
}

// Frame for a zero length buffer, written without calling into c-blosc:
// a bare header with nbytes 0 and cbytes 16. Decoding short-circuits on
// nbytes 0 as well, so empty chunks round-trip symmetrically.
fn empty_frame(typesize: u8) -> Vec<u8> {
    let mut frame = vec![0u8; BLOSC_HEADER_LENGTH];
    frame[0] = BLOSC_VERSION_FORMAT as u8;
    frame[1] = 1;
    frame[3] = typesize;
    LittleEndian::write_u32(&mut frame[12..16], BLOSC_HEADER_LENGTH as u32);
    frame
}

/// Compress a single buffer into a self describing blosc frame.
pub fn compress(
    src: &[u8],
    codec: Codec,
    clevel: u8,
    shuffle: bool,
    typesize: u8,
    nthreads: usize,
) -> Result<Vec<u8>> {
    if src.len() > MAX_BUFFERSIZE {
        return Err(BloscpackError::ChunkSizeOutOfRange(src.len().to_string()));
    }
    if src.is_empty() {
        return Ok(empty_frame(typesize));
    }

    let mut dest = vec![0u8; src.len() + MAX_OVERHEAD];
    let rc = unsafe {
        blosc_compress_ctx(
            clevel as c_int,
            shuffle as c_int,
            typesize as usize,
            src.len(),
            src.as_ptr() as *const c_void,
            dest.as_mut_ptr() as *mut c_void,
            dest.len(),
            codec.cname().as_ptr() as *const c_char,
            0, // automatic blocksize
            nthreads as c_int,
        )
    };
    if rc <= 0 {
        return Err(BloscpackError::Decode(format!(
            "blosc failed to compress {} bytes with codec '{}' (rc: {})",
            src.len(),
            codec,
            rc
        )));
    }
    dest.truncate(rc as usize);
    Ok(dest)
}

/// Decompress one complete blosc frame back into raw bytes.
pub fn decompress(frame: &[u8], nthreads: usize) -> Result<Vec<u8>> {
    let header = BloscHeader::decode(frame)?;
    if frame.len() != header.cbytes as usize {
        return Err(BloscpackError::Decode(format!(
            "blosc frame is {} bytes but its header claims cbytes {}",
            frame.len(),
            header.cbytes
        )));
    }
    if header.nbytes == 0 {
        return Ok(Vec::new());
    }

    let mut dest = vec![0u8; header.nbytes as usize];
    let rc = unsafe {
        blosc_decompress_ctx(
            frame.as_ptr() as *const c_void,
            dest.as_mut_ptr() as *mut c_void,
            dest.len(),
            nthreads as c_int,
        )
    };
    if rc < 0 || rc as usize != dest.len() {
        return Err(BloscpackError::Decode(format!(
            "blosc failed to decompress a frame of {} bytes (rc: {})",
            frame.len(),
            rc
        )));
    }
    Ok(dest)
}

#[cfg(test)]
mod test_blosc {
    use super::*;

    fn sample_data() -> Vec<u8> {
        (0u32..4096).flat_map(|i| (i % 251).to_le_bytes()).collect()
    }

    #[test]
    fn roundtrip_blosclz() {
        let data = sample_data();
        let frame = compress(&data, Codec::BloscLz, 7, true, 4, 1).unwrap();
        assert_eq!(decompress(&frame, 1).unwrap(), data);
    }

    #[test]
    fn roundtrip_all_codecs() {
        let data = sample_data();
        for codec in [
            Codec::BloscLz,
            Codec::Lz4,
            Codec::Lz4Hc,
            Codec::Snappy,
            Codec::Zlib,
        ] {
            let frame = compress(&data, codec, 5, true, 4, 1).unwrap();
            assert_eq!(decompress(&frame, 1).unwrap(), data, "codec {}", codec);
        }
    }

    #[test]
    fn frame_header_is_self_describing() {
        let data = sample_data();
        let frame = compress(&data, Codec::BloscLz, 7, true, 4, 1).unwrap();
        let header = BloscHeader::decode(&frame).unwrap();
        assert_eq!(header.nbytes as usize, data.len());
        assert_eq!(header.cbytes as usize, frame.len());
    }

    #[test]
    fn empty_buffer_roundtrip() {
        let frame = compress(&[], Codec::BloscLz, 7, true, 8, 1).unwrap();
        assert_eq!(frame.len(), BLOSC_HEADER_LENGTH);
        assert_eq!(decompress(&frame, 1).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let data = sample_data();
        let frame = compress(&data, Codec::BloscLz, 7, true, 4, 1).unwrap();
        assert!(matches!(
            decompress(&frame[..frame.len() - 1], 1),
            Err(BloscpackError::Decode(_))
        ));
        assert!(matches!(
            BloscHeader::decode(&frame[..8]),
            Err(BloscpackError::Decode(_))
        ));
    }

    #[test]
    fn codec_names_roundtrip() {
        for name in ["blosclz", "lz4", "lz4hc", "snappy", "zlib"] {
            assert_eq!(name.parse::<Codec>().unwrap().name(), name);
        }
        assert!(matches!(
            "zstd9000".parse::<Codec>(),
            Err(BloscpackError::UnknownCodec(_))
        ));
    }
}
