//! The optional metadata section: an opaque JSON blob, compressed and
//! checksummed independently of the chunk data, stored in a slot with
//! reserved slack so an append can replace it in place.
//!
//! Layout: `[metadata header | compressed blob | digest | zero padding]`.
//! The padding fills the slot up to `max_meta_size` bytes of blob space, so
//! the whole section occupies `32 + max_meta_size + digest_size` bytes no
//! matter how well the blob compressed.

use std::fmt;
use std::io::{Read, Seek, SeekFrom, Write};

use flate2::write::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use serde_json::Value;
use tracing::debug;

use crate::checksum::Checksum;
use crate::error::{BloscpackError, Result};
use crate::header::{MetadataHeader, METADATA_HEADER_LENGTH, METADATA_MAGIC_JSON};

/// How much blob space is reserved relative to the initial compressed size.
const META_SIZE_SLACK: u32 = 10;

/// Codecs for the metadata blob, separate from the chunk data codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaCodec {
    None,
    Zlib,
}

impl MetaCodec {
    pub fn id(&self) -> u8 {
        match self {
            MetaCodec::None => 0,
            MetaCodec::Zlib => 1,
        }
    }

    pub fn from_id(id: u8) -> Result<MetaCodec> {
        match id {
            0 => Ok(MetaCodec::None),
            1 => Ok(MetaCodec::Zlib),
            _ => Err(BloscpackError::UnknownCodec(format!("metadata codec id {}", id))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MetaCodec::None => "none",
            MetaCodec::Zlib => "zlib",
        }
    }

    fn compress(&self, data: &[u8], level: u8) -> Result<Vec<u8>> {
        match self {
            MetaCodec::None => Ok(data.to_vec()),
            MetaCodec::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level as u32));
                encoder
                    .write_all(data)
                    .and_then(|_| encoder.finish())
                    .map_err(|e| BloscpackError::Decode(format!("zlib: {}", e)))
            }
        }
    }

    fn decompress(&self, data: &[u8], meta_size: usize) -> Result<Vec<u8>> {
        match self {
            MetaCodec::None => Ok(data.to_vec()),
            MetaCodec::Zlib => {
                let mut decoder = ZlibDecoder::new(Vec::with_capacity(meta_size));
                decoder
                    .write_all(data)
                    .and_then(|_| decoder.finish())
                    .map_err(|e| BloscpackError::Decode(format!("zlib: {}", e)))
            }
        }
    }
}

impl fmt::Display for MetaCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings for a freshly written metadata section.
#[derive(Debug, Clone, Copy)]
pub struct MetadataArgs {
    pub magic_format: [u8; 8],
    pub checksum: Checksum,
    pub codec: MetaCodec,
    pub level: u8,
}

impl Default for MetadataArgs {
    fn default() -> Self {
        MetadataArgs {
            magic_format: METADATA_MAGIC_JSON,
            checksum: Checksum::Adler32,
            codec: MetaCodec::Zlib,
            level: 6,
        }
    }
}

// Compress with an opportunistic fallback: when the codec does not actually
// shrink the serialized blob the raw bytes are stored and the codec recorded
// as none, keeping tiny metadata readable without a pointless inflate.
fn compress_blob(raw: &[u8], codec: MetaCodec, level: u8) -> Result<(Vec<u8>, MetaCodec)> {
    let compressed = codec.compress(raw, level)?;
    if compressed.len() >= raw.len() {
        Ok((raw.to_vec(), MetaCodec::None))
    } else {
        Ok((compressed, codec))
    }
}

fn write_section<W: Write>(sink: &mut W, header: &MetadataHeader, blob: &[u8]) -> Result<()> {
    sink.write_all(&header.encode())?;
    sink.write_all(blob)?;
    let digest = header.meta_checksum.digest(blob);
    sink.write_all(&digest)?;
    let padding = vec![0u8; (header.max_meta_size - header.meta_comp_size) as usize];
    sink.write_all(&padding)?;
    Ok(())
}

/// Serialize, compress and write the full metadata section.
pub fn write_metadata<W: Write>(
    sink: &mut W,
    metadata: &Value,
    args: &MetadataArgs,
) -> Result<MetadataHeader> {
    let raw = serde_json::to_vec(metadata)?;
    let (blob, codec) = compress_blob(&raw, args.codec, args.level)?;

    let header = MetadataHeader {
        magic_format: args.magic_format,
        meta_options: 0,
        meta_checksum: args.checksum,
        meta_codec: codec,
        meta_level: args.level,
        meta_size: raw.len() as u32,
        meta_comp_size: blob.len() as u32,
        max_meta_size: blob.len() as u32 * META_SIZE_SLACK,
        user_codec: [0u8; 8],
    };
    debug!(
        meta_size = header.meta_size,
        meta_comp_size = header.meta_comp_size,
        max_meta_size = header.max_meta_size,
        codec = %codec,
        "writing metadata section"
    );
    write_section(sink, &header, &blob)?;
    Ok(header)
}

/// Read the full metadata section, leaving the source positioned directly
/// behind it.
pub fn read_metadata<R: Read>(source: &mut R) -> Result<(MetadataHeader, Value)> {
    let mut buf = [0u8; METADATA_HEADER_LENGTH];
    source.read_exact(&mut buf).map_err(truncated)?;
    let header = MetadataHeader::decode(&buf)?;

    let mut blob = vec![0u8; header.meta_comp_size as usize];
    source.read_exact(&mut blob).map_err(truncated)?;

    let mut digest = vec![0u8; header.meta_checksum.digest_size()];
    source.read_exact(&mut digest).map_err(truncated)?;
    if header.meta_checksum.digest(&blob) != digest {
        return Err(BloscpackError::MetaChecksumMismatch);
    }

    let mut padding = vec![0u8; (header.max_meta_size - header.meta_comp_size) as usize];
    source.read_exact(&mut padding).map_err(truncated)?;

    let raw = header
        .meta_codec
        .decompress(&blob, header.meta_size as usize)?;
    if raw.len() != header.meta_size as usize {
        return Err(BloscpackError::MalformedHeader(format!(
            "metadata decompressed to {} bytes but the header claims {}",
            raw.len(),
            header.meta_size
        )));
    }
    Ok((header, serde_json::from_slice(&raw)?))
}

/// Replace the metadata blob in place, within the slot reserved at creation
/// time. Fails with `MetaTooLarge` when the new blob does not fit; the file
/// is untouched in that case.
pub fn replace_metadata<F: Read + Write + Seek>(
    file: &mut F,
    section_start: u64,
    metadata: &Value,
) -> Result<MetadataHeader> {
    file.seek(SeekFrom::Start(section_start))?;
    let mut buf = [0u8; METADATA_HEADER_LENGTH];
    file.read_exact(&mut buf).map_err(truncated)?;
    let old = MetadataHeader::decode(&buf)?;

    let raw = serde_json::to_vec(metadata)?;
    let (blob, codec) = compress_blob(&raw, old.meta_codec, old.meta_level)?;
    if blob.len() > old.max_meta_size as usize {
        return Err(BloscpackError::MetaTooLarge {
            needed: blob.len(),
            max_meta_size: old.max_meta_size as usize,
        });
    }

    let header = MetadataHeader {
        meta_codec: codec,
        meta_size: raw.len() as u32,
        meta_comp_size: blob.len() as u32,
        ..old
    };
    file.seek(SeekFrom::Start(section_start))?;
    write_section(file, &header, &blob)?;
    Ok(header)
}

fn truncated(e: std::io::Error) -> BloscpackError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        BloscpackError::TruncatedFile
    } else {
        BloscpackError::Io(e)
    }
}
