//! The reader pipeline: parse the headers, then stream chunks in order or
//! seek straight to one through the offsets index.
//!
//! Sequential reading never needs the offsets: every record starts with the
//! block codec's own header, whose `cbytes` field says how far to read.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde_json::Value;
use tracing::{debug, info};

use crate::blosc::{self, validate_nthreads, BloscHeader, BLOSC_HEADER_LENGTH};
use crate::checksum::Checksum;
use crate::error::{BloscpackError, Result};
use crate::header::{BloscpackHeader, MetadataHeader, HEADER_LENGTH, MAGIC};
use crate::metadata::read_metadata;
use crate::offsets::Offsets;
use crate::pack::Stats;
use crate::util::pretty_size;

// A complete chunk record from the current position: the blosc frame,
// verified against its trailing digest.
pub(crate) fn read_chunk_record<R: Read>(
    source: &mut R,
    checksum: Checksum,
    index: usize,
) -> Result<Vec<u8>> {
    let mut head = [0u8; BLOSC_HEADER_LENGTH];
    source
        .read_exact(&mut head)
        .map_err(|e| truncated_chunk(e, index))?;
    let blosc_header = BloscHeader::decode(&head)?;

    let mut frame = vec![0u8; blosc_header.cbytes as usize];
    frame[..BLOSC_HEADER_LENGTH].copy_from_slice(&head);
    source
        .read_exact(&mut frame[BLOSC_HEADER_LENGTH..])
        .map_err(|e| truncated_chunk(e, index))?;

    let digest_size = checksum.digest_size();
    if digest_size > 0 {
        let mut digest = vec![0u8; digest_size];
        source
            .read_exact(&mut digest)
            .map_err(|e| truncated_chunk(e, index))?;
        if checksum.digest(&frame) != digest {
            return Err(BloscpackError::ChunkChecksumMismatch(index));
        }
    }
    Ok(frame)
}

fn truncated_chunk(e: std::io::Error, index: usize) -> BloscpackError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        BloscpackError::TruncatedChunk(index)
    } else {
        BloscpackError::Io(e)
    }
}

fn truncated_file(e: std::io::Error) -> BloscpackError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        BloscpackError::TruncatedFile
    } else {
        BloscpackError::Io(e)
    }
}

/// A parsed container, ready for sequential streaming or random access.
pub struct PackReader<R: Read + Seek> {
    source: R,
    header: BloscpackHeader,
    metadata_header: Option<MetadataHeader>,
    metadata: Option<Value>,
    offsets: Option<Offsets>,
    chunks_start: u64,
}

impl<R: Read + Seek> PackReader<R> {
    /// Parse all headers eagerly; chunk payloads stay untouched.
    pub fn new(mut source: R) -> Result<PackReader<R>> {
        let file_len = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;

        let mut magic = [0u8; 4];
        source.read_exact(&mut magic).map_err(truncated_file)?;
        if magic != MAGIC {
            return Err(BloscpackError::BadMagic);
        }
        let mut buf = [0u8; HEADER_LENGTH];
        buf[..4].copy_from_slice(&magic);
        source
            .read_exact(&mut buf[4..])
            .map_err(truncated_file)?;
        let header = BloscpackHeader::decode(&buf)?;

        let (metadata_header, metadata) = if header.metadata {
            let (metadata_header, metadata) = read_metadata(&mut source)?;
            (Some(metadata_header), Some(metadata))
        } else {
            (None, None)
        };

        let offsets = if header.offsets {
            if header.nchunks < 0 {
                return Err(BloscpackError::MalformedHeader(
                    "nchunks is unknown, the file was not finalized".to_string(),
                ));
            }
            let region_len = Offsets::encoded_size(header.total_entries());
            if source.stream_position()? + region_len as u64 > file_len {
                return Err(BloscpackError::TruncatedFile);
            }
            let mut region = vec![0u8; region_len];
            source.read_exact(&mut region).map_err(truncated_file)?;
            Some(Offsets::parse(
                &region,
                header.nchunks,
                header.max_app_chunks,
            )?)
        } else {
            None
        };

        let chunks_start = source.stream_position()?;
        Ok(PackReader {
            source,
            header,
            metadata_header,
            metadata,
            offsets,
            chunks_start,
        })
    }

    pub fn header(&self) -> &BloscpackHeader {
        &self.header
    }

    pub fn metadata_header(&self) -> Option<&MetadataHeader> {
        self.metadata_header.as_ref()
    }

    pub fn metadata(&self) -> Option<&Value> {
        self.metadata.as_ref()
    }

    pub fn offsets(&self) -> Option<&Offsets> {
        self.offsets.as_ref()
    }

    pub fn into_metadata(self) -> Option<Value> {
        self.metadata
    }

    // Position of the first chunk record; the appender derives the offsets
    // region position from it.
    pub(crate) fn chunks_start(&self) -> u64 {
        self.chunks_start
    }

    /// Random access: decompress chunk `index` on its own. Needs the
    /// offsets index; files written without one only support sequential
    /// reads.
    pub fn chunk(&mut self, index: usize, nthreads: usize) -> Result<Vec<u8>> {
        validate_nthreads(nthreads)?;
        let offsets = self
            .offsets
            .as_ref()
            .ok_or(BloscpackError::OffsetsDisabled)?;
        if index >= self.header.nchunks as usize {
            return Err(BloscpackError::ChunkOutOfRange(index));
        }
        let position = offsets
            .chunk_offset(index)
            .ok_or(BloscpackError::ChunkOutOfRange(index))?;

        self.source.seek(SeekFrom::Start(position))?;
        let frame = read_chunk_record(&mut self.source, self.header.checksum, index)?;
        blosc::decompress(&frame, nthreads)
    }

    /// Sequential read: walk every chunk in order, verify, decompress and
    /// emit. The concatenated output length is checked against the header
    /// geometry.
    pub fn unpack_to<W: Write>(&mut self, sink: &mut W, nthreads: usize) -> Result<Stats> {
        validate_nthreads(nthreads)?;
        if self.header.nchunks < 0 {
            return Err(BloscpackError::MalformedHeader(
                "nchunks is unknown, the file was not finalized".to_string(),
            ));
        }

        self.source.seek(SeekFrom::Start(self.chunks_start))?;
        let nchunks = self.header.nchunks as usize;
        let mut nbytes = 0u64;
        for index in 0..nchunks {
            let frame = read_chunk_record(&mut self.source, self.header.checksum, index)?;
            let data = blosc::decompress(&frame, nthreads)?;
            sink.write_all(&data)?;
            nbytes += data.len() as u64;
            debug!(
                "chunk '{}'{}: {} in, {} out",
                index,
                if index == nchunks - 1 { " (last)" } else { "" },
                pretty_size(frame.len() as u64),
                pretty_size(data.len() as u64)
            );
        }

        if let Some(expected) = self.header.expected_nbytes() {
            if nbytes != expected {
                return Err(BloscpackError::MalformedHeader(format!(
                    "chunks decompressed to {} bytes but the header claims {}",
                    nbytes, expected
                )));
            }
        }
        Ok(Stats {
            nchunks: self.header.nchunks,
            chunk_size: self.header.chunk_size,
            last_chunk: self.header.last_chunk,
            nbytes,
            cbytes: self.source.stream_position()?,
        })
    }
}

/// Decompress a whole container, returning the stats and the metadata blob
/// if one is present.
pub fn unpack_stream<R: Read + Seek, W: Write>(
    source: &mut R,
    sink: &mut W,
    nthreads: usize,
) -> Result<(Stats, Option<Value>)> {
    let mut reader = PackReader::new(source)?;
    let stats = reader.unpack_to(sink, nthreads)?;
    Ok((stats, reader.into_metadata()))
}

pub fn unpack_file<P: AsRef<Path>, Q: AsRef<Path>>(
    in_file: P,
    out_file: Q,
    nthreads: usize,
) -> Result<Option<Value>> {
    let mut input = File::open(in_file.as_ref())?;
    let mut output = File::create(out_file.as_ref())?;
    let (stats, metadata) = unpack_stream(&mut input, &mut output, nthreads)?;
    info!(
        "decompressed {} into {}",
        pretty_size(stats.cbytes),
        pretty_size(stats.nbytes)
    );
    Ok(metadata)
}

/// Everything `blpk info` shows: the parsed headers, the metadata value and
/// the used offset entries. Chunk payloads are never decoded.
#[derive(Debug)]
pub struct Info {
    pub header: BloscpackHeader,
    pub metadata_header: Option<MetadataHeader>,
    pub metadata: Option<Value>,
    pub offsets: Vec<u64>,
}

pub fn info<R: Read + Seek>(source: &mut R) -> Result<Info> {
    let reader = PackReader::new(source)?;
    let header = *reader.header();
    let metadata_header = reader.metadata_header().copied();
    let offsets = reader
        .offsets()
        .map(|offsets| offsets.used().collect())
        .unwrap_or_default();
    Ok(Info {
        header,
        metadata_header,
        metadata: reader.into_metadata(),
        offsets,
    })
}

pub fn info_file<P: AsRef<Path>>(path: P) -> Result<Info> {
    info(&mut File::open(path.as_ref())?)
}
