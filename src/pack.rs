//! The writer pipeline: plan the layout, stream the input through the block
//! codec chunk by chunk, then finalize by patching the offsets region.
//!
//! The sink must support seek-and-overwrite because compressed chunk sizes
//! are only known after the fact; the offsets region is first filled with
//! sentinels and rewritten once every record has landed.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde_json::Value;
use tracing::{debug, info};

use crate::blosc::{self, validate_nthreads, Codec, MAX_BUFFERSIZE, MAX_CLEVEL};
use crate::checksum::Checksum;
use crate::chunk::{calculate_nchunks, ChunkIter, ChunkSize};
use crate::error::{BloscpackError, Result};
use crate::header::{BloscpackHeader, FORMAT_VERSION, NCHUNKS_UNKNOWN};
use crate::metadata::{write_metadata, MetadataArgs};
use crate::offsets::Offsets;
use crate::util::pretty_size;

/// Append slots reserved per existing chunk at creation time.
const MAX_APP_CHUNKS_FACTOR: i64 = 10;

/// Everything the writer needs to know; `Default` mirrors the CLI defaults.
#[derive(Debug, Clone)]
pub struct PackArgs {
    pub typesize: u8,
    pub clevel: u8,
    pub shuffle: bool,
    pub codec: Codec,
    pub chunk_size: ChunkSize,
    pub checksum: Checksum,
    pub offsets: bool,
    pub metadata: Option<Value>,
    pub nthreads: usize,
}

impl Default for PackArgs {
    fn default() -> Self {
        PackArgs {
            typesize: 8,
            clevel: 7,
            shuffle: true,
            codec: Codec::default(),
            chunk_size: ChunkSize::default(),
            checksum: Checksum::default(),
            offsets: true,
            metadata: None,
            nthreads: 1,
        }
    }
}

impl PackArgs {
    /// Range checks, performed before any IO.
    pub fn validate(&self) -> Result<()> {
        if self.typesize == 0 {
            return Err(BloscpackError::TypesizeInvalid(self.typesize as usize));
        }
        if self.clevel > MAX_CLEVEL {
            return Err(BloscpackError::ClevelOutOfRange(self.clevel as usize));
        }
        if let ChunkSize::Bytes(bytes) = self.chunk_size {
            if bytes == 0 || bytes as usize > MAX_BUFFERSIZE {
                return Err(BloscpackError::ChunkSizeOutOfRange(bytes.to_string()));
            }
        }
        validate_nthreads(self.nthreads)
    }
}

/// What a write (or append) did, mostly for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub nchunks: i64,
    pub chunk_size: u32,
    pub last_chunk: u32,
    /// Uncompressed payload bytes consumed.
    pub nbytes: u64,
    /// Container bytes produced, headers included.
    pub cbytes: u64,
}

// One chunk record: the blosc frame followed by its digest. The checksum is
// a parameter (not taken from `args`) because append must keep using the
// checksum recorded in the file being extended.
pub(crate) fn write_chunk<W: Write>(
    sink: &mut W,
    data: &[u8],
    args: &PackArgs,
    checksum: Checksum,
) -> Result<u64> {
    let frame = blosc::compress(
        data,
        args.codec,
        args.clevel,
        args.shuffle,
        args.typesize,
        args.nthreads,
    )?;
    sink.write_all(&frame)?;
    let digest = checksum.digest(&frame);
    if !digest.is_empty() {
        sink.write_all(&digest)?;
    }
    Ok((frame.len() + digest.len()) as u64)
}

/// Compress `source` into a fresh container written to `sink`.
///
/// With a known `source_len` the exact geometry goes into the header up
/// front. Without one the chunk size must be explicit and offsets must be
/// disabled; `nchunks` is then discovered at end of stream and patched into
/// the header during finalization.
pub fn pack_stream<R: Read, W: Write + Seek>(
    source: &mut R,
    source_len: Option<u64>,
    sink: &mut W,
    args: &PackArgs,
) -> Result<Stats> {
    args.validate()?;
    match source_len {
        Some(len) => pack_known_length(source, len, sink, args),
        None => pack_unknown_length(source, sink, args),
    }
}

fn pack_known_length<R: Read, W: Write + Seek>(
    source: &mut R,
    source_len: u64,
    sink: &mut W,
    args: &PackArgs,
) -> Result<Stats> {
    let chunk_size = args.chunk_size.resolve(Some(source_len))?;
    let (nchunks, chunk_size, last_chunk) = calculate_nchunks(source_len, chunk_size)?;
    let max_app_chunks = if args.offsets {
        MAX_APP_CHUNKS_FACTOR * nchunks
    } else {
        0
    };
    info!(
        "nchunks: {}, chunk_size: {}, last_chunk: {}",
        nchunks,
        pretty_size(chunk_size as u64),
        pretty_size(last_chunk as u64)
    );

    let header = BloscpackHeader {
        format_version: FORMAT_VERSION,
        offsets: args.offsets,
        metadata: args.metadata.is_some(),
        checksum: args.checksum,
        typesize: args.typesize,
        chunk_size,
        last_chunk,
        nchunks,
        max_app_chunks,
    };

    let start = sink.stream_position()?;
    sink.write_all(&header.encode())?;
    if let Some(metadata) = &args.metadata {
        write_metadata(sink, metadata, &MetadataArgs::default())?;
    }

    // reserve the offsets region, to be patched after the chunk loop
    let offsets_position = sink.stream_position()?;
    let mut offsets = Offsets::new(nchunks, max_app_chunks);
    if args.offsets {
        sink.write_all(&offsets.serialize())?;
    }

    let mut nbytes = 0u64;
    for i in 0..nchunks {
        let to_read = if i == nchunks - 1 {
            last_chunk
        } else {
            chunk_size
        } as usize;
        let mut data = vec![0u8; to_read];
        source.read_exact(&mut data)?;

        let position = sink.stream_position()?;
        let written = write_chunk(sink, &data, args, args.checksum)?;
        if args.offsets {
            offsets.set(i as usize, position);
        }
        nbytes += data.len() as u64;
        debug!(
            "chunk '{}'{}: {} in, {} out",
            i,
            if i == nchunks - 1 { " (last)" } else { "" },
            pretty_size(data.len() as u64),
            pretty_size(written)
        );
    }

    let end = sink.stream_position()?;
    if args.offsets {
        sink.seek(SeekFrom::Start(offsets_position))?;
        sink.write_all(&offsets.serialize())?;
        sink.seek(SeekFrom::Start(end))?;
    }

    Ok(Stats {
        nchunks,
        chunk_size,
        last_chunk,
        nbytes,
        cbytes: end - start,
    })
}

fn pack_unknown_length<R: Read, W: Write + Seek>(
    source: &mut R,
    sink: &mut W,
    args: &PackArgs,
) -> Result<Stats> {
    // The offsets region is sized from nchunks, which an unsized source
    // cannot provide up front.
    if args.offsets {
        return Err(BloscpackError::UnknownInputLength);
    }
    let chunk_size = args.chunk_size.resolve(None)?;

    let mut header = BloscpackHeader {
        format_version: FORMAT_VERSION,
        offsets: false,
        metadata: args.metadata.is_some(),
        checksum: args.checksum,
        typesize: args.typesize,
        chunk_size,
        last_chunk: 0,
        nchunks: NCHUNKS_UNKNOWN,
        max_app_chunks: 0,
    };

    let start = sink.stream_position()?;
    sink.write_all(&header.encode())?;
    if let Some(metadata) = &args.metadata {
        write_metadata(sink, metadata, &MetadataArgs::default())?;
    }

    let mut nchunks = 0i64;
    let mut last_chunk = 0u32;
    let mut nbytes = 0u64;
    for data in ChunkIter::new(source, chunk_size as usize) {
        let data = data?;
        write_chunk(sink, &data, args, args.checksum)?;
        nchunks += 1;
        last_chunk = data.len() as u32;
        nbytes += data.len() as u64;
        debug!("chunk '{}': {} in", nchunks - 1, pretty_size(data.len() as u64));
    }
    if nchunks == 0 {
        write_chunk(sink, &[], args, args.checksum)?;
        nchunks = 1;
        last_chunk = 0;
    }

    // finalize: the geometry is now known
    header.nchunks = nchunks;
    header.last_chunk = last_chunk;
    let end = sink.stream_position()?;
    sink.seek(SeekFrom::Start(start))?;
    sink.write_all(&header.encode())?;
    sink.seek(SeekFrom::Start(end))?;

    Ok(Stats {
        nchunks,
        chunk_size,
        last_chunk,
        nbytes,
        cbytes: end - start,
    })
}

pub fn pack_file<P: AsRef<Path>, Q: AsRef<Path>>(
    in_file: P,
    out_file: Q,
    args: &PackArgs,
) -> Result<Stats> {
    let input_len = fs::metadata(in_file.as_ref())?.len();
    info!("input file size: {}", pretty_size(input_len));

    let mut input = File::open(in_file.as_ref())?;
    let mut output = File::create(out_file.as_ref())?;
    let stats = pack_stream(&mut input, Some(input_len), &mut output, args)?;

    info!("output file size: {}", pretty_size(stats.cbytes));
    info!(
        "compression ratio: {:.3}",
        stats.cbytes as f64 / stats.nbytes.max(1) as f64
    );
    Ok(stats)
}

#[cfg(test)]
mod test_pack {
    use std::io::Cursor;

    use serde_json::json;

    use super::*;
    use crate::header::HEADER_LENGTH;

    fn small_args() -> PackArgs {
        PackArgs {
            chunk_size: ChunkSize::Bytes(100),
            ..PackArgs::default()
        }
    }

    fn sample_data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn header_and_offsets_layout() {
        let data = sample_data(256);
        let mut sink = Cursor::new(Vec::new());
        let stats = pack_stream(
            &mut Cursor::new(data),
            Some(256),
            &mut sink,
            &small_args(),
        )
        .unwrap();

        assert_eq!(stats.nchunks, 3);
        assert_eq!(stats.last_chunk, 56);
        assert_eq!(stats.nbytes, 256);
        assert_eq!(stats.cbytes, sink.get_ref().len() as u64);

        let header = BloscpackHeader::decode(&sink.get_ref()[..HEADER_LENGTH]).unwrap();
        assert_eq!(header.nchunks, 3);
        assert_eq!(header.chunk_size, 100);
        assert_eq!(header.last_chunk, 56);
        assert_eq!(header.max_app_chunks, 30);
        assert!(header.offsets);
        assert!(!header.metadata);

        // the first chunk record sits directly behind the offsets region
        let offsets_len = Offsets::encoded_size(header.total_entries());
        let region = &sink.get_ref()[HEADER_LENGTH..HEADER_LENGTH + offsets_len];
        let offsets = Offsets::parse(region, header.nchunks, header.max_app_chunks).unwrap();
        assert_eq!(
            offsets.chunk_offset(0),
            Some((HEADER_LENGTH + offsets_len) as u64)
        );
        assert_eq!(offsets.chunk_offset(3), None);
    }

    #[test]
    fn no_offsets_no_region() {
        let data = sample_data(256);
        let mut plain = Cursor::new(Vec::new());
        let mut indexed = Cursor::new(Vec::new());
        let args = small_args();
        pack_stream(
            &mut Cursor::new(data.clone()),
            Some(256),
            &mut indexed,
            &args,
        )
        .unwrap();
        pack_stream(
            &mut Cursor::new(data),
            Some(256),
            &mut plain,
            &PackArgs {
                offsets: false,
                ..args
            },
        )
        .unwrap();

        let header = BloscpackHeader::decode(&plain.get_ref()[..HEADER_LENGTH]).unwrap();
        assert!(!header.offsets);
        assert_eq!(header.max_app_chunks, 0);
        // 33 offset entries less than the indexed variant
        assert_eq!(
            plain.get_ref().len() + Offsets::encoded_size(33),
            indexed.get_ref().len()
        );
    }

    #[test]
    fn metadata_shifts_the_offsets_region() {
        let mut sink = Cursor::new(Vec::new());
        let args = PackArgs {
            metadata: Some(json!({"kind": "test"})),
            ..small_args()
        };
        pack_stream(&mut Cursor::new(sample_data(64)), Some(64), &mut sink, &args).unwrap();

        let header = BloscpackHeader::decode(&sink.get_ref()[..HEADER_LENGTH]).unwrap();
        assert!(header.metadata);

        let mut cursor = Cursor::new(sink.get_ref().clone());
        cursor.set_position(HEADER_LENGTH as u64);
        let (meta_header, value) = crate::metadata::read_metadata(&mut cursor).unwrap();
        assert_eq!(value, json!({"kind": "test"}));

        // offsets follow the metadata section, chunk 0 follows the offsets
        let offsets_position = cursor.position() as usize;
        let offsets_len = Offsets::encoded_size(header.total_entries());
        let offsets = Offsets::parse(
            &sink.get_ref()[offsets_position..offsets_position + offsets_len],
            header.nchunks,
            header.max_app_chunks,
        )
        .unwrap();
        assert_eq!(
            offsets.chunk_offset(0),
            Some((offsets_position + offsets_len) as u64)
        );
        assert!(meta_header.max_meta_size >= meta_header.meta_comp_size);
    }

    #[test]
    fn chunk_size_max_uses_one_chunk() {
        let mut sink = Cursor::new(Vec::new());
        let stats = pack_stream(
            &mut Cursor::new(sample_data(4096)),
            Some(4096),
            &mut sink,
            &PackArgs {
                chunk_size: ChunkSize::Max,
                ..PackArgs::default()
            },
        )
        .unwrap();
        assert_eq!(stats.nchunks, 1);
        assert_eq!(stats.chunk_size, 4096);
        assert_eq!(stats.last_chunk, 4096);
    }

    #[test]
    fn empty_input_gets_one_empty_chunk() {
        let mut sink = Cursor::new(Vec::new());
        let stats = pack_stream(
            &mut Cursor::new(Vec::new()),
            Some(0),
            &mut sink,
            &small_args(),
        )
        .unwrap();
        assert_eq!(stats.nchunks, 1);
        assert_eq!(stats.last_chunk, 0);

        let header = BloscpackHeader::decode(&sink.get_ref()[..HEADER_LENGTH]).unwrap();
        assert_eq!(header.nchunks, 1);
        assert_eq!(header.last_chunk, 0);
    }

    #[test]
    fn unknown_length_is_patched_on_finalize() {
        let data = sample_data(256);
        let mut sink = Cursor::new(Vec::new());
        let args = PackArgs {
            offsets: false,
            chunk_size: ChunkSize::Bytes(100),
            ..PackArgs::default()
        };
        let stats = pack_stream(&mut Cursor::new(data), None, &mut sink, &args).unwrap();
        assert_eq!(stats.nchunks, 3);
        assert_eq!(stats.last_chunk, 56);

        let header = BloscpackHeader::decode(&sink.get_ref()[..HEADER_LENGTH]).unwrap();
        assert_eq!(header.nchunks, 3);
        assert_eq!(header.last_chunk, 56);
    }

    #[test]
    fn unknown_length_refuses_offsets() {
        let mut sink = Cursor::new(Vec::new());
        assert!(matches!(
            pack_stream(
                &mut Cursor::new(sample_data(16)),
                None,
                &mut sink,
                &small_args(),
            ),
            Err(BloscpackError::UnknownInputLength)
        ));
    }

    #[test]
    fn validation_runs_before_io() {
        let cases = [
            (
                PackArgs {
                    typesize: 0,
                    ..PackArgs::default()
                },
                "typesize",
            ),
            (
                PackArgs {
                    clevel: 10,
                    ..PackArgs::default()
                },
                "compression level",
            ),
            (
                PackArgs {
                    nthreads: 257,
                    ..PackArgs::default()
                },
                "nthreads",
            ),
            (
                PackArgs {
                    nthreads: 0,
                    ..PackArgs::default()
                },
                "nthreads",
            ),
            (
                PackArgs {
                    chunk_size: ChunkSize::Bytes(0),
                    ..PackArgs::default()
                },
                "chunk size",
            ),
        ];
        for (args, needle) in cases {
            let err = args.validate().unwrap_err();
            assert!(
                err.to_string().contains(needle),
                "expected '{}' in '{}'",
                needle,
                err
            );
        }
    }
}
