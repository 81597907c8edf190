//! The append pipeline: extend a finalized container in place, bounded by
//! the chunk slots reserved when it was created.
//!
//! The final chunk is the only record that may be shorter than
//! `chunk_size`, so appending always starts by rereading it into an
//! accumulator, topping that up from the new source and rewriting it at its
//! old position. Everything after it is new, which is why the record is
//! free to grow. Compression settings may differ from the original (each
//! blosc frame names its own codec); the checksum cannot, because the file
//! header records a single checksum for every record.
//!
//! The original is patched in place and not backed up: an interruption
//! mid-append leaves it inconsistent. Capacity is therefore checked against
//! the known source length before the first byte is written, which keeps a
//! too-large append from touching the file at all.

use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::blosc;
use crate::chunk::calculate_nchunks;
use crate::error::{BloscpackError, Result};
use crate::header::{BloscpackHeader, CHUNK_SIZE_UNKNOWN, HEADER_LENGTH};
use crate::metadata::replace_metadata;
use crate::offsets::Offsets;
use crate::pack::{write_chunk, PackArgs, Stats};
use crate::unpack::{read_chunk_record, PackReader};
use crate::util::pretty_size;

/// Append `source_len` bytes from `source` to an existing container.
///
/// `args` supplies the compression settings and optional replacement
/// metadata for the appended chunks; its `chunk_size`, `checksum` and
/// `offsets` fields are ignored in favor of what the file records.
pub fn append_stream<F: Read + Write + Seek, R: Read>(
    file: &mut F,
    source: &mut R,
    source_len: u64,
    args: &PackArgs,
) -> Result<Stats> {
    args.validate()?;

    let (header, mut offsets, chunks_start) = {
        let reader = PackReader::new(&mut *file)?;
        let offsets = reader
            .offsets()
            .cloned()
            .ok_or(BloscpackError::OffsetsDisabled)?;
        (*reader.header(), offsets, reader.chunks_start())
    };
    if header.chunk_size == CHUNK_SIZE_UNKNOWN || header.nchunks < 1 {
        return Err(BloscpackError::MalformedHeader(
            "container has no appendable chunk geometry".to_string(),
        ));
    }

    // reread the final chunk; it seeds the accumulator
    let old_nchunks = header.nchunks;
    let last_index = (old_nchunks - 1) as usize;
    let last_offset = offsets
        .chunk_offset(last_index)
        .ok_or(BloscpackError::ChunkOutOfRange(last_index))?;
    file.seek(SeekFrom::Start(last_offset))?;
    let frame = read_chunk_record(file, header.checksum, last_index)?;
    let last_bytes = blosc::decompress(&frame, args.nthreads)?;
    if last_bytes.len() != header.last_chunk as usize {
        return Err(BloscpackError::MalformedHeader(format!(
            "final chunk is {} bytes but the header claims {}",
            last_bytes.len(),
            header.last_chunk
        )));
    }

    // capacity is enforced up front, the file is untouched on failure
    let tail_len = last_bytes.len() as u64 + source_len;
    let (tail_chunks, _, new_last_chunk) = calculate_nchunks(tail_len, header.chunk_size)?;
    let new_nchunks = old_nchunks - 1 + tail_chunks;
    let added = new_nchunks - old_nchunks;
    if added > header.max_app_chunks {
        return Err(BloscpackError::AppendCapacityExceeded {
            needed: added,
            available: header.max_app_chunks,
        });
    }
    info!(
        "appending {}: {} chunks over the reserved space of {}",
        pretty_size(source_len),
        added,
        header.max_app_chunks
    );

    // metadata replacement happens before the tail rewrite so an oversized
    // blob also fails with the file intact
    if let Some(metadata) = &args.metadata {
        if !header.metadata {
            return Err(BloscpackError::MetaTooLarge {
                needed: serde_json::to_vec(metadata)?.len(),
                max_meta_size: 0,
            });
        }
        replace_metadata(file, HEADER_LENGTH as u64, metadata)?;
    }

    // rewrite the tail: the accumulator chained with the new source, cut
    // into chunks starting at the old final record's position
    let mut tail = Cursor::new(last_bytes).chain(source);
    file.seek(SeekFrom::Start(last_offset))?;
    let mut cbytes = 0u64;
    for j in 0..tail_chunks {
        let to_read = if j == tail_chunks - 1 {
            new_last_chunk
        } else {
            header.chunk_size
        } as usize;
        let mut data = vec![0u8; to_read];
        tail.read_exact(&mut data)?;

        let position = file.stream_position()?;
        cbytes += write_chunk(file, &data, args, header.checksum)?;
        offsets.set(last_index + j as usize, position);
        debug!(
            "chunk '{}': {} in",
            last_index + j as usize,
            pretty_size(data.len() as u64)
        );
    }

    // finalize: patch the offsets region, then the header counters
    let offsets_position = chunks_start - Offsets::encoded_size(header.total_entries()) as u64;
    file.seek(SeekFrom::Start(offsets_position))?;
    file.write_all(&offsets.serialize())?;

    let new_header = BloscpackHeader {
        nchunks: new_nchunks,
        last_chunk: new_last_chunk,
        // slots move from reserved to used, the region size is fixed
        max_app_chunks: header.max_app_chunks - added,
        ..header
    };
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&new_header.encode())?;

    Ok(Stats {
        nchunks: new_nchunks,
        chunk_size: header.chunk_size,
        last_chunk: new_last_chunk,
        nbytes: source_len,
        cbytes,
    })
}

pub fn append_file<P: AsRef<Path>, Q: AsRef<Path>>(
    original: P,
    new_file: Q,
    args: &PackArgs,
) -> Result<Stats> {
    let source_len = fs::metadata(new_file.as_ref())?.len();
    info!("appending file of size: {}", pretty_size(source_len));

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(original.as_ref())?;
    let mut source = File::open(new_file.as_ref())?;
    append_stream(&mut file, &mut source, source_len, args)
}
