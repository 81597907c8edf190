//! Chunking policy: how an input stream is cut into the fixed-size pieces
//! that become independently compressed records.

use std::io::Read;
use std::str::FromStr;

use crate::blosc::MAX_BUFFERSIZE;
use crate::error::{BloscpackError, Result};

pub const DEFAULT_CHUNK_SIZE: u32 = 1_048_576;

/// Requested chunk size: an explicit byte count or the codec's per-call
/// limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkSize {
    Bytes(u32),
    Max,
}

impl ChunkSize {
    /// The concrete chunk size to write with. `Max` resolves against the
    /// input length and so needs one.
    pub fn resolve(&self, input_len: Option<u64>) -> Result<u32> {
        match (self, input_len) {
            (ChunkSize::Bytes(bytes), _) => {
                if *bytes == 0 || *bytes as usize > MAX_BUFFERSIZE {
                    Err(BloscpackError::ChunkSizeOutOfRange(bytes.to_string()))
                } else {
                    Ok(*bytes)
                }
            }
            (ChunkSize::Max, Some(len)) => Ok(len.clamp(1, MAX_BUFFERSIZE as u64) as u32),
            (ChunkSize::Max, None) => Err(BloscpackError::UnknownInputLength),
        }
    }
}

impl Default for ChunkSize {
    fn default() -> Self {
        ChunkSize::Bytes(DEFAULT_CHUNK_SIZE)
    }
}

impl FromStr for ChunkSize {
    type Err = BloscpackError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "max" {
            return Ok(ChunkSize::Max);
        }
        let bytes: i64 = s
            .parse()
            .map_err(|_| BloscpackError::ChunkSizeOutOfRange(s.to_string()))?;
        if bytes <= 0 || bytes as usize > MAX_BUFFERSIZE {
            return Err(BloscpackError::ChunkSizeOutOfRange(s.to_string()));
        }
        Ok(ChunkSize::Bytes(bytes as u32))
    }
}

/// Chunk geometry for an input of known length: `(nchunks, chunk_size,
/// last_chunk)`. An empty input still gets one (empty) chunk so that every
/// container holds at least one record.
pub fn calculate_nchunks(input_len: u64, chunk_size: u32) -> Result<(i64, u32, u32)> {
    let chunk_size = ChunkSize::Bytes(chunk_size).resolve(Some(input_len))?;
    if input_len == 0 {
        return Ok((1, chunk_size, 0));
    }
    let nchunks = input_len.div_ceil(chunk_size as u64);
    let last_chunk = input_len - (nchunks - 1) * chunk_size as u64;
    Ok((nchunks as i64, chunk_size, last_chunk as u32))
}

/// Iterator cutting a reader into owned chunks of up to `chunk_size` bytes;
/// only the final chunk may be short. Sized reads are retried until the
/// buffer is full or the source reports end of stream.
pub struct ChunkIter<R: Read> {
    inner: R,
    chunk_size: usize,
    done: bool,
}

impl<R: Read> ChunkIter<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        ChunkIter {
            inner: reader,
            chunk_size,
            done: false,
        }
    }

    fn read_full(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> Iterator for ChunkIter<R> {
    type Item = std::io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0u8; self.chunk_size];
        match self.read_full(&mut buf) {
            Ok(0) => None,
            Ok(filled) => {
                buf.truncate(filled);
                Some(Ok(buf))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod test_chunking {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn geometry_for_a_large_input() {
        // 160 MB of float64 at the default chunk size
        let (nchunks, chunk_size, last_chunk) =
            calculate_nchunks(160_000_000, DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(nchunks, 153);
        assert_eq!(chunk_size, 1_048_576);
        assert_eq!(last_chunk, 616_448);
        assert_eq!(
            (nchunks as u64 - 1) * chunk_size as u64 + last_chunk as u64,
            160_000_000
        );
    }

    #[test]
    fn geometry_for_exact_multiples() {
        let (nchunks, _, last_chunk) = calculate_nchunks(4096, 1024).unwrap();
        assert_eq!(nchunks, 4);
        assert_eq!(last_chunk, 1024);
    }

    #[test]
    fn geometry_for_small_and_empty_inputs() {
        assert_eq!(calculate_nchunks(10, 1024).unwrap(), (1, 1024, 10));
        assert_eq!(calculate_nchunks(0, 1024).unwrap(), (1, 1024, 0));
    }

    #[test]
    fn max_resolves_to_input_or_limit() {
        assert_eq!(ChunkSize::Max.resolve(Some(4096)).unwrap(), 4096);
        assert_eq!(
            ChunkSize::Max.resolve(Some(u64::MAX)).unwrap() as usize,
            MAX_BUFFERSIZE
        );
        assert!(matches!(
            ChunkSize::Max.resolve(None),
            Err(BloscpackError::UnknownInputLength)
        ));
    }

    #[test]
    fn parse_rejects_out_of_range() {
        assert_eq!("max".parse::<ChunkSize>().unwrap(), ChunkSize::Max);
        assert_eq!(
            "1048576".parse::<ChunkSize>().unwrap(),
            ChunkSize::Bytes(1_048_576)
        );
        for bad in ["-1", "0", "1e6", "lots"] {
            assert!(matches!(
                bad.parse::<ChunkSize>(),
                Err(BloscpackError::ChunkSizeOutOfRange(_))
            ));
        }
    }

    #[test]
    fn iter_cuts_exact_chunks() {
        let data: Vec<u8> = (0u16..=255).map(|b| b as u8).collect();
        let chunks: Vec<Vec<u8>> = ChunkIter::new(Cursor::new(data.clone()), 100)
            .map(|c| c.unwrap())
            .collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], data[0..100]);
        assert_eq!(chunks[1], data[100..200]);
        assert_eq!(chunks[2], data[200..256]);
    }

    #[test]
    fn iter_has_no_trailing_empty_chunk() {
        let data = vec![7u8; 200];
        let chunks: Vec<Vec<u8>> = ChunkIter::new(Cursor::new(data), 100)
            .map(|c| c.unwrap())
            .collect();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 100));
    }

    #[test]
    fn iter_on_empty_input() {
        assert!(ChunkIter::new(Cursor::new(Vec::new()), 100)
            .next()
            .is_none());
    }
}
