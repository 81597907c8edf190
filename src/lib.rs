//! Bloscpack: a container format for large binary payloads stored as a
//! sequence of independently blosc-compressed, checksummed chunks.
//!
//! # Top level
//!
//! A container is a single sequential byte stream. Unless otherwise noted
//! every multi-byte field is stored in little endian format.
//!
//! | Section           | Size                            | Present |
//! | ----------------- | ------------------------------- | ------- |
//! | bloscpack header  | 32 B                            | always  |
//! | metadata section  | 32 B + max_meta_size + digest   | options bit 1 |
//! | offsets           | 8 * (nchunks + max_app_chunks)  | options bit 0 |
//! | chunk records     | per-record framing              | always  |
//!
//! The magic marker `blpk` at byte 0 is the file-type probe. See
//! [`header::BloscpackHeader`] for the exact field layout.
//!
//! # Chunk records
//!
//! Each record is the block codec's own framed output followed by a digest
//! over exactly those framed bytes. The frame carries its compressed and
//! uncompressed sizes (see [`blosc::BloscHeader`]), so records need no
//! extra length field and can be walked sequentially without the offsets
//! index. The digest width is fixed per file by the checksum id in the
//! bloscpack header; `none` contributes zero bytes.
//!
//! # Appending
//!
//! Creating a container reserves `max_app_chunks` spare offset slots.
//! [`append_stream`] extends the file in place by repacking the final
//! (possibly short) chunk and claiming reserved slots for the records it
//! adds; all earlier bytes are immutable. A single writer or appender owns
//! the file at a time, finalized files support any number of concurrent
//! readers.
//!
//! # Example
//!
//! ```no_run
//! use std::io::Cursor;
//!
//! use bloscpack::{pack_stream, unpack_stream, PackArgs};
//!
//! # fn main() -> bloscpack::Result<()> {
//! let payload = vec![0u8; 1 << 20];
//! let mut container = Cursor::new(Vec::new());
//! pack_stream(
//!     &mut Cursor::new(payload.clone()),
//!     Some(payload.len() as u64),
//!     &mut container,
//!     &PackArgs::default(),
//! )?;
//!
//! let mut restored = Vec::new();
//! unpack_stream(&mut container, &mut restored, 1)?;
//! assert_eq!(restored, payload);
//! # Ok(())
//! # }
//! ```

pub mod append;
pub mod blosc;
pub mod checksum;
pub mod chunk;
pub mod error;
pub mod header;
pub mod metadata;
pub mod offsets;
pub mod pack;
pub mod unpack;
pub mod util;

pub use crate::append::{append_file, append_stream};
pub use crate::blosc::Codec;
pub use crate::checksum::Checksum;
pub use crate::chunk::ChunkSize;
pub use crate::error::{BloscpackError, Result};
pub use crate::header::{BloscpackHeader, MetadataHeader};
pub use crate::pack::{pack_file, pack_stream, PackArgs, Stats};
pub use crate::unpack::{info, info_file, unpack_file, unpack_stream, Info, PackReader};
