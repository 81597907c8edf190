//! Registry of the checksums a container may apply to its chunk records
//! and metadata blob.
//!
//! The ids are part of the wire format and are assigned in the order of
//! [`Checksum::ALL`]; new algorithms may only ever be appended.

use std::fmt;
use std::str::FromStr;

use adler32::RollingAdler32;
use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};

use crate::error::{BloscpackError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checksum {
    None,
    Adler32,
    Crc32,
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl Checksum {
    /// Wire-format order; a checksum's id is its position in this table.
    pub const ALL: [Checksum; 9] = [
        Checksum::None,
        Checksum::Adler32,
        Checksum::Crc32,
        Checksum::Md5,
        Checksum::Sha1,
        Checksum::Sha224,
        Checksum::Sha256,
        Checksum::Sha384,
        Checksum::Sha512,
    ];

    pub fn id(&self) -> u8 {
        Self::ALL.iter().position(|c| c == self).unwrap() as u8
    }

    pub fn from_id(id: u8) -> Result<Checksum> {
        Self::ALL
            .get(id as usize)
            .copied()
            .ok_or_else(|| BloscpackError::UnknownChecksum(format!("id {}", id)))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Checksum::None => "none",
            Checksum::Adler32 => "adler32",
            Checksum::Crc32 => "crc32",
            Checksum::Md5 => "md5",
            Checksum::Sha1 => "sha1",
            Checksum::Sha224 => "sha224",
            Checksum::Sha256 => "sha256",
            Checksum::Sha384 => "sha384",
            Checksum::Sha512 => "sha512",
        }
    }

    pub fn digest_size(&self) -> usize {
        match self {
            Checksum::None => 0,
            Checksum::Adler32 | Checksum::Crc32 => 4,
            Checksum::Md5 => 16,
            Checksum::Sha1 => 20,
            Checksum::Sha224 => 28,
            Checksum::Sha256 => 32,
            Checksum::Sha384 => 48,
            Checksum::Sha512 => 64,
        }
    }

    /// Digest of `data`; the u32 checksums are encoded little-endian, the
    /// hash family is stored as raw digest bytes.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Checksum::None => Vec::new(),
            Checksum::Adler32 => {
                let mut hash = RollingAdler32::new();
                hash.update_buffer(data);
                hash.hash().to_le_bytes().to_vec()
            }
            Checksum::Crc32 => {
                let mut hash = crc32fast::Hasher::new();
                hash.update(data);
                hash.finalize().to_le_bytes().to_vec()
            }
            Checksum::Md5 => Md5::digest(data).to_vec(),
            Checksum::Sha1 => Sha1::digest(data).to_vec(),
            Checksum::Sha224 => Sha224::digest(data).to_vec(),
            Checksum::Sha256 => Sha256::digest(data).to_vec(),
            Checksum::Sha384 => Sha384::digest(data).to_vec(),
            Checksum::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

impl Default for Checksum {
    fn default() -> Self {
        Checksum::Adler32
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Checksum {
    type Err = BloscpackError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .find(|c| c.name() == s)
            .copied()
            .ok_or_else(|| BloscpackError::UnknownChecksum(s.to_string()))
    }
}
