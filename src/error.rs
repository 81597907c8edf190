use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BloscpackError>;

#[derive(Error, Debug)]
pub enum BloscpackError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("the magic marker 'blpk' is missing from the bloscpack header")]
    BadMagic,
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    #[error("file ends before the container is complete")]
    TruncatedFile,
    #[error("chunk '{0}' is truncated")]
    TruncatedChunk(usize),

    #[error("checksum mismatch in chunk '{0}'")]
    ChunkChecksumMismatch(usize),
    #[error("checksum mismatch in the metadata section")]
    MetaChecksumMismatch,

    #[error("unknown codec: '{0}'")]
    UnknownCodec(String),
    #[error("unknown checksum: '{0}'")]
    UnknownChecksum(String),
    #[error("chunk size out of range: {0}")]
    ChunkSizeOutOfRange(String),
    #[error("typesize must be in [1, 255]: {0}")]
    TypesizeInvalid(usize),
    #[error("compression level must be in [0, 9]: {0}")]
    ClevelOutOfRange(usize),
    #[error("nthreads must be in [1, 256]: {0}")]
    NthreadsOutOfRange(usize),
    #[error("offsets require an input of known length")]
    UnknownInputLength,

    #[error("append needs {needed} reserved chunk slots but only {available} remain")]
    AppendCapacityExceeded { needed: i64, available: i64 },
    #[error("metadata of {needed} bytes exceeds the reserved slot of {max_meta_size} bytes")]
    MetaTooLarge { needed: usize, max_meta_size: usize },
    #[error("container has no offsets, random access is unavailable")]
    OffsetsDisabled,
    #[error("chunk index out of range: {0}")]
    ChunkOutOfRange(usize),

    #[error("codec failure: {0}")]
    Decode(String),
    #[error("metadata is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("output file '{}' exists, use --force to overwrite", .0.display())]
    OutputExists(PathBuf),
    #[error("input file '{}' does not end with '.blp'", .0.display())]
    ExtensionMismatch(PathBuf),
    #[error("input file '{}' does not exist", .0.display())]
    FileNotFound(PathBuf),
}
