use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use bloscpack::{Checksum, ChunkSize, Codec};

#[derive(Parser)]
#[command(name = "blpk")]
#[command(about = "command line de/compression with blosc")]
#[command(author, version, long_about = None)]
pub struct Cli {
    /// Be verbose about actions
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print debug diagnostics
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub debug: bool,

    /// Disable overwrite checks for existing files (use with caution)
    #[arg(short, long, global = true)]
    pub force: bool,

    /// Number of threads for intra-chunk de/compression
    #[arg(
        short,
        long,
        global = true,
        value_name = "[1, 256]",
        default_value_t = num_cpus::get()
    )]
    pub nthreads: usize,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compress a file into a bloscpack container
    #[command(visible_alias = "c")]
    Compress {
        #[command(flatten)]
        blosc: BloscOpts,

        /// Chunk size in bytes, or 'max' for the codec's per-call limit
        #[arg(short = 'z', long, value_name = "SIZE", default_value = "1048576")]
        chunk_size: ChunkSize,

        /// Checksum applied to every chunk record
        #[arg(short = 'k', long, default_value = "adler32")]
        checksum: Checksum,

        /// Deactivate the chunk offsets index
        #[arg(short = 'o', long)]
        no_offsets: bool,

        /// File holding a JSON metadata blob to store in the container
        #[arg(short, long, value_name = "FILE")]
        metadata: Option<PathBuf>,

        /// File to be compressed
        in_file: PathBuf,

        /// File to compress to, defaults to <in_file>.blp
        out_file: Option<PathBuf>,
    },

    /// Decompress a bloscpack container
    #[command(visible_alias = "d")]
    Decompress {
        /// Disable checking the input for the '.blp' extension
        /// (requires use of <out_file>)
        #[arg(short = 'e', long)]
        no_check_extension: bool,

        /// File to be decompressed
        in_file: PathBuf,

        /// File to decompress to, defaults to <in_file> without '.blp'
        out_file: Option<PathBuf>,
    },

    /// Append a file to an existing container
    #[command(visible_alias = "a")]
    Append {
        #[command(flatten)]
        blosc: BloscOpts,

        /// File holding a JSON metadata blob that replaces the stored one
        #[arg(short, long, value_name = "FILE")]
        metadata: Option<PathBuf>,

        /// Disable checking the container for the '.blp' extension
        #[arg(short = 'e', long)]
        no_check_extension: bool,

        /// Container to append to
        original: PathBuf,

        /// File with the data to append
        new_file: PathBuf,
    },

    /// Print the headers and metadata of a container
    #[command(visible_alias = "i")]
    Info {
        /// Container to inspect
        file: PathBuf,
    },
}

/// The blosc settings, shared by compress and append.
#[derive(Args)]
pub struct BloscOpts {
    /// Typesize hint for blosc's shuffle filter
    #[arg(short, long, value_name = "SIZE", default_value_t = 8)]
    pub typesize: u8,

    /// Compression level
    #[arg(short = 'l', long, value_name = "[0, 9]", default_value_t = 7)]
    pub clevel: u8,

    /// Deactivate shuffle preconditioning
    #[arg(short = 's', long)]
    pub no_shuffle: bool,

    /// Codec used by blosc for the chunk payloads
    #[arg(short, long, default_value = "blosclz")]
    pub codec: Codec,
}
