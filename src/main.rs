use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{CommandFactory, Parser};
use serde_json::Value;
use tracing::info;

use bloscpack::{
    append_file, info_file, pack_file, unpack_file, BloscpackError, Info, PackArgs, Result,
};

mod cli;
use crate::cli::{BloscOpts, Cli, Commands};

const EXTENSION: &str = ".blp";

fn main() {
    let cli = Cli::parse();

    let level = if cli.debug {
        tracing::Level::DEBUG
    } else if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .init();

    if let Err(e) = run(cli) {
        eprintln!("blpk: error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Compress {
            blosc,
            chunk_size,
            checksum,
            no_offsets,
            metadata,
            in_file,
            out_file,
        } => {
            let in_file = existing(in_file)?;
            let out_file = out_file.unwrap_or_else(|| {
                let mut name = in_file.clone().into_os_string();
                name.push(EXTENSION);
                PathBuf::from(name)
            });
            check_output(&out_file, cli.force)?;

            let args = PackArgs {
                chunk_size,
                checksum,
                offsets: !no_offsets,
                metadata: read_metadata_file(metadata)?,
                ..pack_args(&blosc, cli.nthreads)
            };
            pack_file(&in_file, &out_file, &args)?;
        }

        Commands::Decompress {
            no_check_extension,
            in_file,
            out_file,
        } => {
            let in_file = existing(in_file)?;
            if !no_check_extension {
                check_extension(&in_file)?;
            }
            let out_file = match out_file {
                Some(path) => path,
                None => {
                    if no_check_extension {
                        argument_error("--no-check-extension requires use of <out_file>");
                    }
                    strip_extension(&in_file)
                }
            };
            check_output(&out_file, cli.force)?;

            if let Some(metadata) = unpack_file(&in_file, &out_file, cli.nthreads)? {
                info!("metadata: {}", metadata);
            }
        }

        Commands::Append {
            blosc,
            metadata,
            no_check_extension,
            original,
            new_file,
        } => {
            let original = existing(original)?;
            let new_file = existing(new_file)?;
            if !no_check_extension {
                check_extension(&original)?;
            }

            let args = PackArgs {
                metadata: read_metadata_file(metadata)?,
                ..pack_args(&blosc, cli.nthreads)
            };
            append_file(&original, &new_file, &args)?;
        }

        Commands::Info { file } => {
            let file = existing(file)?;
            print_info(&file, &info_file(&file)?);
        }
    }
    Ok(())
}

fn pack_args(blosc: &BloscOpts, nthreads: usize) -> PackArgs {
    PackArgs {
        typesize: blosc.typesize,
        clevel: blosc.clevel,
        shuffle: !blosc.no_shuffle,
        codec: blosc.codec,
        nthreads,
        ..PackArgs::default()
    }
}

fn existing(path: PathBuf) -> Result<PathBuf> {
    if path.exists() {
        Ok(path)
    } else {
        Err(BloscpackError::FileNotFound(path))
    }
}

fn check_output(path: &Path, force: bool) -> Result<()> {
    if path.exists() {
        if !force {
            return Err(BloscpackError::OutputExists(path.to_path_buf()));
        }
        info!("overwriting existing file: {}", path.display());
    }
    Ok(())
}

fn check_extension(path: &Path) -> Result<()> {
    if path.to_string_lossy().ends_with(EXTENSION) {
        Ok(())
    } else {
        Err(BloscpackError::ExtensionMismatch(path.to_path_buf()))
    }
}

fn strip_extension(path: &Path) -> PathBuf {
    let name = path.to_string_lossy();
    match name.strip_suffix(EXTENSION) {
        Some(stripped) => PathBuf::from(stripped.to_string()),
        None => path.to_path_buf(),
    }
}

fn read_metadata_file(path: Option<PathBuf>) -> Result<Option<Value>> {
    match path {
        None => Ok(None),
        Some(path) => {
            let path = existing(path)?;
            Ok(Some(serde_json::from_slice(&fs::read(path)?)?))
        }
    }
}

// Argument combination errors go through clap so they exit with code 2
// like every other usage error.
fn argument_error(message: &str) -> ! {
    Cli::command()
        .error(clap::error::ErrorKind::MissingRequiredArgument, message)
        .exit()
}

fn print_info(path: &Path, info: &Info) {
    let header = &info.header;
    println!("{}:", path.display());
    println!("bloscpack header:");
    println!("    format_version: {}", header.format_version);
    println!("    offsets: {}", header.offsets);
    println!("    metadata: {}", header.metadata);
    println!("    checksum: {}", header.checksum);
    println!("    typesize: {}", header.typesize);
    println!("    chunk_size: {}", header.chunk_size);
    println!("    last_chunk: {}", header.last_chunk);
    println!("    nchunks: {}", header.nchunks);
    println!("    max_app_chunks: {}", header.max_app_chunks);

    if let Some(meta_header) = &info.metadata_header {
        println!("metadata header:");
        println!(
            "    magic_format: {}",
            String::from_utf8_lossy(&meta_header.magic_format).trim_end_matches('\0')
        );
        println!("    meta_checksum: {}", meta_header.meta_checksum);
        println!("    meta_codec: {}", meta_header.meta_codec);
        println!("    meta_level: {}", meta_header.meta_level);
        println!("    meta_size: {}", meta_header.meta_size);
        println!("    meta_comp_size: {}", meta_header.meta_comp_size);
        println!("    max_meta_size: {}", meta_header.max_meta_size);
    }
    if let Some(metadata) = &info.metadata {
        println!("metadata: {}", metadata);
    }

    if !info.offsets.is_empty() {
        let preview: Vec<u64> = info.offsets.iter().take(5).copied().collect();
        let more = if info.offsets.len() > 5 { " ..." } else { "" };
        println!("first offsets: {:?}{}", preview, more);
    }
}
