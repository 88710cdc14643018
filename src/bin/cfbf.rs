//! cfbf command-line tool
//!
//! Inspect and edit compound files from the shell

use anyhow::{bail, Context, Result};
use cfbf_rs::{CompoundFile, CompoundFileBuilder};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cfbf")]
#[command(about = "Inspect and edit Compound File Binary Format (OLE2) containers")]
struct Args {
    /// Path to the compound file
    #[arg(short = 'f', long)]
    file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty container
    New {
        /// Main block size in bytes (512 or 4096)
        #[arg(short = 'b', long, default_value = "512")]
        block_size: usize,
    },

    /// List every entry below a storage
    Ls {
        #[arg(default_value = "/")]
        path: String,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Copy a stream's contents to stdout
    Cat { path: String },

    /// Store a local file as a stream (parents are created)
    Put { path: String, source: PathBuf },

    /// Delete a stream or an empty storage
    Rm { path: String },

    /// Create a storage
    Mkdir { path: String },

    /// Allocation statistics as JSON
    Stat,

    /// Check every chain for loops and cross-links
    Verify,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let Args { file: path_on_disk, command } = Args::parse();

    match command {
        Command::New { block_size } => {
            CompoundFileBuilder::new()
                .path(&path_on_disk)
                .block_size(block_size)
                .build()?
                .close()?;
            info!("Created {:?}", path_on_disk);
        }

        Command::Ls { path, json } => {
            let file = open_read_only(&path_on_disk)?;
            let entries = file.list_entries(&path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in entries {
                    match entry.size {
                        Some(size) => println!("{:>10}  {}", size, entry.path),
                        None => println!("{:>10}  {}/", "-", entry.path),
                    }
                }
            }
        }

        Command::Cat { path } => {
            let file = open_read_only(&path_on_disk)?;
            let data = file.read(&path)?;
            std::io::stdout().lock().write_all(&data)?;
        }

        Command::Put { path, source } => {
            let data = std::fs::read(&source)
                .with_context(|| format!("Failed to read {}", source.display()))?;
            let mut file = open(&path_on_disk)?;
            file.write(&path, &data)?;
            file.close()?;
            info!("Stored {} bytes at {}", data.len(), path);
        }

        Command::Rm { path } => {
            let mut file = open(&path_on_disk)?;
            if !file.delete(&path)? {
                bail!("{} is a storage that still has entries", path);
            }
            file.close()?;
        }

        Command::Mkdir { path } => {
            let mut file = open(&path_on_disk)?;
            file.create_dir(&path)?;
            file.close()?;
        }

        Command::Stat => {
            let file = open_read_only(&path_on_disk)?;
            println!("{}", serde_json::to_string_pretty(&file.stats())?);
        }

        Command::Verify => {
            let file = open_read_only(&path_on_disk)?;
            file.verify()
                .with_context(|| format!("{} failed verification", path_on_disk.display()))?;
            println!("ok");
        }
    }

    Ok(())
}

fn open(path: &Path) -> Result<CompoundFile> {
    CompoundFile::open(path).with_context(|| format!("Failed to open {}", path.display()))
}

fn open_read_only(path: &Path) -> Result<CompoundFile> {
    CompoundFile::open_read_only(path)
        .with_context(|| format!("Failed to open {}", path.display()))
}
