// SPDX-License-Identifier: MIT

mod log;
mod util;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use vdi_core::header::SECTOR_SIZE;
use vdi_core::VdiDisk;
use vdi_io::prelude::*;

use crate::log::LogLevel;

#[derive(Parser)]
#[command(name = "vdi-cli", version, about = "VirtualBox VDI image tool", long_about = None)]
struct Cli {
    /// Suppress normal output, only report errors.
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Print extra diagnostics.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new VDI image.
    Create {
        #[arg(short, long)]
        output: PathBuf,
        /// Virtual disk size, e.g. "64M", "2G", or a plain byte count.
        #[arg(short, long)]
        size: String,
        /// Fully pre-allocate instead of creating a sparse dynamic image.
        #[arg(long)]
        r#static: bool,
        /// Image UUID (random if omitted).
        #[arg(long)]
        uuid: Option<String>,
    },
    /// Scan an image's block map for inconsistencies.
    Check {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Sniff a file for the VDI signature.
    Probe {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Print header fields and the live allocation ratio.
    Stat {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Read sectors and write them to stdout or a file.
    Read {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long)]
        sector: u64,
        #[arg(long, default_value_t = 1)]
        count: u64,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Write the contents of a file to sectors, starting at `sector`.
    Write {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long)]
        sector: u64,
        #[arg(long = "in")]
        data: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.quiet {
        log::set_log_level(LogLevel::Quiet);
    } else if cli.verbose {
        log::set_log_level(LogLevel::Verbose);
    }

    match cli.command {
        Commands::Create {
            output,
            size,
            r#static,
            uuid,
        } => cmd_create(&output, &size, r#static, uuid.as_deref()),
        Commands::Check { input } => cmd_check(&input),
        Commands::Probe { input } => cmd_probe(&input),
        Commands::Stat { input } => cmd_stat(&input),
        Commands::Read {
            input,
            sector,
            count,
            out,
        } => cmd_read(&input, sector, count, out.as_deref()),
        Commands::Write { input, sector, data } => cmd_write(&input, sector, &data),
    }
}

fn cmd_create(output: &std::path::Path, size: &str, static_alloc: bool, uuid: Option<&str>) -> anyhow::Result<()> {
    let t0 = Instant::now();
    let size_bytes = util::parse_size(size)?;
    let uuid = match uuid {
        Some(s) => util::parse_uuid(s)?,
        None => *uuid::Uuid::new_v4().as_bytes(),
    };

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(output)?;
    let io = FileBackend::new(&mut file);

    let disk = match VdiDisk::create(io, size_bytes, static_alloc, uuid) {
        Ok(d) => d,
        Err(e) => {
            let _ = std::fs::remove_file(output);
            anyhow::bail!("failed to create {}: {e}", output.display());
        }
    };
    let header = disk.header();
    let dt = t0.elapsed().as_secs_f32();

    crate::log_normal!(
        "created {} ({}, {} blocks) in {:.2}s",
        output.display(),
        util::pretty_bytes(header.disk_size),
        header.blocks_in_image,
        dt
    );
    Ok(())
}

fn cmd_check(input: &std::path::Path) -> anyhow::Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(input)?;
    let io = FileBackend::new(&mut file);
    let disk = VdiDisk::open(io)?;
    let report = disk.check();

    for finding in &report.findings {
        crate::log_normal!("{finding}");
    }

    if report.has_error() {
        anyhow::bail!("{} finding(s), {} error(s)", report.findings.len(), report.error_count());
    }
    crate::log_normal!("{} clean", input.display());
    Ok(())
}

fn cmd_probe(input: &std::path::Path) -> anyhow::Result<()> {
    let bytes = std::fs::read(input)?;
    let score = vdi_core::VdiFormat::probe(&bytes);
    println!("{score}");
    if score == 0 {
        anyhow::bail!("{} does not look like a VDI image", input.display());
    }
    Ok(())
}

fn cmd_stat(input: &std::path::Path) -> anyhow::Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(input)?;
    let io = FileBackend::new(&mut file);
    let disk = VdiDisk::open(io)?;
    let h = disk.header();

    let ratio = if h.blocks_in_image == 0 {
        0.0
    } else {
        h.blocks_allocated as f64 / h.blocks_in_image as f64 * 100.0
    };

    println!("image_type:       {}", h.image_type);
    println!("disk_size:        {} ({})", h.disk_size, util::pretty_bytes(h.disk_size));
    println!("block_size:       {}", h.block_size);
    println!("blocks_in_image:  {}", h.blocks_in_image);
    println!("blocks_allocated: {} ({ratio:.1}%)", h.blocks_allocated);
    println!("uuid_image:       {}", uuid::Uuid::from_bytes(h.uuid_image));
    Ok(())
}

fn cmd_read(input: &std::path::Path, sector: u64, count: u64, out: Option<&std::path::Path>) -> anyhow::Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(input)?;
    let io = FileBackend::new(&mut file);
    let mut disk = VdiDisk::open(io)?;

    let mut buf = vec![0u8; (count * SECTOR_SIZE) as usize];
    let got = disk.read_at(sector, &mut buf)?;
    crate::log_verbose!("read {got} sector(s) starting at {sector}");

    match out {
        Some(path) => std::fs::write(path, &buf)?,
        None => {
            use std::io::Write as _;
            std::io::stdout().write_all(&buf)?;
        }
    }
    Ok(())
}

fn cmd_write(input: &std::path::Path, sector: u64, data: &std::path::Path) -> anyhow::Result<()> {
    let payload = std::fs::read(data)?;
    if payload.len() as u64 % SECTOR_SIZE != 0 {
        anyhow::bail!("{} is not a multiple of {SECTOR_SIZE} bytes", data.display());
    }

    let mut file = OpenOptions::new().read(true).write(true).open(input)?;
    let io = FileBackend::new(&mut file);
    let mut disk = VdiDisk::open(io)?;

    let written = disk.write_at(sector, &payload)?;
    crate::log_normal!("wrote {written} sector(s) starting at {sector}");
    Ok(())
}
