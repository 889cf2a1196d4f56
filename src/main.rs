// rv2c - RISC-V to C static binary translator
//
// Usage:
//   rv2c input.elf guest.h
//   rv2c input.elf guest.h -c guest.c -O 2

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rv2c")]
#[command(about = "RISC-V RV32IM to C static binary translator")]
#[command(version)]
struct Args {
    /// Input RISC-V ELF binary
    input: PathBuf,

    /// Output C header
    header: PathBuf,

    /// Output C implementation (defaults to the header with a .c extension)
    #[arg(short = 'c', long = "impl")]
    implementation: Option<PathBuf>,

    /// Optimization level (0-2)
    #[arg(short = 'O', default_value = "1")]
    opt_level: u8,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.verbose { "debug" } else { "warn" }),
    )
    .init();

    let elf_data = std::fs::read(&args.input).context("Failed to read input ELF")?;

    let header_name = args
        .header
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "guest.h".to_string());

    let output = rv2c::translate(&elf_data, args.opt_level, &header_name)?;

    let impl_path = args
        .implementation
        .clone()
        .unwrap_or_else(|| args.header.with_extension("c"));

    std::fs::write(&args.header, &output.header).context("Failed to write header")?;
    std::fs::write(&impl_path, &output.source).context("Failed to write implementation")?;

    if args.verbose {
        eprintln!("Wrote: {}", args.header.display());
        eprintln!("Wrote: {}", impl_path.display());
    }

    Ok(())
}
