//! Assembles a LAPU-128 source file into a hex (and optionally raw binary)
//! instruction stream.

use clap::Parser;
use lapu128::{asm, hexio};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

/// Assemble a LAPU-128 source file into hex, and optionally raw binary.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Source file to assemble.
    input: PathBuf,

    /// Output path prefix (defaults to the input file's stem). Writes
    /// `<prefix>.hex`, and `<prefix>.bin` if `--bin` is given.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also emit a raw little-endian binary image alongside the hex file.
    #[arg(long)]
    bin: bool,
}

fn run(args: Args) -> Result<(), String> {
    let source = fs::read_to_string(&args.input)
        .map_err(|e| format!("reading {}: {e}", args.input.display()))?;
    let words = asm::assemble(&source).map_err(|e| e.to_string())?;

    let prefix = args.output.clone().unwrap_or_else(|| {
        args.input
            .with_extension("")
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("out"))
    });

    let hex_path = prefix.with_extension("hex");
    fs::write(&hex_path, hexio::write_hex(&words))
        .map_err(|e| format!("writing {}: {e}", hex_path.display()))?;
    log::info!("wrote {} ({} words)", hex_path.display(), words.len());

    if args.bin {
        let bin_path = prefix.with_extension("bin");
        fs::write(&bin_path, hexio::write_bin(&words))
            .map_err(|e| format!("writing {}: {e}", bin_path.display()))?;
        log::info!("wrote {}", bin_path.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("asm: {message}");
            ExitCode::FAILURE
        }
    }
}
