//! Loads a hex instruction image and runs it on a LAPU-128 machine,
//! printing a per-instruction trace and, optionally, a final matrix bank
//! dump.

use clap::Parser;
use clap_num::maybe_hex;
use lapu128::emu::{self, Machine};
use lapu128::hexio;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

/// Run a LAPU-128 hex image to completion.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Hex instruction image to load.
    hexfile: PathBuf,

    /// Vector register lane count.
    #[arg(long, default_value = "8", value_parser = maybe_hex::<usize>)]
    vlen: usize,

    /// Matrix bank dimension as a multiple of `vlen` (must be > 1).
    #[arg(long = "n-mult", default_value = "2", value_parser = maybe_hex::<usize>)]
    n_mult: usize,

    /// Halt after this many executed instructions even if pc is still live.
    #[arg(long = "max-steps", default_value = "1000000", value_parser = maybe_hex::<u64>)]
    max_steps: u64,

    /// Treat the predicate scalar register as true if either its real or
    /// imaginary part is nonzero (default: real part only).
    #[arg(long)]
    predicate_imag: bool,

    /// Print the contents of a matrix bank after the run halts.
    #[arg(long = "pp-matrix", value_parser = maybe_hex::<u8>)]
    pp_matrix: Option<u8>,

    /// Row count to print with `--pp-matrix` (defaults to the full bank).
    #[arg(long = "pp-rows", value_parser = maybe_hex::<usize>)]
    pp_rows: Option<usize>,

    /// Column count to print with `--pp-matrix` (defaults to the full bank).
    #[arg(long = "pp-cols", value_parser = maybe_hex::<usize>)]
    pp_cols: Option<usize>,

    /// Suppress the per-instruction trace.
    #[arg(long)]
    quiet: bool,
}

fn print_bank(machine: &Machine, mbid: u8, rows: usize, cols: usize) {
    println!("bank {mbid}:");
    for row in machine.banks[mbid as usize].iter().take(rows) {
        let cells: Vec<String> = row
            .iter()
            .take(cols)
            .map(|(re, im)| format!("({re},{im})"))
            .collect();
        println!("  {}", cells.join(" "));
    }
}

fn run(args: Args) -> Result<(), String> {
    if args.vlen == 0 {
        return Err("--vlen must be > 0".to_string());
    }
    if args.n_mult <= 1 {
        return Err("--n-mult must be > 1".to_string());
    }

    let text = fs::read_to_string(&args.hexfile)
        .map_err(|e| format!("reading {}: {e}", args.hexfile.display()))?;
    let program = hexio::load_hex(&text).map_err(|e| e.to_string())?;

    let mut machine = Machine::new(args.vlen, args.n_mult, args.predicate_imag);
    let reason = emu::run(&mut machine, &program, args.max_steps, !args.quiet)
        .map_err(|e| e.to_string())?;
    println!("{reason}");
    println!("steps executed: {}", machine.steps);

    if let Some(mbid) = args.pp_matrix {
        let rows = args.pp_rows.unwrap_or(machine.bank_dim);
        let cols = args.pp_cols.unwrap_or(machine.bank_dim);
        print_bank(&machine, mbid, rows, cols);
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("emu: {message}");
            ExitCode::FAILURE
        }
    }
}
