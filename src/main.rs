mod error;
mod model;
mod regions;
mod replay;
mod trace;
mod verilog;

use std::{fs, num::ParseIntError, path::PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use log::{error, info};
use regions::generate_design;
use replay::{GeneratorConfig, SizePolicy};
use trace::TraceFile;

/// Turn a VFIO region access trace into SystemVerilog BAR controllers that
/// replay the recorded read responses.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Trace file; used when --input is not given
    #[arg(value_name = "LOGFILE")]
    logfile: Option<PathBuf>,

    /// Trace file to convert
    #[arg(short, long, value_name = "LOGFILE")]
    input: Option<PathBuf>,

    /// Generated SystemVerilog file
    #[arg(short, long, default_value = "gen_ctrl.sv")]
    output: PathBuf,

    /// Module name prefix, suffixed with the BAR index
    #[arg(short, long, default_value = "pcileech_impl_bar_controller")]
    module: String,

    /// Fail on reads that are neither 1 nor 4 bytes wide instead of replaying 0
    #[arg(long)]
    strict_sizes: bool,

    /// Replay the trace through a model of each generated module before saving
    #[arg(long)]
    verify: bool,

    /// Base address register value used by --verify, in hex
    #[arg(long, value_name = "HEX", default_value = "0", value_parser = parse_hex)]
    bar: u32,

    #[command(flatten)]
    verbosity: Verbosity<WarnLevel>,
}

impl Args {
    fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            module_prefix: self.module.clone(),
            size_policy: if self.strict_sizes {
                SizePolicy::Reject
            } else {
                SizePolicy::ZeroFill
            },
        }
    }
}

fn parse_hex(token: &str) -> Result<u32, ParseIntError> {
    let token = token.trim();
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u32::from_str_radix(digits, 16)
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .format_timestamp(None)
        .filter_level(args.verbosity.log_level_filter())
        .init();

    run(&args)
}

fn run(args: &Args) -> Result<()> {
    let Some(input) = args.input.as_ref().or(args.logfile.as_ref()) else {
        bail!("no input file, pass --input or give it as an argument");
    };

    info!("parsing log: {}", input.display());
    let trace = TraceFile::load(input).context("parse fail")?;
    info!(
        "{}: {} reads, {} writes ignored, {} lines",
        trace.name,
        trace.operations.len(),
        trace.writes_ignored,
        trace.lines
    );

    let design = generate_design(&trace.operations, &args.generator_config())
        .context("generation fail")?;
    println!("Generated {} modules:", design.modules.len());
    print!("{design}");

    if args.verify {
        let mut failed = 0;
        for module in &design.modules {
            for mismatch in module.verify(args.bar) {
                error!(
                    "{}: trace line {} at 0x{:04x} expected 0x{:08x}, served 0x{:08x}",
                    module.module_name,
                    mismatch.sequence_index,
                    mismatch.word_address,
                    mismatch.expected,
                    mismatch.served
                );
                failed += 1;
            }
        }
        if failed > 0 {
            bail!("replay model disagreed with the trace on {failed} reads");
        }
        info!("replay model reproduced every recorded read");
    }

    if let Some(dir) = args.output.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("Unable to create output directory {}", dir.display()))?;
    }
    fs::write(&args.output, design.render())
        .with_context(|| format!("Unable to write {}", args.output.display()))?;
    println!("saved all modules to {}", args.output.display());
    Ok(())
}
