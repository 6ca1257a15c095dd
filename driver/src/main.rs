use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use model::{Program, SimdProfile};
use optimizer::{OptLevel, OptOptions};
use pgo::Profile;

#[derive(Parser, Debug)]
#[command(version, about = "Tree-level program optimizer", long_about = None)]
struct Args {
    /// Path to the program, as JSON emitted by the front end
    input_path: PathBuf,

    /// Optimization level
    #[arg(short = 'O', value_parser = clap::value_parser!(u8).range(0..=3), default_value_t = 0)]
    opt_level: u8,

    /// SIMD register width to vectorize for
    #[arg(long, value_enum, default_value_t = SimdArg::Sse)]
    simd: SimdArg,

    /// Use an execution profile to guide inlining
    #[arg(long, value_name = "FILE")]
    profile_use: Option<PathBuf>,

    /// Where to write the optimized program (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SimdArg {
    Sse,
    Avx,
}

impl From<SimdArg> for SimdProfile {
    fn from(arg: SimdArg) -> SimdProfile {
        match arg {
            SimdArg::Sse => SimdProfile::Sse128,
            SimdArg::Avx => SimdProfile::Avx256,
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let source = fs::read_to_string(&args.input_path)
        .with_context(|| format!("reading {}", args.input_path.display()))?;
    let mut program: Program =
        serde_json::from_str(&source).context("input is not a valid program")?;

    let profile = match &args.profile_use {
        Some(path) => Some(
            Profile::load(path).with_context(|| format!("loading profile {}", path.display()))?,
        ),
        None => None,
    };

    let opts = OptOptions {
        // the range parser admits only 0..=3
        level: OptLevel::from_number(args.opt_level).unwrap_or(OptLevel::O0),
        simd: args.simd.into(),
        profile,
    };
    optimizer::optimize(&mut program, &opts).context("optimization failed")?;

    let rendered = serde_json::to_string_pretty(&program)?;
    match &args.output {
        Some(path) => fs::write(path, rendered)
            .with_context(|| format!("writing {}", path.display()))?,
        None => println!("{rendered}"),
    }
    Ok(())
}
