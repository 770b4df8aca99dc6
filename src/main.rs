use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use hdr_pq_png::config::{ConvertConfig, DEFAULT_OUTPUT_PATH, PQ_PEAK_NITS};
use hdr_pq_png::convert::warmup;
use hdr_pq_png::{ConvertError, IccProfile, convert_file};

#[derive(Parser, Debug)]
#[command(name = "hdr-pq-png")]
#[command(version)]
#[command(about = "Convert a linear scRGB HDR image to a BT.2100 PQ 16-bit PNG")]
#[command(long_about = "Converts a linear scRGB OpenEXR image to a BT.2100 PQ PNG \
    with 10 significant bits in 16-bit samples.\n\n\
    The PNG carries cICP, cLLi (MaxCLL / MaxFALL), iCCP and sBIT chunks.")]
struct Args {
    /// Input OpenEXR file (linear scRGB)
    input: PathBuf,

    /// Output PNG path
    #[arg(default_value = DEFAULT_OUTPUT_PATH)]
    output: PathBuf,

    /// Luminance in cd/m2 of a linear input value of 1.0 (80 for scRGB)
    #[arg(long = "reference-white", default_value_t = PQ_PEAK_NITS)]
    reference_white: f32,

    /// ICC profile to embed instead of the bundled BT.2100 PQ profile
    #[arg(long)]
    icc: Option<PathBuf>,

    /// Log per-phase details
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Args {
    fn default_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.default_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<ConvertError>() {
                Some(convert) => eprintln!("error during {}: {err:#}", convert.phase()),
                None => eprintln!("error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let config = ConvertConfig::default().with_reference_white_nits(args.reference_white);
    let icc = match &args.icc {
        Some(path) => IccProfile::from_file(path)
            .with_context(|| format!("loading ICC profile {}", path.display()))?,
        None => IccProfile::bundled(),
    };

    warmup(config.max_workers)?;
    let report = convert_file(&args.input, &args.output, &config, &icc)
        .with_context(|| format!("converting {}", args.input.display()))?;
    if !args.quiet {
        println!("{}: {report}", args.output.display());
    }
    Ok(())
}
