use clap::Parser;
use stackmsa::config::DEFAULT_REPROJECTION_BUDGET;
use stackmsa::{run, FileStore, Mode, MsaConfig, MsaReport};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Multivariate statistical analysis of an image stack: writes the mean image
/// and the requested number of basis images, and optionally the projection of
/// every image onto that basis.
#[derive(Parser, Debug)]
#[command(name = "stackmsa", version, about)]
struct Cli {
    /// Stack to analyse
    input: PathBuf,

    /// Output stack: mean image followed by the basis images
    output: PathBuf,

    /// Optional output image with one row of coefficients per input image
    reprojection: Option<PathBuf>,

    /// Decomposition: pca, fastica or lda
    #[arg(long, default_value = "pca")]
    mode: Mode,

    /// Number of basis images to compute
    #[arg(short = 'n', long = "nbasis", default_value_t = 20)]
    nbasis: usize,

    /// Binary 1/0 mask stack; its first image is used
    #[arg(short = 'M', long = "maskfile")]
    maskfile: Option<PathBuf>,

    /// Mask radius in pixels; negative values count in from the edge, 0 disables
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    mask: i32,

    /// Similarity-matrix stack used to align each image before analysis
    #[arg(long)]
    simmx: Option<PathBuf>,

    /// Scale each image to unit length before centering
    #[arg(long, default_value_t = false)]
    normalize: bool,

    /// <stride>, <start>,<stride> or <start>,<stride>,<stop> selecting the fitted images
    #[arg(long, default_value = "0,1", allow_hyphen_values = true)]
    step: String,

    /// Seed for the randomized solvers
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Maximum number of matrix elements held per reprojection chunk
    #[arg(long, default_value_t = DEFAULT_REPROJECTION_BUDGET)]
    budget: usize,

    /// Write a JSON summary of the run to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn config(&self) -> MsaConfig {
        let mut config = MsaConfig::new()
            .mode(self.mode)
            .n_basis(self.nbasis)
            .mask_radius(self.mask)
            .normalize(self.normalize)
            .step(&self.step)
            .seed(self.seed)
            .reprojection_budget(self.budget);
        if let Some(path) = &self.maskfile {
            config = config.mask_file(path);
        }
        if let Some(path) = &self.simmx {
            config = config.simmx(path);
        }
        config
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn write_report(path: &Path, report: &MsaReport) -> stackmsa::Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, report)?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.config();
    let mut store = FileStore::new();
    let result = run(
        &mut store,
        &config,
        &cli.input,
        &cli.output,
        cli.reprojection.as_deref(),
    )
    .and_then(|report| {
        if let Some(path) = &cli.report {
            write_report(path, &report)?;
        }
        Ok(report)
    });

    match result {
        Ok(report) => {
            println!(
                "{} basis images written to {}",
                report.basis_images,
                cli.output.display()
            );
            if !report.mode.is_linear() {
                eprintln!(
                    "WARNING: {} components may not be interpretable as eigenimages because of non-linearity",
                    report.mode
                );
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}
