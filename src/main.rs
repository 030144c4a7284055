//! bmc-diagnostics CLI

use anyhow::{Context, Result};
use bmc_diagnostics::analysis::{analyze, DEFAULT_KS_SUBSAMPLE};
use bmc_diagnostics::config::AnalysisConfig;
use bmc_diagnostics::distributions::TargetDistribution;
use bmc_diagnostics::histogram::Histogram2D;
use bmc_diagnostics::io::csv::{read_trace_csv, save_histogram_csv, save_moments_csv};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array2;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bmc-diagnostics")]
#[command(about = "Convergence diagnostics for particle sampler traces")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse one trace file
    Analyze {
        /// Headerless CSV trace: id, 4 metadata columns, features
        input: PathBuf,

        /// Analysis configuration (JSON). Defaults to the reference setup.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory for moments.csv and histogram.csv
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Use at most this many pooled states for the KS check, whose cost
        /// grows quadratically with the count
        #[arg(long, default_value_t = DEFAULT_KS_SUBSAMPLE, conflicts_with = "ks_all")]
        ks_subsample: usize,

        /// Run the KS check on every pooled state
        #[arg(long)]
        ks_all: bool,
    },

    /// Print the default configuration as JSON
    ReferenceConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Analyze {
            input,
            config,
            out_dir,
            ks_subsample,
            ks_all,
        } => cmd_analyze(input, config, out_dir, (!ks_all).then_some(ks_subsample)),
        Commands::ReferenceConfig => {
            println!("{}", AnalysisConfig::default().to_json_pretty()?);
            Ok(())
        }
    }
}

fn cmd_analyze(
    input: PathBuf,
    config: Option<PathBuf>,
    out_dir: Option<PathBuf>,
    ks_subsample: Option<usize>,
) -> Result<()> {
    let config = match config {
        Some(path) => AnalysisConfig::from_json_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AnalysisConfig::default(),
    };

    let pb = ProgressBar::new(3);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("##-"),
    );

    pb.set_message("reading trace");
    let target = config.target()?;
    let trace = read_trace_csv(&input, &config.parser()?)
        .with_context(|| format!("reading trace {}", input.display()))?;
    pb.inc(1);

    pb.set_message("computing diagnostics");
    let analysis = analyze(&trace, &target, &config, ks_subsample)?;
    pb.inc(1);

    if let Some(dir) = out_dir {
        pb.set_message("writing outputs");
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        save_moments_csv(
            &analysis.moments,
            Some(analysis.mean_moment.as_slice()),
            dir.join("moments.csv"),
        )?;
        let expected = expected_overlay(&analysis.histogram, &target, analysis.summary.n_records)?;
        save_histogram_csv(
            &analysis.histogram,
            expected.as_ref(),
            dir.join("histogram.csv"),
        )?;
    }
    pb.inc(1);
    pb.finish_with_message("done");

    println!("{}", serde_json::to_string_pretty(&analysis.summary)?);
    Ok(())
}

/// Expected counts for the histogram CSV, or `None` when the target is not 2D.
fn expected_overlay(
    histogram: &Histogram2D,
    target: &TargetDistribution,
    n: usize,
) -> Result<Option<Array2<f64>>> {
    if target.dim() != 2 {
        tracing::warn!(
            dim = target.dim(),
            "expected counts need a 2D target, writing observed counts only"
        );
        return Ok(None);
    }
    Ok(Some(histogram.expected_counts(target, n)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmc_diagnostics::distributions::MixtureComponent;
    use bmc_diagnostics::histogram::{build_2d, HistogramConfig};

    fn ks_cap(args: &[&str]) -> Option<usize> {
        match Cli::try_parse_from(args).unwrap().command {
            Commands::Analyze {
                ks_subsample,
                ks_all,
                ..
            } => (!ks_all).then_some(ks_subsample),
            Commands::ReferenceConfig => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn ks_sample_is_capped_by_default() {
        assert_eq!(
            ks_cap(&["bmc-diagnostics", "analyze", "run.csv"]),
            Some(DEFAULT_KS_SUBSAMPLE)
        );
        assert_eq!(
            ks_cap(&["bmc-diagnostics", "analyze", "run.csv", "--ks-subsample", "300"]),
            Some(300)
        );
        assert_eq!(ks_cap(&["bmc-diagnostics", "analyze", "run.csv", "--ks-all"]), None);
        assert!(Cli::try_parse_from([
            "bmc-diagnostics",
            "analyze",
            "run.csv",
            "--ks-all",
            "--ks-subsample",
            "10"
        ])
        .is_err());
    }

    #[test]
    fn expected_overlay_only_for_planar_targets() {
        let hist = build_2d(&[[0.0, 0.0]], &HistogramConfig::default()).unwrap();
        let planar = TargetDistribution::reference().unwrap();
        let overlay = expected_overlay(&hist, &planar, 10).unwrap().unwrap();
        assert_eq!(overlay.dim(), (100, 100));

        let spatial =
            TargetDistribution::new(vec![MixtureComponent::isotropic(vec![0.0; 3], 1.0, 1.0)])
                .unwrap();
        assert!(expected_overlay(&hist, &spatial, 10).unwrap().is_none());
    }
}
