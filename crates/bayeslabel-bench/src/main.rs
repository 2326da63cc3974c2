//! bayeslabel-bench: CLI tool for classifier parameter experimentation
//! and diagnostics.
//!
//! Runs the classification pipeline on a membership image with
//! configurable smoothing and normalization, printing per-stage
//! diagnostics. Useful for:
//!
//! - Comparing smoothers (`gaussian` vs `mean`) and iteration counts
//! - Checking how priors shift the label histogram
//! - Measuring per-stage durations to identify bottlenecks
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin bayeslabel-bench -- [OPTIONS] <INPUT>
//! ```
//!
//! Set `RUST_LOG=debug` to trace individual stages.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod io;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use bayeslabel_pipeline::diagnostics::{Clock, PipelineDiagnostics, classify_with_diagnostics};
use bayeslabel_pipeline::{ClassifierConfig, ClassifyResult, Normalization, SmootherKind};
use clap::{Parser, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Classifier parameter experimentation and diagnostics for bayeslabel.
///
/// Classifies every pixel of a membership image and prints per-stage
/// timing and label diagnostics.
#[derive(Parser)]
#[command(name = "bayeslabel-bench", version)]
struct Cli {
    /// Membership image: a raster file (one class per RGB channel) or a
    /// `.json` serialized vector image.
    input: PathBuf,

    /// Priors image with the same shape and class count as the input.
    #[arg(long)]
    priors: Option<PathBuf>,

    /// Smoothing operation applied to each posterior channel.
    #[arg(long, value_enum, default_value_t = Smoothing::None)]
    smoother: Smoothing,

    /// Gaussian standard deviation in pixels.
    #[arg(long, default_value_t = 1.0)]
    sigma: f32,

    /// Mean filter half-width in pixels.
    #[arg(long, default_value_t = 1)]
    radius: usize,

    /// Number of smoothing iterations.
    #[arg(long, default_value_t = ClassifierConfig::DEFAULT_SMOOTHING_ITERATIONS)]
    iterations: u32,

    /// Per-pixel renormalization after smoothing.
    #[arg(long, value_enum, default_value_t = Renormalize::Disabled)]
    normalize: Renormalize,

    /// Write the label image to a PNG file (2-D inputs only).
    #[arg(long)]
    labels_out: Option<PathBuf>,

    /// Spread labels over the full gray range in the PNG output.
    #[arg(long)]
    stretch_labels: bool,

    /// Write the posterior image to a JSON file.
    #[arg(long)]
    posterior_out: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Full classifier config as a JSON string.
    ///
    /// When provided, all other classifier parameter flags are ignored.
    /// The JSON must be a valid `ClassifierConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,
}

/// Smoothing operation selection.
#[derive(Clone, Copy, ValueEnum)]
enum Smoothing {
    /// No smoothing.
    None,
    /// Gaussian blur (2-D inputs only).
    Gaussian,
    /// Box mean over a square window.
    Mean,
}

/// Renormalization policy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Renormalize {
    /// Keep posteriors as computed.
    Disabled,
    /// Scale every pixel vector to sum to one.
    UnitSum,
}

/// Build a [`ClassifierConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.  Otherwise, a config is
/// assembled from the individual flags.
fn config_from_cli(cli: &Cli) -> Result<ClassifierConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(ClassifierConfig {
        smoother: match cli.smoother {
            Smoothing::None => None,
            Smoothing::Gaussian => Some(SmootherKind::Gaussian { sigma: cli.sigma }),
            Smoothing::Mean => Some(SmootherKind::Mean { radius: cli.radius }),
        },
        smoothing_iterations: cli.iterations,
        normalization: match cli.normalize {
            Renormalize::Disabled => Normalization::Disabled,
            Renormalize::UnitSum => Normalization::UnitSum,
        },
    })
}

/// Log to stderr; `RUST_LOG` overrides the default `warn` level.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let membership = match io::load_vector_image(&cli.input) {
        Ok(image) => image,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    let priors = match cli.priors.as_deref().map(io::load_vector_image).transpose() {
        Ok(priors) => priors,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Input: {} (shape {:?}, {} classes)",
        cli.input.display(),
        membership.spatial_shape(),
        membership.channel_count(),
    );
    if let Some(ref path) = cli.priors {
        eprintln!("Priors: {}", path.display());
    }
    eprintln!("Config: {config}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }
        debug!(run, "starting run");

        match classify_with_diagnostics::<u8, _>(&membership, priors.as_ref(), &config, &StdClock) {
            Ok((result, diagnostics)) => {
                if cli.json {
                    match serde_json::to_string_pretty(&diagnostics) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("Error serializing diagnostics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", diagnostics.report());
                }

                // Write outputs on the first run only.
                if run == 0 {
                    write_outputs(&cli, &result);
                }

                all_diagnostics.push(diagnostics);
            }
            Err(e) => {
                eprintln!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        }

        if cli.runs > 1 {
            eprintln!();
        }
    }

    // Print summary when multiple runs.
    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// Write the label PNG and posterior JSON if requested.
///
/// Failures are reported but do not abort the remaining runs.
fn write_outputs(cli: &Cli, result: &ClassifyResult<u8>) {
    if let Some(ref path) = cli.labels_out {
        let classes = result.posterior.channel_count();
        match io::label_png(&result.labels, classes, cli.stretch_labels) {
            Ok(png) => match png.save(path) {
                Ok(()) => info!(path = %path.display(), "labels written"),
                Err(e) => eprintln!("Error writing labels to {}: {e}", path.display()),
            },
            Err(msg) => eprintln!("{msg}"),
        }
    }

    if let Some(ref path) = cli.posterior_out {
        let written = serde_json::to_string(&result.posterior)
            .map_err(|e| e.to_string())
            .and_then(|json| std::fs::write(path, &json).map_err(|e| e.to_string()));
        match written {
            Ok(()) => info!(path = %path.display(), "posterior written"),
            Err(e) => eprintln!("Error writing posterior to {}: {e}", path.display()),
        }
    }
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&PipelineDiagnostics) -> Duration;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Combine", |d| d.combine.duration),
        ("Smooth", |d| d.smooth.duration),
        ("Normalize", |d| d.normalize.duration),
        ("Classify", |d| d.classify.duration),
    ];

    for (name, extractor) in stage_extractors {
        let total: f64 = all_diagnostics
            .iter()
            .map(|d| extractor(d).as_secs_f64() * 1000.0)
            .sum();
        let stage_mean = total / all_diagnostics.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("bayeslabel-bench").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults_match_library_defaults() {
        let cli = parse(&["in.png"]);
        assert_eq!(config_from_cli(&cli).unwrap(), ClassifierConfig::default());
    }

    #[test]
    fn flags_build_config() {
        let cli = parse(&[
            "in.png",
            "--smoother",
            "mean",
            "--radius",
            "2",
            "--iterations",
            "3",
            "--normalize",
            "unit-sum",
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.smoother, Some(SmootherKind::Mean { radius: 2 }));
        assert_eq!(config.smoothing_iterations, 3);
        assert_eq!(config.normalization, Normalization::UnitSum);
    }

    #[test]
    fn config_json_overrides_flags() {
        let cli = parse(&[
            "in.png",
            "--iterations",
            "7",
            "--config-json",
            r#"{"smoother":{"kind":"gaussian","sigma":2.0},"smoothing_iterations":1}"#,
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.smoother, Some(SmootherKind::Gaussian { sigma: 2.0 }));
        assert_eq!(config.smoothing_iterations, 1);
    }

    #[test]
    fn bad_config_json_is_reported() {
        let cli = parse(&["in.png", "--config-json", "{not json"]);
        assert!(config_from_cli(&cli).unwrap_err().contains("--config-json"));
    }

    #[test]
    fn zero_runs_rejected() {
        let parsed = Cli::try_parse_from(["bayeslabel-bench", "in.png", "--runs", "0"]);
        assert!(parsed.is_err());
    }
}
