//! Command-line front end for stitching spectral segments.
//!
//! Subcommands:
//! - `merge`: load segments, optionally calibrate them, merge and write the result
//! - `overlaps`: list the sorted segments and the overlaps between them

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ndarray::Array2;

use spectral_stitch::config::{CalibrationConfig, StitchConfig};
use spectral_stitch::data::loader::load_files;
use spectral_stitch::data::model::SpectralSegment;
use spectral_stitch::data::writer::write_file;
use spectral_stitch::stitch::calibrate::{calibrate, overlap_ratios, overlap_shifts};
use spectral_stitch::stitch::merge::prepare;
use spectral_stitch::stitch::overlap::{check_neighbour_overlaps, find_overlaps};
use spectral_stitch::stitch::sort::sorted_refs;
use spectral_stitch::stitch::{merge, CalibrationMethod, MergeStrategy, OverlapSampling};

#[derive(Parser, Debug)]
#[command(name = "spectral-stitch")]
#[command(about = "Stitch overlapping wavelength segments into one spectral cube")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge segments into one cube
    Merge {
        /// Input segments (.parquet, .json or .csv), in any order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output file; the format follows the extension
        #[arg(short, long)]
        output: PathBuf,

        /// JSON configuration file; flags below override its values
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, value_enum)]
        strategy: Option<MergeStrategy>,

        /// Which segment provides the samples inside an overlap
        #[arg(long, value_enum)]
        sampling: Option<OverlapSampling>,

        /// Allow segments overlapping beyond their immediate neighbours
        #[arg(long)]
        no_validate_overlaps: bool,

        /// Correct flux jumps between segments before merging
        #[arg(long, value_enum)]
        calibrate: Option<StatKind>,

        /// Percentile used by shift calibration (0-100)
        #[arg(long)]
        percentile: Option<f64>,

        /// Sorted index of the segment left untouched by calibration
        #[arg(long)]
        reference: Option<usize>,
    },

    /// Show the overlaps between segments
    Overlaps {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Also report per-overlap ratio or shift statistics
        #[arg(long, value_enum)]
        stats: Option<StatKind>,

        /// Percentile used by shift statistics (0-100)
        #[arg(long, default_value_t = 50.0)]
        percentile: f64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StatKind {
    Ratio,
    Shift,
}

impl StatKind {
    fn method(self, percentile: f64) -> CalibrationMethod {
        match self {
            StatKind::Ratio => CalibrationMethod::Ratio,
            StatKind::Shift => CalibrationMethod::Shift { percentile },
        }
    }
}

struct Overrides {
    strategy: Option<MergeStrategy>,
    sampling: Option<OverlapSampling>,
    no_validate_overlaps: bool,
    calibrate: Option<StatKind>,
    percentile: Option<f64>,
    reference: Option<usize>,
}

/// Layer the command-line flags over the file configuration.
fn resolve_config(file: Option<&Path>, flags: Overrides) -> Result<StitchConfig> {
    let mut config = match file {
        Some(path) => StitchConfig::from_file(path)?,
        None => StitchConfig::default(),
    };
    if let Some(strategy) = flags.strategy {
        config.strategy = strategy;
    }
    if let Some(sampling) = flags.sampling {
        config.overlap_sampling = sampling;
    }
    if flags.no_validate_overlaps {
        config.validate_overlaps = false;
    }

    let current = config.calibration;
    let file_percentile = match current.map(|c| c.method) {
        Some(CalibrationMethod::Shift { percentile }) => Some(percentile),
        _ => None,
    };
    let percentile = flags.percentile.or(file_percentile).unwrap_or(50.0);
    let kind = flags.calibrate.or(current.map(|c| match c.method {
        CalibrationMethod::Ratio => StatKind::Ratio,
        CalibrationMethod::Shift { .. } => StatKind::Shift,
    }));
    config.calibration = kind.map(|kind| CalibrationConfig {
        method: kind.method(percentile),
        reference_segment: flags
            .reference
            .or(current.map(|c| c.reference_segment))
            .unwrap_or(0),
    });
    Ok(config)
}

fn run_merge(inputs: &[PathBuf], output: &Path, config: &StitchConfig) -> Result<()> {
    let segments = load_files(inputs)?;
    log::info!("Loaded {} segments", segments.len());

    let segments = match config.calibration {
        Some(calibration) => calibrate(
            &segments,
            calibration.method,
            calibration.reference_segment,
        )
        .context("calibrating segments")?,
        None => segments,
    };

    let merged = merge(&segments, &config.merge_options()).context("merging segments")?;
    write_file(output, &merged).with_context(|| format!("writing {}", output.display()))?;
    println!(
        "Merged {} segments into {} ({} wavelengths, {} .. {} {})",
        segments.len(),
        output.display(),
        merged.len(),
        merged.first_wavelength(),
        merged.last_wavelength(),
        merged.unit
    );
    Ok(())
}

/// Mean over the finite entries; NaN when there are none.
fn finite_mean(values: &Array2<f64>) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), &v| (s + v, n + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

fn source_name(segment: &SpectralSegment) -> String {
    segment
        .metadata
        .get("source")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn run_overlaps(inputs: &[PathBuf], stats: Option<StatKind>, percentile: f64) -> Result<()> {
    let segments = load_files(inputs)?;
    let prepared = prepare(&segments)?;
    let sorted = sorted_refs(&prepared)?;

    for (i, segment) in sorted.iter().enumerate() {
        println!(
            "segment {i}: {:<24} {:>10.5} .. {:<10.5} {} ({} samples, spatial {:?})",
            source_name(segment),
            segment.first_wavelength(),
            segment.last_wavelength(),
            segment.unit,
            segment.len(),
            segment.spatial_shape()
        );
    }
    if let Err(e) = check_neighbour_overlaps(&sorted) {
        log::warn!("{e}; pairwise merging would reject this layout");
    }

    let overlaps = find_overlaps(&sorted);
    if overlaps.is_empty() {
        println!("no overlaps");
        return Ok(());
    }

    match stats {
        None => {
            for pair in &overlaps {
                println!(
                    "overlap {}-{}: {:.5} .. {:.5} (width {:.5})",
                    pair.left,
                    pair.right,
                    pair.range.wmin,
                    pair.range.wmax,
                    pair.range.width()
                );
            }
        }
        Some(kind) => {
            let stats = match kind.method(percentile) {
                CalibrationMethod::Ratio => overlap_ratios(&sorted),
                CalibrationMethod::Shift { percentile } => overlap_shifts(&sorted, percentile)?,
            };
            for stat in &stats {
                println!(
                    "overlap {}-{}: {:.5} .. {:.5}  {:?} {:.6}  left {:.6}  right {:.6}  \
                     noise {:.6}",
                    stat.pair.left,
                    stat.pair.right,
                    stat.pair.range.wmin,
                    stat.pair.range.wmax,
                    kind,
                    finite_mean(&stat.value),
                    finite_mean(&stat.left),
                    finite_mean(&stat.right),
                    finite_mean(&stat.noise)
                );
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Merge {
            inputs,
            output,
            config,
            strategy,
            sampling,
            no_validate_overlaps,
            calibrate,
            percentile,
            reference,
        } => {
            let config = resolve_config(
                config.as_deref(),
                Overrides {
                    strategy,
                    sampling,
                    no_validate_overlaps,
                    calibrate,
                    percentile,
                    reference,
                },
            )?;
            log::debug!("Effective configuration: {config:?}");
            run_merge(&inputs, &output, &config)
        }
        Command::Overlaps {
            inputs,
            stats,
            percentile,
        } => run_overlaps(&inputs, stats, percentile),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_flags() -> Overrides {
        Overrides {
            strategy: None,
            sampling: None,
            no_validate_overlaps: false,
            calibrate: None,
            percentile: None,
            reference: None,
        }
    }

    #[test]
    fn test_defaults_without_file_or_flags() {
        let config = resolve_config(None, no_flags()).unwrap();
        assert_eq!(config, StitchConfig::default());
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stitch.json");
        std::fs::write(
            &path,
            r#"{ "overlap_sampling": "finer",
                 "calibration": { "method": "shift", "percentile": 30.0, "reference_segment": 1 } }"#,
        )
        .unwrap();

        let config = resolve_config(
            Some(path.as_path()),
            Overrides {
                strategy: Some(MergeStrategy::Materialized),
                no_validate_overlaps: true,
                reference: Some(2),
                ..no_flags()
            },
        )
        .unwrap();
        assert_eq!(config.strategy, MergeStrategy::Materialized);
        assert_eq!(config.overlap_sampling, OverlapSampling::Finer);
        assert!(!config.validate_overlaps);
        assert_eq!(
            config.calibration,
            Some(CalibrationConfig {
                method: CalibrationMethod::Shift { percentile: 30.0 },
                reference_segment: 2,
            })
        );
    }

    #[test]
    fn test_calibrate_flag_enables_calibration() {
        let config = resolve_config(
            None,
            Overrides {
                calibrate: Some(StatKind::Ratio),
                ..no_flags()
            },
        )
        .unwrap();
        assert_eq!(
            config.calibration,
            Some(CalibrationConfig {
                method: CalibrationMethod::Ratio,
                reference_segment: 0,
            })
        );
    }
}
