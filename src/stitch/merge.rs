//! Pairwise interpolation and blending of sorted segments.
//!
//! The segments are resampled one at a time onto the slice of the unified grid
//! they cover. Only the previous ("left") resampled segment is kept while the
//! next ("right") one is computed, so the working set is two resampled
//! segments plus the output cube:
//!
//! ```text
//!  start      xxx | ooo | ooo | ooo
//!  pair 0→1   xxx X xxx | ooo | ooo     X: ramp between left and right
//!  pair 1→2   xxx X xxx X xxx | ooo
//! ```

use std::borrow::Cow;
use std::ops::Range;

use ndarray::{Array3, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::data::model::{MetadataValue, SpectralSegment};

use super::grid::{build_grid, covered_range, OverlapSampling};
use super::interp::InterpPlan;
use super::overlap::{
    check_neighbour_overlaps, check_overlap_widths, find_overlaps, PairOverlap,
};
use super::sort::sorted_refs;
use super::StitchError;

/// Whether segments are resampled lazily or all up front.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// At most two resampled segments alive at once.
    #[default]
    Pairwise,
    /// Resample every segment before blending. Same result, more memory;
    /// convenient for small 1D inputs.
    Materialized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOptions {
    pub strategy: MergeStrategy,
    pub overlap_sampling: OverlapSampling,
    /// Reject segments overlapping more than their immediate neighbours.
    pub validate_overlaps: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            strategy: MergeStrategy::default(),
            overlap_sampling: OverlapSampling::default(),
            validate_overlaps: true,
        }
    }
}

/// One segment resampled onto `grid[range]`, `(w, y, x)` layout.
struct Resampled {
    range: Range<usize>,
    flux: Array3<f64>,
    unc2: Array3<f64>,
}

fn resample(segment: &SpectralSegment, grid: &[f64]) -> Resampled {
    let range = covered_range(grid, segment);
    let plan = InterpPlan::new(&segment.spectral_axis, &grid[range.clone()]);
    Resampled {
        flux: plan.resample(segment.flux_view()),
        unc2: plan.resample_squared(segment.uncertainty_view()),
        range,
    }
}

/// Cross-fade that returns each side exactly at its own end of the ramp, even
/// when the other side holds NaN there.
fn lerp(left: f64, right: f64, t: f64) -> f64 {
    if t <= 0.0 {
        left
    } else if t >= 1.0 {
        right
    } else {
        (1.0 - t) * left + t * right
    }
}

/// Output accumulator over the whole grid.
struct Blender<'g> {
    grid: &'g [f64],
    flux: Array3<f64>,
    unc2: Array3<f64>,
}

impl<'g> Blender<'g> {
    fn new(grid: &'g [f64], spatial: (usize, usize)) -> Self {
        let shape = (grid.len(), spatial.0, spatial.1);
        Blender {
            grid,
            flux: Array3::from_elem(shape, f64::NAN),
            unc2: Array3::from_elem(shape, f64::NAN),
        }
    }

    fn write(&mut self, segment: &Resampled) {
        let range = segment.range.clone();
        self.flux
            .slice_axis_mut(Axis(0), range.clone().into())
            .assign(&segment.flux);
        self.unc2
            .slice_axis_mut(Axis(0), range.into())
            .assign(&segment.unc2);
    }

    /// Recompute the grid points covered by both segments with the linear ramp.
    fn blend(&mut self, pair: &PairOverlap, left: &Resampled, right: &Resampled) {
        let start = left.range.start.max(right.range.start);
        let end = left.range.end.min(right.range.end);
        log::debug!(
            "Blending segments {} and {} over ({}, {}): {} grid points",
            pair.left,
            pair.right,
            pair.range.wmin,
            pair.range.wmax,
            end.saturating_sub(start)
        );

        for g in start..end {
            let t = pair.range.weight(self.grid[g]);
            let l = g - left.range.start;
            let r = g - right.range.start;

            Zip::from(self.flux.index_axis_mut(Axis(0), g))
                .and(left.flux.index_axis(Axis(0), l))
                .and(right.flux.index_axis(Axis(0), r))
                .for_each(|o, &a, &b| *o = lerp(a, b, t));
            // Weighted average of variances, matching the flux weighting.
            Zip::from(self.unc2.index_axis_mut(Axis(0), g))
                .and(left.unc2.index_axis(Axis(0), l))
                .and(right.unc2.index_axis(Axis(0), r))
                .for_each(|o, &a, &b| *o = lerp(a, b, t));
        }
    }

    /// Walk the resampled segments left to right, writing each one and fixing
    /// up its overlap with the previous one.
    fn run<I>(mut self, overlaps: &[PairOverlap], resampled: I) -> (Array3<f64>, Array3<f64>)
    where
        I: IntoIterator<Item = Resampled>,
    {
        let mut overlaps = overlaps.iter().peekable();
        let mut left: Option<Resampled> = None;
        for (index, right) in resampled.into_iter().enumerate() {
            self.write(&right);
            if let Some(previous) = &left {
                if let Some(pair) = overlaps.next_if(|p| p.right == index) {
                    self.blend(pair, previous, &right);
                }
            }
            left = Some(right);
        }
        (self.flux, self.unc2)
    }
}

/// Check per-segment invariants and the properties shared across segments,
/// converting every spectral axis to one wavelength unit.
///
/// The common unit is the one of the segment starting at the shortest
/// physical wavelength, so it does not depend on the input order.
pub fn prepare(
    segments: &[SpectralSegment],
) -> Result<Vec<Cow<'_, SpectralSegment>>, StitchError> {
    let first = segments.first().ok_or(StitchError::EmptyInput)?;
    for (index, segment) in segments.iter().enumerate() {
        segment.validate(index)?;
    }

    let expected_shape = first.spatial_shape();
    for (index, segment) in segments.iter().enumerate() {
        let found = segment.spatial_shape();
        if found != expected_shape {
            return Err(StitchError::ShapeMismatch {
                index,
                expected: expected_shape,
                found,
            });
        }
        if segment.flux_unit != first.flux_unit {
            return Err(StitchError::UnitMismatch {
                index,
                expected: first.flux_unit.clone(),
                found: segment.flux_unit.clone(),
            });
        }
    }

    let unit = segments
        .iter()
        .min_by(|a, b| {
            let a = a.first_wavelength() * a.unit.in_meters();
            let b = b.first_wavelength() * b.unit.in_meters();
            a.total_cmp(&b)
        })
        .map_or(first.unit, |s| s.unit);

    Ok(segments
        .iter()
        .map(|s| {
            if s.unit == unit {
                Cow::Borrowed(s)
            } else {
                log::debug!("Converting segment axis from {} to {}", s.unit, unit);
                Cow::Owned(s.to_unit(unit))
            }
        })
        .collect())
}

/// Merge overlapping segments into one cube on a unified wavelength grid.
///
/// Segments may come in any order. The result uses the first sorted segment's
/// flux unit, spectral axis index and metadata; a `n_segments` entry records
/// how many segments went in. Grid points outside every overlap take the
/// covering segment's interpolated value; inside an overlap flux and variance
/// are ramped linearly from the left segment (at `wmin`) to the right one
/// (at `wmax`).
pub fn merge(
    segments: &[SpectralSegment],
    options: &MergeOptions,
) -> Result<SpectralSegment, StitchError> {
    let prepared = prepare(segments)?;
    let sorted = sorted_refs(&prepared)?;

    let overlaps = find_overlaps(&sorted);
    if options.validate_overlaps {
        check_neighbour_overlaps(&sorted)?;
    }
    check_overlap_widths(&overlaps)?;

    let grid = build_grid(&sorted, &overlaps, options.overlap_sampling);
    let first = sorted[0];
    log::info!(
        "Merging {} segments with {} overlaps onto {} wavelengths ({:?})",
        sorted.len(),
        overlaps.len(),
        grid.len(),
        options.strategy
    );

    let blender = Blender::new(&grid, first.spatial_shape());
    let (flux, unc2) = match options.strategy {
        MergeStrategy::Pairwise => {
            blender.run(&overlaps, sorted.iter().map(|s| resample(s, &grid)))
        }
        MergeStrategy::Materialized => {
            let all: Vec<Resampled> = sorted.iter().map(|s| resample(s, &grid)).collect();
            blender.run(&overlaps, all)
        }
    };
    let uncertainty = unc2.mapv_into(f64::sqrt);

    let mut merged =
        SpectralSegment::from_canonical(grid, flux, uncertainty, first.spectral_axis_index)?
            .with_unit(first.unit)
            .with_flux_unit(first.flux_unit.clone());
    merged.metadata = first.metadata.clone();
    // The merged cube comes from every input, not from the first one alone.
    if merged.metadata.remove("source").is_some() {
        let sources: Vec<String> = sorted
            .iter()
            .filter_map(|s| s.metadata.get("source"))
            .map(|v| v.to_string())
            .collect();
        merged
            .metadata
            .insert("sources".to_string(), MetadataValue::String(sources.join(", ")));
    }
    merged.metadata.insert(
        "n_segments".to_string(),
        MetadataValue::Integer(sorted.len() as i64),
    );
    Ok(merged)
}
