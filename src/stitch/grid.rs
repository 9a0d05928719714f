use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::data::model::SpectralSegment;

use super::overlap::PairOverlap;

/// Which segment provides the samples strictly inside an overlap.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum OverlapSampling {
    /// Always the left (shorter wavelength) segment.
    #[default]
    Left,
    /// The segment with more samples inside the overlap; left on ties.
    Finer,
}

impl OverlapSampling {
    fn pick<'a>(
        self,
        left: &'a SpectralSegment,
        right: &'a SpectralSegment,
        pair: &PairOverlap,
    ) -> &'a SpectralSegment {
        match self {
            OverlapSampling::Left => left,
            OverlapSampling::Finer => {
                let inside = |s: &SpectralSegment| {
                    s.spectral_axis
                        .iter()
                        .filter(|&&w| pair.range.contains_open(w))
                        .count()
                };
                if inside(right) > inside(left) {
                    right
                } else {
                    left
                }
            }
        }
    }
}

/// Unified wavelength axis for a sorted set of segments.
///
/// Starts from the sorted, duplicate-free union of all samples. Then, overlap
/// by overlap and on the running grid, everything strictly inside
/// `(wmin, wmax)` is replaced by the chosen segment's native samples strictly
/// inside that range. The endpoints themselves stay in the outside partition.
pub fn build_grid<S: AsRef<SpectralSegment>>(
    sorted: &[S],
    overlaps: &[PairOverlap],
    sampling: OverlapSampling,
) -> Vec<f64> {
    let mut grid: Vec<f64> = sorted
        .iter()
        .flat_map(|s| s.as_ref().spectral_axis.iter().copied())
        .collect();
    grid.sort_by(f64::total_cmp);
    grid.dedup();

    for pair in overlaps {
        let range = pair.range;
        let source = sampling.pick(
            sorted[pair.left].as_ref(),
            sorted[pair.right].as_ref(),
            pair,
        );
        grid.retain(|&w| !range.contains_open(w));
        let at = grid.partition_point(|&w| w <= range.wmin);
        let inside = source
            .spectral_axis
            .iter()
            .copied()
            .filter(|&w| range.contains_open(w));
        grid.splice(at..at, inside);
    }

    log::debug!(
        "Built grid of {} samples from {} segments and {} overlaps",
        grid.len(),
        sorted.len(),
        overlaps.len()
    );
    grid
}

/// Indices of `grid` inside `[first, last]` of the segment's own axis.
///
/// Contiguous because the grid is ascending.
pub fn covered_range(grid: &[f64], segment: &SpectralSegment) -> Range<usize> {
    let start = grid.partition_point(|&w| w < segment.first_wavelength());
    let end = grid.partition_point(|&w| w <= segment.last_wavelength());
    start..end.max(start)
}
