use ndarray::{s, ArrayView3};

use crate::data::model::SpectralSegment;

use super::StitchError;

// ---------------------------------------------------------------------------
// OverlapRange – wavelengths shared by two neighbouring segments
// ---------------------------------------------------------------------------

/// The wavelength interval `(wmin, wmax)` covered by two spectrally adjacent
/// segments. `wmin` is the first sample of the right segment and `wmax` the
/// last sample of the left one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlapRange {
    pub wmin: f64,
    pub wmax: f64,
}

impl OverlapRange {
    pub fn width(&self) -> f64 {
        self.wmax - self.wmin
    }

    /// Whether `w` lies strictly inside the range.
    pub fn contains_open(&self, w: f64) -> bool {
        w > self.wmin && w < self.wmax
    }

    /// Blend weight of the right segment at `w`: 0 at `wmin`, 1 at `wmax`.
    pub fn weight(&self, w: f64) -> f64 {
        ((w - self.wmin) / self.width()).clamp(0.0, 1.0)
    }
}

/// An overlap together with the (sorted) indices of the two segments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairOverlap {
    pub left: usize,
    pub right: usize,
    pub range: OverlapRange,
}

// ---------------------------------------------------------------------------
// Finding overlaps
// ---------------------------------------------------------------------------

/// Overlaps between consecutive sorted segments.
///
/// A pair whose segments do not overlap (a gap, or exactly touching ends)
/// contributes nothing. Assumes every segment only overlaps its immediate
/// neighbours; see [`check_neighbour_overlaps`].
pub fn find_overlaps<S: AsRef<SpectralSegment>>(sorted: &[S]) -> Vec<PairOverlap> {
    sorted
        .windows(2)
        .enumerate()
        .filter_map(|(left, pair)| {
            let v1 = pair[1].as_ref().first_wavelength();
            let v2 = pair[0].as_ref().last_wavelength();
            (v2 > v1).then_some(PairOverlap {
                left,
                right: left + 1,
                range: OverlapRange { wmin: v1, wmax: v2 },
            })
        })
        .collect()
}

/// Bare ranges of [`find_overlaps`], in ascending order.
pub fn find_overlap_ranges<S: AsRef<SpectralSegment>>(sorted: &[S]) -> Vec<OverlapRange> {
    find_overlaps(sorted).into_iter().map(|p| p.range).collect()
}

/// Best-effort detection of layouts the pairwise blend cannot handle.
///
/// * a segment reaching into anything beyond its right neighbour → `MultiOverlap`
/// * a segment ending before the end of its left neighbour → `NestedSegment`
///
/// A segment sharing its last sample with its left neighbour is an ordinary
/// pairwise overlap.
pub fn check_neighbour_overlaps<S: AsRef<SpectralSegment>>(
    sorted: &[S],
) -> Result<(), StitchError> {
    for (i, pair) in sorted.windows(2).enumerate() {
        if pair[1].as_ref().last_wavelength() < pair[0].as_ref().last_wavelength() {
            return Err(StitchError::NestedSegment {
                outer: i,
                inner: i + 1,
            });
        }
    }
    for (i, segment) in sorted.iter().enumerate() {
        let end = segment.as_ref().last_wavelength();
        // Sorted by start, so the first non-neighbour is the one to check.
        if let Some(far) = sorted.get(i + 2) {
            if far.as_ref().first_wavelength() < end {
                return Err(StitchError::MultiOverlap {
                    first: i,
                    second: i + 2,
                });
            }
        }
    }
    Ok(())
}

/// Reject overlaps whose width would make the blend weight undefined.
pub fn check_overlap_widths(overlaps: &[PairOverlap]) -> Result<(), StitchError> {
    for pair in overlaps {
        let width = pair.range.width();
        if !(width.is_finite() && width > 0.0) {
            return Err(StitchError::DegenerateOverlap {
                left: pair.left,
                right: pair.right,
                wmin: pair.range.wmin,
                wmax: pair.range.wmax,
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Native samples inside the overlaps
// ---------------------------------------------------------------------------

/// Native flux samples of both segments of one overlap, as `(w, y, x)` views.
#[derive(Debug, Clone)]
pub struct OverlapData<'a> {
    pub pair: PairOverlap,
    pub left: ArrayView3<'a, f64>,
    pub right: ArrayView3<'a, f64>,
}

/// Index range of `axis` whose samples satisfy `wmin <= w <= wmax`.
fn closed_index_range(axis: &[f64], range: &OverlapRange) -> std::ops::Range<usize> {
    let start = axis.partition_point(|&w| w < range.wmin);
    let end = axis.partition_point(|&w| w <= range.wmax);
    start..end.max(start)
}

/// For every overlap, the flux samples of the left and the right segment that
/// fall inside `[wmin, wmax]`, in order of occurrence.
pub fn extract_overlapping_data<'a>(sorted: &[&'a SpectralSegment]) -> Vec<OverlapData<'a>> {
    find_overlaps(sorted)
        .into_iter()
        .map(|pair| {
            let left = sorted[pair.left];
            let right = sorted[pair.right];
            let l = closed_index_range(&left.spectral_axis, &pair.range);
            let r = closed_index_range(&right.spectral_axis, &pair.range);
            OverlapData {
                pair,
                left: left.flux_view().slice_move(s![l, .., ..]),
                right: right.flux_view().slice_move(s![r, .., ..]),
            }
        })
        .collect()
}
