//! Correction factors derived from the overlap regions.
//!
//! Two independent strategies, never combined:
//!
//! * **ratio** – `median(left) / median(right)` per spatial pixel; multiplying
//!   segment `i + 1` by ratio `i` matches it to segment `i`.
//! * **shift** – `percentile(left) - percentile(right)`; adding shift `i` to
//!   segment `i + 1` matches it to segment `i`.
//!
//! Both report a noise estimate `sqrt(var(left) + var(right)) / 2` over the
//! overlap region. The pairwise values are then chained into one correction
//! per segment, anchored on a reference segment which stays untouched.

use std::borrow::Cow;

use ndarray::{Array2, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::data::model::SpectralSegment;

use super::merge::prepare;
use super::overlap::{extract_overlapping_data, OverlapData, PairOverlap};
use super::sort::sort_segments;
use super::stats::{nan_median_axis, nan_percentile_axis, variance_axis};
use super::StitchError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum CalibrationMethod {
    Ratio,
    Shift {
        #[serde(default = "default_percentile")]
        percentile: f64,
    },
}

fn default_percentile() -> f64 {
    50.0
}

/// Statistics of one overlap region, one value per spatial pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlapStats {
    pub pair: PairOverlap,
    /// Ratio or shift, depending on the statistic.
    pub value: Array2<f64>,
    /// Median or percentile of the left segment.
    pub left: Array2<f64>,
    /// Median or percentile of the right segment.
    pub right: Array2<f64>,
    pub noise: Array2<f64>,
}

fn noise(data: &OverlapData<'_>) -> Array2<f64> {
    let left = variance_axis(data.left);
    let right = variance_axis(data.right);
    Zip::from(&left)
        .and(&right)
        .map_collect(|&l, &r| (l + r).sqrt() / 2.0)
}

/// Ratio of medians in every overlap of a sorted segment list.
///
/// Pixels where the right median is zero or infinite get a NaN ratio.
pub fn overlap_ratios(sorted: &[&SpectralSegment]) -> Vec<OverlapStats> {
    extract_overlapping_data(sorted)
        .iter()
        .map(|data| {
            let left = nan_median_axis(data.left);
            let right = nan_median_axis(data.right);
            let mut guarded = 0usize;
            let value = Zip::from(&left).and(&right).map_collect(|&l, &r| {
                if r == 0.0 || r.is_infinite() {
                    guarded += 1;
                    f64::NAN
                } else {
                    l / r
                }
            });
            if guarded > 0 {
                log::warn!(
                    "Overlap {}-{}: {} pixels with zero or infinite right median, ratio set to NaN",
                    data.pair.left,
                    data.pair.right,
                    guarded
                );
            }
            OverlapStats {
                pair: data.pair,
                value,
                noise: noise(data),
                left,
                right,
            }
        })
        .collect()
}

/// Difference of percentiles in every overlap of a sorted segment list.
pub fn overlap_shifts(
    sorted: &[&SpectralSegment],
    percentile: f64,
) -> Result<Vec<OverlapStats>, StitchError> {
    if !(0.0..=100.0).contains(&percentile) {
        return Err(StitchError::InvalidPercentile(percentile));
    }
    Ok(extract_overlapping_data(sorted)
        .iter()
        .map(|data| {
            let left = nan_percentile_axis(data.left, percentile);
            let right = nan_percentile_axis(data.right, percentile);
            OverlapStats {
                pair: data.pair,
                value: &left - &right,
                noise: noise(data),
                left,
                right,
            }
        })
        .collect())
}

fn check_reference(reference: usize, count: usize) -> Result<(), StitchError> {
    if reference >= count {
        return Err(StitchError::InvalidReferenceSegment {
            index: reference,
            count,
        });
    }
    Ok(())
}

/// Turn N - 1 pairwise shifts into N additive offsets.
///
/// `offsets[0] = 0`, `offsets[i] = shifts[0] + .. + shifts[i - 1]`, then the
/// reference segment's offset is subtracted from all of them so it becomes
/// exactly zero.
pub fn shifts_to_offsets(
    shifts: &[Array2<f64>],
    reference: usize,
) -> Result<Vec<Array2<f64>>, StitchError> {
    let first = shifts.first().ok_or(StitchError::EmptyInput)?;
    check_reference(reference, shifts.len() + 1)?;

    let mut offsets = Vec::with_capacity(shifts.len() + 1);
    offsets.push(Array2::zeros(first.raw_dim()));
    for shift in shifts {
        let next = offsets[offsets.len() - 1].clone() + shift;
        offsets.push(next);
    }
    let anchor = offsets[reference].clone();
    for offset in &mut offsets {
        *offset -= &anchor;
    }
    Ok(offsets)
}

/// Multiplicative analogue of [`shifts_to_offsets`]: cumulative product of
/// the ratios, divided by the reference segment's factor.
pub fn ratios_to_factors(
    ratios: &[Array2<f64>],
    reference: usize,
) -> Result<Vec<Array2<f64>>, StitchError> {
    let first = ratios.first().ok_or(StitchError::EmptyInput)?;
    check_reference(reference, ratios.len() + 1)?;

    let mut factors = Vec::with_capacity(ratios.len() + 1);
    factors.push(Array2::ones(first.raw_dim()));
    for ratio in ratios {
        let next = &factors[factors.len() - 1] * ratio;
        factors.push(next);
    }
    let anchor = factors[reference].clone();
    for factor in &mut factors {
        *factor /= &anchor;
    }
    Ok(factors)
}

fn check_corrections(
    segments: &[SpectralSegment],
    corrections: &[Array2<f64>],
) -> Result<(), StitchError> {
    if segments.len() != corrections.len() {
        return Err(StitchError::CorrectionCountMismatch {
            expected: segments.len(),
            found: corrections.len(),
        });
    }
    for (index, (segment, correction)) in segments.iter().zip(corrections).enumerate() {
        let expected = segment.spatial_shape();
        let found = correction.dim();
        if found != expected {
            return Err(StitchError::CorrectionShapeMismatch {
                index,
                expected,
                found,
            });
        }
    }
    Ok(())
}

/// Copies of `segments` with `offsets[i]` added to the flux of segment `i`.
pub fn apply_offsets(
    segments: &[SpectralSegment],
    offsets: &[Array2<f64>],
) -> Result<Vec<SpectralSegment>, StitchError> {
    check_corrections(segments, offsets)?;
    Ok(segments
        .iter()
        .zip(offsets)
        .map(|(segment, offset)| {
            let mut shifted = segment.clone();
            for mut plane in shifted.flux_view_mut().axis_iter_mut(Axis(0)) {
                plane += offset;
            }
            shifted
        })
        .collect())
}

/// Copies of `segments` with flux and uncertainty of segment `i` scaled by
/// `factors[i]`.
pub fn apply_factors(
    segments: &[SpectralSegment],
    factors: &[Array2<f64>],
) -> Result<Vec<SpectralSegment>, StitchError> {
    check_corrections(segments, factors)?;
    Ok(segments
        .iter()
        .zip(factors)
        .map(|(segment, factor)| {
            let mut scaled = segment.clone();
            for mut plane in scaled.flux_view_mut().axis_iter_mut(Axis(0)) {
                plane *= factor;
            }
            let magnitude = factor.mapv(f64::abs);
            for mut plane in scaled.uncertainty_view_mut().axis_iter_mut(Axis(0)) {
                plane *= &magnitude;
            }
            scaled
        })
        .collect())
}

/// Sort the segments, derive per-pixel corrections from their overlaps and
/// return corrected copies, in sorted order, ready for merging.
///
/// Inputs are validated like [`merge`](super::merge::merge) does, and every
/// spectral axis is brought to the same wavelength unit first.
///
/// A neighbouring pair without overlap contributes a neutral correction (a
/// ratio of one or a shift of zero).
pub fn calibrate(
    segments: &[SpectralSegment],
    method: CalibrationMethod,
    reference: usize,
) -> Result<Vec<SpectralSegment>, StitchError> {
    let prepared = prepare(segments)?;
    let sorted = sort_segments(prepared.into_iter().map(Cow::into_owned).collect())?;
    check_reference(reference, sorted.len())?;
    if sorted.len() == 1 {
        return Ok(sorted);
    }
    let refs: Vec<&SpectralSegment> = sorted.iter().collect();

    let spatial = sorted[0].spatial_shape();
    let (stats, neutral) = match method {
        CalibrationMethod::Ratio => (overlap_ratios(&refs), 1.0),
        CalibrationMethod::Shift { percentile } => (overlap_shifts(&refs, percentile)?, 0.0),
    };
    let mut pairwise = vec![Array2::from_elem(spatial, neutral); sorted.len() - 1];
    for stat in stats {
        log::info!(
            "Overlap {}-{} [{}, {}]: mean correction {:.4}, mean noise {:.4}",
            stat.pair.left,
            stat.pair.right,
            stat.pair.range.wmin,
            stat.pair.range.wmax,
            stat.value.mean().unwrap_or(f64::NAN),
            stat.noise.mean().unwrap_or(f64::NAN)
        );
        pairwise[stat.pair.left] = stat.value;
    }

    match method {
        CalibrationMethod::Ratio => {
            apply_factors(&sorted, &ratios_to_factors(&pairwise, reference)?)
        }
        CalibrationMethod::Shift { .. } => {
            apply_offsets(&sorted, &shifts_to_offsets(&pairwise, reference)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array3};

    fn cube(axis: &[f64], value: impl Fn(usize, usize, usize) -> f64) -> SpectralSegment {
        let flux = Array3::from_shape_fn((axis.len(), 2, 2), |(w, y, x)| value(w, y, x));
        let unc = Array3::from_elem((axis.len(), 2, 2), 0.5);
        SpectralSegment::new(axis.to_vec(), flux, unc, 0).unwrap()
    }

    #[test]
    fn test_ratios_of_constant_segments() {
        let left = cube(&[1.0, 2.0, 3.0, 4.0], |_, y, x| 10.0 * (1 + y + x) as f64);
        let right = cube(&[3.0, 3.5, 4.0, 5.0], |_, y, x| 5.0 * (1 + y + x) as f64);
        let stats = overlap_ratios(&[&left, &right]);
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].pair.left, 0);
        for &ratio in stats[0].value.iter() {
            assert_relative_eq!(ratio, 2.0);
        }
        assert_eq!(stats[0].left[[1, 1]], 30.0);
        assert_eq!(stats[0].right[[1, 1]], 15.0);
        assert!(stats[0].noise.iter().all(|&n| n == 0.0));
    }

    #[test]
    fn test_ratio_guard_yields_nan() {
        let left = cube(&[1.0, 2.0, 3.0], |_, _, _| 1.0);
        let right = cube(&[2.0, 4.0], |_, y, _| y as f64);
        let stats = overlap_ratios(&[&left, &right]);
        assert!(stats[0].value[[0, 0]].is_nan());
        assert_relative_eq!(stats[0].value[[1, 0]], 1.0);
    }

    #[test]
    fn test_noise_estimate() {
        // left samples in overlap: 0, 2 → var 1; right: 0, 0, 4, 4 → var 4
        let left = cube(&[1.0, 2.0, 3.0], |w, _, _| [9.0, 0.0, 2.0][w]);
        let right = cube(&[2.0, 2.5, 2.8, 3.0, 5.0], |w, _, _| [0.0, 0.0, 4.0, 4.0, 7.0][w]);
        let stats = overlap_ratios(&[&left, &right]);
        assert_relative_eq!(stats[0].noise[[0, 1]], 5.0_f64.sqrt() / 2.0);
    }

    #[test]
    fn test_shifts_use_percentile() {
        let left = cube(&[1.0, 2.0, 3.0, 4.0, 5.0], |w, _, _| w as f64);
        let right = cube(&[1.5, 2.5, 3.5, 4.5, 6.0], |_, _, _| 1.0);
        let stats = overlap_shifts(&[&left, &right], 50.0).unwrap();
        // left samples 2..=5 → values 1,2,3,4, median 2.5
        assert_relative_eq!(stats[0].value[[0, 0]], 1.5);
        let high = overlap_shifts(&[&left, &right], 100.0).unwrap();
        assert_relative_eq!(high[0].value[[1, 1]], 3.0);
        assert_eq!(
            overlap_shifts(&[&left, &right], 101.0),
            Err(StitchError::InvalidPercentile(101.0))
        );
    }

    #[test]
    fn test_shifts_to_offsets_anchor_on_reference() {
        let shifts = vec![array![[1.0]], array![[2.0]], array![[-0.5]]];
        let offsets = shifts_to_offsets(&shifts, 0).unwrap();
        let flat: Vec<f64> = offsets.iter().map(|o| o[[0, 0]]).collect();
        assert_eq!(flat, vec![0.0, 1.0, 3.0, 2.5]);

        let offsets = shifts_to_offsets(&shifts, 2).unwrap();
        let flat: Vec<f64> = offsets.iter().map(|o| o[[0, 0]]).collect();
        assert_eq!(flat, vec![-3.0, -2.0, 0.0, -0.5]);

        assert_eq!(
            shifts_to_offsets(&shifts, 4),
            Err(StitchError::InvalidReferenceSegment { index: 4, count: 4 })
        );
        assert_eq!(shifts_to_offsets(&[], 0), Err(StitchError::EmptyInput));
    }

    #[test]
    fn test_ratios_to_factors() {
        let ratios = vec![array![[2.0, 1.0]], array![[0.5, 4.0]]];
        let factors = ratios_to_factors(&ratios, 1).unwrap();
        assert_eq!(factors[0], array![[0.5, 1.0]]);
        assert_eq!(factors[1], array![[1.0, 1.0]]);
        assert_eq!(factors[2], array![[0.5, 4.0]]);
    }

    #[test]
    fn test_apply_corrections_checks_shapes() {
        let segments = vec![cube(&[1.0, 2.0], |_, _, _| 1.0)];
        assert_eq!(
            apply_offsets(&segments, &[]),
            Err(StitchError::CorrectionCountMismatch {
                expected: 1,
                found: 0
            })
        );
        assert_eq!(
            apply_factors(&segments, &[Array2::ones((3, 2))]),
            Err(StitchError::CorrectionShapeMismatch {
                index: 0,
                expected: (2, 2),
                found: (3, 2)
            })
        );
    }

    #[test]
    fn test_apply_factors_scales_uncertainty_by_magnitude() {
        let segments = vec![cube(&[1.0, 2.0], |_, _, _| 3.0)];
        let scaled = apply_factors(&segments, &[array![[2.0, -1.0], [1.0, 1.0]]]).unwrap();
        assert_eq!(scaled[0].flux[[1, 0, 0]], 6.0);
        assert_eq!(scaled[0].flux[[0, 0, 1]], -3.0);
        assert_eq!(scaled[0].uncertainty[[0, 0, 1]], 0.5);
        assert_eq!(scaled[0].uncertainty[[0, 0, 0]], 1.0);
    }

    #[test]
    fn test_calibrate_shift_matches_reference() {
        let a = cube(&[1.0, 2.0, 3.0, 4.0], |_, _, _| 10.0);
        let b = cube(&[3.0, 4.0, 5.0, 6.0], |_, _, _| 12.0);
        let c = cube(&[5.5, 6.0, 7.0], |_, _, _| 9.0);
        let method = CalibrationMethod::Shift { percentile: 50.0 };
        let corrected = calibrate(&[c, a, b], method, 1).unwrap();
        for segment in &corrected {
            assert!(segment.flux.iter().all(|&f| (f - 12.0).abs() < 1e-12));
        }
    }

    #[test]
    fn test_calibrate_ratio_with_gap_keeps_neutral_factor() {
        let a = cube(&[1.0, 2.0, 3.0], |_, _, _| 4.0);
        let b = cube(&[2.5, 3.5], |_, _, _| 2.0);
        let c = cube(&[5.0, 6.0], |_, _, _| 7.0);
        let corrected = calibrate(&[a, b, c], CalibrationMethod::Ratio, 0).unwrap();
        assert!(corrected[1].flux.iter().all(|&f| (f - 4.0).abs() < 1e-12));
        assert!(corrected[1].uncertainty.iter().all(|&u| (u - 1.0).abs() < 1e-12));
        // No overlap between b and c: c only inherits b's factor.
        assert!(corrected[2].flux.iter().all(|&f| (f - 14.0).abs() < 1e-12));
    }
}
