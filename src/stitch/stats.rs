//! Per-pixel reductions over the wavelength axis of `(w, y, x)` cubes.

use ndarray::{s, Array2, ArrayView3, Axis};

/// Percentile of the non-NaN values, linearly interpolated between the two
/// closest ranks. NaN when every value is NaN.
///
/// `values` is used as scratch space and left reordered.
pub fn nan_percentile_in_place(values: &mut Vec<f64>, percentile: f64) -> f64 {
    values.retain(|v| !v.is_nan());
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(f64::total_cmp);

    let rank = percentile / 100.0 * (values.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    if lower == upper {
        values[lower]
    } else {
        values[lower] + fraction * (values[upper] - values[lower])
    }
}

/// [`nan_percentile_in_place`] on a copy of `values`.
pub fn nan_percentile(values: &[f64], percentile: f64) -> f64 {
    nan_percentile_in_place(&mut values.to_vec(), percentile)
}

pub fn nan_median(values: &[f64]) -> f64 {
    nan_percentile(values, 50.0)
}

/// Percentile over the wavelength axis for every spatial pixel.
pub fn nan_percentile_axis(cube: ArrayView3<'_, f64>, percentile: f64) -> Array2<f64> {
    let (nw, ny, nx) = cube.dim();
    let mut scratch = Vec::with_capacity(nw);
    Array2::from_shape_fn((ny, nx), |(y, x)| {
        scratch.clear();
        scratch.extend(cube.slice(s![.., y, x]).iter().copied());
        nan_percentile_in_place(&mut scratch, percentile)
    })
}

pub fn nan_median_axis(cube: ArrayView3<'_, f64>) -> Array2<f64> {
    nan_percentile_axis(cube, 50.0)
}

/// Population variance over the wavelength axis. NaN samples propagate, and
/// an empty wavelength axis gives NaN.
pub fn variance_axis(cube: ArrayView3<'_, f64>) -> Array2<f64> {
    let (nw, ny, nx) = cube.dim();
    if nw == 0 {
        return Array2::from_elem((ny, nx), f64::NAN);
    }
    cube.var_axis(Axis(0), 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(nan_median(&[3.0, 1.0, 2.0]), 2.0);
        assert_relative_eq!(nan_median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn test_median_ignores_nan() {
        assert_eq!(nan_median(&[f64::NAN, 5.0, 1.0, f64::NAN, 3.0]), 3.0);
        assert!(nan_median(&[f64::NAN, f64::NAN]).is_nan());
        assert!(nan_median(&[]).is_nan());
    }

    #[test]
    fn test_percentile_interpolates_between_ranks() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(nan_percentile(&values, 0.0), 1.0);
        assert_eq!(nan_percentile(&values, 100.0), 5.0);
        assert_relative_eq!(nan_percentile(&values, 10.0), 1.4);
        assert_relative_eq!(nan_percentile(&values, 75.0), 4.0);
    }

    #[test]
    fn test_axis_reductions_keep_spatial_shape() {
        let cube = Array3::from_shape_fn((5, 2, 3), |(w, y, x)| (w + y * 10 + x * 100) as f64);
        let median = nan_median_axis(cube.view());
        assert_eq!(median.dim(), (2, 3));
        assert_eq!(median[[1, 2]], 212.0);

        let variance = variance_axis(cube.view());
        assert_eq!(variance.dim(), (2, 3));
        // Population variance of 0..5 is 2.
        assert_relative_eq!(variance[[0, 0]], 2.0);
        assert_relative_eq!(variance[[1, 1]], 2.0);
    }

    #[test]
    fn test_variance_propagates_nan() {
        let mut cube = Array3::from_elem((3, 1, 2), 1.0);
        cube[[1, 0, 1]] = f64::NAN;
        let variance = variance_axis(cube.view());
        assert_eq!(variance[[0, 0]], 0.0);
        assert!(variance[[0, 1]].is_nan());
    }
}
