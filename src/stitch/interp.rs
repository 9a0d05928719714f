//! Linear resampling of cubes along the wavelength axis.
//!
//! Target wavelengths outside the native coverage of a segment become NaN;
//! there is no extrapolation.

use ndarray::{Array3, ArrayView3, Axis, Zip};

/// Where a target wavelength falls on the native axis.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Bracket {
    /// Outside `[xs[0], xs[n-1]]`, or NaN.
    Outside,
    /// Exactly on native sample `index`.
    Exact(usize),
    /// Between samples `lower` and `lower + 1`, at `fraction` of the way.
    Between { lower: usize, fraction: f64 },
}

/// Precomputed brackets for a set of target wavelengths.
///
/// The brackets only depend on the axes, so they are computed once and
/// reused for every spatial pixel and for both flux and uncertainty.
#[derive(Debug, Clone)]
pub struct InterpPlan {
    brackets: Vec<Bracket>,
}

impl InterpPlan {
    pub fn new(xs: &[f64], targets: &[f64]) -> Self {
        let brackets = targets.iter().map(|&x| bracket(xs, x)).collect();
        InterpPlan { brackets }
    }

    fn len(&self) -> usize {
        self.brackets.len()
    }

    /// Resample a `(w, y, x)` cube; the result has one plane per target.
    pub fn resample(&self, cube: ArrayView3<'_, f64>) -> Array3<f64> {
        let (_, ny, nx) = cube.dim();
        let mut out = Array3::from_elem((self.len(), ny, nx), f64::NAN);
        for (mut plane, bracket) in out.axis_iter_mut(Axis(0)).zip(&self.brackets) {
            match *bracket {
                Bracket::Outside => {}
                Bracket::Exact(index) => plane.assign(&cube.index_axis(Axis(0), index)),
                Bracket::Between { lower, fraction } => {
                    let lo = cube.index_axis(Axis(0), lower);
                    let hi = cube.index_axis(Axis(0), lower + 1);
                    Zip::from(&mut plane)
                        .and(&lo)
                        .and(&hi)
                        .for_each(|o, &a, &b| *o = a + fraction * (b - a));
                }
            }
        }
        out
    }

    /// Resample a standard deviation cube and return the variance.
    pub fn resample_squared(&self, cube: ArrayView3<'_, f64>) -> Array3<f64> {
        self.resample(cube).mapv_into(|u| u * u)
    }
}

fn bracket(xs: &[f64], x: f64) -> Bracket {
    let (Some(&first), Some(&last)) = (xs.first(), xs.last()) else {
        return Bracket::Outside;
    };
    if !(x >= first && x <= last) {
        return Bracket::Outside;
    }
    // Number of samples <= x; at least 1 because x >= first.
    let upper = xs.partition_point(|&v| v <= x);
    let lower = upper - 1;
    if xs[lower] == x {
        return Bracket::Exact(lower);
    }
    let fraction = (x - xs[lower]) / (xs[upper] - xs[lower]);
    Bracket::Between { lower, fraction }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn spectrum(ys: &[f64]) -> Array3<f64> {
        Array3::from_shape_fn((ys.len(), 1, 1), |(w, _, _)| ys[w])
    }

    #[test]
    fn test_resample_inside_and_outside() {
        let xs = [1.0, 2.0, 4.0];
        let ys = spectrum(&[10.0, 20.0, 0.0]);
        let targets = [1.5, 3.0, 4.0, 0.5, 4.5, f64::NAN];
        let out = InterpPlan::new(&xs, &targets).resample(ys.view());
        assert_relative_eq!(out[[0, 0, 0]], 15.0);
        assert_relative_eq!(out[[1, 0, 0]], 10.0);
        assert_eq!(out[[2, 0, 0]], 0.0);
        assert!(out[[3, 0, 0]].is_nan());
        assert!(out[[4, 0, 0]].is_nan());
        assert!(out[[5, 0, 0]].is_nan());
    }

    #[test]
    fn test_single_sample_axis() {
        let out = InterpPlan::new(&[2.0], &[2.0, 2.1]).resample(spectrum(&[7.0]).view());
        assert_eq!(out[[0, 0, 0]], 7.0);
        assert!(out[[1, 0, 0]].is_nan());
    }

    #[test]
    fn test_brackets() {
        let plan = InterpPlan::new(&[1.0, 2.0, 3.0], &[0.0, 1.0, 2.5, 3.0]);
        assert_eq!(
            plan.brackets,
            vec![
                Bracket::Outside,
                Bracket::Exact(0),
                Bracket::Between {
                    lower: 1,
                    fraction: 0.5
                },
                Bracket::Exact(2),
            ]
        );
    }

    #[test]
    fn test_resample_cube_per_pixel() {
        let cube =
            Array3::from_shape_fn((3, 2, 2), |(w, y, x)| (w * 10) as f64 + (y * 2 + x) as f64);
        let plan = InterpPlan::new(&[1.0, 2.0, 3.0], &[1.5, 3.0, 3.5]);
        let out = plan.resample(cube.view());
        assert_eq!(out.dim(), (3, 2, 2));
        assert_relative_eq!(out[[0, 0, 0]], 5.0);
        assert_relative_eq!(out[[0, 1, 1]], 8.0);
        assert_eq!(out[[1, 1, 0]], 22.0);
        assert!(out[[2, 0, 0]].is_nan());
    }

    #[test]
    fn test_resample_onto_own_axis_is_identity() {
        let cube = Array3::from_shape_fn((4, 1, 3), |(w, _, x)| (w as f64).sin() + x as f64);
        let axis = [0.1, 0.4, 0.9, 1.6];
        let out = InterpPlan::new(&axis, &axis).resample(cube.view());
        assert_eq!(out, cube);
    }

    #[test]
    fn test_resample_squared() {
        let cube = Array3::from_elem((2, 1, 1), 3.0);
        let out = InterpPlan::new(&[1.0, 2.0], &[1.5]).resample_squared(cube.view());
        assert_relative_eq!(out[[0, 0, 0]], 9.0);
    }
}
