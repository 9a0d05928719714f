use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array3, ArrayView3, ArrayViewMut3, Axis};
use serde::{Deserialize, Serialize};

use crate::stitch::StitchError;

// ---------------------------------------------------------------------------
// MetadataValue – a single free-form metadata entry
// ---------------------------------------------------------------------------

/// A dynamically-typed metadata value attached to a segment (segment name,
/// grating, exposure id, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v:.4}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Null => write!(f, "<null>"),
        }
    }
}

// ---------------------------------------------------------------------------
// WavelengthUnit – physical unit of the spectral axis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WavelengthUnit {
    #[default]
    #[serde(rename = "um")]
    Micron,
    #[serde(rename = "nm")]
    Nanometer,
    #[serde(rename = "angstrom")]
    Angstrom,
    #[serde(rename = "m")]
    Meter,
}

impl WavelengthUnit {
    /// Length of one unit in meters.
    pub fn in_meters(self) -> f64 {
        match self {
            WavelengthUnit::Micron => 1e-6,
            WavelengthUnit::Nanometer => 1e-9,
            WavelengthUnit::Angstrom => 1e-10,
            WavelengthUnit::Meter => 1.0,
        }
    }

    /// Multiplier converting a value in `self` into `target`.
    pub fn factor_to(self, target: WavelengthUnit) -> f64 {
        if self == target {
            1.0
        } else {
            self.in_meters() / target.in_meters()
        }
    }
}

impl fmt::Display for WavelengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WavelengthUnit::Micron => "um",
            WavelengthUnit::Nanometer => "nm",
            WavelengthUnit::Angstrom => "angstrom",
            WavelengthUnit::Meter => "m",
        };
        write!(f, "{s}")
    }
}

impl FromStr for WavelengthUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "um" | "micron" | "microns" | "µm" => Ok(WavelengthUnit::Micron),
            "nm" | "nanometer" => Ok(WavelengthUnit::Nanometer),
            "angstrom" | "aa" => Ok(WavelengthUnit::Angstrom),
            "m" | "meter" => Ok(WavelengthUnit::Meter),
            other => Err(format!("unknown wavelength unit '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// SpectralSegment – one spectrally contiguous cube
// ---------------------------------------------------------------------------

/// One observed wavelength segment: an IFU cube (or a 1D spectrum stored as a
/// cube with spatial shape `(1, 1)`) with its own spectral axis.
///
/// The wavelength dimension sits at `spectral_axis_index`; the two remaining
/// dimensions, in their declared order, form the spatial shape.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralSegment {
    /// Wavelength samples, strictly ascending.
    pub spectral_axis: Vec<f64>,
    /// Unit of `spectral_axis`.
    pub unit: WavelengthUnit,
    /// Flux cube.
    pub flux: Array3<f64>,
    /// Standard deviation of `flux`, same shape.
    pub uncertainty: Array3<f64>,
    /// Free-form flux unit tag, e.g. `MJy/sr`.
    pub flux_unit: String,
    /// Which dimension of `flux` is wavelength.
    pub spectral_axis_index: usize,
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl AsRef<SpectralSegment> for SpectralSegment {
    fn as_ref(&self) -> &SpectralSegment {
        self
    }
}

/// Axis permutation that moves the wavelength dimension to the front.
fn canonical_order(spectral_axis_index: usize) -> [usize; 3] {
    match spectral_axis_index {
        0 => [0, 1, 2],
        1 => [1, 0, 2],
        _ => [2, 0, 1],
    }
}

/// Inverse of [`canonical_order`].
fn declared_order(spectral_axis_index: usize) -> [usize; 3] {
    match spectral_axis_index {
        0 => [0, 1, 2],
        1 => [1, 0, 2],
        _ => [1, 2, 0],
    }
}

impl SpectralSegment {
    /// Build and validate a segment with default units (microns, no flux unit).
    pub fn new(
        spectral_axis: Vec<f64>,
        flux: Array3<f64>,
        uncertainty: Array3<f64>,
        spectral_axis_index: usize,
    ) -> Result<Self, StitchError> {
        let segment = SpectralSegment {
            spectral_axis,
            unit: WavelengthUnit::default(),
            flux,
            uncertainty,
            flux_unit: String::new(),
            spectral_axis_index,
            metadata: BTreeMap::new(),
        };
        segment.validate(0)?;
        Ok(segment)
    }

    /// A single 1D spectrum, stored as a `(n, 1, 1)` cube.
    pub fn from_spectrum(
        spectral_axis: Vec<f64>,
        flux: Vec<f64>,
        uncertainty: Vec<f64>,
    ) -> Result<Self, StitchError> {
        let as_cube = |values: Vec<f64>| {
            Array1::from(values)
                .insert_axis(Axis(1))
                .insert_axis(Axis(2))
        };
        Self::new(spectral_axis, as_cube(flux), as_cube(uncertainty), 0)
    }

    /// Build a segment from cubes laid out as `(wavelength, y, x)`, storing
    /// them with the wavelength dimension at `spectral_axis_index`.
    pub fn from_canonical(
        spectral_axis: Vec<f64>,
        flux: Array3<f64>,
        uncertainty: Array3<f64>,
        spectral_axis_index: usize,
    ) -> Result<Self, StitchError> {
        if spectral_axis_index > 2 {
            return Err(StitchError::InvalidSpectralAxisIndex {
                index: 0,
                axis: spectral_axis_index,
            });
        }
        let order = declared_order(spectral_axis_index);
        let flux = flux.permuted_axes(order).as_standard_layout().into_owned();
        let uncertainty = uncertainty
            .permuted_axes(order)
            .as_standard_layout()
            .into_owned();
        Self::new(spectral_axis, flux, uncertainty, spectral_axis_index)
    }

    pub fn with_unit(mut self, unit: WavelengthUnit) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_flux_unit(mut self, flux_unit: impl Into<String>) -> Self {
        self.flux_unit = flux_unit.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: MetadataValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Check the structural invariants. `index` is only used to label errors.
    pub fn validate(&self, index: usize) -> Result<(), StitchError> {
        let axis = self.spectral_axis_index;
        if axis > 2 {
            return Err(StitchError::InvalidSpectralAxisIndex { index, axis });
        }
        if self.spectral_axis.is_empty() {
            return Err(StitchError::EmptyAxis { index });
        }
        if self.flux.shape() != self.uncertainty.shape() {
            return Err(StitchError::UncertaintyShapeMismatch {
                index,
                flux: self.flux.shape().to_vec(),
                uncertainty: self.uncertainty.shape().to_vec(),
            });
        }
        let cube_len = self.flux.len_of(Axis(axis));
        if cube_len != self.spectral_axis.len() {
            return Err(StitchError::AxisLengthMismatch {
                index,
                axis,
                axis_len: self.spectral_axis.len(),
                cube_len,
            });
        }
        // NaN compares false both ways, so reject it before the ordering check.
        if let Some(position) = self.spectral_axis.iter().position(|w| !w.is_finite()) {
            let value = self.spectral_axis[position];
            let previous = position
                .checked_sub(1)
                .map_or(value, |p| self.spectral_axis[p]);
            return Err(StitchError::NonMonotonicAxis {
                index,
                position,
                previous,
                value,
            });
        }
        for (position, pair) in self.spectral_axis.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(StitchError::NonMonotonicAxis {
                    index,
                    position: position + 1,
                    previous: pair[0],
                    value: pair[1],
                });
            }
        }
        Ok(())
    }

    /// Number of wavelength samples.
    pub fn len(&self) -> usize {
        self.spectral_axis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectral_axis.is_empty()
    }

    /// Lowest wavelength. NaN for an (invalid) empty segment.
    pub fn first_wavelength(&self) -> f64 {
        self.spectral_axis.first().copied().unwrap_or(f64::NAN)
    }

    /// Highest wavelength. NaN for an (invalid) empty segment.
    pub fn last_wavelength(&self) -> f64 {
        self.spectral_axis.last().copied().unwrap_or(f64::NAN)
    }

    /// The two non-wavelength dimensions, in declared order.
    pub fn spatial_shape(&self) -> (usize, usize) {
        let order = canonical_order(self.spectral_axis_index);
        let shape = self.flux.shape();
        (shape[order[1]], shape[order[2]])
    }

    /// Flux viewed as `(wavelength, y, x)` without copying.
    pub fn flux_view(&self) -> ArrayView3<'_, f64> {
        self.flux
            .view()
            .permuted_axes(canonical_order(self.spectral_axis_index))
    }

    /// Uncertainty viewed as `(wavelength, y, x)` without copying.
    pub fn uncertainty_view(&self) -> ArrayView3<'_, f64> {
        self.uncertainty
            .view()
            .permuted_axes(canonical_order(self.spectral_axis_index))
    }

    /// Mutable flux viewed as `(wavelength, y, x)`.
    pub fn flux_view_mut(&mut self) -> ArrayViewMut3<'_, f64> {
        let order = canonical_order(self.spectral_axis_index);
        self.flux.view_mut().permuted_axes(order)
    }

    /// Mutable uncertainty viewed as `(wavelength, y, x)`.
    pub fn uncertainty_view_mut(&mut self) -> ArrayViewMut3<'_, f64> {
        let order = canonical_order(self.spectral_axis_index);
        self.uncertainty.view_mut().permuted_axes(order)
    }

    /// Copy of this segment with its spectral axis expressed in `unit`.
    pub fn to_unit(&self, unit: WavelengthUnit) -> SpectralSegment {
        let factor = self.unit.factor_to(unit);
        let mut converted = self.clone();
        if factor != 1.0 {
            converted.spectral_axis.iter_mut().for_each(|w| *w *= factor);
        }
        converted.unit = unit;
        converted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp_cube(shape: (usize, usize, usize)) -> Array3<f64> {
        Array3::from_shape_fn(shape, |(a, b, c)| (a * 100 + b * 10 + c) as f64)
    }

    #[test]
    fn test_spatial_shape_follows_spectral_axis_index() {
        let flux = ramp_cube((3, 4, 5));
        let unc = Array3::ones((3, 4, 5));
        let first = SpectralSegment::new(vec![1.0, 2.0, 3.0], flux.clone(), unc.clone(), 0)
            .unwrap();
        assert_eq!(first.spatial_shape(), (4, 5));

        let last = SpectralSegment::new(
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            flux.clone(),
            unc.clone(),
            2,
        )
        .unwrap();
        assert_eq!(last.spatial_shape(), (3, 4));
        assert_eq!(last.flux_view().dim(), (5, 3, 4));
    }

    #[test]
    fn test_canonical_round_trip_through_declared_layout() {
        let canonical = ramp_cube((4, 2, 3));
        for axis in 0..3 {
            let segment = SpectralSegment::from_canonical(
                vec![1.0, 2.0, 3.0, 4.0],
                canonical.clone(),
                canonical.clone(),
                axis,
            )
            .unwrap();
            assert_eq!(segment.flux.len_of(Axis(axis)), 4);
            assert_eq!(segment.flux_view(), canonical.view());
        }
    }

    #[test]
    fn test_validate_rejects_descending_axis() {
        let err = SpectralSegment::from_spectrum(
            vec![1.0, 3.0, 2.0],
            vec![0.0; 3],
            vec![0.0; 3],
        )
        .unwrap_err();
        assert_eq!(
            err,
            StitchError::NonMonotonicAxis {
                index: 0,
                position: 2,
                previous: 3.0,
                value: 2.0
            }
        );
    }

    #[test]
    fn test_validate_rejects_repeated_sample() {
        let err =
            SpectralSegment::from_spectrum(vec![1.0, 1.0], vec![0.0; 2], vec![0.0; 2]).unwrap_err();
        assert!(matches!(err, StitchError::NonMonotonicAxis { .. }));
    }

    #[test]
    fn test_validate_rejects_axis_length_mismatch() {
        let err = SpectralSegment::new(
            vec![1.0, 2.0],
            Array3::zeros((3, 1, 1)),
            Array3::zeros((3, 1, 1)),
            0,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            StitchError::AxisLengthMismatch {
                axis_len: 2,
                cube_len: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_uncertainty_shape() {
        let err = SpectralSegment::new(
            vec![1.0, 2.0],
            Array3::zeros((2, 2, 2)),
            Array3::zeros((2, 2, 1)),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, StitchError::UncertaintyShapeMismatch { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_axis_index_and_empty_axis() {
        let err = SpectralSegment::new(
            vec![1.0],
            Array3::zeros((1, 1, 1)),
            Array3::zeros((1, 1, 1)),
            3,
        )
        .unwrap_err();
        assert!(matches!(err, StitchError::InvalidSpectralAxisIndex { axis: 3, .. }));

        let err = SpectralSegment::new(
            vec![],
            Array3::zeros((0, 1, 1)),
            Array3::zeros((0, 1, 1)),
            0,
        )
        .unwrap_err();
        assert_eq!(err, StitchError::EmptyAxis { index: 0 });
    }

    #[test]
    fn test_unit_conversion() {
        let segment =
            SpectralSegment::from_spectrum(vec![1.0, 2.0], vec![0.0; 2], vec![0.0; 2]).unwrap();
        let nm = segment.to_unit(WavelengthUnit::Nanometer);
        assert_eq!(nm.unit, WavelengthUnit::Nanometer);
        assert_relative_eq!(nm.spectral_axis[0], 1000.0, max_relative = 1e-12);
        assert_relative_eq!(nm.spectral_axis[1], 2000.0, max_relative = 1e-12);
        assert_relative_eq!(
            WavelengthUnit::Angstrom.factor_to(WavelengthUnit::Micron),
            1e-4,
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_unit_parsing() {
        assert_eq!("um".parse::<WavelengthUnit>(), Ok(WavelengthUnit::Micron));
        assert_eq!(" NM ".parse::<WavelengthUnit>(), Ok(WavelengthUnit::Nanometer));
        assert!("furlong".parse::<WavelengthUnit>().is_err());
        assert_eq!(WavelengthUnit::Angstrom.to_string(), "angstrom");
    }
}
