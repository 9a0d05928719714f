//! Stitch overlapping wavelength segments of IFU spectral cubes (or 1D
//! spectra) into one continuous cube.
//!
//! ```text
//!  data::loader ──► stitch::calibrate (optional) ──► stitch::merge ──► data::writer
//! ```

pub mod config;
pub mod data;
pub mod stitch;

pub use config::{CalibrationConfig, StitchConfig};
pub use data::model::{MetadataValue, SpectralSegment, WavelengthUnit};
pub use stitch::{merge, MergeOptions, MergeStrategy, OverlapSampling, StitchError};
