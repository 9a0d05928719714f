/// Stitching layer: turns N overlapping wavelength segments into one cube.
///
/// Pipeline:
/// ```text
///   Vec<SpectralSegment> (any order)
///        │
///        ▼
///   ┌──────────┐
///   │   sort    │  ascending first wavelength
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  overlap  │  (wmin, wmax) per consecutive pair
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │   grid    │  union of samples, one segment's samples inside overlaps
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  merge    │  resample pairwise (interp), linear ramp across overlaps
///   └──────────┘
///        │
///        ▼
///   SpectralSegment (merged)
/// ```
///
/// `calibrate` sits beside the pipeline: it derives per-segment ratio or
/// shift corrections from the overlap regions and applies them before `merge`.
pub mod calibrate;
pub mod error;
pub mod grid;
pub mod interp;
pub mod merge;
pub mod overlap;
pub mod sort;
pub mod stats;

pub use calibrate::{CalibrationMethod, OverlapStats};
pub use error::StitchError;
pub use grid::OverlapSampling;
pub use merge::{merge, MergeOptions, MergeStrategy};
pub use overlap::{OverlapRange, PairOverlap};
