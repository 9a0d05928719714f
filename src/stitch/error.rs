use thiserror::Error;

/// Everything that can abort a stitching call.
///
/// None of these are recoverable for the call that raised them: the merge
/// never returns a partially blended cube.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StitchError {
    #[error("no spectral segments supplied")]
    EmptyInput,

    #[error("segment {index} has an empty spectral axis")]
    EmptyAxis { index: usize },

    #[error(
        "segment {index}: spectral axis is not strictly ascending at sample {position} \
         ({previous} -> {value})"
    )]
    NonMonotonicAxis {
        index: usize,
        position: usize,
        previous: f64,
        value: f64,
    },

    #[error("segment {index}: spectral axis index {axis} is out of range for a 3D cube")]
    InvalidSpectralAxisIndex { index: usize, axis: usize },

    #[error(
        "segment {index}: spectral axis has {axis_len} samples but the cube has {cube_len} \
         planes along axis {axis}"
    )]
    AxisLengthMismatch {
        index: usize,
        axis: usize,
        axis_len: usize,
        cube_len: usize,
    },

    #[error("segment {index}: uncertainty shape {uncertainty:?} differs from flux shape {flux:?}")]
    UncertaintyShapeMismatch {
        index: usize,
        flux: Vec<usize>,
        uncertainty: Vec<usize>,
    },

    #[error("segment {index}: spatial shape {found:?} differs from {expected:?}")]
    ShapeMismatch {
        index: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("segment {index}: flux unit '{found}' differs from '{expected}'")]
    UnitMismatch {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("overlap between segments {left} and {right} has zero width ({wmin} .. {wmax})")]
    DegenerateOverlap {
        left: usize,
        right: usize,
        wmin: f64,
        wmax: f64,
    },

    #[error(
        "segment {first} overlaps segment {second}, which is not its immediate neighbour; \
         only pairwise overlaps can be stitched"
    )]
    MultiOverlap { first: usize, second: usize },

    #[error("segment {inner} ends inside segment {outer}; nested segments cannot be stitched")]
    NestedSegment { outer: usize, inner: usize },

    #[error("percentile {0} is outside [0, 100]")]
    InvalidPercentile(f64),

    #[error("reference segment {index} does not exist ({count} segments)")]
    InvalidReferenceSegment { index: usize, count: usize },

    #[error("expected {expected} per-segment corrections, got {found}")]
    CorrectionCountMismatch { expected: usize, found: usize },

    #[error("segment {index}: correction shape {found:?} differs from spatial shape {expected:?}")]
    CorrectionShapeMismatch {
        index: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },
}
