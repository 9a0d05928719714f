use crate::data::model::SpectralSegment;

use super::StitchError;

fn by_coverage(a: &SpectralSegment, b: &SpectralSegment) -> std::cmp::Ordering {
    a.first_wavelength()
        .total_cmp(&b.first_wavelength())
        .then_with(|| a.last_wavelength().total_cmp(&b.last_wavelength()))
}

/// Order segments by their lowest wavelength sample.
///
/// Ties on the first sample are broken by the last sample so the result does
/// not depend on the input order.
pub fn sort_segments(
    mut segments: Vec<SpectralSegment>,
) -> Result<Vec<SpectralSegment>, StitchError> {
    if segments.is_empty() {
        return Err(StitchError::EmptyInput);
    }
    segments.sort_by(by_coverage);
    Ok(segments)
}

/// Borrowing variant of [`sort_segments`], used by the merge so the input
/// cubes are never copied.
pub fn sorted_refs<S: AsRef<SpectralSegment>>(
    segments: &[S],
) -> Result<Vec<&SpectralSegment>, StitchError> {
    if segments.is_empty() {
        return Err(StitchError::EmptyInput);
    }
    let mut sorted: Vec<&SpectralSegment> = segments.iter().map(|s| s.as_ref()).collect();
    sorted.sort_by(|a, b| by_coverage(a, b));
    Ok(sorted)
}
