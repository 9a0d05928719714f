/// Data layer: the segment type and its on-disk formats.
///
/// Architecture:
/// ```text
///  .parquet / .json / .csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → SpectralSegment
///   └──────────┘
///        │
///        ▼
///   ┌────────────────┐
///   │ SpectralSegment │  spectral axis, flux + uncertainty cubes, units
///   └────────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  writer   │  SpectralSegment → .parquet / .json / .csv
///   └──────────┘
/// ```
pub mod loader;
pub mod model;
pub mod writer;
