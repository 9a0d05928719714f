use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use arrow::array::{Array, Float32Array, Float64Array, LargeListArray, ListArray};
use arrow::datatypes::DataType;
use ndarray::Array3;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::model::{MetadataValue, SpectralSegment, WavelengthUnit};

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load one spectral segment from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – one row per wavelength plane (recommended for cubes)
/// * `.json`    – a single segment object, see [`SegmentRecord`]
/// * `.csv`     – a 1D spectrum with `wavelength`, `flux`, `uncertainty` columns
///
/// The file name is recorded under the `source` metadata key unless the file
/// already carries one.
pub fn load_file(path: &Path) -> Result<SpectralSegment> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let mut segment = match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported file extension: .{other}"),
    }?;

    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        segment
            .metadata
            .entry("source".to_string())
            .or_insert_with(|| MetadataValue::String(name.to_string()));
    }
    log::debug!(
        "Loaded {}: {} samples, spatial shape {:?}, {} .. {} {}",
        path.display(),
        segment.len(),
        segment.spatial_shape(),
        segment.first_wavelength(),
        segment.last_wavelength(),
        segment.unit
    );
    Ok(segment)
}

/// Load several segments, in the given order.
pub fn load_files(paths: &[PathBuf]) -> Result<Vec<SpectralSegment>> {
    paths
        .iter()
        .map(|path| load_file(path).with_context(|| format!("loading {}", path.display())))
        .collect()
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// On-disk JSON layout of one segment.
///
/// ```json
/// {
///   "unit": "um",
///   "flux_unit": "MJy/sr",
///   "spectral_axis_index": 0,
///   "shape": [3, 1, 2],
///   "spectral_axis": [1.0, 1.1, 1.2],
///   "flux": [0.5, 0.6, null, ...],
///   "uncertainty": [0.01, 0.01, 0.02, ...],
///   "metadata": { "grating": "G140H" }
/// }
/// ```
///
/// `flux` and `uncertainty` are flattened in row-major order of `shape`;
/// `null` stands for NaN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRecord {
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default)]
    pub flux_unit: String,
    #[serde(default)]
    pub spectral_axis_index: usize,
    pub shape: [usize; 3],
    pub spectral_axis: Vec<f64>,
    pub flux: Vec<Option<f64>>,
    pub uncertainty: Vec<Option<f64>>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, JsonValue>,
}

fn default_unit() -> String {
    WavelengthUnit::default().to_string()
}

fn load_json(path: &Path) -> Result<SpectralSegment> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let record: SegmentRecord = serde_json::from_str(&text).context("parsing JSON")?;
    record_to_segment(record)
}

pub(crate) fn record_to_segment(record: SegmentRecord) -> Result<SpectralSegment> {
    let unit: WavelengthUnit = record.unit.parse().map_err(|e: String| anyhow!(e))?;
    let shape = (record.shape[0], record.shape[1], record.shape[2]);
    let to_cube = |values: Vec<Option<f64>>, col: &str| -> Result<Array3<f64>> {
        let values = values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        Array3::from_shape_vec(shape, values)
            .with_context(|| format!("'{col}' does not match shape {:?}", record.shape))
    };
    let flux = to_cube(record.flux, "flux")?;
    let uncertainty = to_cube(record.uncertainty, "uncertainty")?;

    let mut segment = SpectralSegment::new(
        record.spectral_axis,
        flux,
        uncertainty,
        record.spectral_axis_index,
    )?
    .with_unit(unit)
    .with_flux_unit(record.flux_unit);
    segment.metadata = record
        .metadata
        .iter()
        .map(|(key, val)| (key.clone(), json_to_metadata(val)))
        .collect();
    Ok(segment)
}

pub(crate) fn json_to_metadata(val: &JsonValue) -> MetadataValue {
    match val {
        JsonValue::String(s) => MetadataValue::String(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetadataValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                MetadataValue::Float(f)
            } else {
                MetadataValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => MetadataValue::Bool(*b),
        JsonValue::Null => MetadataValue::Null,
        other => MetadataValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout:  header row with column names, one row per wavelength.
/// `wavelength`, `flux` and `uncertainty` are required; any other column is
/// ignored. Empty cells and `NaN` read as NaN.
fn load_csv(path: &Path) -> Result<SpectralSegment> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();

    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("CSV missing '{name}' column"))
    };
    let w_idx = column("wavelength")?;
    let f_idx = column("flux")?;
    let u_idx = column("uncertainty")?;

    let mut wavelength = Vec::new();
    let mut flux = Vec::new();
    let mut uncertainty = Vec::new();

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        let cell =
            |idx: usize, col: &str| parse_float(record.get(idx).unwrap_or(""), row_no, col);
        wavelength.push(cell(w_idx, "wavelength")?);
        flux.push(cell(f_idx, "flux")?);
        uncertainty.push(cell(u_idx, "uncertainty")?);
    }

    Ok(SpectralSegment::from_spectrum(wavelength, flux, uncertainty)?)
}

fn parse_float(s: &str, row: usize, col: &str) -> Result<f64> {
    let tok = s.trim();
    if tok.is_empty() {
        return Ok(f64::NAN);
    }
    tok.parse::<f64>()
        .with_context(|| format!("Row {row}, {col}: '{tok}' is not a number"))
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file containing one segment.
///
/// Expected schema:
/// - `wavelength`: Float64 or Float32 – one row per wavelength plane
/// - `flux`: List<Float64> or LargeList<Float64> – the spatial plane, row-major
/// - `uncertainty`: same layout as `flux`
///
/// Schema metadata: `spatial_shape` (`"ny,nx"`, defaults to one row), `unit`,
/// `flux_unit`, and `metadata` holding a JSON object.
fn load_parquet(path: &Path) -> Result<SpectralSegment> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let schema_meta = builder.schema().metadata().clone();
    let reader = builder.build().context("building parquet reader")?;

    let mut wavelength = Vec::new();
    let mut flux = Vec::new();
    let mut uncertainty = Vec::new();
    let mut plane_len: Option<usize> = None;

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        let column = |name: &str| {
            schema
                .index_of(name)
                .map(|i| batch.column(i))
                .map_err(|_| anyhow!("Parquet file missing '{name}' column"))
        };
        let w_col = column("wavelength")?;
        let f_col = column("flux")?;
        let u_col = column("uncertainty")?;

        wavelength.extend(extract_f64_column(w_col).context("reading 'wavelength'")?);
        for row in 0..batch.num_rows() {
            let f = extract_f64_list(f_col, row)
                .with_context(|| format!("Row {row}: failed to read 'flux'"))?;
            let u = extract_f64_list(u_col, row)
                .with_context(|| format!("Row {row}: failed to read 'uncertainty'"))?;
            let expected = *plane_len.get_or_insert(f.len());
            if f.len() != expected || u.len() != expected {
                bail!(
                    "Row {row}: expected {expected} pixels, flux has {} and uncertainty {}",
                    f.len(),
                    u.len()
                );
            }
            flux.extend(f);
            uncertainty.extend(u);
        }
    }

    let plane_len = plane_len.unwrap_or(0);
    let (ny, nx) = match schema_meta.get("spatial_shape") {
        Some(text) => parse_spatial_shape(text)?,
        None => (1, plane_len),
    };
    if ny * nx != plane_len {
        bail!("spatial_shape {ny}x{nx} does not match {plane_len} pixels per row");
    }

    let shape = (wavelength.len(), ny, nx);
    let flux = Array3::from_shape_vec(shape, flux).context("assembling flux cube")?;
    let uncertainty =
        Array3::from_shape_vec(shape, uncertainty).context("assembling uncertainty cube")?;

    let mut segment = SpectralSegment::new(wavelength, flux, uncertainty, 0)?;
    if let Some(unit) = schema_meta.get("unit") {
        segment.unit = unit.parse().map_err(|e: String| anyhow!(e))?;
    }
    if let Some(flux_unit) = schema_meta.get("flux_unit") {
        segment.flux_unit = flux_unit.clone();
    }
    if let Some(text) = schema_meta.get("metadata") {
        let map: serde_json::Map<String, JsonValue> =
            serde_json::from_str(text).context("parsing 'metadata' schema entry")?;
        segment.metadata = map
            .iter()
            .map(|(key, val)| (key.clone(), json_to_metadata(val)))
            .collect::<BTreeMap<_, _>>();
    }
    Ok(segment)
}

fn parse_spatial_shape(text: &str) -> Result<(usize, usize)> {
    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    let [ny, nx] = parts[..] else {
        bail!("spatial_shape '{text}' is not of the form 'ny,nx'");
    };
    let parse = |s: &str| {
        s.parse::<usize>()
            .with_context(|| format!("spatial_shape '{text}': '{s}' is not an integer"))
    };
    Ok((parse(ny)?, parse(nx)?))
}

// -- Parquet / Arrow helpers --

/// Read a primitive Float64 / Float32 column; nulls become NaN.
fn extract_f64_column(col: &Arc<dyn Array>) -> Result<Vec<f64>> {
    if let Some(f64_arr) = col.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = col.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.iter().map(|v| v.unwrap_or(f32::NAN) as f64).collect())
    } else {
        bail!("Column type is {:?}, expected Float64 or Float32", col.data_type())
    }
}

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<ListArray>()
                .context("expected ListArray")?;
            list_arr.value(row)
        }
        DataType::LargeList(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<LargeListArray>()
                .context("expected LargeListArray")?;
            list_arr.value(row)
        }
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    extract_f64_column(&values_array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stitch::StitchError;
    use std::io::Write;

    fn write_temp(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_json_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(
            &dir,
            "seg.json",
            r#"{
                "unit": "nm",
                "flux_unit": "Jy",
                "spectral_axis_index": 2,
                "shape": [1, 2, 3],
                "spectral_axis": [500.0, 510.0, 520.0],
                "flux": [1.0, 2.0, null, 4.0, 5.0, 6.0],
                "uncertainty": [0.1, 0.1, 0.1, 0.2, 0.2, 0.2],
                "metadata": { "grating": "G140H", "order": 1 }
            }"#,
        );
        let segment = load_file(&path).unwrap();
        assert_eq!(segment.unit, WavelengthUnit::Nanometer);
        assert_eq!(segment.flux_unit, "Jy");
        assert_eq!(segment.spatial_shape(), (1, 2));
        assert!(segment.flux[[0, 0, 2]].is_nan());
        assert_eq!(segment.flux_view()[[1, 0, 1]], 5.0);
        assert_eq!(
            segment.metadata.get("grating"),
            Some(&MetadataValue::String("G140H".into()))
        );
        assert_eq!(segment.metadata.get("order"), Some(&MetadataValue::Integer(1)));
        assert_eq!(
            segment.metadata.get("source"),
            Some(&MetadataValue::String("seg.json".into()))
        );
    }

    #[test]
    fn test_json_shape_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(
            &dir,
            "bad.json",
            r#"{ "shape": [2, 1, 1], "spectral_axis": [1.0, 2.0],
                 "flux": [1.0], "uncertainty": [1.0, 1.0] }"#,
        );
        assert!(load_file(&path).is_err());
    }

    #[test]
    fn test_json_descending_axis_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(
            &dir,
            "desc.json",
            r#"{ "shape": [2, 1, 1], "spectral_axis": [2.0, 1.0],
                 "flux": [1.0, 1.0], "uncertainty": [1.0, 1.0] }"#,
        );
        let err = load_file(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StitchError>(),
            Some(StitchError::NonMonotonicAxis { position: 1, .. })
        ));
    }

    #[test]
    fn test_load_csv_spectrum() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(
            &dir,
            "spec.csv",
            "wavelength,flux,uncertainty,quality\n1.0,10.0,1.0,ok\n2.0,,1.0,bad\n3.0,NaN,2.0,bad\n",
        );
        let segment = load_file(&path).unwrap();
        assert_eq!(segment.spectral_axis, vec![1.0, 2.0, 3.0]);
        assert_eq!(segment.spatial_shape(), (1, 1));
        assert_eq!(segment.flux[[0, 0, 0]], 10.0);
        assert!(segment.flux[[1, 0, 0]].is_nan());
        assert!(segment.flux[[2, 0, 0]].is_nan());
        assert_eq!(segment.uncertainty[[2, 0, 0]], 2.0);
    }

    #[test]
    fn test_csv_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "spec.csv", "wavelength,flux\n1.0,2.0\n");
        let err = load_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("uncertainty"));
    }

    #[test]
    fn test_unsupported_extension() {
        let err = load_file(Path::new("cube.fits")).unwrap_err();
        assert!(err.to_string().contains(".fits"));
    }

    #[test]
    fn test_parse_spatial_shape() {
        assert_eq!(parse_spatial_shape("4, 5").unwrap(), (4, 5));
        assert!(parse_spatial_shape("4").is_err());
        assert!(parse_spatial_shape("a,b").is_err());
    }
}
