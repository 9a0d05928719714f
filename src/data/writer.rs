use std::collections::HashMap;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{ArrayRef, Float64Array, Float64Builder, ListBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use ndarray::{ArrayView3, Axis};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use serde_json::Value as JsonValue;

use super::loader::SegmentRecord;
use super::model::{MetadataValue, SpectralSegment};

/// Write one spectral segment to a file.  Dispatch by extension, with the
/// same layouts [`load_file`](super::loader::load_file) reads.
///
/// CSV only holds a 1D spectrum, so a cube with more than one spatial pixel
/// is rejected there.
pub fn write_file(path: &Path, segment: &SpectralSegment) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "parquet" | "pq" => write_parquet(path, segment),
        "json" => write_json(path, segment),
        "csv" => write_csv(path, segment),
        other => bail!("Unsupported file extension: .{other}"),
    }?;
    log::info!(
        "Wrote {} ({} samples, spatial shape {:?})",
        path.display(),
        segment.len(),
        segment.spatial_shape()
    );
    Ok(())
}

fn metadata_to_json(val: &MetadataValue) -> JsonValue {
    match val {
        MetadataValue::String(s) => JsonValue::String(s.clone()),
        MetadataValue::Integer(i) => JsonValue::from(*i),
        MetadataValue::Float(f) => JsonValue::from(*f),
        MetadataValue::Bool(b) => JsonValue::Bool(*b),
        MetadataValue::Null => JsonValue::Null,
    }
}

fn metadata_map(segment: &SpectralSegment) -> serde_json::Map<String, JsonValue> {
    segment
        .metadata
        .iter()
        .map(|(key, val)| (key.clone(), metadata_to_json(val)))
        .collect()
}

fn finite_or_null(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

// ---------------------------------------------------------------------------
// JSON writer
// ---------------------------------------------------------------------------

/// JSON has no literal for NaN or infinity, so every non-finite sample is
/// written as `null` and reads back as NaN. Use parquet to keep infinities.
pub fn segment_to_record(segment: &SpectralSegment) -> SegmentRecord {
    let shape = segment.flux.shape();
    SegmentRecord {
        unit: segment.unit.to_string(),
        flux_unit: segment.flux_unit.clone(),
        spectral_axis_index: segment.spectral_axis_index,
        shape: [shape[0], shape[1], shape[2]],
        spectral_axis: segment.spectral_axis.clone(),
        flux: segment.flux.iter().copied().map(finite_or_null).collect(),
        uncertainty: segment.uncertainty.iter().copied().map(finite_or_null).collect(),
        metadata: metadata_map(segment),
    }
}

fn write_json(path: &Path, segment: &SpectralSegment) -> Result<()> {
    let file = std::fs::File::create(path).context("creating JSON file")?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer(&mut out, &segment_to_record(segment)).context("writing JSON")?;
    out.flush().context("flushing JSON")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// CSV writer
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct CsvRow {
    wavelength: f64,
    flux: f64,
    uncertainty: f64,
}

fn write_csv(path: &Path, segment: &SpectralSegment) -> Result<()> {
    let spatial = segment.spatial_shape();
    if spatial != (1, 1) {
        bail!("CSV holds a single spectrum, segment has spatial shape {spatial:?}");
    }
    let flux = segment.flux_view();
    let uncertainty = segment.uncertainty_view();
    let mut writer = csv::Writer::from_path(path).context("creating CSV")?;
    for (i, &wavelength) in segment.spectral_axis.iter().enumerate() {
        writer
            .serialize(CsvRow {
                wavelength,
                flux: flux[[i, 0, 0]],
                uncertainty: uncertainty[[i, 0, 0]],
            })
            .with_context(|| format!("CSV row {i}"))?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Parquet writer
// ---------------------------------------------------------------------------

/// One list entry per wavelength plane, the plane flattened row-major.
fn planes_to_list(cube: ArrayView3<'_, f64>) -> ArrayRef {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for plane in cube.axis_iter(Axis(0)) {
        let values = builder.values();
        for &v in plane.iter() {
            values.append_value(v);
        }
        builder.append(true);
    }
    Arc::new(builder.finish())
}

/// Always written in `(wavelength, y, x)` order, whatever the segment's
/// spectral axis index.
fn write_parquet(path: &Path, segment: &SpectralSegment) -> Result<()> {
    let (ny, nx) = segment.spatial_shape();
    let item = || Arc::new(Field::new("item", DataType::Float64, true));

    let mut schema_meta = HashMap::new();
    schema_meta.insert("spatial_shape".to_string(), format!("{ny},{nx}"));
    schema_meta.insert("unit".to_string(), segment.unit.to_string());
    schema_meta.insert("flux_unit".to_string(), segment.flux_unit.clone());
    schema_meta.insert(
        "metadata".to_string(),
        serde_json::to_string(&metadata_map(segment)).context("encoding metadata")?,
    );

    let schema = Arc::new(Schema::new_with_metadata(
        vec![
            Field::new("wavelength", DataType::Float64, false),
            Field::new("flux", DataType::List(item()), false),
            Field::new("uncertainty", DataType::List(item()), false),
        ],
        schema_meta,
    ));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Float64Array::from(segment.spectral_axis.clone())),
            planes_to_list(segment.flux_view()),
            planes_to_list(segment.uncertainty_view()),
        ],
    )
    .context("building record batch")?;

    let file = std::fs::File::create(path).context("creating parquet file")?;
    let mut writer =
        ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}
