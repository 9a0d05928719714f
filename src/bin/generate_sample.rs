//! Write three synthetic overlapping IFU segments for trying the CLI.
//!
//! The segments mimic the G140H / G235H / G395H coverage of a near-infrared
//! integral field spectrograph: a power-law continuum with a few emission
//! lines, a compact source in the middle of a 4x5 field, per-segment flux
//! calibration offsets and gaussian noise.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ndarray::Array3;

use spectral_stitch::data::model::{MetadataValue, SpectralSegment, WavelengthUnit};
use spectral_stitch::data::writer::write_file;

#[derive(Parser, Debug)]
#[command(author, version, about = "Generate synthetic overlapping spectral segments")]
struct Args {
    /// Directory the segment files are written to
    #[arg(long, default_value = "sample_data")]
    output_dir: PathBuf,

    /// Seed of the noise generator
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Relative noise level
    #[arg(long, default_value_t = 0.02)]
    noise: f64,
}

/// (name, first wavelength, last wavelength, samples, calibration factor)
const SEGMENTS: [(&str, f64, f64, usize, f64); 3] = [
    ("g140h", 0.97, 1.89, 1200, 1.00),
    ("g235h", 1.66, 3.17, 1500, 1.08),
    ("g395h", 2.87, 5.27, 1800, 0.93),
];

/// (centre, sigma, amplitude) in microns and flux units.
const LINES: [(f64, f64, f64); 5] = [
    (1.282, 0.002, 4.0),
    (1.875, 0.003, 9.0),
    (2.166, 0.003, 2.5),
    (3.300, 0.020, 3.0),
    (4.052, 0.004, 5.0),
];

const SPATIAL: (usize, usize) = (4, 5);

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

fn spectrum(w: f64) -> f64 {
    let continuum = 10.0 * w.powf(-1.5);
    let lines: f64 = LINES
        .iter()
        .map(|&(mu, sigma, amp)| gaussian(w, mu, sigma, amp))
        .sum();
    continuum + lines
}

/// Relative brightness of a spatial pixel: a compact source plus background.
fn source_profile(y: usize, x: usize) -> f64 {
    let (cy, cx) = (1.5, 2.0);
    let r2 = (y as f64 - cy).powi(2) + (x as f64 - cx).powi(2);
    0.1 + (-r2 / 2.0).exp()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

fn generate_segment(
    name: &str,
    (first, last, samples, factor): (f64, f64, usize, f64),
    noise: f64,
    rng: &mut SimpleRng,
) -> Result<SpectralSegment> {
    let step = (last - first) / (samples - 1) as f64;
    let axis: Vec<f64> = (0..samples).map(|i| first + i as f64 * step).collect();

    let (ny, nx) = SPATIAL;
    let mut flux = Array3::zeros((samples, ny, nx));
    let mut uncertainty = Array3::zeros((samples, ny, nx));
    for ((w, y, x), value) in flux.indexed_iter_mut() {
        let truth = factor * spectrum(axis[w]) * source_profile(y, x);
        let sigma = noise * truth + 0.01;
        *value = truth + rng.gauss(0.0, sigma);
        uncertainty[[w, y, x]] = sigma;
    }

    let segment = SpectralSegment::new(axis, flux, uncertainty, 0)
        .with_context(|| format!("building segment {name}"))?
        .with_unit(WavelengthUnit::Micron)
        .with_flux_unit("MJy/sr")
        .with_metadata("grating", MetadataValue::String(name.to_uppercase()))
        .with_metadata("calibration_factor", MetadataValue::Float(factor));
    Ok(segment)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let mut rng = SimpleRng::new(args.seed);

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    for &(name, first, last, samples, factor) in &SEGMENTS {
        let segment =
            generate_segment(name, (first, last, samples, factor), args.noise, &mut rng)?;
        for ext in ["parquet", "json"] {
            let path = args.output_dir.join(format!("{name}.{ext}"));
            write_file(&path, &segment)?;
        }
        println!(
            "Wrote {name}: {samples} wavelengths {first} .. {last} um, spatial {:?}",
            SPATIAL
        );
    }
    Ok(())
}
