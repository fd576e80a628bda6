use std::path::PathBuf;

use anyhow::{Context, Result};
use ndarray::{Array1, Array3};

use ifucube::data::loader::save_file;
use ifucube::fits::{FitsFile, Hdu, Header};

const N_WAVE: usize = 2048;
const N_SPAXEL: usize = 17;

// Spectral axis: 1.9005 um onward in 1 nm steps.
const CRVAL3_UM: f64 = 1.9005;
const CDELT3_UM: f64 = 0.001;

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

fn generate_spectrum(
    wavelengths: &[f64],
    continuum: f64,
    lines: &[(f64, f64, f64)],
    noise_level: f64,
    rng: &mut SimpleRng,
) -> Vec<f64> {
    wavelengths
        .iter()
        .map(|&wl| {
            let signal: f64 = lines
                .iter()
                .map(|&(mu, sigma, amp)| gaussian(wl, mu, sigma, amp))
                .sum();
            continuum + signal + rng.gauss(0.0, noise_level)
        })
        .collect()
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
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
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

/// Celestial and spectral WCS keywords shared by both cubes.
fn wcs_header(extname: Option<&str>, bunit: &str) -> Header {
    let centre = (N_SPAXEL as f64 + 1.0) / 2.0;
    let mut header = Header::new();
    if let Some(name) = extname {
        header.set("EXTNAME", name);
    }
    header.set("BUNIT", bunit);
    header.set("CTYPE1", "RA---TAN");
    header.set("CTYPE2", "DEC--TAN");
    header.set("CTYPE3", "WAVE");
    header.set("CUNIT1", "deg");
    header.set("CUNIT2", "deg");
    header.set("CUNIT3", "um");
    header.set("CRPIX1", centre);
    header.set("CRPIX2", centre);
    header.set("CRPIX3", 1.0);
    header.set("CRVAL1", 150.1163);
    header.set("CRVAL2", 2.2058);
    header.set("CRVAL3", CRVAL3_UM);
    header.set("CDELT1", -0.1 / 3600.0);
    header.set("CDELT2", 0.1 / 3600.0);
    header.set("CDELT3", CDELT3_UM);
    header
}

fn main() -> Result<()> {
    let output_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample_cube.fits"));
    let mut rng = SimpleRng::new(42);

    let wavelengths: Vec<f64> = (0..N_WAVE)
        .map(|i| CRVAL3_UM + i as f64 * CDELT3_UM)
        .collect();

    // Pa-alpha, Br-delta and Br-gamma, brightest at the cube centre.
    let lines = [(1.8751, 0.0015, 8.0), (1.9446, 0.0015, 2.5), (2.1661, 0.0015, 4.0)];
    let centre = (N_SPAXEL / 2) as f64;
    let noise_level = 0.05;

    let mut flux = Array3::<f64>::zeros((N_WAVE, N_SPAXEL, N_SPAXEL));
    for y in 0..N_SPAXEL {
        for x in 0..N_SPAXEL {
            let r2 = (x as f64 - centre).powi(2) + (y as f64 - centre).powi(2);
            let profile = (-r2 / (2.0 * 3.0f64.powi(2))).exp();
            let scaled: Vec<(f64, f64, f64)> = lines
                .iter()
                .map(|&(mu, sigma, amp)| (mu, sigma, amp * profile))
                .collect();
            let spectrum =
                generate_spectrum(&wavelengths, profile, &scaled, noise_level, &mut rng);
            for (z, value) in spectrum.into_iter().enumerate() {
                flux[[z, y, x]] = value;
            }
        }
    }
    let ivar = Array3::<f64>::from_elem(flux.raw_dim(), 1.0 / noise_level.powi(2));
    let mask = Array1::<f64>::zeros(10);

    // Headers carry a few problems for `ifucube check` to find.
    let mut primary = Header::new();
    primary.set("OBJECT", "SAMPLE");
    primary.set("TELESCOP", "SYNTHETIC");

    let mut flux_header = wcs_header(Some("FLUX"), "1E-17 erg/s/cm^2/Ang/spaxel");
    flux_header.set("CUNIT2", "degs");

    let mut mask_header = Header::new();
    mask_header.set("EXTNAME", "MASKINFO");

    let mut ivar_header = wcs_header(None, "Counts/Spaxel");
    ivar_header.set("CTYPE3", "FREQ");

    let fits = FitsFile::from_hdus(vec![
        Hdu::primary(primary, None),
        Hdu::image_extension(flux_header, flux.into_dyn()),
        Hdu::image_extension(mask_header, mask.into_dyn()),
        Hdu::image_extension(ivar_header, ivar.into_dyn()),
    ]);
    save_file(&output_path, &fits)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    println!(
        "Wrote {N_SPAXEL}x{N_SPAXEL} spaxels ({N_WAVE} wavelengths each) to {}",
        output_path.display()
    );
    Ok(())
}
