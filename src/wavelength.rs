//! Pixel to wavelength resolution.
//!
//! A [`WavelengthResolver`] is built once from the keywords of an HDU and is
//! a pure function of pixel coordinates afterwards. Only the linear WCS model
//! is implemented; the lookup models keep the same interface so callers do
//! not need to know which one backs a cube.

use log::error;

use crate::error::{WavelengthError, WcsError, WcsResult};
use crate::fits::{Hdu, KeywordProvider};
use crate::units::{Quantity, Unit};

const DETERMINANT_THRESHOLD: f64 = 1e-300;

pub trait WavelengthModel {
    /// Unit of the values returned by [`WavelengthModel::resolve`].
    fn unit(&self) -> &Unit;

    /// Wavelength at 0-based pixel `(x, y, z)`.
    fn resolve(&self, x: f64, y: f64, z: f64) -> Result<Quantity, WavelengthError>;
}

// ---------------------------------------------------------------------------
// Linear pixel -> intermediate transform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearTransform {
    crpix: [f64; 3],
    matrix: [[f64; 3]; 3],
}

impl LinearTransform {
    pub fn from_cd(crpix: [f64; 3], cd: [[f64; 3]; 3]) -> WcsResult<Self> {
        let determinant = determinant(&cd);
        if determinant.abs() < DETERMINANT_THRESHOLD {
            return Err(WcsError::non_invertible_matrix(determinant));
        }
        Ok(Self { crpix, matrix: cd })
    }

    pub fn from_pc_cdelt(crpix: [f64; 3], pc: [[f64; 3]; 3], cdelt: [f64; 3]) -> WcsResult<Self> {
        let cd = std::array::from_fn(|i| std::array::from_fn(|j| cdelt[i] * pc[i][j]));
        Self::from_cd(crpix, cd)
    }

    /// `q[i] = sum_j m[i][j] * (p[j] - crpix[j])`, with 1-based FITS pixels.
    pub fn pixel_to_intermediate(&self, pixel: [f64; 3]) -> [f64; 3] {
        let d: [f64; 3] = std::array::from_fn(|j| pixel[j] - self.crpix[j]);
        std::array::from_fn(|i| (0..3).map(|j| self.matrix[i][j] * d[j]).sum())
    }
}

fn determinant(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

// ---------------------------------------------------------------------------
// LinearWcsModel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectralAlgorithm {
    Linear,
    Log,
}

/// Wavelength from a linear (or logarithmic) WCS spectral axis.
#[derive(Debug, Clone)]
pub struct LinearWcsModel {
    transform: LinearTransform,
    spectral_axis: usize,
    crval: f64,
    algorithm: SpectralAlgorithm,
    axis_unit: Unit,
    unit: Unit,
}

impl LinearWcsModel {
    pub fn from_header<K: KeywordProvider>(header: &K) -> WcsResult<Self> {
        let naxes = header
            .get_int("WCSAXES")
            .or_else(|| header.get_int("NAXIS"))
            .unwrap_or(0);
        if naxes < 3 {
            return Err(WcsError::invalid_keyword(
                "NAXIS",
                format!("{naxes} axes, a spectral cube needs 3"),
            ));
        }

        let ctype = |i: usize| {
            header
                .get_string(&format!("CTYPE{i}"))
                .unwrap_or_default()
                .trim()
                .to_string()
        };
        let spectral = (1..=3)
            .find(|&i| is_wavelength_type(&ctype(i)))
            .unwrap_or(3);
        let algorithm = spectral_algorithm(&ctype(spectral))?;

        let crval = header.require_float(&format!("CRVAL{spectral}"))?;
        let crpix = std::array::from_fn(|j| {
            header
                .get_float(&format!("CRPIX{}", j + 1))
                .unwrap_or(0.0)
        });

        let has_cd = (1..=3).any(|i| (1..=3).any(|j| header.get_float(&format!("CD{i}_{j}")).is_some()));
        let transform = if has_cd {
            header.require_float(&format!("CD{spectral}_{spectral}"))?;
            let cd = std::array::from_fn(|i| {
                std::array::from_fn(|j| {
                    header
                        .get_float(&format!("CD{}_{}", i + 1, j + 1))
                        .unwrap_or(0.0)
                })
            });
            LinearTransform::from_cd(crpix, cd)?
        } else {
            header.require_float(&format!("CDELT{spectral}"))?;
            let cdelt = std::array::from_fn(|i| {
                header
                    .get_float(&format!("CDELT{}", i + 1))
                    .unwrap_or(1.0)
            });
            let pc = std::array::from_fn(|i| {
                std::array::from_fn(|j| {
                    let default = if i == j { 1.0 } else { 0.0 };
                    header
                        .get_float(&format!("PC{}_{}", i + 1, j + 1))
                        .unwrap_or(default)
                })
            });
            LinearTransform::from_pc_cdelt(crpix, pc, cdelt)?
        };

        let unit_key = format!("CUNIT{spectral}");
        let axis_unit = match header.get_string(&unit_key) {
            Some(text) if !text.trim().is_empty() => Unit::parse(&text)?,
            _ => Unit::meter(),
        };
        if !axis_unit.is_length() {
            return Err(WcsError::invalid_keyword(
                unit_key,
                format!("'{axis_unit}' is not a wavelength unit"),
            ));
        }

        Ok(Self {
            transform,
            spectral_axis: spectral - 1,
            crval,
            algorithm,
            axis_unit,
            unit: Unit::meter(),
        })
    }

    /// 0-based index of the spectral axis in FITS axis order.
    pub fn spectral_axis(&self) -> usize {
        self.spectral_axis
    }

    pub fn algorithm(&self) -> SpectralAlgorithm {
        self.algorithm
    }
}

impl Default for LinearWcsModel {
    /// Identity model: pixel `z` maps to `z` metres.
    fn default() -> Self {
        Self {
            transform: LinearTransform {
                crpix: [1.0; 3],
                matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            },
            spectral_axis: 2,
            crval: 0.0,
            algorithm: SpectralAlgorithm::Linear,
            axis_unit: Unit::meter(),
            unit: Unit::meter(),
        }
    }
}

impl WavelengthModel for LinearWcsModel {
    fn unit(&self) -> &Unit {
        &self.unit
    }

    fn resolve(&self, x: f64, y: f64, z: f64) -> Result<Quantity, WavelengthError> {
        let q = self
            .transform
            .pixel_to_intermediate([x + 1.0, y + 1.0, z + 1.0]);
        let offset = q[self.spectral_axis];
        let world = match self.algorithm {
            SpectralAlgorithm::Linear => self.crval + offset,
            SpectralAlgorithm::Log => self.crval * (offset / self.crval).exp(),
        };
        Ok(Quantity::new(world * self.axis_unit.scale(), self.unit.clone()))
    }
}

fn is_wavelength_type(ctype: &str) -> bool {
    ctype.starts_with("WAVE") || ctype.starts_with("AWAV")
}

fn spectral_algorithm(ctype: &str) -> WcsResult<SpectralAlgorithm> {
    if !is_wavelength_type(ctype) {
        return Ok(SpectralAlgorithm::Linear);
    }
    match ctype[4..].trim_start_matches('-') {
        "" => Ok(SpectralAlgorithm::Linear),
        "LOG" => Ok(SpectralAlgorithm::Log),
        code => Err(WcsError::unsupported_algorithm(code)),
    }
}

// ---------------------------------------------------------------------------
// Lookup models (placeholders)
// ---------------------------------------------------------------------------

macro_rules! lookup_model {
    ($name:ident, $label:literal) => {
        #[derive(Debug, Clone)]
        pub struct $name {
            unit: Unit,
        }

        impl Default for $name {
            fn default() -> Self {
                Self { unit: Unit::meter() }
            }
        }

        impl WavelengthModel for $name {
            fn unit(&self) -> &Unit {
                &self.unit
            }

            fn resolve(&self, _x: f64, _y: f64, _z: f64) -> Result<Quantity, WavelengthError> {
                Err(WavelengthError::NotImplemented { model: $label })
            }
        }
    };
}

lookup_model!(DataLookupModel, "data lookup");
lookup_model!(ThreeDLookupModel, "3D lookup");
lookup_model!(OneDLookupModel, "1D lookup");

// ---------------------------------------------------------------------------
// WavelengthResolver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum WavelengthResolver {
    Linear(LinearWcsModel),
    DataLookup(DataLookupModel),
    ThreeDLookup(ThreeDLookupModel),
    OneDLookup(OneDLookupModel),
}

impl WavelengthResolver {
    /// Build the resolver for an HDU. Always the linear model for now.
    pub fn from_hdu(hdu: &Hdu) -> WcsResult<Self> {
        LinearWcsModel::from_header(hdu.header())
            .map(Self::Linear)
            .inspect_err(|e| {
                error!(
                    "could not build a coordinate model for HDU '{}': {e}",
                    hdu.extname().unwrap_or("")
                )
            })
    }

    fn model(&self) -> &dyn WavelengthModel {
        match self {
            Self::Linear(m) => m,
            Self::DataLookup(m) => m,
            Self::ThreeDLookup(m) => m,
            Self::OneDLookup(m) => m,
        }
    }

    /// 0-based FITS axis holding wavelength, when the model knows it.
    pub fn spectral_axis(&self) -> Option<usize> {
        match self {
            Self::Linear(m) => Some(m.spectral_axis()),
            _ => None,
        }
    }
}

impl Default for WavelengthResolver {
    fn default() -> Self {
        Self::Linear(LinearWcsModel::default())
    }
}

impl WavelengthModel for WavelengthResolver {
    fn unit(&self) -> &Unit {
        self.model().unit()
    }

    fn resolve(&self, x: f64, y: f64, z: f64) -> Result<Quantity, WavelengthError> {
        self.model().resolve(x, y, z)
    }
}
