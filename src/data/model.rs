use std::fmt;
use std::ops::Deref;
use std::path::Path;

use anyhow::Context;
use log::debug;
use ndarray::{arr0, ArrayD, IxDyn};
use serde_json::Value as JsonValue;

use super::filter::{is_cube, CUBE_NDIM};
use super::loader::load_file;
use crate::error::{CubeError, WavelengthError};
use crate::fits::{FitsFile, Hdu, Header, HeaderValue};
use crate::units::{normalize_unit, Quantity, Unit};
use crate::wavelength::{LinearWcsModel, WavelengthModel, WavelengthResolver};

// ---------------------------------------------------------------------------
// Cube – one IFU data cube
// ---------------------------------------------------------------------------

/// A single 3D data extension with its parsed unit, name and wavelength model.
#[derive(Debug, Clone)]
pub struct Cube {
    name: String,
    data: ArrayD<f64>,
    unit: Unit,
    other_header: Header,
    wavelength: WavelengthResolver,
}

impl Cube {
    /// Build a cube, normalizing and parsing `unit`.
    pub fn new(
        name: impl Into<String>,
        data: ArrayD<f64>,
        unit: &str,
        other_header: Header,
        wavelength: WavelengthResolver,
    ) -> Result<Self, CubeError> {
        let name = name.into();
        let unit = normalize_unit(unit).map_err(|source| CubeError::Unit {
            name: name.clone(),
            source,
        })?;
        Ok(Self {
            name,
            data,
            unit,
            other_header,
            wavelength,
        })
    }

    /// Build a cube from an HDU. The data is taken as is; callers decide
    /// whether the HDU is a cube. A resolver is derived from the same header
    /// unless one is given.
    pub fn from_hdu(hdu: &Hdu, wavelength: Option<WavelengthResolver>) -> Result<Self, CubeError> {
        let header = hdu.header();
        let name = hdu.extname().unwrap_or("").to_string();

        let wavelength = match wavelength {
            Some(w) => w,
            None => WavelengthResolver::from_hdu(hdu).map_err(|source| CubeError::Wavelength {
                name: name.clone(),
                source,
            })?,
        };
        let data = hdu
            .data()
            .cloned()
            .unwrap_or_else(|| ArrayD::zeros(IxDyn(&[0])));
        let unit = header.get("BUNIT").and_then(HeaderValue::as_str).unwrap_or("");

        Self::new(name, data, unit, header.clone(), wavelength)
    }

    /// Placeholder for cubes stored as a generic document tree. The tree is
    /// not read yet; fixed sample values are returned.
    pub fn from_tree(_tree: &JsonValue) -> Self {
        Self {
            name: "asdf".to_string(),
            data: arr0(33.0).into_dyn(),
            unit: Unit::angstrom(),
            other_header: Header::new(),
            wavelength: WavelengthResolver::Linear(LinearWcsModel::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    /// Replace the unit; the raw string goes through the same normalization
    /// as at construction.
    pub fn set_unit(&mut self, raw: &str) -> Result<(), CubeError> {
        self.unit = normalize_unit(raw).map_err(|source| CubeError::Unit {
            name: self.name.clone(),
            source,
        })?;
        Ok(())
    }

    pub fn other_header(&self) -> &Header {
        &self.other_header
    }

    pub fn wavelength(&self) -> &WavelengthResolver {
        &self.wavelength
    }

    /// 0-based FITS axis holding wavelength. Cubes whose model does not say
    /// are taken to have it last (`NAXIS3`), as IFU pipelines write them.
    pub fn spectral_axis(&self) -> usize {
        self.wavelength.spectral_axis().unwrap_or(CUBE_NDIM - 1)
    }

    /// Number of samples along the spectral axis.
    pub fn spectral_len(&self) -> usize {
        match self.data.ndim() {
            CUBE_NDIM => self.data.shape()[CUBE_NDIM - 1 - self.spectral_axis()],
            _ => 0,
        }
    }

    /// FITS pixel of spaxel `(x, y)` at spectral sample `z`. `x` and `y`
    /// follow the two non-spectral axes in FITS order.
    fn fits_pixel(&self, x: usize, y: usize, z: usize) -> [usize; CUBE_NDIM] {
        let spectral = self.spectral_axis();
        let mut spatial = [x, y].into_iter();
        std::array::from_fn(|axis| {
            if axis == spectral {
                z
            } else {
                spatial.next().unwrap_or(0)
            }
        })
    }

    /// Flux values along the spectral axis at spaxel `(x, y)`, or `None`
    /// when the spaxel lies outside the cube.
    pub fn spectrum(&self, x: usize, y: usize) -> Option<Vec<f64>> {
        if self.data.ndim() != CUBE_NDIM {
            return None;
        }
        (0..self.spectral_len())
            .map(|z| {
                let [p1, p2, p3] = self.fits_pixel(x, y, z);
                self.data.get(&[p3, p2, p1][..]).copied()
            })
            .collect()
    }

    /// Wavelength of spectral sample `z` at spaxel `(x, y)`.
    pub fn wavelength_at(&self, x: usize, y: usize, z: usize) -> Result<Quantity, WavelengthError> {
        let [p1, p2, p3] = self.fits_pixel(x, y, z);
        self.wavelength.resolve(p1 as f64, p2 as f64, p3 as f64)
    }
}

impl fmt::Display for Cube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.shape().iter().map(usize::to_string).collect();
        write!(f, "Cube {} ({}) {}", self.name, dims.join(", "), self.unit)
    }
}

// ---------------------------------------------------------------------------
// CubeList – the cubes of one file
// ---------------------------------------------------------------------------

/// Ordered cubes read from a multi-extension file.
#[derive(Debug, Clone, Default)]
pub struct CubeList {
    cubes: Vec<Cube>,
}

impl CubeList {
    /// Build a cube from every HDU whose array is exactly 3D. Other HDUs are
    /// skipped; a cube that cannot be built is an error.
    pub fn read(fits: &FitsFile) -> Result<Self, CubeError> {
        let mut cubes = Vec::new();
        for (index, hdu) in fits.iter().enumerate() {
            if !is_cube(hdu) {
                debug!("HDU {index}: shape {:?}, not a cube", hdu.shape());
                continue;
            }
            cubes.push(Cube::from_hdu(hdu, None)?);
        }
        Ok(Self { cubes })
    }

    /// Load a file from disk and read its cubes.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let fits = load_file(path).with_context(|| format!("opening {}", path.display()))?;
        Self::read(&fits).with_context(|| format!("reading cubes from {}", path.display()))
    }

}

impl Deref for CubeList {
    type Target = [Cube];

    fn deref(&self) -> &[Cube] {
        &self.cubes
    }
}

impl IntoIterator for CubeList {
    type Item = Cube;
    type IntoIter = std::vec::IntoIter<Cube>;

    fn into_iter(self) -> Self::IntoIter {
        self.cubes.into_iter()
    }
}

impl<'a> IntoIterator for &'a CubeList {
    type Item = &'a Cube;
    type IntoIter = std::slice::Iter<'a, Cube>;

    fn into_iter(self) -> Self::IntoIter {
        self.cubes.iter()
    }
}

impl fmt::Display for CubeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self
            .cubes
            .iter()
            .enumerate()
            .map(|(i, cube)| format!("{i}. {cube}"))
            .collect();
        write!(f, "[{}]", entries.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{UnitParseError, WcsError};
    use crate::wavelength::OneDLookupModel;

    fn cube_header(name: &str) -> Header {
        let mut header = Header::new();
        header.set("EXTNAME", name);
        header.set("BUNIT", "1E-17 erg/s/cm^2/Ang/spaxel");
        header.set("CTYPE1", "RA---TAN");
        header.set("CTYPE2", "DEC--TAN");
        header.set("CTYPE3", "WAVE");
        header.set("CRPIX3", 1.0);
        header.set("CRVAL3", 1.9005);
        header.set("CDELT3", 0.001);
        header.set("CUNIT3", "um");
        header
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(((actual - expected) / expected).abs() < 1e-9, "{actual} != {expected}");
    }

    fn cube_hdu(name: &str, shape: &[usize]) -> Hdu {
        Hdu::image_extension(cube_header(name), ArrayD::zeros(IxDyn(shape)))
    }

    fn reference_file() -> FitsFile {
        let mut mask = Header::new();
        mask.set("EXTNAME", "MASKINFO");
        FitsFile::from_hdus(vec![
            Hdu::primary(Header::new(), None),
            cube_hdu("FLUX", &[2048, 17, 17]),
            Hdu::image_extension(mask, ArrayD::zeros(IxDyn(&[10]))),
            cube_hdu("IVAR", &[2048, 17, 17]),
        ])
    }

    #[test]
    fn test_read_keeps_only_cubes_in_order() {
        let cubes = CubeList::read(&reference_file()).unwrap();
        assert_eq!(cubes.len(), 2);
        assert_eq!(cubes[0].name(), "FLUX");
        assert_eq!(cubes[1].name(), "IVAR");
        for cube in &cubes {
            assert_eq!(cube.shape(), &[2048, 17, 17]);
        }
    }

    #[test]
    fn test_read_resolves_wavelength() {
        let cubes = CubeList::read(&reference_file()).unwrap();
        let wavelength = cubes[0].wavelength().resolve(12.0, 34.0, 34.0).unwrap();
        assert!(((wavelength.value - 1.9345e-6) / 1.9345e-6).abs() < 1e-4);
        assert_eq!(wavelength.unit, Unit::meter());
    }

    #[test]
    fn test_from_hdu_normalizes_unit() {
        let cube = Cube::from_hdu(&cube_hdu("FLUX", &[4, 2, 2]), None).unwrap();
        assert_eq!(cube.unit().as_str(), "1E-17 erg/s/cm^2/A/pixel");
        assert_eq!(cube.other_header().get("EXTNAME"), Some(&HeaderValue::from("FLUX")));
    }

    #[test]
    fn test_from_hdu_without_name_or_unit() {
        let mut header = cube_header("X");
        header.remove("EXTNAME");
        header.remove("BUNIT");
        let hdu = Hdu::image_extension(header, ArrayD::zeros(IxDyn(&[4, 2, 2])));
        let cube = Cube::from_hdu(&hdu, None).unwrap();
        assert_eq!(cube.name(), "");
        assert!(cube.unit().is_dimensionless());
    }

    #[test]
    fn test_bad_unit_fails_construction() {
        let mut header = cube_header("FLUX");
        header.set("BUNIT", "furlong");
        let hdu = Hdu::image_extension(header, ArrayD::zeros(IxDyn(&[4, 2, 2])));
        let err = Cube::from_hdu(&hdu, None).unwrap_err();
        assert!(matches!(
            err,
            CubeError::Unit { source: UnitParseError::UnknownUnit { .. }, .. }
        ));
    }

    #[test]
    fn test_bad_wcs_propagates_from_read() {
        let mut header = cube_header("FLUX");
        header.remove("CRVAL3");
        let fits = FitsFile::from_hdus(vec![Hdu::primary(
            header,
            Some(ArrayD::zeros(IxDyn(&[4, 2, 2]))),
        )]);
        let err = CubeList::read(&fits).unwrap_err();
        assert!(matches!(
            err,
            CubeError::Wavelength { source: WcsError::MissingKeyword { .. }, .. }
        ));
    }

    #[test]
    fn test_supplied_resolver_is_used() {
        let mut header = cube_header("FLUX");
        header.remove("CRVAL3");
        let hdu = Hdu::image_extension(header, ArrayD::zeros(IxDyn(&[4, 2, 2])));
        let resolver = WavelengthResolver::OneDLookup(OneDLookupModel::default());
        let cube = Cube::from_hdu(&hdu, Some(resolver)).unwrap();
        assert!(cube.wavelength().resolve(0.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_set_unit_renormalizes() {
        let mut cube = Cube::from_hdu(&cube_hdu("FLUX", &[4, 2, 2]), None).unwrap();
        cube.set_unit("Counts/Spaxel").unwrap();
        assert_eq!(cube.unit().as_str(), "count/pixel");
        assert!(cube.set_unit("bogus").is_err());
        assert_eq!(cube.unit().as_str(), "count/pixel");
    }

    #[test]
    fn test_from_tree_placeholder() {
        let cube = Cube::from_tree(&serde_json::json!({"data": [1, 2, 3]}));
        assert_eq!(cube.name(), "asdf");
        assert_eq!(cube.data().ndim(), 0);
        assert_eq!(cube.unit(), &Unit::angstrom());
        assert!(cube.other_header().is_empty());
    }

    #[test]
    fn test_spectrum_extraction() {
        let data = ArrayD::from_shape_fn(IxDyn(&[3, 2, 2]), |i| (i[0] * 100 + i[1] * 10 + i[2]) as f64);
        let hdu = Hdu::image_extension(cube_header("FLUX"), data);
        let cube = Cube::from_hdu(&hdu, None).unwrap();
        assert_eq!(cube.spectral_axis(), 2);
        assert_eq!(cube.spectrum(1, 0), Some(vec![1.0, 101.0, 201.0]));
        assert_eq!(cube.spectrum(2, 0), None);
        assert_close(cube.wavelength_at(1, 0, 2).unwrap().value, 1.9025e-6);
    }

    #[test]
    fn test_spectrum_follows_spectral_axis() {
        // Wavelength on NAXIS1, so the array index is [y, x, z].
        let mut header = Header::new();
        header.set("EXTNAME", "FLUX");
        header.set("CTYPE1", "WAVE");
        header.set("CTYPE2", "RA---TAN");
        header.set("CTYPE3", "DEC--TAN");
        header.set("CRPIX1", 1.0);
        header.set("CRVAL1", 6000.0);
        header.set("CDELT1", 2.0);
        header.set("CUNIT1", "Angstrom");
        let data = ArrayD::from_shape_fn(IxDyn(&[2, 3, 4]), |i| (i[0] * 100 + i[1] * 10 + i[2]) as f64);
        let cube = Cube::from_hdu(&Hdu::image_extension(header, data), None).unwrap();

        assert_eq!(cube.spectral_axis(), 0);
        assert_eq!(cube.spectral_len(), 4);
        assert_eq!(cube.spectrum(2, 1), Some(vec![120.0, 121.0, 122.0, 123.0]));
        assert_eq!(cube.spectrum(3, 0), None);
        assert_close(cube.wavelength_at(2, 1, 3).unwrap().value, 6.006e-7);
    }

    #[test]
    fn test_display() {
        let cubes = CubeList::read(&reference_file()).unwrap();
        assert_eq!(
            cubes.to_string(),
            "[0. Cube FLUX (2048, 17, 17) 1E-17 erg/s/cm^2/A/pixel, \
             1. Cube IVAR (2048, 17, 17) 1E-17 erg/s/cm^2/A/pixel]"
        );
    }
}
