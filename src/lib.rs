pub mod data;
pub mod error;
pub mod fits;
pub mod units;
pub mod validate;
pub mod wavelength;

pub use data::model::{Cube, CubeList};
pub use fits::FitsFile;
pub use validate::{check_file, HeaderValidator, ValidationReport, ValidatorConfig};
pub use wavelength::{WavelengthModel, WavelengthResolver};
