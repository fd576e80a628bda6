//! Data layer: reading FITS files and turning them into cubes.
//!
//! Architecture:
//! ```text
//!  .fits / .fits.gz
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  loader   │  parse blocks → FitsFile (Vec<Hdu>)
//!   └──────────┘
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  filter   │  pick the HDUs holding 3D data
//!   └──────────┘
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  model    │  Cube (data, unit, header, wavelength) → CubeList
//!   └──────────┘
//! ```

pub mod filter;
pub mod loader;
pub mod model;
