use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Container I/O
// ---------------------------------------------------------------------------

pub type FitsResult<T> = Result<T, FitsError>;

#[derive(Debug, Error)]
pub enum FitsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cfitsio: {0}")]
    Cfitsio(#[from] fitsio::errors::Error),

    #[error("Invalid FITS format: {0}")]
    InvalidFormat(String),

    #[error("Missing required keyword: {keyword}")]
    MissingKeyword { keyword: String },

    #[error("Data shape {shape:?} does not match {len} values")]
    ShapeMismatch { shape: Vec<usize>, len: usize },
}

impl FitsError {
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat(message.into())
    }

    pub fn missing_keyword(keyword: impl Into<String>) -> Self {
        Self::MissingKeyword {
            keyword: keyword.into(),
        }
    }
}

/// Why a file could not be handed to the validator.
#[derive(Debug, Error)]
pub enum FileAccessError {
    #[error("File {} does not exist", path.display())]
    Missing { path: PathBuf },

    #[error("Could not open {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: FitsError,
    },
}

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnitParseError {
    #[error("Unknown unit '{symbol}' in '{input}'")]
    UnknownUnit { symbol: String, input: String },

    #[error("Malformed unit string '{input}': {message}")]
    Syntax { input: String, message: String },
}

impl UnitParseError {
    pub fn unknown_unit(symbol: impl Into<String>, input: impl Into<String>) -> Self {
        Self::UnknownUnit {
            symbol: symbol.into(),
            input: input.into(),
        }
    }

    pub fn syntax(input: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Syntax {
            input: input.into(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinate model
// ---------------------------------------------------------------------------

pub type WcsResult<T> = Result<T, WcsError>;

/// Failure to build a coordinate transform from header keywords.
#[derive(Debug, Error)]
pub enum WcsError {
    #[error("Missing required WCS keyword: {keyword}")]
    MissingKeyword { keyword: String },

    #[error("Invalid WCS keyword '{keyword}': {message}")]
    InvalidKeyword { keyword: String, message: String },

    #[error("Unsupported spectral algorithm: {code}")]
    UnsupportedAlgorithm { code: String },

    #[error("Non-invertible matrix (determinant = {determinant})")]
    NonInvertibleMatrix { determinant: f64 },

    #[error("Invalid spectral unit: {source}")]
    Unit {
        #[from]
        source: UnitParseError,
    },
}

impl WcsError {
    pub fn missing_keyword(keyword: impl Into<String>) -> Self {
        Self::MissingKeyword {
            keyword: keyword.into(),
        }
    }

    pub fn invalid_keyword(keyword: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidKeyword {
            keyword: keyword.into(),
            message: message.into(),
        }
    }

    pub fn unsupported_algorithm(code: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm { code: code.into() }
    }

    pub fn non_invertible_matrix(determinant: f64) -> Self {
        Self::NonInvertibleMatrix { determinant }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WavelengthError {
    #[error("{model} wavelength model is not implemented")]
    NotImplemented { model: &'static str },
}

// ---------------------------------------------------------------------------
// Cube construction
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CubeError {
    #[error("Cube '{name}': {source}")]
    Unit {
        name: String,
        #[source]
        source: UnitParseError,
    },

    #[error("Cube '{name}': {source}")]
    Wavelength {
        name: String,
        #[source]
        source: WcsError,
    },
}
