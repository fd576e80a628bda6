//! In-memory multi-extension FITS container.
//!
//! Only what the checker and cube reader need: ordered HDUs, each an
//! ordered header plus an optional image. Reading and writing go through
//! cfitsio in `data::loader`.

pub mod hdu;
pub mod header;

use std::path::{Path, PathBuf};

pub use hdu::Hdu;
pub use header::{Card, Header, HeaderValue, KeywordProvider};

/// An opened multi-extension file.
#[derive(Debug, Clone, Default)]
pub struct FitsFile {
    hdus: Vec<Hdu>,
    /// File the HDUs were read from; `None` when built in memory.
    source: Option<PathBuf>,
}

impl FitsFile {
    pub fn from_hdus(hdus: Vec<Hdu>) -> Self {
        Self { hdus, source: None }
    }

    pub(crate) fn read_from(source: &Path, hdus: Vec<Hdu>) -> Self {
        Self {
            hdus,
            source: Some(source.to_path_buf()),
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn hdus(&self) -> &[Hdu] {
        &self.hdus
    }

    pub fn hdus_mut(&mut self) -> &mut [Hdu] {
        &mut self.hdus
    }

    pub fn get(&self, index: usize) -> Option<&Hdu> {
        self.hdus.get(index)
    }

    pub fn len(&self) -> usize {
        self.hdus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hdus.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Hdu> {
        self.hdus.iter()
    }
}

impl<'a> IntoIterator for &'a FitsFile {
    type Item = &'a Hdu;
    type IntoIter = std::slice::Iter<'a, Hdu>;

    fn into_iter(self) -> Self::IntoIter {
        self.hdus.iter()
    }
}
