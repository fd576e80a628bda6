use crate::fits::{FitsFile, Hdu};

// ---------------------------------------------------------------------------
// Shape predicates over HDUs
// ---------------------------------------------------------------------------

/// Number of dimensions a spectral cube must have.
pub const CUBE_NDIM: usize = 3;

/// An HDU is a cube when its array is present and exactly 3D.
pub fn is_cube(hdu: &Hdu) -> bool {
    hdu.shape().is_some_and(|shape| shape.len() == CUBE_NDIM)
}

/// Return indices of HDUs that carry a cube, in file order.
pub fn cube_indices(fits: &FitsFile) -> Vec<usize> {
    fits.iter()
        .enumerate()
        .filter(|(_, hdu)| is_cube(hdu))
        .map(|(i, _)| i)
        .collect()
}
