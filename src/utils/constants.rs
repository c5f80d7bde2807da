pub const BLOCK_SIZE: usize = 2880;
pub const CARD_SIZE: usize = 80;

/// Sentinel healpy uses for missing pixels.
pub const UNSEEN: f64 = -1.6375e30;

pub const K_TO_MUK: f64 = 1.0e6;
pub const MUK_TO_K: f64 = 1.0e-6;

/// `sqrt(8 ln 2)`, the Gaussian FWHM to standard deviation ratio.
pub const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949_3;

pub const HEALPIX_ROW_WIDTH: usize = 1024;

#[inline]
pub fn is_unseen(v: f64) -> bool {
    !v.is_finite() || (v - UNSEEN).abs() <= 1e-5 * UNSEEN.abs()
}
