use thiserror::Error;

use crate::model::PixType;

/// Caller-facing failures raised by the dispatch layer.
///
/// Operations return `anyhow::Result`; these values sit at the root of the
/// chain and can be recovered with `err.downcast_ref::<MapError>()`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MapError {
    #[error("Unknown pixelisation type {0}.")]
    UnsupportedPixelization(String),

    #[error("Can't {operation} {pix_type} maps")]
    UnsupportedOperation {
        operation: &'static str,
        pix_type: PixType,
    },

    #[error("Unknown apodization type {0}")]
    UnsupportedApodization(String),

    #[error("Invalid number of HEALPix pixels: {0}")]
    InvalidPixelCount(usize),

    #[error("Invalid nside {0}: must be a positive power of two")]
    InvalidNside(usize),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}
