//! HEALPix and CAR sky maps behind one interface: FITS I/O, beam smoothing,
//! HEALPix resolution changes, mask apodization and quick-look plots.

pub mod domain;
pub mod error;
pub mod model;
pub mod utils;

pub use crate::domain::apodize::{apodize_mask, ApodizationType};
pub use crate::domain::config_manager::{init_settings, settings, Settings};
pub use crate::domain::grade::ud_grade;
pub use crate::domain::map_io::{
    detect_pix_type, read_map, write_map, MapDtype, ReadOptions, WriteOptions,
};
pub use crate::domain::plot::{plot_map, ColorLimits, PlotOptions};
pub use crate::domain::resolution::lmax_from_map;
pub use crate::domain::smoothing::{smooth_map, smooth_map_with, SmoothOptions};
pub use crate::domain::template::template_from_map;
pub use crate::error::MapError;
pub use crate::model::{check_pix_type, CarGeometry, CarMap, HealpixMap, PixType, SkyMap};
