pub mod header;
pub mod pixelization;
pub mod sky_map;

pub use header::HduHeader;
pub use pixelization::{check_pix_type, PixType};
pub use sky_map::{CarGeometry, CarMap, HealpixMap, SkyMap};
