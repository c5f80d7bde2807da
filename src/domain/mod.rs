pub mod apodize;
pub mod config_manager;
pub mod distance;
pub mod fft;
pub mod fits_reader;
pub mod fits_writer;
pub mod grade;
pub mod healpix;
pub mod map_io;
pub mod plot;
pub mod resolution;
pub mod sht;
pub mod smoothing;
pub mod template;
pub mod wcs;
