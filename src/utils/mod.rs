pub mod colormap;
pub mod constants;
pub mod font;
pub mod mmap;
pub mod render;
