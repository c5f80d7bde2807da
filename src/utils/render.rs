use std::path::Path;

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};

use crate::utils::colormap::Colormap;
use crate::utils::constants::is_unseen;
use crate::utils::font::{draw_text, text_width, GLYPH_HEIGHT};

pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
pub const GREY: Rgb<u8> = Rgb([128, 128, 128]);
pub const GRID: Rgb<u8> = Rgb([96, 96, 96]);

pub const TEXT_SCALE: u32 = 2;
const MARGIN: u32 = 8;
const BAR_HEIGHT: u32 = 14;

/// Maps a value onto the colormap over `[min, max]`; missing data is grey.
#[inline]
pub fn value_to_rgb(v: f64, min: f64, max: f64, cmap: &Colormap) -> Rgb<u8> {
    if is_unseen(v) {
        return GREY;
    }
    let range = (max - min).max(1e-300);
    cmap.sample((v - min) / range)
}

/// Compact tick label: fixed notation for ordinary magnitudes, otherwise
/// scientific.
pub fn format_label(v: f64) -> String {
    let a = v.abs();
    if a == 0.0 || (1e-2..1e4).contains(&a) {
        let s = format!("{:.3}", v);
        let s = s.trim_end_matches('0').trim_end_matches('.');
        if s == "-0" {
            "0".to_string()
        } else {
            s.to_string()
        }
    } else {
        format!("{:.2e}", v)
    }
}

pub fn title_band_height() -> u32 {
    GLYPH_HEIGHT * TEXT_SCALE + 2 * MARGIN
}

pub fn colorbar_band_height() -> u32 {
    BAR_HEIGHT + GLYPH_HEIGHT * TEXT_SCALE + 3 * MARGIN
}

/// Blank canvas with room for a title above and a colorbar below a
/// `width x plot_height` plot area. Returns the canvas and the plot origin
/// row.
pub fn new_canvas(width: u32, plot_height: u32) -> (RgbImage, u32) {
    let height = title_band_height() + plot_height + colorbar_band_height();
    (RgbImage::from_pixel(width, height, WHITE), title_band_height())
}

pub fn draw_title(img: &mut RgbImage, title: &str) {
    let w = text_width(title, TEXT_SCALE);
    let x = (img.width() as i64 - w as i64) / 2;
    draw_text(img, x.max(0), MARGIN as i64, title, TEXT_SCALE, BLACK);
}

/// Horizontal colorbar along the bottom band with min/max labels at its ends.
pub fn draw_colorbar(img: &mut RgbImage, cmap: &Colormap, min: f64, max: f64) {
    let width = img.width();
    let bar_w = (width * 2 / 3).max(2);
    let x0 = (width - bar_w) / 2;
    let y0 = img.height() - colorbar_band_height() + MARGIN;

    for i in 0..bar_w {
        let c = cmap.sample(i as f64 / (bar_w - 1) as f64);
        for j in 0..BAR_HEIGHT {
            img.put_pixel(x0 + i, y0 + j, c);
        }
    }
    for i in 0..bar_w {
        img.put_pixel(x0 + i, y0, BLACK);
        img.put_pixel(x0 + i, y0 + BAR_HEIGHT - 1, BLACK);
    }
    for j in 0..BAR_HEIGHT {
        img.put_pixel(x0, y0 + j, BLACK);
        img.put_pixel(x0 + bar_w - 1, y0 + j, BLACK);
    }

    let label_y = (y0 + BAR_HEIGHT + MARGIN) as i64;
    let lo = format_label(min);
    let hi = format_label(max);
    draw_text(img, x0 as i64, label_y, &lo, TEXT_SCALE, BLACK);
    let hi_x = (x0 + bar_w) as i64 - text_width(&hi, TEXT_SCALE) as i64;
    draw_text(img, hi_x, label_y, &hi, TEXT_SCALE, BLACK);
}

pub fn save_png(img: &RgbImage, path: &Path) -> Result<()> {
    img.save(path)
        .with_context(|| format!("Failed to save plot to {}", path.display()))?;
    log::info!("Wrote {}x{} plot to {}", img.width(), img.height(), path.display());
    Ok(())
}
