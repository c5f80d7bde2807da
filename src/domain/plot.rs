use std::f64::consts::{PI, SQRT_2};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use image::RgbImage;
use ndarray::{ArrayView1, ArrayView2};
use rayon::prelude::*;

use crate::domain::config_manager::settings;
use crate::domain::healpix::HealpixGeometry;
use crate::error::MapError;
use crate::model::{CarGeometry, SkyMap};
use crate::utils::colormap::{for_components, Colormap};
use crate::utils::constants::is_unseen;
use crate::utils::render::{
    draw_colorbar, draw_title, new_canvas, save_png, value_to_rgb, GREY, GRID,
};

/// Colour-scale limits, one pair per component.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorLimits {
    Scalar(f64, f64),
    PerComponent(Vec<(f64, f64)>),
}

#[derive(Debug, Clone)]
pub struct PlotOptions {
    pub lims: Option<ColorLimits>,
    pub title: Option<String>,
    /// HEALPix raster width in pixels; the height is half of it.
    pub width: u32,
    /// CAR pixel enlargement factor.
    pub upgrade: u32,
    /// CAR graticule spacing in degrees.
    pub ticks_deg: f64,
    pub open_viewer: bool,
}

impl Default for PlotOptions {
    fn default() -> Self {
        let s = settings();
        Self {
            lims: None,
            title: None,
            width: s.plot_width,
            upgrade: s.plot_upgrade,
            ticks_deg: s.plot_ticks_deg,
            open_viewer: s.open_viewer,
        }
    }
}

/// Renders one PNG per component. Without `file_name` the panels go to a
/// fresh temporary directory and are handed to the desktop viewer.
pub fn plot_map(map: &SkyMap, file_name: Option<&str>, opts: &PlotOptions) -> Result<Vec<PathBuf>> {
    let ncomp = map.ncomp();
    log::debug!(
        "plot_map: {} map, ncomp={}, file {:?}",
        map.pix_type(),
        ncomp,
        file_name
    );
    let lims = resolve_limits(ncomp, opts.lims.as_ref())?;
    let cmap = for_components(ncomp);

    let base = match file_name {
        Some(name) => PathBuf::from(name),
        None => {
            let dir = tempfile::Builder::new()
                .prefix("skypix-plot-")
                .tempdir()
                .context("Failed to create a directory for plots")?
                .keep();
            dir.join("map")
        }
    };
    let paths = panel_paths(&base, ncomp);

    for (c, path) in paths.iter().enumerate() {
        let title = panel_title(opts.title.as_deref(), ncomp, c);
        let img = match map {
            SkyMap::Healpix(m) => {
                let values = m.component(c);
                let (min, max) = lims[c].unwrap_or_else(|| finite_range(values.iter().copied()));
                render_healpix(values, m.geometry(), &cmap, (min, max), opts.width, title.as_deref())
            }
            SkyMap::Car(m) => {
                let values = m.component(c);
                let (min, max) = lims[c].unwrap_or_else(|| symmetric_range(values.iter().copied()));
                render_car(values, m.geometry(), &cmap, (min, max), opts, title.as_deref())
            }
        };
        save_png(&img, path)?;
    }

    if file_name.is_none() && opts.open_viewer {
        for path in &paths {
            launch_viewer(path);
        }
    }
    Ok(paths)
}

fn resolve_limits(ncomp: usize, lims: Option<&ColorLimits>) -> Result<Vec<Option<(f64, f64)>>> {
    match lims {
        None => Ok(vec![None; ncomp]),
        Some(ColorLimits::Scalar(lo, hi)) if ncomp == 1 => Ok(vec![Some((*lo, *hi))]),
        Some(ColorLimits::PerComponent(pairs)) if pairs.len() == ncomp => {
            Ok(pairs.iter().map(|&p| Some(p)).collect())
        }
        Some(other) => bail!(MapError::InvalidParameter(format!(
            "color limits {:?} do not match a {}-component map",
            other, ncomp
        ))),
    }
}

/// `{base}.png` for one component, `{base}_T/Q/U.png` for three and
/// `{base}_{i}.png` otherwise.
pub fn panel_paths(base: &Path, ncomp: usize) -> Vec<PathBuf> {
    let stem = base.to_string_lossy();
    let stem = stem.strip_suffix(".png").unwrap_or(&stem);
    (0..ncomp)
        .map(|c| PathBuf::from(format!("{}{}.png", stem, component_suffix(ncomp, c))))
        .collect()
}

fn component_suffix(ncomp: usize, c: usize) -> String {
    match ncomp {
        1 => String::new(),
        3 => format!("_{}", ["T", "Q", "U"][c]),
        _ => format!("_{}", c),
    }
}

fn panel_title(title: Option<&str>, ncomp: usize, c: usize) -> Option<String> {
    let label = component_suffix(ncomp, c);
    let label = label.trim_start_matches('_');
    match (title, label.is_empty()) {
        (Some(t), true) => Some(t.to_string()),
        (Some(t), false) => Some(format!("{} {}", t, label)),
        (None, true) => None,
        (None, false) => Some(label.to_string()),
    }
}

fn finite_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (min, max) = values
        .filter(|v| !is_unseen(*v))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !min.is_finite() {
        (0.0, 1.0)
    } else if max <= min {
        (min - 0.5, max + 0.5)
    } else {
        (min, max)
    }
}

/// `+-` the 99th percentile of `|x|`.
fn symmetric_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut abs: Vec<f64> = values.filter(|v| v.is_finite()).map(f64::abs).collect();
    if abs.is_empty() {
        return (-1.0, 1.0);
    }
    let k = ((abs.len() - 1) as f64 * 0.99).round() as usize;
    let (_, v, _) = abs.select_nth_unstable_by(k, f64::total_cmp);
    let v = if *v > 0.0 { *v } else { 1.0 };
    (-v, v)
}

/// Mollweide projection: longitude increases to the left, the sky fills an
/// ellipse of `width x width/2` on a white background.
fn render_healpix(
    values: ArrayView1<'_, f64>,
    geometry: &HealpixGeometry,
    cmap: &Colormap,
    (min, max): (f64, f64),
    width: u32,
    title: Option<&str>,
) -> RgbImage {
    let width = width.max(8);
    let height = width / 2;
    let (mut img, top) = new_canvas(width, height);

    let rows: Vec<Vec<Option<usize>>> = (0..height)
        .into_par_iter()
        .map(|j| {
            let y = (1.0 - 2.0 * (j as f64 + 0.5) / height as f64) * SQRT_2;
            (0..width)
                .map(|i| {
                    let x = (2.0 * (i as f64 + 0.5) / width as f64 - 1.0) * 2.0 * SQRT_2;
                    if x * x / 8.0 + y * y / 2.0 > 1.0 {
                        return None;
                    }
                    let aux = (y / SQRT_2).clamp(-1.0, 1.0).asin();
                    let lat = ((2.0 * aux + (2.0 * aux).sin()) / PI).clamp(-1.0, 1.0).asin();
                    let lon = PI * x / (2.0 * SQRT_2 * aux.cos().max(1e-12));
                    if lon.abs() > PI {
                        return None;
                    }
                    let theta = PI / 2.0 - lat;
                    let phi = (-lon).rem_euclid(2.0 * PI);
                    Some(geometry.ang2pix_ring(theta, phi))
                })
                .collect()
        })
        .collect();

    for (j, row) in rows.iter().enumerate() {
        for (i, pix) in row.iter().enumerate() {
            if let Some(p) = pix {
                img.put_pixel(i as u32, top + j as u32, value_to_rgb(values[*p], min, max, cmap));
            }
        }
    }

    if let Some(t) = title {
        draw_title(&mut img, t);
    }
    draw_colorbar(&mut img, cmap, min, max);
    img
}

/// North-up raster, each map pixel drawn as `upgrade x upgrade` image pixels,
/// with RA/Dec grid lines every `ticks_deg`.
fn render_car(
    values: ArrayView2<'_, f64>,
    geometry: &CarGeometry,
    cmap: &Colormap,
    (min, max): (f64, f64),
    opts: &PlotOptions,
    title: Option<&str>,
) -> RgbImage {
    let (ny, nx) = values.dim();
    let u = opts.upgrade.max(1);
    let (width, height) = (nx as u32 * u, ny as u32 * u);
    let (mut img, top) = new_canvas(width, height);
    let wcs = geometry.wcs();
    let north_up = wcs.cdelt[1] > 0.0;

    let map_row = |iy: u32| {
        let y = (iy / u) as usize;
        if north_up {
            ny - 1 - y
        } else {
            y
        }
    };
    let sub = |i: u32| (i as f64 + 0.5) / u as f64 - 0.5;

    for iy in 0..height {
        let y = map_row(iy);
        for ix in 0..width {
            let x = (ix / u) as usize;
            let v = values[[y, x]];
            let c = if v.is_finite() {
                value_to_rgb(v, min, max, cmap)
            } else {
                GREY
            };
            img.put_pixel(ix, top + iy, c);
        }
    }

    let ticks = opts.ticks_deg;
    if ticks > 0.0 {
        let cell = |deg: f64| (deg / ticks).floor() as i64;
        for ix in 0..width.saturating_sub(1) {
            if cell(wcs.ra_of_col(sub(ix))) != cell(wcs.ra_of_col(sub(ix + 1))) {
                for iy in 0..height {
                    img.put_pixel(ix, top + iy, GRID);
                }
            }
        }
        for iy in 0..height.saturating_sub(1) {
            let fy = |i: u32| {
                let f = sub(i);
                if north_up {
                    ny as f64 - 1.0 - f
                } else {
                    f
                }
            };
            if cell(wcs.dec_of_row(fy(iy))) != cell(wcs.dec_of_row(fy(iy + 1))) {
                for ix in 0..width {
                    img.put_pixel(ix, top + iy, GRID);
                }
            }
        }
    }

    if let Some(t) = title {
        draw_title(&mut img, t);
    }
    draw_colorbar(&mut img, cmap, min, max);
    img
}

fn launch_viewer(path: &Path) {
    #[cfg(target_os = "macos")]
    let result = Command::new("open").arg(path).spawn();
    #[cfg(target_os = "windows")]
    let result = Command::new("cmd").args(["/C", "start", ""]).arg(path).spawn();
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let result = Command::new("xdg-open").arg(path).spawn();

    if let Err(e) = result {
        log::warn!("Could not open a viewer for {}: {}", path.display(), e);
    }
}
