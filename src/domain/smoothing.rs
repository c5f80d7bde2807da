use anyhow::{bail, Result};
use ndarray::{Array2, Array3, Axis};

use crate::domain::config_manager::settings;
use crate::domain::fft::gaussian_filter;
use crate::domain::sht::{
    alm2map_scalar, alm2map_spin2, gaussian_beam, map2alm_scalar, map2alm_spin2,
};
use crate::error::MapError;
use crate::model::{CarMap, HealpixMap, SkyMap};
use crate::utils::constants::FWHM_PER_SIGMA;

#[derive(Debug, Clone)]
pub struct SmoothOptions {
    /// Jacobi refinement steps of the HEALPix analysis.
    pub iterations: usize,
    /// Band limit of the HEALPix transform; `3 nside - 1` when unset.
    pub lmax: Option<usize>,
}

impl Default for SmoothOptions {
    fn default() -> Self {
        Self {
            iterations: settings().sht_iterations,
            lmax: None,
        }
    }
}

/// Gaussian smoothing with a beam of full width at half maximum `fwhm_deg`.
pub fn smooth_map(map: &SkyMap, fwhm_deg: f64) -> Result<SkyMap> {
    smooth_map_with(map, fwhm_deg, &SmoothOptions::default())
}

pub fn smooth_map_with(map: &SkyMap, fwhm_deg: f64, opts: &SmoothOptions) -> Result<SkyMap> {
    if !(fwhm_deg >= 0.0) || !fwhm_deg.is_finite() {
        bail!(MapError::InvalidParameter(format!(
            "FWHM must be a non-negative number of degrees, got {}",
            fwhm_deg
        )));
    }
    log::debug!(
        "smooth_map: {} map, ncomp={}, fwhm={} deg",
        map.pix_type(),
        map.ncomp(),
        fwhm_deg
    );

    let fwhm_rad = fwhm_deg.to_radians();
    Ok(match map {
        SkyMap::Healpix(m) => smooth_healpix(m, fwhm_rad, opts)?.into(),
        SkyMap::Car(m) => smooth_car(m, fwhm_rad)?.into(),
    })
}

pub(crate) fn smooth_healpix(map: &HealpixMap, fwhm_rad: f64, opts: &SmoothOptions) -> Result<HealpixMap> {
    let geom = map.geometry();
    let lmax = opts.lmax.unwrap_or(3 * geom.nside() - 1);
    let beam = gaussian_beam(fwhm_rad, lmax, 0);
    let mut out = Array2::zeros(map.data().dim());

    if map.ncomp() == 3 {
        let mut t = map2alm_scalar(map.component(0), geom, lmax, opts.iterations)?;
        t.scale_l(&beam);
        out.row_mut(0).assign(&alm2map_scalar(&t, geom)?);

        let mut pol = map2alm_spin2(map.component(1), map.component(2), geom, lmax, opts.iterations)?;
        pol.scale_l(&gaussian_beam(fwhm_rad, lmax, 2));
        let (q, u) = alm2map_spin2(&pol, geom)?;
        out.row_mut(1).assign(&q);
        out.row_mut(2).assign(&u);
    } else {
        for (c, row) in map.data().outer_iter().enumerate() {
            let mut alm = map2alm_scalar(row, geom, lmax, opts.iterations)?;
            alm.scale_l(&beam);
            out.row_mut(c).assign(&alm2map_scalar(&alm, geom)?);
        }
    }

    HealpixMap::new(out)
}

fn smooth_car(map: &CarMap, fwhm_rad: f64) -> Result<CarMap> {
    if fwhm_rad == 0.0 {
        return Ok(map.clone());
    }
    let sigma = fwhm_rad / FWHM_PER_SIGMA;
    let (dy, dx) = map.geometry().pixel_size_rad();

    let mut out = Array3::zeros(map.data().dim());
    for (c, plane) in map.data().outer_iter().enumerate() {
        let smoothed = gaussian_filter(plane, sigma, dy, dx)?;
        out.index_axis_mut(Axis(0), c).assign(&smoothed);
    }
    CarMap::new(out, map.geometry().clone())
}
