use std::f64::consts::PI;

use anyhow::Result;

use crate::domain::healpix::npix2nside;
use crate::model::SkyMap;

/// Band limit supported by the map's pixels.
///
/// HEALPix: `3 nside - 1`. CAR: `ceil(pi / res)` with `res` the finer of the
/// two pixel spacings in radians.
pub fn lmax_from_map(map: &SkyMap) -> Result<usize> {
    let lmax = match map {
        SkyMap::Healpix(m) => 3 * npix2nside(m.npix())? - 1,
        SkyMap::Car(m) => res2lmax(m.geometry().wcs().min_resolution_deg().to_radians()),
    };
    log::debug!("lmax_from_map: {} map -> lmax {}", map.pix_type(), lmax);
    Ok(lmax)
}

pub fn res2lmax(res_rad: f64) -> usize {
    let ratio = PI / res_rad;
    let nearest = ratio.round();
    if (ratio - nearest).abs() < 1e-9 {
        nearest as usize
    } else {
        ratio.ceil() as usize
    }
}
