use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use ndarray::{Array2, Array3, Axis};
use rayon::prelude::*;

use crate::domain::config_manager::settings;
use crate::domain::distance::{car_distance_transform, healpix_nearest_excluded};
use crate::domain::smoothing::{smooth_healpix, SmoothOptions};
use crate::error::MapError;
use crate::model::{CarMap, HealpixMap, SkyMap};
use crate::utils::constants::FWHM_PER_SIGMA;

/// Taper applied near the edge of the excluded region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApodizationType {
    C1,
    C2,
    /// Gaussian-smoothed mask; HEALPix only.
    Smooth,
}

impl fmt::Display for ApodizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApodizationType::C1 => "C1",
            ApodizationType::C2 => "C2",
            ApodizationType::Smooth => "Smooth",
        })
    }
}

impl FromStr for ApodizationType {
    type Err = MapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "C1" => Ok(ApodizationType::C1),
            "C2" => Ok(ApodizationType::C2),
            "Smooth" => Ok(ApodizationType::Smooth),
            other => Err(MapError::UnsupportedApodization(other.to_string())),
        }
    }
}

/// Tapers a binary (or weighted) mask over `radius_deg` from its excluded
/// pixels. Components are apodized independently.
pub fn apodize_mask(mask: &SkyMap, radius_deg: f64, apod_type: &str) -> Result<SkyMap> {
    let kind: ApodizationType = apod_type.parse()?;
    if !(radius_deg > 0.0) || !radius_deg.is_finite() {
        bail!(MapError::InvalidParameter(format!(
            "apodization radius must be positive, got {}",
            radius_deg
        )));
    }
    log::debug!(
        "apodize_mask: {} mask, ncomp={}, {} over {} deg",
        mask.pix_type(),
        mask.ncomp(),
        kind,
        radius_deg
    );

    Ok(match mask {
        SkyMap::Healpix(m) => apodize_healpix(m, radius_deg, kind)?.into(),
        SkyMap::Car(m) => apodize_car(m, radius_deg, kind)?.into(),
    })
}

fn apodize_healpix(mask: &HealpixMap, radius_deg: f64, kind: ApodizationType) -> Result<HealpixMap> {
    let geom = mask.geometry();
    let r = radius_deg.to_radians();
    let mut out = Array2::zeros(mask.data().dim());

    for (c, row) in mask.data().outer_iter().enumerate() {
        let values = match kind {
            ApodizationType::C1 | ApodizationType::C2 => {
                let dist = healpix_nearest_excluded(row, geom, r);
                let x2_norm = 1.0 - r.cos();
                row.iter()
                    .zip(dist)
                    .map(|(&m, d)| {
                        if !(m > 0.0) {
                            return 0.0;
                        }
                        if d >= r {
                            return m;
                        }
                        let x = ((1.0 - d.cos()) / x2_norm).sqrt();
                        let f = match kind {
                            ApodizationType::C1 => x - (2.0 * PI * x).sin() / (2.0 * PI),
                            _ => 0.5 * (1.0 - (PI * x).cos()),
                        };
                        m * f
                    })
                    .collect::<Vec<f64>>()
            }
            ApodizationType::Smooth => {
                let dist = healpix_nearest_excluded(row, geom, 2.5 * r);
                let cut: Vec<f64> = row
                    .iter()
                    .zip(dist.iter())
                    .map(|(&m, &d)| if d.is_finite() { 0.0 } else { m })
                    .collect();
                let cut_map = HealpixMap::from_scalar(cut.into())?;
                let opts = SmoothOptions {
                    iterations: settings().sht_iterations,
                    lmax: None,
                };
                let smoothed = smooth_healpix(&cut_map, r * FWHM_PER_SIGMA, &opts)?;
                smoothed
                    .component(0)
                    .iter()
                    .zip(row.iter())
                    .map(|(&s, &m)| if m > 0.0 { s } else { 0.0 })
                    .collect()
            }
        };
        out.row_mut(c)
            .iter_mut()
            .zip(values)
            .for_each(|(o, v)| *o = v);
    }

    HealpixMap::new(out)
}

fn apodize_car(mask: &CarMap, radius_deg: f64, kind: ApodizationType) -> Result<CarMap> {
    let taper: fn(f64) -> f64 = match kind {
        ApodizationType::C1 => |t| 0.5 - 0.5 * (-PI * t).cos(),
        ApodizationType::C2 => |t| t - (2.0 * PI * t).sin() / (2.0 * PI),
        ApodizationType::Smooth => {
            bail!(MapError::UnsupportedApodization(kind.to_string()))
        }
    };

    let geometry = mask.geometry();
    let mut out = Array3::zeros(mask.data().dim());
    for (c, plane) in mask.data().outer_iter().enumerate() {
        let mut dist = car_distance_transform(plane, geometry);
        dist.par_mapv_inplace(|d| {
            let d_deg = d.to_degrees();
            if d_deg >= radius_deg {
                1.0
            } else {
                taper(d_deg / radius_deg)
            }
        });
        out.index_axis_mut(Axis(0), c).assign(&dist);
    }

    CarMap::new(out, geometry.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::healpix::HealpixGeometry;
    use crate::model::CarGeometry;
    use ndarray::Array1;

    fn car_mask() -> SkyMap {
        let geometry = CarGeometry::patch(0.5, (0.0, 20.0), (-10.0, 10.0)).unwrap();
        let mut data = Array3::ones((1, 40, 40));
        for y in 0..40 {
            for x in 0..10 {
                data[[0, y, x]] = 0.0;
            }
        }
        CarMap::new(data, geometry).unwrap().into()
    }

    #[test]
    fn test_parse_types() {
        assert_eq!("C1".parse::<ApodizationType>().unwrap(), ApodizationType::C1);
        assert_eq!("Smooth".parse::<ApodizationType>().unwrap(), ApodizationType::Smooth);
        assert_eq!(
            "C3".parse::<ApodizationType>().unwrap_err(),
            MapError::UnsupportedApodization("C3".into())
        );
    }

    #[test]
    fn test_car_far_pixels_are_one_and_holes_zero() {
        let mask = car_mask();
        for kind in ["C1", "C2"] {
            let apo = apodize_mask(&mask, 2.0, kind).unwrap();
            let data = apo.as_car().unwrap().data();
            assert_eq!(data[[0, 20, 5]], 0.0);
            assert_eq!(data[[0, 20, 39]], 1.0);
            let edge = data[[0, 20, 11]];
            assert!(edge > 0.0 && edge < 1.0, "{} edge value {}", kind, edge);
            for x in 10..39 {
                assert!(data[[0, 20, x]] <= data[[0, 20, x + 1]] + 1e-12);
            }
        }
    }

    #[test]
    fn test_car_unknown_type() {
        let err = apodize_mask(&car_mask(), 1.0, "Smooth").unwrap_err();
        assert_eq!(
            err.downcast_ref::<MapError>(),
            Some(&MapError::UnsupportedApodization("Smooth".into()))
        );
        let err = apodize_mask(&car_mask(), 1.0, "gauss").unwrap_err();
        assert!(err.to_string().contains("gauss"));
    }

    #[test]
    fn test_radius_must_be_positive() {
        let err = apodize_mask(&car_mask(), 0.0, "C1").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MapError>(),
            Some(MapError::InvalidParameter(_))
        ));
    }

    fn healpix_cap_mask(nside: usize) -> SkyMap {
        let geom = HealpixGeometry::new(nside).unwrap();
        let values: Array1<f64> = (0..geom.npix())
            .map(|p| if geom.pix2ang_ring(p).0 < 1.0 { 0.0 } else { 1.0 })
            .collect();
        HealpixMap::from_scalar(values).unwrap().into()
    }

    #[test]
    fn test_healpix_c1_c2_taper() {
        let mask = healpix_cap_mask(16);
        let geom = HealpixGeometry::new(16).unwrap();
        for kind in ["C1", "C2"] {
            let apo = apodize_mask(&mask, 10.0, kind).unwrap();
            let data = apo.as_healpix().unwrap().component(0).to_vec();
            let mut tapered = 0;
            for (p, &v) in data.iter().enumerate() {
                let theta = geom.pix2ang_ring(p).0;
                assert!((0.0..=1.0).contains(&v));
                if theta < 1.0 {
                    assert_eq!(v, 0.0);
                } else if theta > 1.0 + 0.25 {
                    assert_eq!(v, 1.0);
                } else if v < 1.0 {
                    tapered += 1;
                }
            }
            assert!(tapered > 0);
        }
    }

    #[test]
    fn test_healpix_smooth_keeps_holes_zero() {
        let mask = healpix_cap_mask(8);
        let apo = apodize_mask(&mask, 5.0, "Smooth").unwrap();
        let geom = HealpixGeometry::new(8).unwrap();
        let data = apo.as_healpix().unwrap().component(0).to_vec();
        for (p, &v) in data.iter().enumerate() {
            if geom.pix2ang_ring(p).0 < 1.0 {
                assert_eq!(v, 0.0);
            }
        }
        let south = data[geom.npix() - 1];
        assert!((south - 1.0).abs() < 0.05);
    }
}
