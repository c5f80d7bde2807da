use anyhow::{bail, Result};
use ndarray::Array2;
use rayon::prelude::*;

use crate::domain::healpix::{is_power_of_two, HealpixGeometry};
use crate::error::MapError;
use crate::model::{HealpixMap, PixType, SkyMap};
use crate::utils::constants::{is_unseen, UNSEEN};

/// Changes the HEALPix resolution. Degrading averages the valid children of
/// each parent; upgrading copies the parent into every child. With
/// `power`, values are multiplied by `(nside_out / nside_in)^power`.
pub fn ud_grade(map: &SkyMap, nside_out: usize, power: Option<f64>) -> Result<SkyMap> {
    log::debug!(
        "ud_grade: {} map -> nside {}, power {:?}",
        map.pix_type(),
        nside_out,
        power
    );
    let hp = match map {
        SkyMap::Healpix(m) => m,
        SkyMap::Car(_) => bail!(MapError::UnsupportedOperation {
            operation: "ud_grade",
            pix_type: PixType::Car,
        }),
    };
    if !is_power_of_two(nside_out) {
        bail!(MapError::InvalidNside(nside_out));
    }

    let geom_in = *hp.geometry();
    let geom_out = HealpixGeometry::new(nside_out)?;
    let nside_in = geom_in.nside();
    let factor = power
        .map(|p| (nside_out as f64 / nside_in as f64).powf(p))
        .unwrap_or(1.0);

    let mut out = Array2::zeros((hp.ncomp(), geom_out.npix()));
    for (c, row) in hp.data().outer_iter().enumerate() {
        let values = row.to_vec();
        let nested = geom_in.ring_to_nest(&values)?;
        let regraded = if nside_out < nside_in {
            degrade_nested(&nested, (nside_in / nside_out).pow(2))
        } else {
            upgrade_nested(&nested, (nside_out / nside_in).pow(2))
        };
        let ring = geom_out.nest_to_ring(&regraded)?;
        for (o, v) in out.row_mut(c).iter_mut().zip(ring) {
            *o = if is_unseen(v) { UNSEEN } else { v * factor };
        }
    }

    Ok(HealpixMap::new(out)?.into())
}

fn degrade_nested(values: &[f64], children: usize) -> Vec<f64> {
    values
        .par_chunks(children)
        .map(|kids| {
            let (sum, n) = kids
                .iter()
                .filter(|v| !is_unseen(**v))
                .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            if n == 0 {
                UNSEEN
            } else {
                sum / n as f64
            }
        })
        .collect()
}

fn upgrade_nested(values: &[f64], children: usize) -> Vec<f64> {
    values
        .iter()
        .flat_map(|&v| std::iter::repeat(v).take(children))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CarGeometry, CarMap};
    use ndarray::Array1;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_map(nside: usize, seed: u64) -> SkyMap {
        let mut rng = StdRng::seed_from_u64(seed);
        let values: Array1<f64> = (0..12 * nside * nside).map(|_| rng.gen_range(-1.0..1.0)).collect();
        HealpixMap::from_scalar(values).unwrap().into()
    }

    fn mean(map: &SkyMap) -> f64 {
        let (s, n) = map.iter_values().fold((0.0, 0), |(s, n), v| (s + v, n + 1));
        s / n as f64
    }

    #[test]
    fn test_degrade_preserves_mean() {
        let map = random_map(16, 7);
        let low = ud_grade(&map, 4, None).unwrap();
        assert_eq!(low.as_healpix().unwrap().nside(), 4);
        assert!((mean(&low) - mean(&map)).abs() < 1e-12);
    }

    #[test]
    fn test_power_minus_two_preserves_sum() {
        let map = random_map(8, 11);
        let total: f64 = map.iter_values().sum();
        for nside in [2, 32] {
            let out = ud_grade(&map, nside, Some(-2.0)).unwrap();
            let out_total: f64 = out.iter_values().sum();
            assert!((out_total - total).abs() < 1e-9);
        }
    }

    #[test]
    fn test_upgrade_then_degrade_is_identity() {
        let map = random_map(4, 3);
        let up = ud_grade(&map, 16, None).unwrap();
        let back = ud_grade(&up, 4, None).unwrap();
        for (a, b) in back.iter_values().zip(map.iter_values()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_unseen_children_skipped() {
        let geometry = HealpixGeometry::new(2).unwrap();
        let mut nested = vec![1.0; geometry.npix()];
        nested[0] = UNSEEN;
        nested[1] = 3.0;
        for v in nested[4..8].iter_mut() {
            *v = UNSEEN;
        }
        let ring = geometry.nest_to_ring(&nested).unwrap();
        let map: SkyMap = HealpixMap::from_scalar(Array1::from(ring)).unwrap().into();

        let low = ud_grade(&map, 1, None).unwrap();
        let out = low.as_healpix().unwrap().component(0).to_vec();
        let g1 = HealpixGeometry::new(1).unwrap();
        let parent0 = out[g1.nest2ring(0).unwrap()];
        let parent1 = out[g1.nest2ring(1).unwrap()];
        assert!((parent0 - 5.0 / 3.0).abs() < 1e-12);
        assert_eq!(parent1, UNSEEN);
    }

    #[test]
    fn test_car_rejected() {
        let geometry = CarGeometry::full_sky(10.0).unwrap();
        let map: SkyMap = CarMap::zeros(1, geometry).unwrap().into();
        let err = ud_grade(&map, 4, None).unwrap_err();
        assert_eq!(
            err.downcast_ref::<MapError>(),
            Some(&MapError::UnsupportedOperation {
                operation: "ud_grade",
                pix_type: PixType::Car,
            })
        );
    }

    #[test]
    fn test_nside_must_be_power_of_two() {
        let map = random_map(4, 1);
        let err = ud_grade(&map, 6, None).unwrap_err();
        assert_eq!(err.downcast_ref::<MapError>(), Some(&MapError::InvalidNside(6)));
    }
}
