use anyhow::{bail, Result};

use crate::error::MapError;
use crate::model::{CarMap, HealpixMap, SkyMap};

/// Zero-filled map with `ncomp` components on the same pixels as `map`.
pub fn template_from_map(map: &SkyMap, ncomp: usize) -> Result<SkyMap> {
    if ncomp == 0 {
        bail!(MapError::InvalidParameter(
            "a template needs at least one component".into()
        ));
    }
    log::debug!("template_from_map: {} map, ncomp={}", map.pix_type(), ncomp);

    Ok(match map {
        SkyMap::Healpix(m) => HealpixMap::zeros(ncomp, m.nside())?.into(),
        SkyMap::Car(m) => CarMap::zeros(ncomp, m.geometry().clone())?.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CarGeometry;
    use ndarray::{Array1, Array3};

    #[test]
    fn test_healpix_template() {
        let map: SkyMap = HealpixMap::from_scalar(Array1::from_elem(192, 3.0))
            .unwrap()
            .into();
        let t = template_from_map(&map, 3).unwrap();
        let hp = t.as_healpix().unwrap();
        assert_eq!(hp.ncomp(), 3);
        assert_eq!(hp.nside(), 4);
        assert!(t.iter_values().all(|v| v == 0.0));
    }

    #[test]
    fn test_car_template_keeps_wcs() {
        let geometry = CarGeometry::patch(0.5, (0.0, 10.0), (-2.0, 2.0)).unwrap();
        let map: SkyMap = CarMap::new(Array3::from_elem((3, 8, 20), 1.0), geometry.clone())
            .unwrap()
            .into();
        let t = template_from_map(&map, 1).unwrap();
        let car = t.as_car().unwrap();
        assert_eq!(car.data().dim(), (1, 8, 20));
        assert_eq!(car.geometry(), &geometry);
        assert!(t.iter_values().all(|v| v == 0.0));
    }

    #[test]
    fn test_zero_components_rejected() {
        let map: SkyMap = HealpixMap::zeros(1, 1).unwrap().into();
        let err = template_from_map(&map, 0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MapError>(),
            Some(MapError::InvalidParameter(_))
        ));
    }
}
