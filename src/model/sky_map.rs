use anyhow::{bail, Result};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::domain::healpix::HealpixGeometry;
use crate::domain::wcs::CarWcs;
use crate::error::MapError;
use crate::model::PixType;

/// HEALPix map in RING ordering, shape `(ncomp, npix)`.
#[derive(Debug, Clone, PartialEq)]
pub struct HealpixMap {
    data: Array2<f64>,
    geometry: HealpixGeometry,
}

impl HealpixMap {
    pub fn new(data: Array2<f64>) -> Result<Self> {
        if data.nrows() == 0 {
            bail!(MapError::InvalidParameter(
                "a map needs at least one component".into()
            ));
        }
        let geometry = HealpixGeometry::from_npix(data.ncols())?;
        Ok(Self { data, geometry })
    }

    pub fn from_scalar(values: Array1<f64>) -> Result<Self> {
        Self::new(values.insert_axis(Axis(0)))
    }

    pub fn zeros(ncomp: usize, nside: usize) -> Result<Self> {
        let geometry = HealpixGeometry::new(nside)?;
        Self::new(Array2::zeros((ncomp, geometry.npix())))
    }

    pub fn geometry(&self) -> &HealpixGeometry {
        &self.geometry
    }

    pub fn nside(&self) -> usize {
        self.geometry.nside()
    }

    pub fn npix(&self) -> usize {
        self.data.ncols()
    }

    pub fn ncomp(&self) -> usize {
        self.data.nrows()
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array2<f64> {
        &mut self.data
    }

    pub fn component(&self, i: usize) -> ArrayView1<'_, f64> {
        self.data.row(i)
    }
}

/// Pixel grid and WCS of a CAR map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarGeometry {
    shape: (usize, usize),
    wcs: CarWcs,
}

impl CarGeometry {
    pub fn new(shape: (usize, usize), wcs: CarWcs) -> Result<Self> {
        if shape.0 == 0 || shape.1 == 0 {
            bail!(MapError::InvalidParameter(format!(
                "empty CAR shape {:?}",
                shape
            )));
        }
        if wcs.cdelt.iter().any(|c| *c == 0.0 || !c.is_finite()) {
            bail!(MapError::InvalidParameter(format!(
                "degenerate CDELT {:?}",
                wcs.cdelt
            )));
        }
        Ok(Self { shape, wcs })
    }

    /// Full-sky grid with pixel centres offset half a pixel from the poles.
    pub fn full_sky(res_deg: f64) -> Result<Self> {
        Self::patch(res_deg, (-180.0, 180.0), (-90.0, 90.0))
    }

    /// Rectangular patch; RA decreases left to right as on the sky.
    pub fn patch(res_deg: f64, ra_range: (f64, f64), dec_range: (f64, f64)) -> Result<Self> {
        if !(res_deg > 0.0) {
            bail!(MapError::InvalidParameter(format!(
                "resolution must be positive, got {}",
                res_deg
            )));
        }
        let (ra_min, ra_max) = (ra_range.0.min(ra_range.1), ra_range.0.max(ra_range.1));
        let (dec_min, dec_max) = (dec_range.0.min(dec_range.1), dec_range.0.max(dec_range.1));
        let nx = ((ra_max - ra_min) / res_deg).round() as usize;
        let ny = ((dec_max - dec_min) / res_deg).round() as usize;

        let wcs = CarWcs {
            crpix: [0.5 + ra_max / res_deg, 0.5 - dec_min / res_deg],
            crval: [0.0, 0.0],
            cdelt: [-res_deg, res_deg],
        };
        Self::new((ny, nx), wcs)
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn ny(&self) -> usize {
        self.shape.0
    }

    pub fn nx(&self) -> usize {
        self.shape.1
    }

    pub fn wcs(&self) -> &CarWcs {
        &self.wcs
    }

    pub fn dec_center(&self) -> f64 {
        self.wcs.dec_of_row((self.ny() as f64 - 1.0) / 2.0)
    }

    /// Physical pixel extent `(dy, dx)` in radians, RA spacing taken at the
    /// central declination.
    pub fn pixel_size_rad(&self) -> (f64, f64) {
        let dy = self.wcs.cdelt[1].abs().to_radians();
        let dx = self.wcs.cdelt[0].abs().to_radians() * self.dec_center().to_radians().cos().abs();
        (dy, dx.max(1e-12))
    }
}

/// CAR map, shape `(ncomp, ny, nx)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CarMap {
    data: Array3<f64>,
    geometry: CarGeometry,
}

impl CarMap {
    pub fn new(data: Array3<f64>, geometry: CarGeometry) -> Result<Self> {
        let (ncomp, ny, nx) = data.dim();
        if ncomp == 0 {
            bail!(MapError::InvalidParameter(
                "a map needs at least one component".into()
            ));
        }
        if (ny, nx) != geometry.shape() {
            bail!(MapError::ShapeMismatch(format!(
                "data is {}x{} but geometry is {}x{}",
                ny,
                nx,
                geometry.ny(),
                geometry.nx()
            )));
        }
        Ok(Self { data, geometry })
    }

    pub fn from_component(values: Array2<f64>, geometry: CarGeometry) -> Result<Self> {
        Self::new(values.insert_axis(Axis(0)), geometry)
    }

    pub fn zeros(ncomp: usize, geometry: CarGeometry) -> Result<Self> {
        Self::new(Array3::zeros((ncomp, geometry.ny(), geometry.nx())), geometry)
    }

    pub fn geometry(&self) -> &CarGeometry {
        &self.geometry
    }

    pub fn ncomp(&self) -> usize {
        self.data.dim().0
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<f64> {
        &mut self.data
    }

    pub fn component(&self, i: usize) -> ArrayView2<'_, f64> {
        self.data.index_axis(Axis(0), i)
    }
}

/// A map together with its pixelization.
#[derive(Debug, Clone, PartialEq)]
pub enum SkyMap {
    Healpix(HealpixMap),
    Car(CarMap),
}

impl SkyMap {
    pub fn pix_type(&self) -> PixType {
        match self {
            SkyMap::Healpix(_) => PixType::Healpix,
            SkyMap::Car(_) => PixType::Car,
        }
    }

    pub fn ncomp(&self) -> usize {
        match self {
            SkyMap::Healpix(m) => m.ncomp(),
            SkyMap::Car(m) => m.ncomp(),
        }
    }

    pub fn as_healpix(&self) -> Option<&HealpixMap> {
        match self {
            SkyMap::Healpix(m) => Some(m),
            SkyMap::Car(_) => None,
        }
    }

    pub fn as_car(&self) -> Option<&CarMap> {
        match self {
            SkyMap::Car(m) => Some(m),
            SkyMap::Healpix(_) => None,
        }
    }

    /// Multiplies every pixel in place.
    pub fn scale(&mut self, factor: f64) {
        match self {
            SkyMap::Healpix(m) => m.data_mut().mapv_inplace(|v| v * factor),
            SkyMap::Car(m) => m.data_mut().mapv_inplace(|v| v * factor),
        }
    }

    pub fn iter_values(&self) -> Box<dyn Iterator<Item = f64> + '_> {
        match self {
            SkyMap::Healpix(m) => Box::new(m.data().iter().copied()),
            SkyMap::Car(m) => Box::new(m.data().iter().copied()),
        }
    }
}

impl From<HealpixMap> for SkyMap {
    fn from(m: HealpixMap) -> Self {
        SkyMap::Healpix(m)
    }
}

impl From<CarMap> for SkyMap {
    fn from(m: CarMap) -> Self {
        SkyMap::Car(m)
    }
}
