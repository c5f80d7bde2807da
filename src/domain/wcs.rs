use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::fits_writer::CardValue;
use crate::model::HduHeader;

/// Axis-aligned plate-carrée WCS: axis 1 is RA, axis 2 is Dec, degrees.
///
/// Pixel coordinates are 0-based; `crpix` keeps the FITS 1-based value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarWcs {
    pub crpix: [f64; 2],
    pub crval: [f64; 2],
    pub cdelt: [f64; 2],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CelestialCoord {
    pub ra: f64,
    pub dec: f64,
}

impl CarWcs {
    pub fn from_header(header: &HduHeader) -> Result<Self> {
        for (axis, expected) in [("CTYPE1", "RA"), ("CTYPE2", "DEC")] {
            if let Some(ctype) = header.get(axis) {
                if !ctype.ends_with("CAR") {
                    bail!("{} = '{}' is not a CAR projection", axis, ctype);
                }
                if !ctype.starts_with(expected) {
                    log::warn!("{} = '{}' treated as the {} axis", axis, ctype, expected);
                }
            }
        }

        let crpix1 = header.get_f64("CRPIX1").context("Missing CRPIX1")?;
        let crpix2 = header.get_f64("CRPIX2").context("Missing CRPIX2")?;
        let crval1 = header.get_f64("CRVAL1").unwrap_or(0.0);
        let crval2 = header.get_f64("CRVAL2").unwrap_or(0.0);
        let cdelt = Self::read_cdelt(header)?;

        if crval2.abs() > 1e-10 {
            log::warn!(
                "CAR header has CRVAL2 = {}; rows are treated as constant declination",
                crval2
            );
        }

        Ok(CarWcs {
            crpix: [crpix1, crpix2],
            crval: [crval1, crval2],
            cdelt,
        })
    }

    fn read_cdelt(header: &HduHeader) -> Result<[f64; 2]> {
        if let (Some(c1), Some(c2)) = (header.get_f64("CDELT1"), header.get_f64("CDELT2")) {
            if header.get_f64("CROTA2").unwrap_or(0.0).abs() > 1e-12 {
                bail!("Rotated CAR grids are not supported");
            }
            return Ok([c1, c2]);
        }

        let cd11 = header.get_f64("CD1_1").context("Missing CDELT1 and CD1_1")?;
        let cd22 = header.get_f64("CD2_2").context("Missing CDELT2 and CD2_2")?;
        let cd12 = header.get_f64("CD1_2").unwrap_or(0.0);
        let cd21 = header.get_f64("CD2_1").unwrap_or(0.0);
        if cd12.abs() > 1e-15 || cd21.abs() > 1e-15 {
            bail!("Rotated CAR grids are not supported");
        }
        Ok([cd11, cd22])
    }

    pub fn header_cards(&self) -> Vec<(String, CardValue)> {
        vec![
            ("WCSAXES".into(), CardValue::Int(2)),
            ("CTYPE1".into(), CardValue::Str("RA---CAR".into())),
            ("CTYPE2".into(), CardValue::Str("DEC--CAR".into())),
            ("CUNIT1".into(), CardValue::Str("deg".into())),
            ("CUNIT2".into(), CardValue::Str("deg".into())),
            ("CRPIX1".into(), CardValue::Float(self.crpix[0])),
            ("CRPIX2".into(), CardValue::Float(self.crpix[1])),
            ("CRVAL1".into(), CardValue::Float(self.crval[0])),
            ("CRVAL2".into(), CardValue::Float(self.crval[1])),
            ("CDELT1".into(), CardValue::Float(self.cdelt[0])),
            ("CDELT2".into(), CardValue::Float(self.cdelt[1])),
        ]
    }

    #[inline]
    pub fn ra_of_col(&self, x: f64) -> f64 {
        self.crval[0] + (x + 1.0 - self.crpix[0]) * self.cdelt[0]
    }

    #[inline]
    pub fn dec_of_row(&self, y: f64) -> f64 {
        self.crval[1] + (y + 1.0 - self.crpix[1]) * self.cdelt[1]
    }

    pub fn pixel_to_world(&self, x: f64, y: f64) -> CelestialCoord {
        CelestialCoord {
            ra: self.ra_of_col(x),
            dec: self.dec_of_row(y),
        }
    }

    pub fn world_to_pixel(&self, ra: f64, dec: f64) -> (f64, f64) {
        (
            (ra - self.crval[0]) / self.cdelt[0] + self.crpix[0] - 1.0,
            (dec - self.crval[1]) / self.cdelt[1] + self.crpix[1] - 1.0,
        )
    }

    /// Smallest absolute pixel spacing in degrees.
    pub fn min_resolution_deg(&self) -> f64 {
        self.cdelt[0].abs().min(self.cdelt[1].abs())
    }

    /// True when `nx` columns cover the full 360 degrees of RA.
    pub fn wraps_in_ra(&self, nx: usize) -> bool {
        (360.0 / self.cdelt[0].abs()).round() as usize == nx
    }

    pub fn same_pixel_size(&self, other: &CarWcs) -> bool {
        self.cdelt
            .iter()
            .zip(other.cdelt.iter())
            .all(|(a, b)| (a - b).abs() <= 1e-9 * a.abs().max(b.abs()))
    }
}
