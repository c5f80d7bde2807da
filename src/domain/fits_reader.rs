use std::path::Path;

use anyhow::{bail, Context, Result};
use ndarray::{Array2, Array3};

use crate::domain::healpix::{npix2nside, HealpixGeometry};
use crate::domain::wcs::CarWcs;
use crate::error::MapError;
use crate::model::{CarGeometry, CarMap, HduHeader, HealpixMap};
use crate::utils::mmap::{
    decode_pixels, decode_table_value, open_fits_bytes, parse_all_hdus, table_code_size,
};

struct TableColumn {
    name: String,
    code: char,
    size: usize,
    repeat: usize,
    offset: usize,
    scale: f64,
    zero: f64,
}

fn parse_tform(tform: &str) -> Result<(usize, char)> {
    let tform = tform.trim();
    let digits: String = tform.chars().take_while(|c| c.is_ascii_digit()).collect();
    let code = tform[digits.len()..]
        .chars()
        .next()
        .with_context(|| format!("Malformed TFORM '{}'", tform))?;
    let repeat = if digits.is_empty() {
        1
    } else {
        digits.parse()?
    };
    Ok((repeat, code))
}

fn table_columns(header: &HduHeader) -> Result<Vec<TableColumn>> {
    let tfields = header.get_i64("TFIELDS").context("Missing TFIELDS")? as usize;
    let mut columns = Vec::with_capacity(tfields);
    let mut offset = 0;

    for i in 1..=tfields {
        let tform = header
            .get(&format!("TFORM{}", i))
            .with_context(|| format!("Missing TFORM{}", i))?;
        let (repeat, code) = parse_tform(tform)?;
        let size = table_code_size(code)
            .with_context(|| format!("Unsupported TFORM{} '{}'", i, tform))?;

        columns.push(TableColumn {
            name: header
                .get(&format!("TTYPE{}", i))
                .unwrap_or_default()
                .to_string(),
            code,
            size,
            repeat,
            offset,
            scale: header.get_f64(&format!("TSCAL{}", i)).unwrap_or(1.0),
            zero: header.get_f64(&format!("TZERO{}", i)).unwrap_or(0.0),
        });
        offset += repeat * size;
    }
    Ok(columns)
}

/// Reads `fields` of the `hdu`-th HDU (a BINTABLE) as a RING-ordered map.
pub fn read_healpix_fits(path: &Path, fields: &[usize], hdu: usize) -> Result<HealpixMap> {
    let bytes = open_fits_bytes(path)?;
    let hdus = parse_all_hdus(&bytes)?;
    let parsed = hdus
        .get(hdu)
        .with_context(|| format!("{} has no HDU {}", path.display(), hdu))?;
    let header = &parsed.header;

    if !header.is_bintable() {
        bail!("HDU {} of {} is not a binary table", hdu, path.display());
    }
    if let Some(scheme) = header.get("INDXSCHM") {
        if scheme.trim().eq_ignore_ascii_case("EXPLICIT") {
            bail!(
                "{} uses explicit pixel indexing; only full-sky implicit maps are supported",
                path.display()
            );
        }
    }
    if fields.is_empty() {
        bail!(MapError::InvalidParameter("no fields requested".into()));
    }

    let columns = table_columns(header)?;
    let row_bytes = header.axis_len(1);
    let nrows = header.axis_len(2);
    if let Some(col) = columns.iter().find(|c| c.offset + c.repeat * c.size > row_bytes) {
        bail!(MapError::ShapeMismatch(format!(
            "column {} ends at byte {} of a {}-byte row",
            col.name,
            col.offset + col.repeat * col.size,
            row_bytes
        )));
    }
    let start = parsed.data_start;
    if start + row_bytes * nrows > bytes.len() {
        bail!("Table data of {} exceeds file size", path.display());
    }

    let mut npix = None;
    let mut rows = Vec::with_capacity(fields.len());
    for &field in fields {
        let col = columns.get(field).with_context(|| {
            format!(
                "{} has {} columns, field {} requested",
                path.display(),
                columns.len(),
                field
            )
        })?;
        let size = col.size;
        let len = col.repeat * nrows;
        if *npix.get_or_insert(len) != len {
            bail!(MapError::ShapeMismatch(format!(
                "column {} has {} elements, expected {}",
                col.name,
                len,
                npix.unwrap_or(0)
            )));
        }

        let mut values = Vec::with_capacity(len);
        for r in 0..nrows {
            let base = start + r * row_bytes + col.offset;
            for k in 0..col.repeat {
                let at = base + k * size;
                let v = decode_table_value(&bytes[at..at + size], col.code).with_context(
                    || format!("Column {} has non-numeric type '{}'", col.name, col.code),
                )?;
                values.push(v * col.scale + col.zero);
            }
        }
        rows.push(values);
    }

    let npix = npix.unwrap_or(0);
    let nside = npix2nside(npix)?;
    if let Some(declared) = header.get_i64("NSIDE") {
        if declared as usize != nside {
            log::warn!(
                "{} declares NSIDE={} but holds {} pixels (nside {})",
                path.display(),
                declared,
                npix,
                nside
            );
        }
    }

    let geometry = HealpixGeometry::new(nside)?;
    let nested = match header.get("ORDERING").map(|o| o.trim().to_ascii_uppercase()) {
        Some(o) if o.starts_with("NEST") => true,
        Some(o) if o == "RING" => false,
        other => {
            log::warn!(
                "{}: ORDERING {:?} not recognised, assuming RING",
                path.display(),
                other
            );
            false
        }
    };

    let mut data = Array2::zeros((fields.len(), npix));
    for (i, values) in rows.into_iter().enumerate() {
        let ring = if nested {
            geometry.nest_to_ring(&values)?
        } else {
            values
        };
        data.row_mut(i)
            .iter_mut()
            .zip(ring)
            .for_each(|(d, v)| *d = v);
    }

    HealpixMap::new(data)
}

/// Reads the image of the `hdu`-th HDU. With `target`, the overlapping
/// region is cut out (and zero-filled outside the file).
pub fn read_car_fits(path: &Path, hdu: usize, target: Option<&CarGeometry>) -> Result<CarMap> {
    let bytes = open_fits_bytes(path)?;
    let hdus = parse_all_hdus(&bytes)?;
    let parsed = hdus
        .get(hdu)
        .with_context(|| format!("{} has no HDU {}", path.display(), hdu))?;
    let header = &parsed.header;

    let naxis = header.naxis();
    if naxis < 2 {
        bail!("HDU {} of {} holds no image (NAXIS={})", hdu, path.display(), naxis);
    }
    let nx = header.axis_len(1);
    let ny = header.axis_len(2);
    let ncomp: usize = (3..=naxis).map(|i| header.axis_len(i)).product();

    let bitpix = header.get_i64("BITPIX").context("Missing BITPIX in image HDU")?;
    let bytes_per_pixel = (bitpix.unsigned_abs() / 8) as usize;
    let data_end = parsed.data_start + ncomp * ny * nx * bytes_per_pixel;
    if data_end > bytes.len() {
        bail!("Image data of {} exceeds file size", path.display());
    }

    let bscale = header.get_f64("BSCALE").unwrap_or(1.0);
    let bzero = header.get_f64("BZERO").unwrap_or(0.0);
    let pixels = decode_pixels(&bytes[parsed.data_start..data_end], bitpix, bscale, bzero)?;
    let data = Array3::from_shape_vec((ncomp, ny, nx), pixels)
        .context("Failed to reshape image pixels")?;

    let wcs = CarWcs::from_header(header)
        .with_context(|| format!("Reading WCS of {}", path.display()))?;
    let geometry = CarGeometry::new((ny, nx), wcs)?;

    match target {
        None => CarMap::new(data, geometry),
        Some(target) => extract_region(&data, &geometry, target),
    }
}

fn extract_region(data: &Array3<f64>, source: &CarGeometry, target: &CarGeometry) -> Result<CarMap> {
    let (src_wcs, dst_wcs) = (source.wcs(), target.wcs());
    if !src_wcs.same_pixel_size(dst_wcs) {
        bail!(MapError::ShapeMismatch(format!(
            "file pixel size {:?} differs from requested {:?}",
            src_wcs.cdelt, dst_wcs.cdelt
        )));
    }

    let origin = dst_wcs.pixel_to_world(0.0, 0.0);
    let (fx, fy) = src_wcs.world_to_pixel(origin.ra, origin.dec);
    let (ox, oy) = (fx.round(), fy.round());
    if (fx - ox).abs() > 1e-3 || (fy - oy).abs() > 1e-3 {
        bail!(MapError::ShapeMismatch(format!(
            "requested geometry is offset by a fractional pixel ({:.4}, {:.4})",
            fx - ox,
            fy - oy
        )));
    }
    let (ox, oy) = (ox as i64, oy as i64);

    let (ncomp, sny, snx) = data.dim();
    let wraps = src_wcs.wraps_in_ra(snx);
    let period = snx as i64;

    let mut out = Array3::zeros((ncomp, target.ny(), target.nx()));
    for y in 0..target.ny() {
        let sy = y as i64 + oy;
        if sy < 0 || sy >= sny as i64 {
            continue;
        }
        for x in 0..target.nx() {
            let mut sx = x as i64 + ox;
            if wraps {
                sx = sx.rem_euclid(period);
            }
            if sx < 0 || sx >= snx as i64 {
                continue;
            }
            for c in 0..ncomp {
                out[[c, y, x]] = data[[c, sy as usize, sx as usize]];
            }
        }
    }

    CarMap::new(out, target.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fits_writer::{write_car_fits, write_healpix_fits, MapDtype};
    use ndarray::Array1;

    fn ramp_healpix(nside: usize, ncomp: usize) -> HealpixMap {
        let npix = 12 * nside * nside;
        HealpixMap::new(Array2::from_shape_fn((ncomp, npix), |(c, p)| {
            c as f64 * 1000.0 + p as f64 * 0.25
        }))
        .unwrap()
    }

    #[test]
    fn test_healpix_roundtrip_f64() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.fits");
        let map = ramp_healpix(16, 3);
        write_healpix_fits(&path, &map, MapDtype::F64, None).unwrap();

        let back = read_healpix_fits(&path, &[0, 1, 2], 1).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_healpix_roundtrip_f32_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.fits.gz");
        let map = ramp_healpix(4, 1);
        write_healpix_fits(&path, &map, MapDtype::F32, None).unwrap();

        let back = read_healpix_fits(&path, &[0], 1).unwrap();
        for (a, b) in back.data().iter().zip(map.data().iter()) {
            assert!((a - b).abs() <= 1e-6 * b.abs().max(1.0));
        }
    }

    #[test]
    fn test_healpix_field_selection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.fits");
        let map = ramp_healpix(2, 3);
        write_healpix_fits(&path, &map, MapDtype::F64, None).unwrap();

        let back = read_healpix_fits(&path, &[2], 1).unwrap();
        assert_eq!(back.ncomp(), 1);
        assert_eq!(back.component(0), map.component(2));
        assert!(read_healpix_fits(&path, &[5], 1).is_err());
    }

    #[test]
    fn test_columns_wider_than_row_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.fits");
        write_healpix_fits(&path, &ramp_healpix(1, 1), MapDtype::F32, None).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let from = b"'1E      '";
        let at = bytes
            .windows(from.len())
            .position(|w| w == from)
            .unwrap();
        bytes[at..at + from.len()].copy_from_slice(b"'1D      '");
        std::fs::write(&path, &bytes).unwrap();

        let err = read_healpix_fits(&path, &[0], 1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MapError>(),
            Some(MapError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_parse_tform() {
        assert_eq!(parse_tform("1024E").unwrap(), (1024, 'E'));
        assert_eq!(parse_tform("D").unwrap(), (1, 'D'));
        assert!(parse_tform("").is_err());
    }

    #[test]
    fn test_car_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("car.fits");
        let geometry = CarGeometry::patch(0.5, (0.0, 10.0), (-5.0, 5.0)).unwrap();
        let data = Array3::from_shape_fn((3, 20, 20), |(c, y, x)| (c * 400 + y * 20 + x) as f64);
        let map = CarMap::new(data, geometry).unwrap();
        write_car_fits(&path, &map).unwrap();

        let back = read_car_fits(&path, 0, None).unwrap();
        assert_eq!(back.data(), map.data());
        assert_eq!(back.geometry().wcs(), map.geometry().wcs());
    }

    #[test]
    fn test_car_scalar_is_two_axes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("car.fits");
        let geometry = CarGeometry::patch(1.0, (0.0, 8.0), (0.0, 4.0)).unwrap();
        let map = CarMap::from_component(Array2::from_elem((4, 8), 2.0), geometry).unwrap();
        write_car_fits(&path, &map).unwrap();

        let bytes = open_fits_bytes(&path).unwrap();
        let hdus = parse_all_hdus(&bytes).unwrap();
        assert_eq!(hdus[0].header.naxis(), 2);
        assert!(hdus[0].header.contains("WCSAXES"));
    }

    #[test]
    fn test_car_subregion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("car.fits");
        let full = CarGeometry::patch(1.0, (0.0, 20.0), (-10.0, 10.0)).unwrap();
        let data = Array3::from_shape_fn((1, 20, 20), |(_, y, x)| (y * 100 + x) as f64);
        write_car_fits(&path, &CarMap::new(data.clone(), full.clone()).unwrap()).unwrap();

        let sub = CarGeometry::patch(1.0, (5.0, 10.0), (0.0, 5.0)).unwrap();
        let map = read_car_fits(&path, 0, Some(&sub)).unwrap();
        assert_eq!(map.geometry(), &sub);

        let c = sub.wcs().pixel_to_world(0.0, 0.0);
        let (sx, sy) = full.wcs().world_to_pixel(c.ra, c.dec);
        let expected = data[[0, sy.round() as usize, sx.round() as usize]];
        assert_eq!(map.data()[[0, 0, 0]], expected);
    }

    #[test]
    fn test_car_region_outside_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("car.fits");
        let small = CarGeometry::patch(1.0, (0.0, 4.0), (0.0, 4.0)).unwrap();
        let data = Array3::from_elem((1, 4, 4), 7.0);
        write_car_fits(&path, &CarMap::new(data, small).unwrap()).unwrap();

        let big = CarGeometry::patch(1.0, (-2.0, 6.0), (-2.0, 6.0)).unwrap();
        let map = read_car_fits(&path, 0, Some(&big)).unwrap();
        let total: f64 = map.data().sum();
        assert_eq!(total, 7.0 * 16.0);
        assert_eq!(map.data()[[0, 0, 0]], 0.0);
    }

    #[test]
    fn test_car_rejects_other_pixel_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("car.fits");
        let g = CarGeometry::patch(1.0, (0.0, 4.0), (0.0, 4.0)).unwrap();
        write_car_fits(&path, &CarMap::zeros(1, g).unwrap()).unwrap();

        let other = CarGeometry::patch(0.5, (0.0, 4.0), (0.0, 4.0)).unwrap();
        assert!(read_car_fits(&path, 0, Some(&other)).is_err());
    }

    #[test]
    fn test_nested_file_is_reordered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nest.fits");
        let map = ramp_healpix(2, 1);
        let geometry = *map.geometry();
        let nested = geometry.ring_to_nest(map.component(0).as_slice().unwrap()).unwrap();

        let nested_map = HealpixMap::from_scalar(Array1::from(nested)).unwrap();
        write_healpix_fits(&path, &nested_map, MapDtype::F64, None).unwrap();
        let raw = std::fs::read(&path).unwrap();
        let text = String::from_utf8_lossy(&raw[..2 * 2880]).replace("'RING    '", "'NESTED  '");
        let mut patched = text.into_bytes();
        patched.extend_from_slice(&raw[2 * 2880..]);
        std::fs::write(&path, patched).unwrap();

        let back = read_healpix_fits(&path, &[0], 1).unwrap();
        assert_eq!(back, map);
    }
}
