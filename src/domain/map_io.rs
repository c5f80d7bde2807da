use std::path::Path;

use anyhow::Result;

use crate::domain::config_manager::settings;
use crate::domain::fits_reader::{read_car_fits, read_healpix_fits};
use crate::domain::fits_writer::{write_car_fits, write_healpix_fits};
use crate::model::{CarGeometry, PixType, SkyMap};
use crate::utils::constants::{K_TO_MUK, MUK_TO_K};
use crate::utils::mmap::{open_fits_bytes, parse_header_at};

pub use crate::domain::fits_writer::MapDtype;

#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// HEALPix columns to read; column 0 when unset.
    pub fields: Option<Vec<usize>>,
    /// HDU index; 1 for HEALPix tables and 0 for CAR images when unset.
    pub hdu: Option<usize>,
    /// CAR only: cut this region out of the file.
    pub geometry: Option<CarGeometry>,
    pub convert_k_to_muk: bool,
}

#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// HEALPix column type; CAR maps are always written as `f64`.
    pub dtype: MapDtype,
    pub column_names: Option<Vec<String>>,
    pub convert_muk_to_k: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            dtype: settings().default_dtype,
            column_names: None,
            convert_muk_to_k: false,
        }
    }
}

/// Guesses the pixelization of a map file.
///
/// Names containing `fits.gz` are taken as HEALPix without opening them;
/// otherwise a `WCSAXES` card in the primary header means CAR.
pub fn detect_pix_type(path: &Path) -> Result<PixType> {
    if path.to_string_lossy().contains("fits.gz") {
        log::warn!(
            "Assuming {} is a HEALPix map from its gzip extension",
            path.display()
        );
        return Ok(PixType::Healpix);
    }

    let bytes = open_fits_bytes(path)?;
    let primary = parse_header_at(&bytes, 0)?;
    let pix_type = if primary.header.contains("WCSAXES") {
        PixType::Car
    } else {
        PixType::Healpix
    };
    log::debug!("detect_pix_type: {} -> {}", path.display(), pix_type);
    Ok(pix_type)
}

pub fn read_map(path: &Path, pix_type: PixType, opts: &ReadOptions) -> Result<SkyMap> {
    log::debug!("read_map: {} as {} ({:?})", path.display(), pix_type, opts);

    let mut map: SkyMap = match pix_type {
        PixType::Healpix => {
            let fields = opts.fields.clone().unwrap_or_else(|| vec![0]);
            read_healpix_fits(path, &fields, opts.hdu.unwrap_or(1))?.into()
        }
        PixType::Car => read_car_fits(path, opts.hdu.unwrap_or(0), opts.geometry.as_ref())?.into(),
    };

    if opts.convert_k_to_muk {
        map.scale(K_TO_MUK);
    }
    Ok(map)
}

/// Writes `map` to `path`, replacing any existing file. With
/// `convert_muk_to_k` the caller's map is rescaled in place first.
pub fn write_map(path: &Path, map: &mut SkyMap, opts: &WriteOptions) -> Result<()> {
    log::debug!(
        "write_map: {} map, ncomp={} -> {}",
        map.pix_type(),
        map.ncomp(),
        path.display()
    );

    if opts.convert_muk_to_k {
        map.scale(MUK_TO_K);
    }

    match map {
        SkyMap::Healpix(m) => {
            write_healpix_fits(path, m, opts.dtype, opts.column_names.as_deref())
        }
        SkyMap::Car(m) => write_car_fits(path, m),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CarMap, HealpixMap};
    use ndarray::{Array2, Array3};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_healpix(ncomp: usize, nside: usize) -> SkyMap {
        let mut rng = StdRng::seed_from_u64(42);
        let npix = 12 * nside * nside;
        HealpixMap::new(Array2::from_shape_fn((ncomp, npix), |_| rng.gen_range(-1e-4..1e-4)))
            .unwrap()
            .into()
    }

    fn write_opts(dtype: MapDtype) -> WriteOptions {
        WriteOptions {
            dtype,
            column_names: None,
            convert_muk_to_k: false,
        }
    }

    #[test]
    fn test_healpix_roundtrip_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.fits");
        let mut map = random_healpix(3, 8);
        write_map(&path, &mut map, &write_opts(MapDtype::F64)).unwrap();

        let opts = ReadOptions {
            fields: Some(vec![0, 1, 2]),
            ..Default::default()
        };
        let back = read_map(&path, PixType::Healpix, &opts).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_default_reads_first_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.fits");
        let mut map = random_healpix(3, 4);
        write_map(&path, &mut map, &write_opts(MapDtype::F32)).unwrap();

        let back = read_map(&path, PixType::Healpix, &ReadOptions::default()).unwrap();
        assert_eq!(back.ncomp(), 1);
        let expected = map.as_healpix().unwrap().component(0).to_owned();
        for (a, b) in back.iter_values().zip(expected.iter()) {
            assert!((a - b).abs() <= 1e-7 * b.abs().max(1e-30) + 1e-12);
        }
    }

    #[test]
    fn test_unit_conversions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.fits");
        let mut map: SkyMap = HealpixMap::from_scalar(ndarray::Array1::from_elem(12, 50.0))
            .unwrap()
            .into();

        let opts = WriteOptions {
            convert_muk_to_k: true,
            ..write_opts(MapDtype::F64)
        };
        write_map(&path, &mut map, &opts).unwrap();
        // The caller's map was rescaled in place.
        assert!(map.iter_values().all(|v| (v - 50e-6).abs() < 1e-18));

        let back = read_map(
            &path,
            PixType::Healpix,
            &ReadOptions {
                convert_k_to_muk: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(back.iter_values().all(|v| (v - 50.0).abs() < 1e-9));
    }

    #[test]
    fn test_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.fits");
        std::fs::write(&path, b"stale").unwrap();
        let mut map = random_healpix(1, 2);
        write_map(&path, &mut map, &write_opts(MapDtype::F64)).unwrap();
        let back = read_map(&path, PixType::Healpix, &ReadOptions::default()).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_detect_pix_type() {
        let dir = tempfile::tempdir().unwrap();

        let hp_path = dir.path().join("hp.fits");
        write_map(&hp_path, &mut random_healpix(1, 2), &write_opts(MapDtype::F64)).unwrap();
        assert_eq!(detect_pix_type(&hp_path).unwrap(), PixType::Healpix);

        let car_path = dir.path().join("car.fits");
        let geometry = CarGeometry::patch(1.0, (0.0, 4.0), (0.0, 4.0)).unwrap();
        let mut car: SkyMap = CarMap::new(Array3::zeros((1, 4, 4)), geometry).unwrap().into();
        write_map(&car_path, &mut car, &write_opts(MapDtype::F64)).unwrap();
        assert_eq!(detect_pix_type(&car_path).unwrap(), PixType::Car);

        // Not opened: the name alone decides.
        let gz = dir.path().join("missing.fits.gz");
        assert_eq!(detect_pix_type(&gz).unwrap(), PixType::Healpix);
    }

    #[test]
    fn test_car_roundtrip_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("car.fits.gz");
        let geometry = CarGeometry::patch(0.25, (10.0, 12.0), (-1.0, 1.0)).unwrap();
        let data = Array3::from_shape_fn((3, 8, 8), |(c, y, x)| (c * 64 + y * 8 + x) as f64 - 30.5);
        let mut map: SkyMap = CarMap::new(data, geometry).unwrap().into();
        write_map(&path, &mut map, &write_opts(MapDtype::F32)).unwrap();

        let back = read_map(&path, PixType::Car, &ReadOptions::default()).unwrap();
        assert_eq!(back, map);
    }
}
