use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::MapError;
use crate::model::{CarMap, HealpixMap};
use crate::utils::constants::{BLOCK_SIZE, CARD_SIZE, HEALPIX_ROW_WIDTH};

/// Typed header value; controls how the card is formatted.
#[derive(Debug, Clone, PartialEq)]
pub enum CardValue {
    Logical(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<&str> for CardValue {
    fn from(s: &str) -> Self {
        CardValue::Str(s.to_string())
    }
}

/// Element type of HEALPix table columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MapDtype {
    F32,
    #[default]
    F64,
}

impl MapDtype {
    fn code(self) -> char {
        match self {
            MapDtype::F32 => 'E',
            MapDtype::F64 => 'D',
        }
    }

    fn size(self) -> usize {
        match self {
            MapDtype::F32 => 4,
            MapDtype::F64 => 8,
        }
    }

    fn push_be(self, buf: &mut Vec<u8>, v: f64) {
        match self {
            MapDtype::F32 => buf.extend_from_slice(&(v as f32).to_be_bytes()),
            MapDtype::F64 => buf.extend_from_slice(&v.to_be_bytes()),
        }
    }
}

fn format_float(v: f64) -> String {
    if v == 0.0 {
        return "0.0".into();
    }
    let abs = v.abs();
    if !(1e-4..1e15).contains(&abs) {
        return format!("{:E}", v);
    }
    let s = format!("{}", v);
    if s.contains('.') {
        s
    } else {
        format!("{}.0", s)
    }
}

pub fn format_card(key: &str, value: &CardValue) -> String {
    let keyword = format!("{:<8}", &key[..key.len().min(8)]);

    let formatted_value = match value {
        CardValue::Logical(b) => format!("{:>20}", if *b { "T" } else { "F" }),
        CardValue::Int(i) => format!("{:>20}", i),
        CardValue::Float(f) => format!("{:>20}", format_float(*f)),
        CardValue::Str(s) => {
            let escaped = s.replace('\'', "''");
            format!("'{:<8}'", escaped)
        }
    };

    let card = format!("{}= {}", keyword, formatted_value);
    format!("{:<80}", &card[..card.len().min(CARD_SIZE)])
}

pub fn write_header_block(writer: &mut dyn Write, cards: &[(String, CardValue)]) -> Result<()> {
    let mut block_bytes = Vec::with_capacity(BLOCK_SIZE);

    for (key, value) in cards {
        block_bytes.extend_from_slice(format_card(key, value).as_bytes());
    }
    block_bytes.extend_from_slice(format!("{:<80}", "END").as_bytes());

    let remainder = block_bytes.len() % BLOCK_SIZE;
    if remainder != 0 {
        block_bytes.extend_from_slice(&vec![b' '; BLOCK_SIZE - remainder]);
    }

    writer.write_all(&block_bytes)?;
    Ok(())
}

fn pad_data(writer: &mut dyn Write, data_bytes: usize) -> Result<()> {
    let remainder = data_bytes % BLOCK_SIZE;
    if remainder != 0 {
        writer.write_all(&vec![0u8; BLOCK_SIZE - remainder])?;
    }
    Ok(())
}

/// Opens `path` for writing, gzip-compressed when it ends in `.gz`, and
/// hands the stream to `body`. Existing files are replaced.
fn with_output<F>(path: &Path, body: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let file =
        File::create(path).with_context(|| format!("Cannot create {}", path.display()))?;
    let gzip = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);

    if gzip {
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        body(&mut encoder)?;
        encoder.finish()?.flush()?;
    } else {
        let mut writer = BufWriter::new(file);
        body(&mut writer)?;
        writer.flush()?;
    }
    Ok(())
}

/// Default column names for `ncomp` HEALPix components.
pub fn healpix_column_names(ncomp: usize) -> Vec<String> {
    let standard: &[&str] = match ncomp {
        1 => &["TEMPERATURE"],
        2 => &["Q_POLARISATION", "U_POLARISATION"],
        3 => &["TEMPERATURE", "Q_POLARISATION", "U_POLARISATION"],
        6 => &["II", "IQ", "IU", "QQ", "QU", "UU"],
        _ => &[],
    };
    if standard.is_empty() {
        (0..ncomp).map(|i| format!("COLUMN{}", i)).collect()
    } else {
        standard.iter().map(|s| s.to_string()).collect()
    }
}

/// Longest quoted string value that fits one card after `KEYWORD = '`.
const MAX_STRING_VALUE: usize = 68;

fn is_card_string(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7e).contains(&b))
        && s.len() + s.matches('\'').count() <= MAX_STRING_VALUE
}

/// Empty primary HDU followed by a BINTABLE with one column per component.
pub fn write_healpix_fits(
    path: &Path,
    map: &HealpixMap,
    dtype: MapDtype,
    column_names: Option<&[String]>,
) -> Result<()> {
    let ncomp = map.ncomp();
    let npix = map.npix();
    let names = match column_names {
        Some(names) if names.len() != ncomp => bail!(MapError::ShapeMismatch(format!(
            "{} column names for {} components",
            names.len(),
            ncomp
        ))),
        Some(names) => names.to_vec(),
        None => healpix_column_names(ncomp),
    };
    if let Some(bad) = names.iter().find(|n| !is_card_string(n)) {
        bail!(MapError::InvalidParameter(format!(
            "column name '{}' must be printable ASCII of at most {} characters",
            bad, MAX_STRING_VALUE
        )));
    }

    let repeat = if npix > HEALPIX_ROW_WIDTH && npix % HEALPIX_ROW_WIDTH == 0 {
        HEALPIX_ROW_WIDTH
    } else {
        1
    };
    let nrows = npix / repeat;
    let row_bytes = ncomp * repeat * dtype.size();

    let primary = vec![
        ("SIMPLE".to_string(), CardValue::Logical(true)),
        ("BITPIX".to_string(), CardValue::Int(8)),
        ("NAXIS".to_string(), CardValue::Int(0)),
        ("EXTEND".to_string(), CardValue::Logical(true)),
    ];

    let mut table = vec![
        ("XTENSION".to_string(), CardValue::from("BINTABLE")),
        ("BITPIX".to_string(), CardValue::Int(8)),
        ("NAXIS".to_string(), CardValue::Int(2)),
        ("NAXIS1".to_string(), CardValue::Int(row_bytes as i64)),
        ("NAXIS2".to_string(), CardValue::Int(nrows as i64)),
        ("PCOUNT".to_string(), CardValue::Int(0)),
        ("GCOUNT".to_string(), CardValue::Int(1)),
        ("TFIELDS".to_string(), CardValue::Int(ncomp as i64)),
    ];
    for (i, name) in names.iter().enumerate() {
        table.push((format!("TTYPE{}", i + 1), CardValue::Str(name.clone())));
        table.push((
            format!("TFORM{}", i + 1),
            CardValue::Str(format!("{}{}", repeat, dtype.code())),
        ));
    }
    table.extend([
        ("PIXTYPE".to_string(), CardValue::from("HEALPIX")),
        ("ORDERING".to_string(), CardValue::from("RING")),
        ("NSIDE".to_string(), CardValue::Int(map.nside() as i64)),
        ("FIRSTPIX".to_string(), CardValue::Int(0)),
        ("LASTPIX".to_string(), CardValue::Int(npix as i64 - 1)),
        ("INDXSCHM".to_string(), CardValue::from("IMPLICIT")),
        ("OBJECT".to_string(), CardValue::from("FULLSKY")),
    ]);

    let data = map.data();
    with_output(path, |w| {
        write_header_block(w, &primary)?;
        write_header_block(w, &table)?;

        let mut buf = Vec::with_capacity(row_bytes);
        for row in 0..nrows {
            buf.clear();
            let span = row * repeat..(row + 1) * repeat;
            for c in 0..ncomp {
                for p in span.clone() {
                    dtype.push_be(&mut buf, data[[c, p]]);
                }
            }
            w.write_all(&buf)?;
        }
        pad_data(w, nrows * row_bytes)
    })?;

    log::info!(
        "Wrote HEALPix map nside={} ncomp={} to {}",
        map.nside(),
        ncomp,
        path.display()
    );
    Ok(())
}

/// Primary image HDU, `BITPIX = -64`, the component axis as `NAXIS3`.
pub fn write_car_fits(path: &Path, map: &CarMap) -> Result<()> {
    let (ncomp, ny, nx) = map.data().dim();

    let mut cards = vec![
        ("SIMPLE".to_string(), CardValue::Logical(true)),
        ("BITPIX".to_string(), CardValue::Int(-64)),
        (
            "NAXIS".to_string(),
            CardValue::Int(if ncomp == 1 { 2 } else { 3 }),
        ),
        ("NAXIS1".to_string(), CardValue::Int(nx as i64)),
        ("NAXIS2".to_string(), CardValue::Int(ny as i64)),
    ];
    if ncomp > 1 {
        cards.push(("NAXIS3".to_string(), CardValue::Int(ncomp as i64)));
    }
    cards.extend(map.geometry().wcs().header_cards());

    let data = map.data();
    with_output(path, |w| {
        write_header_block(w, &cards)?;

        let mut buf = Vec::with_capacity(nx * 8);
        for plane in data.outer_iter() {
            for row in plane.outer_iter() {
                buf.clear();
                for v in row.iter() {
                    buf.extend_from_slice(&v.to_be_bytes());
                }
                w.write_all(&buf)?;
            }
        }
        pad_data(w, ncomp * ny * nx * 8)
    })?;

    log::info!(
        "Wrote CAR map {}x{} ncomp={} to {}",
        ny,
        nx,
        ncomp,
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CarGeometry;
    use ndarray::{Array1, Array3};

    #[test]
    fn test_format_card_numeric() {
        let card = format_card("BITPIX", &CardValue::Int(-64));
        assert_eq!(card.len(), 80);
        assert!(card.starts_with("BITPIX  = "));
        assert_eq!(&card[10..30], "                 -64");
    }

    #[test]
    fn test_format_card_string() {
        let card = format_card("ORDERING", &CardValue::from("RING"));
        assert_eq!(card.len(), 80);
        assert!(card.contains("'RING    '"));
    }

    #[test]
    fn test_format_card_bool() {
        let card = format_card("SIMPLE", &CardValue::Logical(true));
        assert_eq!(&card[..30], "SIMPLE  =                    T");
    }

    #[test]
    fn test_format_float_parses_back() {
        for v in [0.0, 1.0, -0.5, 1.6375e30, 2.5e-7, 123456.789] {
            let card = format_card("CDELT1", &CardValue::Float(v));
            let parsed: f64 = card[10..30].trim().parse().unwrap();
            assert_eq!(parsed, v);
        }
    }

    #[test]
    fn test_column_names() {
        assert_eq!(healpix_column_names(1), vec!["TEMPERATURE"]);
        assert_eq!(healpix_column_names(3)[2], "U_POLARISATION");
        assert_eq!(healpix_column_names(4)[3], "COLUMN3");
    }

    #[test]
    fn test_healpix_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.fits");
        let map = HealpixMap::from_scalar(Array1::from_elem(12 * 16 * 16, 1.0)).unwrap();
        write_healpix_fits(&path, &map, MapDtype::F32, None).unwrap();

        let size = std::fs::metadata(&path).unwrap().len() as usize;
        let data = 3072 * 4;
        let padded = ((data + BLOCK_SIZE - 1) / BLOCK_SIZE) * BLOCK_SIZE;
        assert_eq!(size, 2 * BLOCK_SIZE + padded);
    }

    #[test]
    fn test_rejects_wrong_column_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.fits");
        let map = HealpixMap::zeros(3, 1).unwrap();
        let names = vec!["A".to_string()];
        let err = write_healpix_fits(&path, &map, MapDtype::F64, Some(&names)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MapError>(),
            Some(MapError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_rejects_unrepresentable_column_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.fits");
        let map = HealpixMap::zeros(1, 1).unwrap();

        for name in ["é".repeat(40), "X".repeat(69), "TEMP\nERATURE".to_string()] {
            let names = [name];
            let err = write_healpix_fits(&path, &map, MapDtype::F64, Some(&names[..])).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<MapError>(),
                Some(MapError::InvalidParameter(_))
            ));
        }

        let longest = ["Y".repeat(68)];
        write_healpix_fits(&path, &map, MapDtype::F64, Some(&longest[..])).unwrap();
        let text = String::from_utf8_lossy(&std::fs::read(&path).unwrap()).into_owned();
        assert!(text.contains(&format!("'{}'", longest[0])));
    }

    #[test]
    fn test_car_gzip_is_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("car.fits.gz");
        let geometry = CarGeometry::patch(1.0, (0.0, 40.0), (-10.0, 10.0)).unwrap();
        let map = CarMap::new(Array3::zeros((3, 20, 40)), geometry).unwrap();
        write_car_fits(&path, &map).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
        assert!(bytes.len() < BLOCK_SIZE + 3 * 20 * 40 * 8);
    }
}
