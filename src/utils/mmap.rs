use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::ops::Deref;
use std::path::Path;

use anyhow::{bail, Context, Result};
use flate2::read::MultiGzDecoder;
use memmap2::{Mmap, MmapOptions};

use crate::model::HduHeader;
use crate::utils::constants::{BLOCK_SIZE, CARD_SIZE};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn create_mmap(file: &File) -> Result<Mmap> {
    let mmap = unsafe { MmapOptions::new().map(file).context("mmap failed")? };
    #[cfg(unix)]
    {
        let _ = mmap.advise(memmap2::Advice::Sequential);
    }
    Ok(mmap)
}

/// Raw bytes of a FITS file: mapped when plain, inflated when gzipped.
pub enum FitsBytes {
    Mapped(Mmap),
    Inflated(Vec<u8>),
}

impl Deref for FitsBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            FitsBytes::Mapped(m) => m,
            FitsBytes::Inflated(v) => v,
        }
    }
}

pub fn open_fits_bytes(path: &Path) -> Result<FitsBytes> {
    let file =
        File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let mmap = create_mmap(&file)?;

    if mmap.len() >= 2 && mmap[..2] == GZIP_MAGIC {
        let mut inflated = Vec::with_capacity(mmap.len() * 4);
        MultiGzDecoder::new(&mmap[..])
            .read_to_end(&mut inflated)
            .with_context(|| format!("Cannot decompress {}", path.display()))?;
        return Ok(FitsBytes::Inflated(inflated));
    }

    Ok(FitsBytes::Mapped(mmap))
}

fn extract_header_value(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix('\'') {
        let mut value = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    value.push('\'');
                    chars.next();
                    continue;
                }
                break;
            }
            value.push(c);
        }
        return value.trim_end().to_string();
    }
    match trimmed.find('/') {
        Some(pos) => trimmed[..pos].trim().to_string(),
        None => trimmed.to_string(),
    }
}

pub struct ParsedHdu {
    pub header: HduHeader,
    pub header_start: usize,
    pub data_start: usize,
    pub next_hdu_offset: usize,
}

pub fn parse_header_at(bytes: &[u8], offset: usize) -> Result<ParsedHdu> {
    let mut cards = Vec::new();
    let mut index = HashMap::new();
    let mut pos = offset;
    let mut records = 0;
    let mut end_found = false;

    while !end_found {
        if pos + BLOCK_SIZE > bytes.len() {
            bail!("Unexpected end of file while reading header at offset {}", offset);
        }

        let block = &bytes[pos..pos + BLOCK_SIZE];
        pos += BLOCK_SIZE;

        for card_bytes in block.chunks_exact(CARD_SIZE) {
            records += 1;
            let keyword = String::from_utf8_lossy(&card_bytes[0..8]).trim().to_string();

            if keyword == "END" {
                end_found = true;
                break;
            }

            if &card_bytes[8..10] != b"= " {
                continue;
            }

            let value = extract_header_value(&String::from_utf8_lossy(&card_bytes[10..]));
            cards.push((keyword.clone(), value.clone()));
            index.insert(keyword, value);
        }
    }

    let header = HduHeader {
        cards,
        index,
        record_count: records,
    };
    let data_start = header.data_offset(offset);
    let next_hdu_offset = data_start + header.padded_data_bytes();

    Ok(ParsedHdu {
        header,
        header_start: offset,
        data_start,
        next_hdu_offset,
    })
}

/// Every HDU in the file, primary first.
pub fn parse_all_hdus(bytes: &[u8]) -> Result<Vec<ParsedHdu>> {
    let mut hdus = Vec::new();
    let mut offset = 0;
    while offset + BLOCK_SIZE <= bytes.len() {
        let parsed = parse_header_at(bytes, offset)?;
        offset = parsed.next_hdu_offset;
        hdus.push(parsed);
    }
    if hdus.is_empty() {
        bail!("No FITS header found");
    }
    Ok(hdus)
}

/// Image pixels as `f64` with `BSCALE`/`BZERO` applied.
pub fn decode_pixels(data: &[u8], bitpix: i64, bscale: f64, bzero: f64) -> Result<Vec<f64>> {
    let scale = |v: f64| v * bscale + bzero;
    let pixels = match bitpix {
        8 => data.iter().map(|&b| scale(b as f64)).collect(),
        16 => data
            .chunks_exact(2)
            .map(|c| scale(i16::from_be_bytes([c[0], c[1]]) as f64))
            .collect(),
        32 => data
            .chunks_exact(4)
            .map(|c| scale(i32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f64))
            .collect(),
        64 => data
            .chunks_exact(8)
            .map(|c| {
                let raw: [u8; 8] = [c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]];
                scale(i64::from_be_bytes(raw) as f64)
            })
            .collect(),
        -32 => data
            .chunks_exact(4)
            .map(|c| scale(f32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f64))
            .collect(),
        -64 => data
            .chunks_exact(8)
            .map(|c| {
                let raw: [u8; 8] = [c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]];
                scale(f64::from_be_bytes(raw))
            })
            .collect(),
        other => bail!("Unsupported BITPIX {}", other),
    };
    Ok(pixels)
}

/// One binary-table element of type `code` (FITS TFORM letter).
pub fn decode_table_value(raw: &[u8], code: char) -> Option<f64> {
    let v = match code {
        'B' => raw[0] as f64,
        'I' => i16::from_be_bytes([raw[0], raw[1]]) as f64,
        'J' => i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
        'K' => i64::from_be_bytes([
            raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
        ]) as f64,
        'E' => f32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
        'D' => f64::from_be_bytes([
            raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
        ]),
        _ => return None,
    };
    Some(v)
}

/// Bytes per element for a TFORM letter.
pub fn table_code_size(code: char) -> Option<usize> {
    match code {
        'L' | 'B' | 'A' => Some(1),
        'I' => Some(2),
        'J' | 'E' => Some(4),
        'K' | 'D' | 'C' | 'P' => Some(8),
        'M' | 'Q' => Some(16),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_decode_pixels_i16() {
        let data: &[u8] = &[0x01, 0x00, 0xFF, 0xFF];
        let pixels = decode_pixels(data, 16, 1.0, 0.0).unwrap();
        assert_eq!(pixels, vec![256.0, -1.0]);
    }

    #[test]
    fn test_decode_pixels_f64() {
        let data = (-2.5f64).to_be_bytes();
        let pixels = decode_pixels(&data, -64, 1.0, 0.0).unwrap();
        assert_eq!(pixels, vec![-2.5]);
    }

    #[test]
    fn test_decode_pixels_with_scaling() {
        let data: &[u8] = &[100];
        let pixels = decode_pixels(data, 8, 2.0, 10.0).unwrap();
        assert!((pixels[0] - 210.0).abs() < 1e-12);
    }

    #[test]
    fn test_decode_pixels_rejects_bitpix() {
        assert!(decode_pixels(&[0, 0, 0], 24, 1.0, 0.0).is_err());
    }

    #[test]
    fn test_decode_table_value() {
        assert_eq!(decode_table_value(&1.5f32.to_be_bytes(), 'E'), Some(1.5));
        assert_eq!(decode_table_value(&(-7i32).to_be_bytes(), 'J'), Some(-7.0));
        assert_eq!(decode_table_value(&[0u8; 4], 'X'), None);
    }

    #[test]
    fn test_extract_quoted_value() {
        assert_eq!(extract_header_value("'RING    '  / ordering"), "RING");
        assert_eq!(extract_header_value("'it''s'"), "it's");
        assert_eq!(extract_header_value("  1024 / nside"), "1024");
    }

    fn header_block(cards: &[&str]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for card in cards {
            bytes.extend_from_slice(format!("{:<80}", card).as_bytes());
        }
        bytes.extend_from_slice(format!("{:<80}", "END").as_bytes());
        bytes.resize(BLOCK_SIZE, b' ');
        bytes
    }

    #[test]
    fn test_parse_all_hdus() {
        let mut bytes = header_block(&["SIMPLE  =                    T", "NAXIS   =                    0"]);
        bytes.extend(header_block(&[
            "XTENSION= 'IMAGE   '",
            "BITPIX  =                  -64",
            "NAXIS   =                    1",
            "NAXIS1  =                    2",
        ]));
        bytes.extend(vec![0u8; BLOCK_SIZE]);

        let hdus = parse_all_hdus(&bytes).unwrap();
        assert_eq!(hdus.len(), 2);
        assert_eq!(hdus[0].header.record_count, 3);
        assert_eq!(hdus[1].header_start, BLOCK_SIZE);
        assert_eq!(hdus[1].data_start, 2 * BLOCK_SIZE);
        assert_eq!(hdus[1].header.get("XTENSION"), Some("IMAGE"));
    }

    #[test]
    fn test_open_gzip_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("block.fits.gz");
        let block = header_block(&["SIMPLE  =                    T"]);

        let file = File::create(&path).unwrap();
        let mut enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        enc.write_all(&block).unwrap();
        enc.finish().unwrap();

        let bytes = open_fits_bytes(&path).unwrap();
        assert!(matches!(bytes, FitsBytes::Inflated(_)));
        assert_eq!(&bytes[..], &block[..]);
    }
}
