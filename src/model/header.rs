use std::collections::HashMap;

use crate::utils::constants::{BLOCK_SIZE, CARD_SIZE};

/// Parsed value cards of one HDU, in file order plus a keyword index.
#[derive(Debug, Clone, Default)]
pub struct HduHeader {
    pub cards: Vec<(String, String)>,
    pub index: HashMap<String, String>,
    /// Number of 80-byte records the header occupied on disk, END included.
    pub record_count: usize,
}

impl HduHeader {
    pub fn from_cards(cards: Vec<(String, String)>) -> Self {
        let index = cards.iter().cloned().collect();
        let record_count = cards.len() + 1;
        Self {
            cards,
            index,
            record_count,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.index.get(key).map(|s| s.as_str())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.index.get(key)?.trim().parse().ok()
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        let raw = self.index.get(key)?.trim();
        // Fortran-style exponents show up in older writers.
        raw.parse()
            .ok()
            .or_else(|| raw.replace(['D', 'd'], "E").parse().ok())
    }

    pub fn is_bintable(&self) -> bool {
        self.get("XTENSION")
            .map(|x| x.trim() == "BINTABLE")
            .unwrap_or(false)
    }

    pub fn naxis(&self) -> usize {
        self.get_i64("NAXIS").unwrap_or(0).max(0) as usize
    }

    pub fn axis_len(&self, axis: usize) -> usize {
        self.get_i64(&format!("NAXIS{}", axis)).unwrap_or(1).max(0) as usize
    }

    pub fn data_byte_count(&self) -> usize {
        let naxis = self.naxis();
        if naxis == 0 {
            return 0;
        }
        let bitpix = self.get_i64("BITPIX").unwrap_or(0);
        let bytes_per_pixel = (bitpix.unsigned_abs() / 8) as usize;
        let total: usize = (1..=naxis).map(|i| self.axis_len(i)).product();
        let pcount = self.get_i64("PCOUNT").unwrap_or(0).max(0) as usize;
        let gcount = self.get_i64("GCOUNT").unwrap_or(1).max(1) as usize;
        (total * bytes_per_pixel + pcount) * gcount
    }

    pub fn padded_data_bytes(&self) -> usize {
        let raw = self.data_byte_count();
        ((raw + BLOCK_SIZE - 1) / BLOCK_SIZE) * BLOCK_SIZE
    }

    pub fn header_blocks(&self) -> usize {
        let cards_per_block = BLOCK_SIZE / CARD_SIZE;
        (self.record_count + cards_per_block - 1) / cards_per_block
    }

    pub fn data_offset(&self, header_start: usize) -> usize {
        header_start + self.header_blocks() * BLOCK_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(pairs: &[(&str, &str)]) -> HduHeader {
        HduHeader::from_cards(
            pairs
                .iter()
                .map(|&(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_image_byte_count() {
        let h = header(&[
            ("BITPIX", "-64"),
            ("NAXIS", "3"),
            ("NAXIS1", "10"),
            ("NAXIS2", "4"),
            ("NAXIS3", "3"),
        ]);
        assert_eq!(h.data_byte_count(), 10 * 4 * 3 * 8);
        assert_eq!(h.padded_data_bytes(), BLOCK_SIZE);
    }

    #[test]
    fn test_bintable_byte_count_includes_heap() {
        let h = header(&[
            ("XTENSION", "BINTABLE"),
            ("BITPIX", "8"),
            ("NAXIS", "2"),
            ("NAXIS1", "4096"),
            ("NAXIS2", "3"),
            ("PCOUNT", "16"),
            ("GCOUNT", "1"),
        ]);
        assert!(h.is_bintable());
        assert_eq!(h.data_byte_count(), 4096 * 3 + 16);
    }

    #[test]
    fn test_fortran_exponent() {
        let h = header(&[("CDELT1", "-1.0D-02")]);
        assert!((h.get_f64("CDELT1").unwrap() + 0.01).abs() < 1e-15);
    }

    #[test]
    fn test_header_blocks() {
        let cards: Vec<(String, String)> =
            (0..36).map(|i| (format!("KEY{}", i), "1".to_string())).collect();
        let h = HduHeader::from_cards(cards);
        // 36 cards plus END spill into a second block.
        assert_eq!(h.header_blocks(), 2);
        assert_eq!(h.data_offset(0), 2 * BLOCK_SIZE);
    }
}
