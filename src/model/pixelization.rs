use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MapError;

/// The two supported sky pixelizations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixType {
    /// Equal-area HEALPix, tag `"hp"`.
    #[serde(rename = "hp")]
    Healpix,
    /// Plate-carrée cylindrical grid with a WCS, tag `"car"`.
    #[serde(rename = "car")]
    Car,
}

impl PixType {
    pub const ALL: [PixType; 2] = [PixType::Healpix, PixType::Car];

    pub fn tag(&self) -> &'static str {
        match self {
            PixType::Healpix => "hp",
            PixType::Car => "car",
        }
    }
}

impl fmt::Display for PixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for PixType {
    type Err = MapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hp" => Ok(PixType::Healpix),
            "car" => Ok(PixType::Car),
            other => Err(MapError::UnsupportedPixelization(other.to_string())),
        }
    }
}

/// Validates a pixelization tag coming from outside the type system.
pub fn check_pix_type(tag: &str) -> anyhow::Result<PixType> {
    Ok(tag.parse::<PixType>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tags_pass() {
        for pix in PixType::ALL {
            assert_eq!(check_pix_type(pix.tag()).unwrap(), pix);
        }
    }

    #[test]
    fn test_unknown_tag_names_value() {
        for bad in ["", "HP", "healpix", "tan", "car "] {
            let err = check_pix_type(bad).unwrap_err();
            let map_err = err.downcast_ref::<MapError>().unwrap();
            assert_eq!(map_err, &MapError::UnsupportedPixelization(bad.to_string()));
            assert!(err.to_string().contains(&format!("type {}.", bad)));
        }
    }

    #[test]
    fn test_serde_uses_tags() {
        let json = serde_json::to_string(&PixType::Car).unwrap();
        assert_eq!(json, "\"car\"");
        let back: PixType = serde_json::from_str("\"hp\"").unwrap();
        assert_eq!(back, PixType::Healpix);
    }
}
