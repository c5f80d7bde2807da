use image::Rgb;

/// Piecewise-linear colormap over evenly spaced stops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Colormap {
    pub name: &'static str,
    stops: &'static [[u8; 3]],
}

pub const YL_OR_RD: Colormap = Colormap {
    name: "YlOrRd",
    stops: &[
        [0xff, 0xff, 0xcc],
        [0xff, 0xed, 0xa0],
        [0xfe, 0xd9, 0x76],
        [0xfe, 0xb2, 0x4c],
        [0xfd, 0x8d, 0x3c],
        [0xfc, 0x4e, 0x2a],
        [0xe3, 0x1a, 0x1c],
        [0xbd, 0x00, 0x26],
        [0x80, 0x00, 0x26],
    ],
};

pub const RD_YL_BU_R: Colormap = Colormap {
    name: "RdYlBu_r",
    stops: &[
        [0x31, 0x36, 0x95],
        [0x45, 0x75, 0xb4],
        [0x74, 0xad, 0xd1],
        [0xab, 0xd9, 0xe9],
        [0xe0, 0xf3, 0xf8],
        [0xff, 0xff, 0xbf],
        [0xfe, 0xe0, 0x90],
        [0xfd, 0xae, 0x61],
        [0xf4, 0x6d, 0x43],
        [0xd7, 0x30, 0x27],
        [0xa5, 0x00, 0x26],
    ],
};

/// Sequential map for scalar fields, diverging for T/Q/U.
pub fn for_components(ncomp: usize) -> Colormap {
    if ncomp == 1 {
        YL_OR_RD
    } else {
        RD_YL_BU_R
    }
}

impl Colormap {
    /// Colour at `t` in `[0, 1]`; values outside are clamped.
    pub fn sample(&self, t: f64) -> Rgb<u8> {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let span = (self.stops.len() - 1) as f64;
        let pos = t * span;
        let i = (pos.floor() as usize).min(self.stops.len() - 2);
        let frac = pos - i as f64;

        let (a, b) = (self.stops[i], self.stops[i + 1]);
        let mix = |k: usize| (a[k] as f64 + (b[k] as f64 - a[k] as f64) * frac).round() as u8;
        Rgb([mix(0), mix(1), mix(2)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        assert_eq!(YL_OR_RD.sample(0.0), Rgb([0xff, 0xff, 0xcc]));
        assert_eq!(YL_OR_RD.sample(1.0), Rgb([0x80, 0x00, 0x26]));
        assert_eq!(RD_YL_BU_R.sample(0.0), Rgb([0x31, 0x36, 0x95]));
        assert_eq!(RD_YL_BU_R.sample(2.0), Rgb([0xa5, 0x00, 0x26]));
    }

    #[test]
    fn test_midpoint_of_diverging_map() {
        assert_eq!(RD_YL_BU_R.sample(0.5), Rgb([0xff, 0xff, 0xbf]));
    }

    #[test]
    fn test_selection() {
        assert_eq!(for_components(1).name, "YlOrRd");
        assert_eq!(for_components(3).name, "RdYlBu_r");
    }
}
