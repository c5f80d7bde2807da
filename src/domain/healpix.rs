//! HEALPix pixel geometry (Gorski et al. 2005).
//!
//! Only what the map operations need: the RING layout used for harmonic
//! transforms and plotting, angle/pixel conversions, and RING/NESTED
//! reordering for hierarchical resampling.

use std::f64::consts::{FRAC_PI_2, PI};

use anyhow::{bail, Result};
use rayon::prelude::*;

use crate::error::MapError;

const JRLL: [i64; 12] = [2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4];
const JPLL: [i64; 12] = [1, 3, 5, 7, 0, 2, 4, 6, 1, 3, 5, 7];

pub fn nside2npix(nside: usize) -> usize {
    12 * nside * nside
}

pub fn npix2nside(npix: usize) -> Result<usize> {
    if npix == 0 || npix % 12 != 0 {
        bail!(MapError::InvalidPixelCount(npix));
    }
    let n2 = npix / 12;
    let nside = (n2 as f64).sqrt().round() as usize;
    if nside * nside != n2 {
        bail!(MapError::InvalidPixelCount(npix));
    }
    Ok(nside)
}

pub fn is_power_of_two(n: usize) -> bool {
    n > 0 && n & (n - 1) == 0
}

/// One iso-latitude ring of pixels.
#[derive(Debug, Clone, Copy)]
pub struct RingInfo {
    pub first: usize,
    pub npix: usize,
    pub theta: f64,
    /// Longitude of the first pixel centre.
    pub phi0: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealpixGeometry {
    nside: i64,
    npix: i64,
    ncap: i64,
}

impl HealpixGeometry {
    pub fn new(nside: usize) -> Result<Self> {
        if nside == 0 {
            bail!(MapError::InvalidNside(nside));
        }
        let n = nside as i64;
        Ok(Self {
            nside: n,
            npix: 12 * n * n,
            ncap: 2 * n * (n - 1),
        })
    }

    pub fn from_npix(npix: usize) -> Result<Self> {
        Self::new(npix2nside(npix)?)
    }

    pub fn nside(&self) -> usize {
        self.nside as usize
    }

    pub fn npix(&self) -> usize {
        self.npix as usize
    }

    fn require_nested(&self) -> Result<u32> {
        let nside = self.nside as usize;
        if !is_power_of_two(nside) {
            bail!(MapError::InvalidNside(nside));
        }
        Ok(nside.trailing_zeros())
    }

    /// Rings from north to south; index 0 is ring number 1.
    pub fn rings(&self) -> Vec<RingInfo> {
        let n = self.nside;
        let fact2 = 4.0 / self.npix as f64;
        let fact1 = (2 * n) as f64 * fact2;

        (1..=4 * n - 1)
            .map(|i| {
                let (first, count, z, shifted) = if i < n {
                    (2 * i * (i - 1), 4 * i, 1.0 - (i * i) as f64 * fact2, true)
                } else if i <= 3 * n {
                    (
                        self.ncap + (i - n) * 4 * n,
                        4 * n,
                        (2 * n - i) as f64 * fact1,
                        (i - n) & 1 == 0,
                    )
                } else {
                    let s = 4 * n - i;
                    (
                        self.npix - 2 * s * (s + 1),
                        4 * s,
                        -(1.0 - (s * s) as f64 * fact2),
                        true,
                    )
                };
                RingInfo {
                    first: first as usize,
                    npix: count as usize,
                    theta: z.clamp(-1.0, 1.0).acos(),
                    phi0: if shifted { PI / count as f64 } else { 0.0 },
                }
            })
            .collect()
    }

    pub fn pix2ang_ring(&self, pix: usize) -> (f64, f64) {
        let n = self.nside;
        let pix = pix as i64;
        let fact2 = 4.0 / self.npix as f64;
        let fact1 = (2 * n) as f64 * fact2;

        let (z, phi) = if pix < self.ncap {
            let iring = (1 + isqrt(1 + 2 * pix)) >> 1;
            let iphi = (pix + 1) - 2 * iring * (iring - 1);
            (
                1.0 - (iring * iring) as f64 * fact2,
                (iphi as f64 - 0.5) * FRAC_PI_2 / iring as f64,
            )
        } else if pix < self.npix - self.ncap {
            let nl4 = 4 * n;
            let ip = pix - self.ncap;
            let iring = ip / nl4 + n;
            let iphi = ip % nl4 + 1;
            let fodd = if (iring + n) & 1 != 0 { 1.0 } else { 0.5 };
            (
                (2 * n - iring) as f64 * fact1,
                (iphi as f64 - fodd) * PI * 0.75 * fact1,
            )
        } else {
            let ip = self.npix - pix;
            let iring = (1 + isqrt(2 * ip - 1)) >> 1;
            let iphi = 4 * iring + 1 - (ip - 2 * iring * (iring - 1));
            (
                -1.0 + (iring * iring) as f64 * fact2,
                (iphi as f64 - 0.5) * FRAC_PI_2 / iring as f64,
            )
        };

        (z.clamp(-1.0, 1.0).acos(), phi)
    }

    pub fn pix2vec_ring(&self, pix: usize) -> [f64; 3] {
        let (theta, phi) = self.pix2ang_ring(pix);
        let st = theta.sin();
        [st * phi.cos(), st * phi.sin(), theta.cos()]
    }

    pub fn ang2pix_ring(&self, theta: f64, phi: f64) -> usize {
        let n = self.nside;
        let nl4 = 4 * n;
        let z = theta.cos();
        let za = z.abs();
        let tt = phi.rem_euclid(2.0 * PI) * (2.0 / PI);

        let pix = if za <= 2.0 / 3.0 {
            let temp1 = n as f64 * (0.5 + tt);
            let temp2 = n as f64 * z * 0.75;
            let jp = (temp1 - temp2) as i64;
            let jm = (temp1 + temp2) as i64;
            let ir = n + 1 + jp - jm;
            let kshift = 1 - (ir & 1);
            let ip = ((jp + jm - n + kshift + 1) / 2).rem_euclid(nl4);
            self.ncap + (ir - 1) * nl4 + ip
        } else {
            let tp = tt - tt.floor();
            let tmp = n as f64 * (3.0 * (1.0 - za)).sqrt();
            let jp = (tp * tmp) as i64;
            let jm = ((1.0 - tp) * tmp) as i64;
            let ir = (jp + jm + 1).min(n);
            let ip = ((tt * ir as f64) as i64).min(4 * ir - 1);
            if z > 0.0 {
                2 * ir * (ir - 1) + ip
            } else {
                self.npix - 2 * ir * (ir + 1) + ip
            }
        };
        pix as usize
    }

    fn ring2xyf(&self, pix: i64) -> (i64, i64, usize) {
        let n = self.nside;
        let nl2 = 2 * n;
        let (iring, iphi, kshift, nr, face) = if pix < self.ncap {
            let iring = (1 + isqrt(1 + 2 * pix)) >> 1;
            let iphi = (pix + 1) - 2 * iring * (iring - 1);
            (iring, iphi, 0, iring, ((iphi - 1) / iring) as usize)
        } else if pix < self.npix - self.ncap {
            let ip = pix - self.ncap;
            let tmp = ip / (4 * n);
            let iring = tmp + n;
            let iphi = ip - tmp * 4 * n + 1;
            let kshift = (iring + n) & 1;
            let ire = tmp + 1;
            let irm = nl2 + 2 - ire;
            let ifm = (iphi - (ire >> 1) + n - 1) / n;
            let ifp = (iphi - (irm >> 1) + n - 1) / n;
            let face = if ifp == ifm {
                ifp | 4
            } else if ifp < ifm {
                ifp
            } else {
                ifm + 8
            };
            (iring, iphi, kshift, n, face as usize)
        } else {
            let ip = self.npix - pix;
            let ir = (1 + isqrt(2 * ip - 1)) >> 1;
            let iphi = 4 * ir + 1 - (ip - 2 * ir * (ir - 1));
            (2 * nl2 - ir, iphi, 0, ir, (8 + (iphi - 1) / ir) as usize)
        };

        let irt = iring - JRLL[face] * n + 1;
        let mut ipt = 2 * iphi - JPLL[face] * nr - kshift - 1;
        if ipt >= nl2 {
            ipt -= 8 * n;
        }
        ((ipt - irt) >> 1, (-ipt - irt) >> 1, face)
    }

    fn xyf2ring(&self, ix: i64, iy: i64, face: usize) -> i64 {
        let n = self.nside;
        let nl4 = 4 * n;
        let jr = JRLL[face] * n - ix - iy - 1;

        let (nr, n_before, kshift) = if jr < n {
            (jr, 2 * jr * (jr - 1), 0)
        } else if jr > 3 * n {
            let nr = nl4 - jr;
            (nr, self.npix - 2 * (nr + 1) * nr, 0)
        } else {
            (n, self.ncap + (jr - n) * nl4, (jr - n) & 1)
        };

        let mut jp = (JPLL[face] * nr + ix - iy + 1 + kshift) / 2;
        if jp > nl4 {
            jp -= nl4;
        } else if jp < 1 {
            jp += nl4;
        }
        n_before + jp - 1
    }

    pub fn ring2nest(&self, pix: usize) -> Result<usize> {
        let order = self.require_nested()?;
        let (ix, iy, face) = self.ring2xyf(pix as i64);
        Ok((face << (2 * order)) + spread_bits(ix as u64) as usize + ((spread_bits(iy as u64) as usize) << 1))
    }

    pub fn nest2ring(&self, pix: usize) -> Result<usize> {
        let order = self.require_nested()?;
        let npface = 1usize << (2 * order);
        let face = pix >> (2 * order);
        let ipf = (pix & (npface - 1)) as u64;
        let ix = compress_bits(ipf) as i64;
        let iy = compress_bits(ipf >> 1) as i64;
        Ok(self.xyf2ring(ix, iy, face) as usize)
    }

    /// RING-ordered values to NESTED order.
    pub fn ring_to_nest(&self, values: &[f64]) -> Result<Vec<f64>> {
        self.require_nested()?;
        check_len(values.len(), self.npix())?;
        (0..self.npix())
            .into_par_iter()
            .map(|nest| Ok(values[self.nest2ring(nest)?]))
            .collect()
    }

    /// NESTED-ordered values to RING order.
    pub fn nest_to_ring(&self, values: &[f64]) -> Result<Vec<f64>> {
        self.require_nested()?;
        check_len(values.len(), self.npix())?;
        (0..self.npix())
            .into_par_iter()
            .map(|ring| Ok(values[self.ring2nest(ring)?]))
            .collect()
    }
}

fn check_len(len: usize, npix: usize) -> Result<()> {
    if len != npix {
        bail!(MapError::ShapeMismatch(format!(
            "expected {} pixels, got {}",
            npix, len
        )));
    }
    Ok(())
}

#[inline]
fn isqrt(v: i64) -> i64 {
    let mut r = (v as f64).sqrt() as i64;
    while r * r > v {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= v {
        r += 1;
    }
    r
}

fn spread_bits(v: u64) -> u64 {
    (0..32).fold(0, |acc, i| acc | (((v >> i) & 1) << (2 * i)))
}

fn compress_bits(v: u64) -> u64 {
    (0..32).fold(0, |acc, i| acc | (((v >> (2 * i)) & 1) << i))
}
