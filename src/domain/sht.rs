//! Spin-0 and spin-2 spherical harmonic transforms on HEALPix rings.
//!
//! Harmonics are `sY_lm = sqrt((2l+1)/4pi) d^l_{m,-s}(theta) e^{i m phi}`,
//! evaluated with the upward Wigner-d recursion in `l`. Analysis uses the
//! equal-weight HEALPix quadrature refined by Jacobi iterations.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::Arc;

use anyhow::{bail, Result};
use ndarray::{Array1, ArrayView1};
use num_complex::Complex64;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};

use crate::domain::healpix::{HealpixGeometry, RingInfo};
use crate::error::MapError;
use crate::utils::constants::is_unseen;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);

/// Harmonic coefficients `a_lm` for `0 <= |m| <= l <= lmax`, `l >= spin`.
///
/// Spin-0 sets keep only `m >= 0` (the field is real); spin-2 sets keep
/// both signs of `m`.
#[derive(Debug, Clone, PartialEq)]
pub struct Alm {
    lmax: usize,
    spin: usize,
    mmin: i64,
    offsets: Vec<usize>,
    data: Vec<Complex64>,
}

impl Alm {
    pub fn zeros(lmax: usize, spin: usize) -> Self {
        let mmin = if spin == 0 { 0 } else { -(lmax as i64) };
        let mut offsets = Vec::with_capacity((lmax as i64 - mmin + 1) as usize);
        let mut total = 0;
        for m in mmin..=lmax as i64 {
            offsets.push(total);
            total += column_len(lmax, spin, m);
        }
        Self {
            lmax,
            spin,
            mmin,
            offsets,
            data: vec![ZERO; total],
        }
    }

    pub fn lmax(&self) -> usize {
        self.lmax
    }

    pub fn spin(&self) -> usize {
        self.spin
    }

    pub fn lmin(&self, m: i64) -> usize {
        lmin(self.spin, m)
    }

    fn index(&self, l: usize, m: i64) -> Option<usize> {
        if m < self.mmin || m > self.lmax as i64 {
            return None;
        }
        let lmin = self.lmin(m);
        if l < lmin || l > self.lmax {
            return None;
        }
        Some(self.offsets[(m - self.mmin) as usize] + l - lmin)
    }

    pub fn get(&self, l: usize, m: i64) -> Complex64 {
        self.index(l, m).map(|i| self.data[i]).unwrap_or_default()
    }

    pub fn get_mut(&mut self, l: usize, m: i64) -> Option<&mut Complex64> {
        let i = self.index(l, m)?;
        Some(&mut self.data[i])
    }

    fn column(&self, m: i64) -> &[Complex64] {
        let start = self.offsets[(m - self.mmin) as usize];
        &self.data[start..start + column_len(self.lmax, self.spin, m)]
    }

    /// Multiplies every `a_lm` by `fl[l]`; missing entries count as zero.
    pub fn scale_l(&mut self, fl: &[f64]) {
        for m in self.mmin..=self.lmax as i64 {
            let lmin = self.lmin(m);
            let start = self.offsets[(m - self.mmin) as usize];
            let len = column_len(self.lmax, self.spin, m);
            for (i, v) in self.data[start..start + len].iter_mut().enumerate() {
                *v *= fl.get(lmin + i).copied().unwrap_or(0.0);
            }
        }
    }

    fn add_assign(&mut self, other: &Alm) {
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += *b;
        }
    }

    pub fn max_abs_diff(&self, other: &Alm) -> f64 {
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| (a - b).norm())
            .fold(0.0, f64::max)
    }
}

#[inline]
fn lmin(spin: usize, m: i64) -> usize {
    (m.unsigned_abs() as usize).max(spin)
}

#[inline]
fn column_len(lmax: usize, spin: usize, m: i64) -> usize {
    let lo = lmin(spin, m);
    if lo > lmax {
        0
    } else {
        lmax + 1 - lo
    }
}

struct RingTransform {
    rings: Vec<RingInfo>,
    npix: usize,
    lmax: usize,
    spin: usize,
    lnfact: Vec<f64>,
    forward: HashMap<usize, Arc<dyn Fft<f64>>>,
    inverse: HashMap<usize, Arc<dyn Fft<f64>>>,
}

impl RingTransform {
    fn new(geom: &HealpixGeometry, lmax: usize, spin: usize) -> Self {
        let rings = geom.rings();
        let mut planner = FftPlanner::<f64>::new();
        let mut forward = HashMap::new();
        let mut inverse = HashMap::new();
        for ring in &rings {
            forward
                .entry(ring.npix)
                .or_insert_with(|| planner.plan_fft_forward(ring.npix));
            inverse
                .entry(ring.npix)
                .or_insert_with(|| planner.plan_fft_inverse(ring.npix));
        }

        let mut lnfact = Vec::with_capacity(2 * lmax + 6);
        lnfact.push(0.0);
        for k in 1..2 * lmax + 6 {
            let prev = lnfact[k - 1];
            lnfact.push(prev + (k as f64).ln());
        }

        Self {
            rings,
            npix: geom.npix(),
            lmax,
            spin,
            lnfact,
            forward,
            inverse,
        }
    }

    fn mmin(&self) -> i64 {
        if self.spin == 0 {
            0
        } else {
            -(self.lmax as i64)
        }
    }

    /// Fills `out` with `sqrt((2l+1)/4pi) d^l_{m,-s}(theta)` for
    /// `l = lmin(m) ..= lmax`.
    fn lambda(&self, theta: f64, m: i64, out: &mut Vec<f64>) {
        out.clear();
        let m1 = m;
        let m2 = -(self.spin as i64);
        let l0 = m1.unsigned_abs().max(m2.unsigned_abs()) as usize;
        if l0 > self.lmax {
            return;
        }

        let mut d_cur = self.wigner_start(theta, m1, m2);
        let mut d_prev = 0.0;
        let cos_t = theta.cos();
        let (m1f, m2f) = (m1 as f64, m2 as f64);

        for l in l0..=self.lmax {
            let lf = l as f64;
            out.push(d_cur * ((2.0 * lf + 1.0) / (4.0 * PI)).sqrt());
            if l == self.lmax {
                break;
            }
            let d_next = if l == 0 {
                cos_t * d_cur
            } else {
                let lp = lf + 1.0;
                let a = ((lp * lp - m1f * m1f) * (lp * lp - m2f * m2f)).sqrt();
                let b = ((lf * lf - m1f * m1f) * (lf * lf - m2f * m2f)).max(0.0).sqrt();
                ((2.0 * lf + 1.0) * (lf * lp * cos_t - m1f * m2f) * d_cur - lp * b * d_prev)
                    / (lf * a)
            };
            d_prev = d_cur;
            d_cur = d_next;
        }
    }

    /// `d^j_{m1,m2}(theta)` at `j = max(|m1|, |m2|)`, evaluated in log space.
    fn wigner_start(&self, theta: f64, m1: i64, m2: i64) -> f64 {
        let j = m1.abs().max(m2.abs());
        let lc = (0.5 * theta).cos().ln();
        let ls = (0.5 * theta).sin().ln();
        let binom = |m: i64| {
            0.5 * (self.lnfact[(2 * j) as usize]
                - self.lnfact[(j + m) as usize]
                - self.lnfact[(j - m) as usize])
        };

        let (sign_odd, log_mag) = if m1.abs() >= m2.abs() {
            let m = m2;
            if m1 >= 0 {
                (
                    (j - m) % 2 != 0,
                    binom(m) + (j + m) as f64 * lc + (j - m) as f64 * ls,
                )
            } else {
                (false, binom(m) + (j - m) as f64 * lc + (j + m) as f64 * ls)
            }
        } else {
            let m = m1;
            if m2 > 0 {
                (false, binom(m) + (j + m) as f64 * lc + (j - m) as f64 * ls)
            } else {
                (
                    (m + j).rem_euclid(2) != 0,
                    binom(m) + (j - m) as f64 * lc + (j + m) as f64 * ls,
                )
            }
        };

        let value = log_mag.exp();
        if sign_odd {
            -value
        } else {
            value
        }
    }

    fn analysis(&self, field: &[Complex64]) -> Alm {
        let mmin = self.mmin();
        let nm = (self.lmax as i64 - mmin + 1) as usize;
        let weight = 4.0 * PI / self.npix as f64;

        let coeffs: Vec<Vec<Complex64>> = self
            .rings
            .par_iter()
            .map(|ring| {
                let mut buf = field[ring.first..ring.first + ring.npix].to_vec();
                self.forward[&ring.npix].process(&mut buf);
                (0..nm)
                    .map(|k| {
                        let m = mmin + k as i64;
                        let idx = m.rem_euclid(ring.npix as i64) as usize;
                        buf[idx] * Complex64::from_polar(weight, -(m as f64) * ring.phi0)
                    })
                    .collect()
            })
            .collect();

        let columns: Vec<Vec<Complex64>> = (0..nm)
            .into_par_iter()
            .map(|k| {
                let m = mmin + k as i64;
                let len = column_len(self.lmax, self.spin, m);
                let mut col = vec![ZERO; len];
                if len == 0 {
                    return col;
                }
                let mut lam = Vec::with_capacity(len);
                for (ring, c) in self.rings.iter().zip(coeffs.iter()) {
                    let fm = c[k];
                    if fm.norm_sqr() == 0.0 {
                        continue;
                    }
                    self.lambda(ring.theta, m, &mut lam);
                    for (a, l) in col.iter_mut().zip(lam.iter()) {
                        *a += fm * *l;
                    }
                }
                col
            })
            .collect();

        let mut alm = Alm::zeros(self.lmax, self.spin);
        alm.data = columns.concat();
        alm
    }

    fn synthesis(&self, alm: &Alm) -> Vec<Complex64> {
        let ring_values: Vec<Vec<Complex64>> = self
            .rings
            .par_iter()
            .map(|ring| {
                let n = ring.npix as i64;
                let mut c = vec![ZERO; ring.npix];
                let mut lam = Vec::with_capacity(self.lmax + 1);
                for m in alm.mmin..=self.lmax as i64 {
                    let col = alm.column(m);
                    if col.is_empty() {
                        continue;
                    }
                    self.lambda(ring.theta, m, &mut lam);
                    let g: Complex64 = col.iter().zip(lam.iter()).map(|(a, l)| *a * *l).sum();
                    let v = g * Complex64::from_polar(1.0, m as f64 * ring.phi0);
                    c[m.rem_euclid(n) as usize] += v;
                    if self.spin == 0 && m > 0 {
                        c[(-m).rem_euclid(n) as usize] += v.conj();
                    }
                }
                self.inverse[&ring.npix].process(&mut c);
                c
            })
            .collect();

        let mut out = vec![ZERO; self.npix];
        for (ring, values) in self.rings.iter().zip(ring_values) {
            out[ring.first..ring.first + ring.npix].copy_from_slice(&values);
        }
        out
    }

    fn map2alm(&self, field: &[Complex64], iterations: usize) -> Alm {
        let mut alm = self.analysis(field);
        for _ in 0..iterations {
            let synth = self.synthesis(&alm);
            let residual: Vec<Complex64> = field
                .iter()
                .zip(synth.iter())
                .map(|(a, b)| a - b)
                .collect();
            alm.add_assign(&self.analysis(&residual));
        }
        alm
    }
}

fn clean(v: f64) -> f64 {
    if is_unseen(v) {
        0.0
    } else {
        v
    }
}

fn check_len(len: usize, geom: &HealpixGeometry) -> Result<()> {
    if len != geom.npix() {
        bail!(MapError::ShapeMismatch(format!(
            "expected {} pixels, got {}",
            geom.npix(),
            len
        )));
    }
    Ok(())
}

/// Scalar analysis; UNSEEN pixels count as zero.
pub fn map2alm_scalar(
    values: ArrayView1<'_, f64>,
    geom: &HealpixGeometry,
    lmax: usize,
    iterations: usize,
) -> Result<Alm> {
    check_len(values.len(), geom)?;
    let field: Vec<Complex64> = values.iter().map(|&v| Complex64::new(clean(v), 0.0)).collect();
    Ok(RingTransform::new(geom, lmax, 0).map2alm(&field, iterations))
}

/// Spin-2 analysis of the polarization field `Q + iU`.
pub fn map2alm_spin2(
    q: ArrayView1<'_, f64>,
    u: ArrayView1<'_, f64>,
    geom: &HealpixGeometry,
    lmax: usize,
    iterations: usize,
) -> Result<Alm> {
    check_len(q.len(), geom)?;
    check_len(u.len(), geom)?;
    let field: Vec<Complex64> = q
        .iter()
        .zip(u.iter())
        .map(|(&a, &b)| Complex64::new(clean(a), clean(b)))
        .collect();
    Ok(RingTransform::new(geom, lmax, 2).map2alm(&field, iterations))
}

pub fn alm2map_scalar(alm: &Alm, geom: &HealpixGeometry) -> Result<Array1<f64>> {
    if alm.spin() != 0 {
        bail!(MapError::InvalidParameter(format!(
            "expected spin-0 coefficients, got spin {}",
            alm.spin()
        )));
    }
    let field = RingTransform::new(geom, alm.lmax(), 0).synthesis(alm);
    Ok(field.iter().map(|c| c.re).collect())
}

pub fn alm2map_spin2(alm: &Alm, geom: &HealpixGeometry) -> Result<(Array1<f64>, Array1<f64>)> {
    if alm.spin() != 2 {
        bail!(MapError::InvalidParameter(format!(
            "expected spin-2 coefficients, got spin {}",
            alm.spin()
        )));
    }
    let field = RingTransform::new(geom, alm.lmax(), 2).synthesis(alm);
    Ok((
        field.iter().map(|c| c.re).collect(),
        field.iter().map(|c| c.im).collect(),
    ))
}

/// Gaussian beam transfer function; spin 2 carries the polarization factor
/// `exp(2 sigma^2)`.
pub fn gaussian_beam(fwhm_rad: f64, lmax: usize, spin: usize) -> Vec<f64> {
    let sigma = fwhm_rad / crate::utils::constants::FWHM_PER_SIGMA;
    let s2 = sigma * sigma;
    let shift = (spin * spin) as f64;
    (0..=lmax)
        .map(|l| {
            let lf = l as f64;
            (-0.5 * (lf * (lf + 1.0) - shift) * s2).exp()
        })
        .collect()
}
