//! Distance from each pixel to the nearest excluded (`<= 0`) pixel.

use ndarray::{Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;

use crate::domain::healpix::HealpixGeometry;
use crate::model::CarGeometry;

#[inline]
fn is_excluded(v: f64) -> bool {
    !(v > 0.0)
}

/// Lower envelope of parabolas (Felzenszwalb & Huttenlocher) on a uniform
/// grid of step `spacing`. Infinite samples contribute nothing.
fn edt_1d(f: &[f64], spacing: f64, out: &mut [f64]) {
    let n = f.len();
    let mut v: Vec<usize> = Vec::with_capacity(n);
    let mut z: Vec<f64> = Vec::with_capacity(n);

    for q in 0..n {
        if !f[q].is_finite() {
            continue;
        }
        let pq = q as f64 * spacing;
        loop {
            let Some(&last) = v.last() else {
                v.push(q);
                z.push(f64::NEG_INFINITY);
                break;
            };
            let pv = last as f64 * spacing;
            let s = ((f[q] + pq * pq) - (f[last] + pv * pv)) / (2.0 * (pq - pv));
            if z.last().is_some_and(|&zl| s <= zl) {
                v.pop();
                z.pop();
                continue;
            }
            v.push(q);
            z.push(s);
            break;
        }
    }

    if v.is_empty() {
        out.fill(f64::INFINITY);
        return;
    }

    let mut k = 0;
    for (q, o) in out.iter_mut().enumerate() {
        let pq = q as f64 * spacing;
        while k + 1 < v.len() && z[k + 1] < pq {
            k += 1;
        }
        let d = pq - v[k] as f64 * spacing;
        *o = d * d + f[v[k]];
    }
}

/// Euclidean distance transform of a CAR mask, in radians. Rows use their
/// own RA spacing `|cdelt1| cos(dec)`; full-sky rows are periodic in RA.
pub fn car_distance_transform(mask: ArrayView2<'_, f64>, geometry: &CarGeometry) -> Array2<f64> {
    let (ny, nx) = mask.dim();
    let wcs = geometry.wcs();
    let dy = wcs.cdelt[1].abs().to_radians();
    let wraps = wcs.wraps_in_ra(nx);

    let columns: Vec<Vec<f64>> = (0..nx)
        .into_par_iter()
        .map(|x| {
            let f: Vec<f64> = mask
                .column(x)
                .iter()
                .map(|&v| if is_excluded(v) { 0.0 } else { f64::INFINITY })
                .collect();
            let mut out = vec![0.0; ny];
            edt_1d(&f, dy, &mut out);
            out
        })
        .collect();

    let rows: Vec<Vec<f64>> = (0..ny)
        .into_par_iter()
        .map(|y| {
            let dec = wcs.dec_of_row(y as f64).to_radians();
            let dx = (wcs.cdelt[0].abs().to_radians() * dec.cos().abs()).max(1e-12);
            let f: Vec<f64> = columns.iter().map(|col| col[y]).collect();
            let mut out = if wraps {
                // Three periods so every pixel sees its neighbours across the seam.
                let tiled: Vec<f64> = f.iter().chain(&f).chain(&f).copied().collect();
                let mut full = vec![0.0; 3 * nx];
                edt_1d(&tiled, dx, &mut full);
                full[nx..2 * nx].to_vec()
            } else {
                let mut out = vec![0.0; nx];
                edt_1d(&f, dx, &mut out);
                out
            };
            out.iter_mut().for_each(|d| *d = d.sqrt());
            out
        })
        .collect();

    Array2::from_shape_fn((ny, nx), |(y, x)| rows[y][x])
}

/// Angular distance in radians from every pixel to the nearest excluded
/// pixel centre. Distances beyond `max_radius` come back as infinity.
pub fn healpix_nearest_excluded(
    mask: ArrayView1<'_, f64>,
    geometry: &HealpixGeometry,
    max_radius: f64,
) -> Vec<f64> {
    let npix = geometry.npix();

    let mut excluded: Vec<[f64; 3]> = (0..npix)
        .filter(|&p| is_excluded(mask[p]))
        .map(|p| geometry.pix2vec_ring(p))
        .collect();
    excluded.sort_by(|a, b| a[2].total_cmp(&b[2]));
    let zs: Vec<f64> = excluded.iter().map(|v| v[2]).collect();

    (0..npix)
        .into_par_iter()
        .map(|p| {
            if is_excluded(mask[p]) {
                return 0.0;
            }
            let (theta, _) = geometry.pix2ang_ring(p);
            let z_lo = (theta + max_radius).min(std::f64::consts::PI).cos();
            let z_hi = (theta - max_radius).max(0.0).cos();
            let lo = zs.partition_point(|&z| z < z_lo - 1e-12);
            let hi = zs.partition_point(|&z| z <= z_hi + 1e-12);
            if lo >= hi {
                return f64::INFINITY;
            }

            let v = geometry.pix2vec_ring(p);
            let best = excluded[lo..hi]
                .iter()
                .map(|e| v[0] * e[0] + v[1] * e[1] + v[2] * e[2])
                .fold(-1.0, f64::max);
            let d = best.clamp(-1.0, 1.0).acos();
            if d <= max_radius {
                d
            } else {
                f64::INFINITY
            }
        })
        .collect()
}
