use std::f64::consts::PI;

use anyhow::{Context, Result};
use ndarray::{Array2, ArrayView2, ArrayViewMut2, Axis};
use num_complex::Complex;
use rayon::prelude::*;
use rustfft::{FftDirection, FftPlanner};

/// Angular wavenumbers `2 pi fftfreq(n, d)`.
pub fn wavenumbers(n: usize, spacing: f64) -> Vec<f64> {
    let scale = 2.0 * PI / (n as f64 * spacing);
    (0..n)
        .map(|i| {
            let k = if i <= (n - 1) / 2 {
                i as f64
            } else {
                i as f64 - n as f64
            };
            k * scale
        })
        .collect()
}

/// Convolves a flat-sky image with a Gaussian of standard deviation `sigma`
/// (same units as `dy`, `dx`), multiplying its spectrum by
/// `exp(-k^2 sigma^2 / 2)`.
pub fn gaussian_filter(data: ArrayView2<'_, f64>, sigma: f64, dy: f64, dx: f64) -> Result<Array2<f64>> {
    let (rows, cols) = data.dim();

    let mut buf: Vec<Complex<f64>> = data.iter().map(|&v| Complex::new(v, 0.0)).collect();

    fft_rows(&mut buf, cols, FftDirection::Forward);
    fft_cols(&mut buf, rows, cols, FftDirection::Forward)?;

    let ky = wavenumbers(rows, dy);
    let kx = wavenumbers(cols, dx);
    let s2 = sigma * sigma;
    let norm = 1.0 / (rows * cols) as f64;

    buf.par_chunks_mut(cols).enumerate().for_each(|(r, row)| {
        let ky2 = ky[r] * ky[r];
        for (c, v) in row.iter_mut().enumerate() {
            *v *= (-0.5 * (ky2 + kx[c] * kx[c]) * s2).exp() * norm;
        }
    });

    fft_cols(&mut buf, rows, cols, FftDirection::Inverse)?;
    fft_rows(&mut buf, cols, FftDirection::Inverse);

    let real: Vec<f64> = buf.par_iter().map(|c| c.re).collect();
    Array2::from_shape_vec((rows, cols), real).context("Failed to reshape filtered image")
}

fn fft_rows(buf: &mut [Complex<f64>], cols: usize, direction: FftDirection) {
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft(cols, direction);

    buf.par_chunks_mut(cols).for_each(|row| {
        fft.process(row);
    });
}

fn fft_cols(buf: &mut [Complex<f64>], rows: usize, cols: usize, direction: FftDirection) -> Result<()> {
    let mut view = ArrayViewMut2::from_shape((rows, cols), buf)
        .context("FFT buffer does not match image shape")?;

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft(rows, direction);

    view.axis_iter_mut(Axis(1)).into_par_iter().for_each(|mut col| {
        let mut col_buf = col.to_vec();

        fft.process(&mut col_buf);

        for (idx, val) in col.iter_mut().enumerate() {
            *val = col_buf[idx];
        }
    });
    Ok(())
}
