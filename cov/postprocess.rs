//! Post-processing of the accumulated covariance.
//!
//! Three steps turn the raw pairwise accumulation into the covariance the
//! caller sees: the shot-noise diagonal (one-point variance not captured
//! by pairwise correlations), optional convolution with instrumental
//! noise, and rescaling from per-unit-sky-fraction to absolute covariance.

use crate::error::CollaboratorError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// External noise model. Convolves both pairwise and one-point products
/// with instrumental noise; the two must land on the same (possibly
/// widened) signal grid, since the noisy one-point PDF supplies the shot
/// noise on the noisy matrix's diagonal.
pub trait NoiseConvolver: Sync {
    /// Convolves a covariance matrix sampled on the given signal grid,
    /// returning the noisy signal grid and matrix.
    fn convolve(
        &self,
        signal: &Array1<f64>,
        cov: ArrayView2<f64>,
    ) -> Result<(Array1<f64>, Array2<f64>), CollaboratorError>;

    /// Convolves the one-point PDF, returning the noisy signal grid and
    /// PDF.
    fn convolve_onepoint(
        &self,
        signal: &Array1<f64>,
        pdf: ArrayView1<f64>,
    ) -> Result<(Array1<f64>, Array1<f64>), CollaboratorError>;
}

/// Adds the binned one-point PDF to the diagonal.
pub fn add_shot_noise(cov: &mut Array2<f64>, binned_onepoint: &Array1<f64>) {
    for (i, p) in binned_onepoint.iter().enumerate() {
        cov[[i, i]] += p;
    }
}

/// Divides by the number of pixels subtended by the full sky,
/// `4 pi / pixel_side^2`, converting to absolute covariance.
pub fn rescale_to_full_sky(cov: &mut Array2<f64>, pixel_side: f64) {
    let n_pixels = 4.0 * std::f64::consts::PI / (pixel_side * pixel_side);
    cov.par_mapv_inplace(|c| c / n_pixels);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn shot_noise_touches_only_the_diagonal() {
        let mut cov = Array2::from_elem((3, 3), 1.0);
        let p = Array1::from_vec(vec![0.1, 0.2, 0.3]);
        add_shot_noise(&mut cov, &p);
        for ((i, j), c) in cov.indexed_iter() {
            let expect = if i == j { 1.0 + p[i] } else { 1.0 };
            assert_relative_eq!(*c, expect, epsilon = 1e-15);
        }
    }

    #[test]
    fn rescaling_divides_by_the_full_sky_pixel_count() {
        let side = 0.001;
        let mut cov = Array2::from_elem((2, 2), 8.0 * std::f64::consts::PI);
        rescale_to_full_sky(&mut cov, side);
        for c in cov.iter() {
            assert_relative_eq!(*c, 2.0 * side * side, epsilon = 1e-15);
        }
    }
}
