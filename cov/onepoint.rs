//! One-point PDF input.
//!
//! The engine does not compute the one-point PDF; it consumes one
//! produced upstream, sampled on the same uniform signal grid the
//! two-point kernel is evaluated on. The centroid enters the correlation
//! diagnostics and, for weak lensing, the bin-edge shift.

use crate::error::CovarianceError;
use crate::numerics::{bin_1d, integrate};
use ndarray::Array1;

/// Binned one-point PDF on a uniform signal grid, plus derived quantities.
#[derive(Clone, Debug)]
pub struct OnePoint {
    signal: Array1<f64>,
    pdf: Array1<f64>,
    dx: f64,
    mean: f64,
}

impl OnePoint {
    /// Validates the grid (uniform spacing, at least two points, finite
    /// values) and precomputes the centroid `\int s p(s) ds / \int p(s) ds`.
    pub fn new(signal: Array1<f64>, pdf: Array1<f64>) -> Result<Self, CovarianceError> {
        if signal.len() != pdf.len() {
            return Err(CovarianceError::OnePoint(format!(
                "signal grid has {} points but PDF has {}",
                signal.len(),
                pdf.len()
            )));
        }
        if signal.len() < 2 {
            return Err(CovarianceError::OnePoint(
                "signal grid needs at least 2 points".to_string(),
            ));
        }
        if signal.iter().chain(pdf.iter()).any(|v| !v.is_finite()) {
            return Err(CovarianceError::OnePoint(
                "signal grid and PDF must be finite".to_string(),
            ));
        }
        let dx = signal[1] - signal[0];
        if dx <= 0.0 {
            return Err(CovarianceError::OnePoint(
                "signal grid must be increasing".to_string(),
            ));
        }
        let uniform = signal
            .as_slice()
            .expect("signal grid is contiguous")
            .windows(2)
            .all(|w| ((w[1] - w[0]) - dx).abs() <= 1e-8 * dx);
        if !uniform {
            return Err(CovarianceError::OnePoint(
                "signal grid must be uniformly spaced".to_string(),
            ));
        }

        let weighted: Vec<f64> = signal.iter().zip(pdf.iter()).map(|(&s, &p)| s * p).collect();
        let norm = integrate(dx, pdf.as_slice().expect("pdf is contiguous"));
        if norm <= 0.0 {
            return Err(CovarianceError::OnePoint(
                "PDF must have positive total probability".to_string(),
            ));
        }
        let mean = integrate(dx, &weighted) / norm;

        Ok(Self {
            signal,
            pdf,
            dx,
            mean,
        })
    }

    /// Number of internal signal samples (the covariance matrix dimension).
    pub fn len(&self) -> usize {
        self.signal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signal.is_empty()
    }

    pub fn signal(&self) -> &Array1<f64> {
        &self.signal
    }

    pub fn pdf(&self) -> &Array1<f64> {
        &self.pdf
    }

    /// Signal grid spacing.
    pub fn spacing(&self) -> f64 {
        self.dx
    }

    /// Centroid of the PDF on the internal signal grid.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Integrates the PDF over each caller bin (used for the shot-noise
    /// diagonal).
    pub fn binned(&self, edges: &[f64]) -> Result<Array1<f64>, CovarianceError> {
        bin_1d(
            self.signal.as_slice().expect("signal grid is contiguous"),
            self.pdf.view(),
            edges,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn triangle() -> OnePoint {
        // symmetric triangular PDF on [0, 2], centroid at 1
        let n = 201;
        let signal = Array1::linspace(0.0, 2.0, n);
        let pdf = signal.mapv(|s: f64| 1.0 - (s - 1.0).abs());
        OnePoint::new(signal, pdf).unwrap()
    }

    #[test]
    fn centroid_of_symmetric_pdf_is_the_center() {
        let op = triangle();
        assert_relative_eq!(op.mean(), 1.0, epsilon = 1e-10);
        assert_eq!(op.len(), 201);
        assert_relative_eq!(op.spacing(), 0.01, epsilon = 1e-12);
    }

    #[test]
    fn binned_probabilities_sum_to_the_total() {
        let op = triangle();
        let binned = op.binned(&[0.0, 0.5, 1.0, 2.0]).unwrap();
        // triangle integrates to 1
        assert_relative_eq!(binned.sum(), 1.0, epsilon = 1e-6);
        assert!(binned.iter().all(|&p| p >= 0.0));
    }

    #[test]
    fn rejects_malformed_input() {
        let bad = OnePoint::new(Array1::linspace(0.0, 1.0, 5), Array1::zeros(4));
        assert!(matches!(bad, Err(CovarianceError::OnePoint(_))));

        let nonuniform = OnePoint::new(
            Array1::from_vec(vec![0.0, 0.1, 0.5]),
            Array1::from_elem(3, 1.0),
        );
        assert!(matches!(nonuniform, Err(CovarianceError::OnePoint(_))));

        let zero_norm = OnePoint::new(Array1::linspace(0.0, 1.0, 5), Array1::zeros(5));
        assert!(matches!(zero_norm, Err(CovarianceError::OnePoint(_))));
    }
}
