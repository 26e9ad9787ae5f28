//! Fixed-point quadrature and rebinning primitives.
//!
//! Textbook utilities the covariance engine invokes but does not redesign:
//! Gauss-Legendre node/weight generation (Newton iteration on the Legendre
//! recurrence), a Romberg/Simpson dispatch for integrals over uniformly
//! sampled arrays, and exact rebinning of piecewise-linear interpolants
//! onto caller-supplied bin edges.

use crate::error::CovarianceError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Nodes and weights of the `n`-point Gauss-Legendre rule on `[a, b]`.
///
/// Nodes are returned in ascending order. Accuracy of the Newton iteration
/// is at machine precision for the orders used here (up to a few thousand).
pub fn gauss_legendre(n: usize, a: f64, b: f64) -> (Vec<f64>, Vec<f64>) {
    assert!(n >= 1, "quadrature order must be positive");
    let mut nodes = vec![0.0; n];
    let mut weights = vec![0.0; n];
    let xm = 0.5 * (b + a);
    let xl = 0.5 * (b - a);
    for i in 0..n.div_ceil(2) {
        // Tricomi initial guess for the i-th root of P_n
        let mut z = (std::f64::consts::PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let mut pp = 0.0;
        for _ in 0..100 {
            let mut p0 = 1.0;
            let mut p1 = 0.0;
            for j in 0..n {
                let p2 = p1;
                p1 = p0;
                p0 = (((2 * j + 1) as f64) * z * p1 - (j as f64) * p2) / ((j + 1) as f64);
            }
            pp = (n as f64) * (z * p0 - p1) / (z * z - 1.0);
            let dz = p0 / pp;
            z -= dz;
            if dz.abs() < 1e-15 {
                break;
            }
        }
        nodes[i] = xm - xl * z;
        nodes[n - 1 - i] = xm + xl * z;
        weights[i] = 2.0 * xl / ((1.0 - z * z) * pp * pp);
        weights[n - 1 - i] = weights[i];
    }
    (nodes, weights)
}

/// Integral of a uniformly sampled function with spacing `dx`.
///
/// Dispatches to Romberg when the interval count is a power of two and to
/// Simpson otherwise; an even sample count closes the last interval with a
/// trapezoid.
pub fn integrate(dx: f64, f: &[f64]) -> f64 {
    let n = f.len();
    if n < 2 {
        return 0.0;
    }
    if n % 2 == 1 {
        let intervals = n - 1;
        if intervals >= 2 && intervals.is_power_of_two() {
            romberg(intervals.trailing_zeros() as usize, dx, f)
        } else {
            simpson(dx, f)
        }
    } else {
        simpson(dx, &f[..n - 1]) + 0.5 * dx * (f[n - 2] + f[n - 1])
    }
}

// Simpson rule; f.len() must be odd.
fn simpson(dx: f64, f: &[f64]) -> f64 {
    let m = f.len() - 1; // interval count, even
    if m == 0 {
        return 0.0;
    }
    let mut out = f[0] + 4.0 * f[m - 1] + f[m];
    let mut i = 1;
    while i < m - 2 {
        out += 4.0 * f[i] + 2.0 * f[i + 1];
        i += 2;
    }
    out * dx / 3.0
}

// Romberg with 2^k intervals, f.len() == 2^k + 1.
fn romberg(k: usize, dx: f64, f: &[f64]) -> f64 {
    let n = 1usize << k;
    let mut rp = vec![0.0; k + 1];
    let mut rc = vec![0.0; k + 1];
    let mut h = (n as f64) * dx;
    rp[0] = 0.5 * h * (f[0] + f[n]);
    for row in 1..=k {
        h *= 0.5;
        let mut temp = 0.0;
        for j in 1..=(1usize << (row - 1)) {
            temp += f[(2 * j - 1) * (n >> row)];
        }
        rc[0] = h * temp + 0.5 * rp[0];
        for j in 1..=row {
            let fac = (1u64 << (2 * j)) as f64;
            rc[j] = (fac * rc[j - 1] - rp[j - 1]) / (fac - 1.0);
        }
        std::mem::swap(&mut rp, &mut rc);
    }
    rp[k]
}

/// Validates caller-supplied bin edges: at least one bin, finite values,
/// strictly increasing.
pub fn check_bin_edges(edges: &[f64]) -> Result<(), CovarianceError> {
    if edges.len() < 2 {
        return Err(CovarianceError::InvalidBinEdges(format!(
            "need at least 2 edges, got {}",
            edges.len()
        )));
    }
    if edges.iter().any(|e| !e.is_finite()) {
        return Err(CovarianceError::InvalidBinEdges(
            "edges must be finite".to_string(),
        ));
    }
    if edges.windows(2).any(|w| w[1] <= w[0]) {
        return Err(CovarianceError::InvalidBinEdges(
            "edges must be strictly increasing".to_string(),
        ));
    }
    Ok(())
}

/// Rebinning operator: row `b` holds the weights `u` such that
/// `u . vals` is the exact integral of the piecewise-linear interpolant of
/// `vals` on `grid` over `[edges[b], edges[b+1]]` (zero outside the grid).
///
/// Rebinning a vector is `U . v`; rebinning a matrix is `U . M . U^T`.
pub fn bin_operator(grid: &[f64], edges: &[f64]) -> Result<Array2<f64>, CovarianceError> {
    check_bin_edges(edges)?;
    if grid.len() < 2 {
        return Err(CovarianceError::InvalidBinEdges(
            "fine grid needs at least 2 points".to_string(),
        ));
    }
    let n_bins = edges.len() - 1;
    let mut u = Array2::<f64>::zeros((n_bins, grid.len()));
    for b in 0..n_bins {
        let (lo, hi) = (edges[b], edges[b + 1]);
        for j in 0..grid.len() - 1 {
            let (g0, g1) = (grid[j], grid[j + 1]);
            let a = g0.max(lo);
            let c = g1.min(hi);
            if c <= a || g1 <= g0 {
                continue;
            }
            // trapezoid over [a, c] of the linear segment on [g0, g1]
            let ta = (a - g0) / (g1 - g0);
            let tc = (c - g0) / (g1 - g0);
            let half_len = 0.5 * (c - a);
            u[[b, j]] += half_len * ((1.0 - ta) + (1.0 - tc));
            u[[b, j + 1]] += half_len * (ta + tc);
        }
    }
    Ok(u)
}

/// Integrates `vals` (sampled on `grid`) over each bin.
pub fn bin_1d(
    grid: &[f64],
    vals: ArrayView1<f64>,
    edges: &[f64],
) -> Result<Array1<f64>, CovarianceError> {
    Ok(bin_operator(grid, edges)?.dot(&vals))
}

/// Integrates a matrix sampled on `grid x grid` over each bin rectangle.
pub fn bin_2d(
    grid: &[f64],
    matrix: ArrayView2<f64>,
    edges: &[f64],
) -> Result<Array2<f64>, CovarianceError> {
    let u = bin_operator(grid, edges)?;
    Ok(u.dot(&matrix).dot(&u.t()))
}
