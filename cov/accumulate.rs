//! Parallel accumulation of the covariance matrix.
//!
//! The raw covariance is
//!
//! ```text
//! Cov[i][j] = sum_phi w(phi) * K_phi[i][j] - (1 + sum_phi w(phi)) * PDFc[i] * PDFc[j]
//! ```
//!
//! where `K_phi` is the joint two-point PDF kernel filled by the external
//! profile engine and `PDFc` the one-point PDF. The sample loop runs on a
//! dedicated thread pool sized to the workspace pool; each worker owns one
//! workspace slot and a private partial matrix, and the partials are
//! summed after the parallel region. No element of the shared result is
//! written concurrently.
//!
//! A kernel failure sets a monotone flag; other workers treat it as a hint
//! to skip the rest of their samples, in-flight samples run to completion,
//! and the first error is surfaced once the region has drained.

use crate::error::{CollaboratorError, CovarianceError};
use crate::grid::PhiGrid;
use crate::onepoint::OnePoint;
use crate::progress::{ProgressMeter, ProgressObserver};
use crate::workspace::{KernelWorkspace, WorkspacePool};
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// External profile engine: fills a workspace with the real-space joint
/// two-point PDF kernel at one angular separation. Must be safe to call
/// concurrently on distinct workspaces.
pub trait TwoPointKernel: Sync {
    fn fill(&self, phi: f64, ws: &mut KernelWorkspace) -> Result<(), CollaboratorError>;
}

/// Output of the accumulation: bias-subtracted covariance on the internal
/// signal grid plus per-sample diagnostics.
#[derive(Clone, Debug)]
pub struct RawCovariance {
    pub cov: Array2<f64>,
    /// Second central moment of the kernel at each phi sample, in grid
    /// order (one value per sample, written once).
    pub corr_diagn: Vec<f64>,
    /// `1 + sum(weights)`; the 1 is the zero-separation self pair.
    pub weight_sum: f64,
}

/// Runs the parallel phi loop and the bias subtraction.
pub fn accumulate(
    grid: &PhiGrid,
    pool: &WorkspacePool,
    kernel: &dyn TwoPointKernel,
    onepoint: &OnePoint,
    observer: &dyn ProgressObserver,
) -> Result<RawCovariance, CovarianceError> {
    let n = onepoint.len();
    let n_phi = grid.len();
    log::debug!("create_cov: {n_phi} samples on {} workers", pool.len());

    let centered: Array1<f64> = onepoint.signal().mapv(|s| s - onepoint.mean());
    let mut corr_diagn = vec![0.0; n_phi];
    let failed = AtomicBool::new(false);
    let first_error: Mutex<Option<CovarianceError>> = Mutex::new(None);
    let meter = ProgressMeter::new(n_phi, observer);

    let thread_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(pool.len())
        .build()?;

    let mut cov = thread_pool.install(|| {
        grid.phi()
            .par_iter()
            .zip(grid.weights().par_iter())
            .zip(corr_diagn.par_iter_mut())
            .fold(
                || Array2::<f64>::zeros((n, n)),
                |mut partial, ((&phi, &weight), diagn)| {
                    if failed.load(Ordering::Relaxed) {
                        return partial;
                    }
                    // stable worker -> slot binding for the whole run
                    let slot = rayon::current_thread_index().unwrap_or(0);
                    let mut ws = pool.slot(slot).lock().unwrap();
                    if let Err(source) = kernel.fill(phi, &mut ws) {
                        failed.store(true, Ordering::Relaxed);
                        let mut first = first_error.lock().unwrap();
                        if first.is_none() {
                            *first = Some(CovarianceError::Kernel { phi, source });
                        }
                        return partial;
                    }
                    *diagn = second_central_moment(&ws, &centered);
                    partial.scaled_add(weight, ws.pdf_real());
                    meter.tick();
                    partial
                },
            )
            .reduce(|| Array2::<f64>::zeros((n, n)), |a, b| a + b)
    });
    meter.finish();

    if let Some(err) = first_error.into_inner().unwrap() {
        return Err(err);
    }

    let weight_sum = 1.0 + grid.weight_sum();
    let pdfc = onepoint.pdf();
    for ((i, j), c) in cov.indexed_iter_mut() {
        *c -= weight_sum * pdfc[i] * pdfc[j];
    }

    Ok(RawCovariance {
        cov,
        corr_diagn,
        weight_sum,
    })
}

// d^T K d with d the signal grid centered on the one-point mean; assumes
// the kernel is normalized as a joint PDF.
fn second_central_moment(ws: &KernelWorkspace, centered: &Array1<f64>) -> f64 {
    centered.dot(&ws.pdf_real().dot(centered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CovarianceConfig, SignalType, ARCMIN};
    use crate::progress::NoopProgress;
    use approx::assert_relative_eq;

    struct ConstKernel(f64);

    impl TwoPointKernel for ConstKernel {
        fn fill(&self, _phi: f64, ws: &mut KernelWorkspace) -> Result<(), CollaboratorError> {
            ws.pdf_real_mut().fill(self.0);
            Ok(())
        }
    }

    struct FailBeyond(f64);

    impl TwoPointKernel for FailBeyond {
        fn fill(&self, phi: f64, ws: &mut KernelWorkspace) -> Result<(), CollaboratorError> {
            if phi > self.0 {
                return Err("profile engine unhappy".into());
            }
            ws.pdf_real_mut().fill(0.0);
            Ok(())
        }
    }

    fn fixtures(n_signal: usize) -> (PhiGrid, WorkspacePool, OnePoint) {
        let mut cfg = CovarianceConfig::new(SignalType::Tsz, ARCMIN);
        cfg.n_phi = 50;
        cfg.pixel_exact_max = 3;
        cfg.seed = Some(7);
        let grid = PhiGrid::build(&cfg).unwrap();
        let pool = WorkspacePool::acquire(2, n_signal).unwrap();
        let signal = Array1::linspace(0.0, 1.0, n_signal);
        let pdf = signal.mapv(|s| 1.0 + s);
        let onepoint = OnePoint::new(signal, pdf).unwrap();
        (grid, pool, onepoint)
    }

    #[test]
    fn zero_kernel_isolates_the_bias_subtraction() {
        let (grid, pool, onepoint) = fixtures(4);
        let raw = accumulate(&grid, &pool, &ConstKernel(0.0), &onepoint, &NoopProgress).unwrap();

        assert_relative_eq!(raw.weight_sum, 1.0 + grid.weight_sum(), epsilon = 1e-12);
        let pdfc = onepoint.pdf();
        for ((i, j), c) in raw.cov.indexed_iter() {
            assert_relative_eq!(*c, -raw.weight_sum * pdfc[i] * pdfc[j], epsilon = 1e-12);
        }
        // a zero kernel has zero second moment
        assert!(raw.corr_diagn.iter().all(|&d| d == 0.0));
    }

    #[test]
    fn constant_kernel_gives_a_symmetric_matrix_and_correct_diagnostics() {
        let (grid, pool, onepoint) = fixtures(6);
        let raw = accumulate(&grid, &pool, &ConstKernel(0.5), &onepoint, &NoopProgress).unwrap();

        for ((i, j), c) in raw.cov.indexed_iter() {
            assert_relative_eq!(*c, raw.cov[[j, i]], epsilon = 1e-12);
        }
        // d^T (0.5 * ones) d = 0.5 * (sum d)^2, identical at every sample
        let d_sum: f64 = onepoint
            .signal()
            .iter()
            .map(|&s| s - onepoint.mean())
            .sum();
        let expect = 0.5 * d_sum * d_sum;
        assert_eq!(raw.corr_diagn.len(), grid.len());
        for &d in &raw.corr_diagn {
            assert_relative_eq!(d, expect, epsilon = 1e-9);
        }
    }

    #[test]
    fn kernel_failures_surface_as_a_single_aggregate_error() {
        let (grid, pool, onepoint) = fixtures(4);
        // fail for every sample in the continuum tail
        let cutoff = 3.5 * ARCMIN;
        let err = accumulate(&grid, &pool, &FailBeyond(cutoff), &onepoint, &NoopProgress)
            .unwrap_err();
        match err {
            CovarianceError::Kernel { phi, .. } => assert!(phi > cutoff),
            other => panic!("expected a kernel error, got {other}"),
        }
    }
}
