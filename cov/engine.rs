//! Top-level covariance context.
//!
//! Owns the configuration, the collaborator handles and every cached
//! product of the pipeline. Products are built lazily on the first
//! request, in dependency order (phi grid, workspace pool, raw matrix,
//! noisy matrix), and each is reused until [`CovarianceEngine::reset`]
//! or a configuration change invalidates all of them.

use crate::accumulate::{accumulate, RawCovariance, TwoPointKernel};
use crate::config::{CovarianceConfig, SignalType};
use crate::error::CovarianceError;
use crate::grid::PhiGrid;
use crate::numerics::{bin_1d, bin_2d, check_bin_edges};
use crate::onepoint::OnePoint;
use crate::postprocess::{add_shot_noise, rescale_to_full_sky, NoiseConvolver};
use crate::progress::{LogProgress, ProgressObserver};
use crate::workspace::WorkspacePool;
use ndarray::{Array1, Array2, ArrayView2};

static DEFAULT_PROGRESS: LogProgress = LogProgress;

/// Noise-convolved products, all on the convolver's (possibly widened)
/// signal grid.
struct NoisyProduct {
    signal: Array1<f64>,
    pdf: Array1<f64>,
    cov: Array2<f64>,
}

/// Read-only export of the phi grid and the per-sample diagnostics.
#[derive(Clone, Copy, Debug)]
pub struct CovarianceDiagnostics<'a> {
    /// Realized sample count (equals the length of the three slices).
    pub n_phi: usize,
    pub phi: &'a [f64],
    pub weights: &'a [f64],
    /// Kernel second central moment at each sample.
    pub corr_diagn: &'a [f64],
}

/// The covariance computation context.
pub struct CovarianceEngine<'a> {
    config: CovarianceConfig,
    kernel: &'a dyn TwoPointKernel,
    onepoint: OnePoint,
    noise_convolver: Option<&'a dyn NoiseConvolver>,
    observer: &'a dyn ProgressObserver,
    grid: Option<PhiGrid>,
    pool: Option<WorkspacePool>,
    raw: Option<RawCovariance>,
    noisy: Option<NoisyProduct>,
}

impl<'a> CovarianceEngine<'a> {
    pub fn new(
        config: CovarianceConfig,
        kernel: &'a dyn TwoPointKernel,
        onepoint: OnePoint,
    ) -> Self {
        Self {
            config,
            kernel,
            onepoint,
            noise_convolver: None,
            observer: &DEFAULT_PROGRESS,
            grid: None,
            pool: None,
            raw: None,
            noisy: None,
        }
    }

    /// Attaches the instrumental-noise collaborator; required when the
    /// configured noise level is positive and a noisy covariance is
    /// requested.
    pub fn with_noise_convolver(mut self, convolver: &'a dyn NoiseConvolver) -> Self {
        self.noise_convolver = Some(convolver);
        self
    }

    pub fn with_progress(mut self, observer: &'a dyn ProgressObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &CovarianceConfig {
        &self.config
    }

    pub fn onepoint(&self) -> &OnePoint {
        &self.onepoint
    }

    /// Replaces the configuration and invalidates every cached product.
    pub fn set_config(&mut self, config: CovarianceConfig) {
        self.config = config;
        self.reset();
    }

    /// Drops every cached product; the next request recomputes from
    /// scratch.
    pub fn reset(&mut self) {
        log::debug!("reset_covariance");
        self.grid = None;
        self.pool = None;
        self.raw = None;
        self.noisy = None;
    }

    /// Builds missing products, in order. Idempotent.
    fn prepare(&mut self) -> Result<(), CovarianceError> {
        self.config.validate()?;
        log::debug!("prepare_cov");

        if self.grid.is_none() {
            self.grid = Some(PhiGrid::build(&self.config)?);
        }
        if self.pool.is_none() {
            let workers = self.config.n_threads.max(1);
            self.pool = Some(WorkspacePool::acquire(workers, self.onepoint.len())?);
        }
        if self.raw.is_none() {
            let grid = self.grid.as_ref().expect("phi grid just built");
            let pool = self.pool.as_ref().expect("workspace pool just built");
            let raw = accumulate(grid, pool, self.kernel, &self.onepoint, self.observer)?;
            self.raw = Some(raw);
        }
        if self.config.noise > 0.0 && self.noisy.is_none() {
            if let Some(convolver) = self.noise_convolver {
                log::debug!("create_noisy_cov");
                let raw = self.raw.as_ref().expect("raw covariance just built");
                let (signal, cov) = convolver
                    .convolve(self.onepoint.signal(), raw.cov.view())
                    .map_err(CovarianceError::NoiseConvolution)?;
                // the noisy diagonal carries the noisy one-point shot noise
                let (op_signal, pdf) = convolver
                    .convolve_onepoint(self.onepoint.signal(), self.onepoint.pdf().view())
                    .map_err(CovarianceError::NoiseConvolution)?;
                if op_signal != signal {
                    return Err(CovarianceError::NoiseConvolution(
                        "noisy one-point PDF and noisy covariance landed on different signal grids"
                            .into(),
                    ));
                }
                self.noisy = Some(NoisyProduct { signal, pdf, cov });
            }
        }
        Ok(())
    }

    /// Computes (or reuses) the covariance matrix and returns it binned
    /// onto the caller's edges, shot noise added and rescaled to absolute
    /// units. `noisy` selects the noise-convolved variant.
    pub fn get_cov(
        &mut self,
        bin_edges: &[f64],
        noisy: bool,
    ) -> Result<Array2<f64>, CovarianceError> {
        check_bin_edges(bin_edges)?;
        if noisy && (self.config.noise <= 0.0 || self.noise_convolver.is_none()) {
            return Err(CovarianceError::MissingNoiseModel);
        }
        self.prepare()?;

        // the kappa PDF lives on an internally shifted signal grid; move
        // the caller's edges onto it
        let edges: Vec<f64> = match self.config.signal_type {
            SignalType::Kappa => bin_edges.iter().map(|e| e + self.onepoint.mean()).collect(),
            SignalType::Tsz => bin_edges.to_vec(),
        };

        let raw = self.raw.as_ref().expect("raw covariance prepared");
        let (signal, pdf, matrix): (&Array1<f64>, &Array1<f64>, ArrayView2<f64>) = if noisy {
            let product = self.noisy.as_ref().expect("noisy covariance prepared");
            (&product.signal, &product.pdf, product.cov.view())
        } else {
            (self.onepoint.signal(), self.onepoint.pdf(), raw.cov.view())
        };

        log::debug!("binning the covariance matrix");
        let fine_grid = signal.as_slice().expect("signal grid is contiguous");
        let mut binned = bin_2d(fine_grid, matrix, &edges)?;

        let shot = bin_1d(fine_grid, pdf.view(), &edges)?;
        add_shot_noise(&mut binned, &shot);
        rescale_to_full_sky(&mut binned, self.config.pixel_side);
        Ok(binned)
    }

    /// Exposes the phi grid, its weights and the per-sample correlation
    /// diagnostics, running the pipeline first if needed.
    pub fn diagnostics(&mut self) -> Result<CovarianceDiagnostics<'_>, CovarianceError> {
        self.prepare()?;
        let grid = self.grid.as_ref().expect("phi grid prepared");
        let raw = self.raw.as_ref().expect("raw covariance prepared");
        Ok(CovarianceDiagnostics {
            n_phi: grid.len(),
            phi: grid.phi(),
            weights: grid.weights(),
            corr_diagn: &raw.corr_diagn,
        })
    }
}
