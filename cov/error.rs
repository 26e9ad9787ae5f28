//! Error types for the covariance engine.
//!
//! One enum covers the whole pipeline. Fatal configuration problems and
//! aggregate kernel failures unwind to the public entry points; advisory
//! conditions (under-sampled grid, reduced worker count) are logged and
//! never surface here.

use thiserror::Error;

/// Error type produced by a [`TwoPointKernel`](crate::TwoPointKernel) or
/// [`NoiseConvolver`](crate::NoiseConvolver) collaborator. Opaque to the
/// engine; carried as the source of [`CovarianceError::Kernel`].
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum CovarianceError {
    #[error(
        "pixel side length is {0} (or was never set); it must be strictly positive for covariance matrix computation"
    )]
    InvalidPixelSide(f64),
    #[error("pixel_exact_max is 0; it must be strictly positive")]
    InvalidPixelExactMax,
    #[error("n_phi is 0; at least one pixel-separation sample is required")]
    InvalidNphi,
    #[error(
        "phi_max = {phi_max} does not exceed the exact-lattice edge {lattice_edge}; the separation range is empty"
    )]
    InvalidPhiRange { phi_max: f64, lattice_edge: f64 },
    #[error(
        "failed to create the phi grid: buffer expanded too often (reached capacity {capacity}); n_phi is far too small for this pixel_exact_max"
    )]
    PhiGridOverflow { capacity: usize },
    #[error("failed to allocate any kernel workspaces")]
    NoWorkspaces,
    #[error("two-point kernel evaluation failed at phi = {phi}: {source}")]
    Kernel {
        phi: f64,
        #[source]
        source: CollaboratorError,
    },
    #[error("noise convolution failed: {0}")]
    NoiseConvolution(#[source] CollaboratorError),
    #[error(
        "noisy covariance requested, but the configured noise level is not positive or no noise convolver was provided"
    )]
    MissingNoiseModel,
    #[error("invalid bin edges: {0}")]
    InvalidBinEdges(String),
    #[error("one-point PDF input is invalid: {0}")]
    OnePoint(String),
    #[error("could not build the accumulation thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
