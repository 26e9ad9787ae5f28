//! # halocov
//!
//! Covariance matrices for pixelized sky-map observables (thermal-SZ
//! Compton-y, weak-lensing convergence) produced by a halo population
//! with known angular signal profiles.
//!
//! The covariance of such a map arises from pairwise correlations between
//! pixels at every realizable angular separation. This crate owns the
//! part of that computation that is neither profile physics nor
//! cosmology:
//!
//! - [`PhiGrid`]: a non-uniform sampling grid over pixel-pair separation
//!   that enumerates small lattice separations exactly, stabilizes them
//!   with controlled jitter, and blends into a quadrature tail;
//! - [`WorkspacePool`]: reusable per-worker kernel buffers with
//!   degrade-gracefully allocation;
//! - [`accumulate`](accumulate::accumulate): the parallel reduction of
//!   weighted kernel evaluations into a covariance matrix with bias
//!   subtraction;
//! - [`CovarianceEngine`]: lazy, cached orchestration plus binning, shot
//!   noise, noise convolution and unit rescaling.
//!
//! Profile physics enters through the [`TwoPointKernel`] collaborator,
//! instrumental noise through [`NoiseConvolver`], and the one-point PDF
//! as [`OnePoint`] data.

#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(unused_variables)]

pub mod accumulate;
pub mod config;
pub mod engine;
pub mod error;
pub mod grid;
pub mod numerics;
pub mod onepoint;
pub mod postprocess;
pub mod progress;
pub mod workspace;

pub use accumulate::{RawCovariance, TwoPointKernel};
pub use config::{CovarianceConfig, SignalType, ARCMIN};
pub use engine::{CovarianceDiagnostics, CovarianceEngine};
pub use error::{CollaboratorError, CovarianceError};
pub use grid::PhiGrid;
pub use onepoint::OnePoint;
pub use postprocess::NoiseConvolver;
pub use progress::{LogProgress, NoopProgress, ProgressObserver};
pub use workspace::{KernelWorkspace, WorkspacePool};
