//! Engine configuration.
//!
//! Replaces the C library's variadic, enum-keyed option list with a plain
//! struct carrying explicit defaults. All angles are in radians; the
//! defaults quoted in arcmin below are converted through [`ARCMIN`].

use crate::error::CovarianceError;

/// One arcminute in radians.
pub const ARCMIN: f64 = std::f64::consts::PI / 10_800.0;

/// Which cosmological field the PDF machinery describes.
///
/// The covariance engine itself is field-agnostic except for one detail:
/// weak-lensing convergence is handled internally on a shifted signal
/// grid, so caller bin edges are offset by the one-point centroid before
/// binning (see [`CovarianceEngine::get_cov`](crate::CovarianceEngine::get_cov)).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalType {
    /// Weak-lensing convergence.
    Kappa,
    /// Thermal Sunyaev-Zel'dovich Compton-y.
    Tsz,
}

/// Configuration of the covariance computation.
///
/// Construct with [`CovarianceConfig::new`] and override individual
/// fields as needed. Changing the configuration on a live engine must go
/// through [`CovarianceEngine::set_config`](crate::CovarianceEngine::set_config),
/// which invalidates every cached product.
#[derive(Clone, Debug)]
pub struct CovarianceConfig {
    pub signal_type: SignalType,
    /// Pixel side length in radians. Required; there is no sensible default.
    pub pixel_side: f64,
    /// Requested number of pixel-separation samples. The grid construction
    /// replaces this with the realized count. Default: 1000.
    pub n_phi: usize,
    /// Maximum pixel separation in radians, roughly the largest halo
    /// radius on the sky. Default: 150 arcmin.
    pub phi_max: f64,
    /// Separation (in pixel side lengths) up to which pixel pairs are
    /// enumerated exactly on the lattice. Default: 20.
    pub pixel_exact_max: usize,
    /// Width, in local grid spacings, of the jitter broadening applied to
    /// exact-lattice samples. Default: 0.02.
    pub phi_jitter: f64,
    /// Power-law exponent of the sampling density: small separations are
    /// sampled with density proportional to phi^(1/phi_pwr - 1).
    /// Default: 2.
    pub phi_pwr: f64,
    /// Worker count for the accumulation loop. Defaults to the number of
    /// logical CPUs; the effective count may be lower if workspace
    /// allocation degrades.
    pub n_threads: usize,
    /// Instrumental noise level. A positive value enables the noisy
    /// covariance product (requires a noise convolver). Default: 0.
    pub noise: f64,
    /// Seed for the load-balancing shuffle of the phi grid. `None` seeds
    /// from the entropy source.
    pub seed: Option<u64>,
}

impl CovarianceConfig {
    pub fn new(signal_type: SignalType, pixel_side: f64) -> Self {
        Self {
            signal_type,
            pixel_side,
            n_phi: 1000,
            phi_max: 150.0 * ARCMIN,
            pixel_exact_max: 20,
            phi_jitter: 0.02,
            phi_pwr: 2.0,
            n_threads: num_cpus::get(),
            noise: 0.0,
            seed: None,
        }
    }

    /// Fatal sanity checks, run before any product is built.
    pub(crate) fn validate(&self) -> Result<(), CovarianceError> {
        if !(self.pixel_side > 0.0) {
            return Err(CovarianceError::InvalidPixelSide(self.pixel_side));
        }
        if self.pixel_exact_max == 0 {
            return Err(CovarianceError::InvalidPixelExactMax);
        }
        if self.n_phi == 0 {
            return Err(CovarianceError::InvalidNphi);
        }
        let lattice_edge = self.pixel_exact_max as f64 * self.pixel_side;
        if self.phi_max <= lattice_edge {
            return Err(CovarianceError::InvalidPhiRange {
                phi_max: self.phi_max,
                lattice_edge,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = CovarianceConfig::new(SignalType::Tsz, ARCMIN);
        assert_eq!(cfg.n_phi, 1000);
        assert_eq!(cfg.pixel_exact_max, 20);
        assert_eq!(cfg.phi_jitter, 0.02);
        assert_eq!(cfg.phi_pwr, 2.0);
        assert_eq!(cfg.noise, 0.0);
        assert!((cfg.phi_max - 150.0 * ARCMIN).abs() < 1e-15);
        assert!(cfg.n_threads >= 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_nonpositive_pixel_side() {
        let cfg = CovarianceConfig::new(SignalType::Tsz, -1.0);
        assert!(matches!(
            cfg.validate(),
            Err(CovarianceError::InvalidPixelSide(_))
        ));
        let cfg = CovarianceConfig::new(SignalType::Tsz, f64::NAN);
        assert!(matches!(
            cfg.validate(),
            Err(CovarianceError::InvalidPixelSide(_))
        ));
    }

    #[test]
    fn rejects_zero_lattice_radius_and_empty_range() {
        let mut cfg = CovarianceConfig::new(SignalType::Kappa, ARCMIN);
        cfg.pixel_exact_max = 0;
        assert!(matches!(
            cfg.validate(),
            Err(CovarianceError::InvalidPixelExactMax)
        ));

        let mut cfg = CovarianceConfig::new(SignalType::Kappa, ARCMIN);
        cfg.phi_max = 10.0 * ARCMIN; // below the 20-pixel lattice edge
        assert!(matches!(
            cfg.validate(),
            Err(CovarianceError::InvalidPhiRange { .. })
        ));
    }
}
