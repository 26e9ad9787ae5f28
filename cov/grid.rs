//! Pixel-separation sampling grid.
//!
//! The covariance integral over pixel-pair separations phi is evaluated on
//! a non-uniform grid built in three stages:
//!
//! 1. exact lattice centers: every separation realizable as an integer
//!    pixel-grid distance up to `pixel_exact_max` pixels, enumerated
//!    combinatorially with its multiplicity;
//! 2. jitter: each center is broadened into a symmetric family of
//!    sub-samples to tame the kernel's sensitivity to densely stacked
//!    discrete separations;
//! 3. continuum tail: beyond the lattice region, Gauss-Legendre nodes
//!    under the power-law substitution `phi = x^phi_pwr` approximate the
//!    continuum pair density `2 pi phi / pixel_side^2`.
//!
//! The realized sample count replaces the requested one, and the samples
//! are handed out in shuffled order: exact-region samples are much cheaper
//! to evaluate than tail samples, so a naive ordering would unbalance the
//! parallel accumulation.

use crate::config::CovarianceConfig;
use crate::error::CovarianceError;
use crate::numerics::gauss_legendre;
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Growable `(phi, weight)` buffer pair with a hard cap on growth.
///
/// Starts at twice the requested sample count; doubles on overflow at most
/// twice. Needing a third doubling means the configuration is malformed
/// (a huge exact region against a tiny `n_phi` request) and is fatal.
struct GrowBuf {
    phi: Vec<f64>,
    weight: Vec<f64>,
    cap: usize,
    doublings: u32,
}

// Counted over the whole build, not per stage: a buffer that keeps
// outgrowing the request across stages is the same malformed
// configuration either way, and the tighter budget caps peak memory.
const MAX_DOUBLINGS: u32 = 2;

impl GrowBuf {
    fn new(cap: usize) -> Self {
        Self {
            phi: Vec::with_capacity(cap),
            weight: Vec::with_capacity(cap),
            cap,
            doublings: 0,
        }
    }

    fn push(&mut self, phi: f64, weight: f64) -> Result<(), CovarianceError> {
        if self.phi.len() == self.cap {
            if self.doublings == MAX_DOUBLINGS {
                return Err(CovarianceError::PhiGridOverflow { capacity: self.cap });
            }
            self.cap *= 2;
            self.doublings += 1;
        }
        self.phi.push(phi);
        self.weight.push(weight);
        Ok(())
    }

    fn len(&self) -> usize {
        self.phi.len()
    }
}

/// The realized sampling grid over pixel-pair separations.
#[derive(Clone, Debug)]
pub struct PhiGrid {
    phi: Vec<f64>,
    weight: Vec<f64>,
    n_exact: usize,
    n_approx: usize,
}

impl PhiGrid {
    /// Builds the grid for the given configuration. The configuration must
    /// already have passed validation.
    pub fn build(cfg: &CovarianceConfig) -> Result<Self, CovarianceError> {
        cfg.validate()?;
        log::debug!("create_phigrid");

        let mut buf = GrowBuf::new(2 * cfg.n_phi);
        let n_centers = exact_centers(cfg, &mut buf)?;
        let n_exact = jitter(cfg, &mut buf, n_centers)?;

        if n_exact > cfg.n_phi {
            log::warn!(
                "n_phi = {} is quite small for pixel_exact_max = {} \
                 (suggested increase at least to {})",
                cfg.n_phi,
                cfg.pixel_exact_max,
                2 * n_exact
            );
        }

        let n_approx = continuum_tail(cfg, &mut buf, n_exact)?;
        log::debug!("phigrid: n_phi = {}, n_exact = {}", buf.len(), n_exact);

        let (phi, weight) = shuffled(cfg, buf);
        Ok(Self {
            phi,
            weight,
            n_exact,
            n_approx,
        })
    }

    /// Realized sample count (replaces the requested `n_phi`).
    pub fn len(&self) -> usize {
        self.phi.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phi.is_empty()
    }

    pub fn phi(&self) -> &[f64] {
        &self.phi
    }

    pub fn weights(&self) -> &[f64] {
        &self.weight
    }

    /// Samples in the exact lattice region, jitter included.
    pub fn n_exact(&self) -> usize {
        self.n_exact
    }

    /// Samples contributed by the continuum tail.
    pub fn n_approx(&self) -> usize {
        self.n_approx
    }

    /// Sum of all sample weights. The bias subtraction uses
    /// `1 + weight_sum` (the 1 is the zero-separation self pair).
    pub fn weight_sum(&self) -> f64 {
        self.weight.iter().sum()
    }
}

/// Stage 1: one sample per distinct sum of two squares `v <= pixel_exact_max^2`,
/// in increasing order of `v`, at separation `sqrt(v) * pixel_side` with
/// weight `4 * multiplicity(v)`.
///
/// Enumerates the quadrant `i >= 0, j >= 1`; the factor 4 maps it onto the
/// whole lattice minus the origin, each pair counted once.
fn exact_centers(cfg: &CovarianceConfig, buf: &mut GrowBuf) -> Result<usize, CovarianceError> {
    let pmax = cfg.pixel_exact_max;
    let limit = pmax * pmax;
    let mut rsq = Vec::with_capacity(limit);
    for i in 0..=pmax {
        let mut j = 1;
        while i * i + j * j <= limit {
            rsq.push(i * i + j * j);
            j += 1;
        }
    }
    rsq.sort_unstable();

    for (count, v) in rsq.into_iter().dedup_with_count() {
        buf.push((v as f64).sqrt() * cfg.pixel_side, 4.0 * count as f64)?;
    }
    Ok(buf.len())
}

/// Stage 2: broadens each lattice center into `k` extra sub-samples placed
/// symmetrically within a `phi_jitter` fraction of the local spacing, with
/// the parent weight split evenly over the family of `k + 1`.
///
/// The sub-sample count follows the target density
/// `rho(phi) = rho0 * phi^(1/phi_pwr - 1)`, with `rho0` fixed so the
/// density integrates to the requested `n_phi` over the full range.
/// Returns the final exact-region sample count.
fn jitter(
    cfg: &CovarianceConfig,
    buf: &mut GrowBuf,
    n_centers: usize,
) -> Result<usize, CovarianceError> {
    if n_centers < 2 {
        // local spacing is undefined for a single center
        return Ok(n_centers);
    }
    let inv_pwr = 1.0 / cfg.phi_pwr;
    let density_norm =
        cfg.phi_pwr * (cfg.phi_max.powf(inv_pwr) - cfg.pixel_side.powf(inv_pwr));
    let rho0 = cfg.n_phi as f64 / density_norm;

    for i in 0..n_centers {
        let dphi = if i == 0 {
            buf.phi[1] - buf.phi[0]
        } else if i == n_centers - 1 {
            buf.phi[n_centers - 1] - buf.phi[n_centers - 2]
        } else {
            0.5 * (buf.phi[i + 1] - buf.phi[i - 1])
        };
        let rho_here = buf.phi[i].powf(inv_pwr - 1.0);
        let mut k = (dphi * rho0 * rho_here).ceil() as i64 - 1;
        if k % 2 != 0 {
            // an even family also averages out the ceil
            k -= 1;
        }
        let k = k.max(0) as usize;

        buf.weight[i] /= (k + 1) as f64;
        let parent_phi = buf.phi[i];
        let child_weight = buf.weight[i];
        let half = k / 2;
        for j in 1..=half {
            let offset = dphi * cfg.phi_jitter * j as f64 / half as f64;
            buf.push(parent_phi + offset, child_weight)?;
            buf.push(parent_phi - offset, child_weight)?;
        }
    }
    Ok(buf.len())
}

/// Stage 3: Gauss-Legendre nodes on the transformed interval
/// `[lattice_edge^(1/phi_pwr), phi_max^(1/phi_pwr)]`, mapped back through
/// `phi = x^phi_pwr` with the substitution Jacobian and the continuum
/// pair density `2 pi phi / pixel_side^2` folded into the weights.
/// Returns the number of tail samples.
fn continuum_tail(
    cfg: &CovarianceConfig,
    buf: &mut GrowBuf,
    n_exact: usize,
) -> Result<usize, CovarianceError> {
    let order = cfg.n_phi as i64 - n_exact as i64;
    if order < 1 {
        log::warn!(
            "phi grid has no room for a continuum tail \
             (n_phi = {}, exact region already has {} samples); \
             separations beyond the lattice region will be ignored",
            cfg.n_phi,
            n_exact
        );
        return Ok(0);
    }

    let inv_pwr = 1.0 / cfg.phi_pwr;
    let lo = (cfg.pixel_exact_max as f64 * cfg.pixel_side).powf(inv_pwr);
    let hi = cfg.phi_max.powf(inv_pwr);
    let (nodes, weights) = gauss_legendre(order as usize, lo, hi);

    let mut n_approx = 0;
    for (&x, &w) in nodes.iter().zip(&weights) {
        if x < lo {
            continue;
        }
        if x > hi {
            // nodes are sorted
            break;
        }
        let phi = x.powf(cfg.phi_pwr);
        let jacobian = cfg.phi_pwr * x.powf(cfg.phi_pwr - 1.0);
        let pair_density = 2.0 * std::f64::consts::PI * phi / (cfg.pixel_side * cfg.pixel_side);
        buf.push(phi, w * pair_density * jacobian)?;
        n_approx += 1;
    }
    Ok(n_approx)
}

/// Copies the staged samples out in a uniformly shuffled order, pairs kept
/// intact. Purely a load-balancing measure for the parallel accumulator.
fn shuffled(cfg: &CovarianceConfig, buf: GrowBuf) -> (Vec<f64>, Vec<f64>) {
    let mut indices: Vec<usize> = (0..buf.len()).collect();
    let mut rng = match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    indices.shuffle(&mut rng);
    let phi = indices.iter().map(|&i| buf.phi[i]).collect();
    let weight = indices.iter().map(|&i| buf.weight[i]).collect();
    (phi, weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SignalType, ARCMIN};
    use approx::assert_relative_eq;

    fn config() -> CovarianceConfig {
        let mut cfg = CovarianceConfig::new(SignalType::Tsz, ARCMIN);
        cfg.seed = Some(42);
        cfg
    }

    #[test]
    fn exact_centers_enumerate_sums_of_two_squares() {
        let mut cfg = config();
        cfg.pixel_exact_max = 5;
        let mut buf = GrowBuf::new(2 * cfg.n_phi);
        let n = exact_centers(&cfg, &mut buf).unwrap();

        let values = [1, 2, 4, 5, 8, 9, 10, 13, 16, 17, 18, 20, 25];
        let multiplicities = [1, 1, 1, 2, 1, 1, 2, 2, 1, 2, 1, 2, 3];
        assert_eq!(n, values.len());
        for (i, (&v, &m)) in values.iter().zip(&multiplicities).enumerate() {
            assert_relative_eq!(
                buf.phi[i],
                (v as f64).sqrt() * cfg.pixel_side,
                epsilon = 1e-14
            );
            assert_relative_eq!(buf.weight[i], 4.0 * m as f64, epsilon = 1e-14);
        }
    }

    #[test]
    fn jitter_conserves_family_weight() {
        let cfg = config();
        let mut buf = GrowBuf::new(2 * cfg.n_phi);
        let n_centers = exact_centers(&cfg, &mut buf).unwrap();
        let exact_weight: f64 = buf.weight.iter().sum();

        let n_exact = jitter(&cfg, &mut buf, n_centers).unwrap();
        assert!(n_exact >= n_centers);
        assert_eq!(n_exact, buf.len());
        // splitting a parent weight over k+1 family members conserves the sum
        let total: f64 = buf.weight.iter().sum();
        assert_relative_eq!(total, exact_weight, epsilon = 1e-9 * exact_weight);
        // jitter families come in symmetric pairs, so the count parity is kept
        assert_eq!((n_exact - n_centers) % 2, 0);
    }

    #[test]
    fn growth_cap_is_fatal() {
        let mut cfg = config();
        cfg.n_phi = 4; // initial capacity 8, cap 32; pixel_exact_max=20 has 127 centers
        let mut buf = GrowBuf::new(2 * cfg.n_phi);
        let err = exact_centers(&cfg, &mut buf).unwrap_err();
        assert!(matches!(err, CovarianceError::PhiGridOverflow { .. }));
    }

    #[test]
    fn realized_count_replaces_the_request() {
        let cfg = config();
        let grid = PhiGrid::build(&cfg).unwrap();
        assert_eq!(grid.len(), grid.n_exact() + grid.n_approx());
        assert_eq!(grid.phi().len(), grid.weights().len());
        assert!(grid.n_approx() > 0);
        assert!(grid.phi().iter().all(|&p| p > 0.0 && p <= cfg.phi_max));
        assert!(grid.weights().iter().all(|&w| w >= 0.0));
    }

    #[test]
    fn grid_is_a_permutation_of_the_staged_samples() {
        let cfg = config();
        let mut buf = GrowBuf::new(2 * cfg.n_phi);
        let n_centers = exact_centers(&cfg, &mut buf).unwrap();
        let n_exact = jitter(&cfg, &mut buf, n_centers).unwrap();
        continuum_tail(&cfg, &mut buf, n_exact).unwrap();
        let mut staged: Vec<(f64, f64)> =
            buf.phi.iter().cloned().zip(buf.weight.iter().cloned()).collect();

        let grid = PhiGrid::build(&cfg).unwrap();
        let mut got: Vec<(f64, f64)> = grid
            .phi()
            .iter()
            .cloned()
            .zip(grid.weights().iter().cloned())
            .collect();

        staged.sort_by(|a, b| a.partial_cmp(b).unwrap());
        got.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(staged, got);
    }

    #[test]
    fn weight_sum_matches_the_continuum_normalization() {
        // with a constant kernel, sum(w) must approximate
        // \int_0^phi_max 2 pi phi / pixel_side^2 dphi = pi phi_max^2 / ps^2;
        // the exact region replaces the disc area by a lattice count, so
        // allow a few percent
        let cfg = config();
        let grid = PhiGrid::build(&cfg).unwrap();
        let analytic =
            std::f64::consts::PI * cfg.phi_max * cfg.phi_max / (cfg.pixel_side * cfg.pixel_side);
        assert_relative_eq!(grid.weight_sum(), analytic, max_relative = 0.03);
    }

    #[test]
    fn seeded_builds_are_reproducible() {
        let cfg = config();
        let a = PhiGrid::build(&cfg).unwrap();
        let b = PhiGrid::build(&cfg).unwrap();
        assert_eq!(a.phi(), b.phi());
        assert_eq!(a.weights(), b.weights());
    }
}
