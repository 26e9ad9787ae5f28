//! Reusable kernel-evaluation workspaces.
//!
//! Filling the two-point kernel at one separation needs an `n x n`
//! real-space buffer plus transform scratch; allocating these per sample
//! would dominate the run, so a pool of workspaces is allocated once, one
//! per worker slot, and reused for every sample the worker processes.
//!
//! Allocation degrades gracefully: if memory runs out after `k` of the
//! requested slots, the accumulation simply runs on `k` workers. Only a
//! pool with zero slots is a fatal error.

use crate::error::CovarianceError;
use ndarray::Array2;
use std::sync::Mutex;

/// Scratch state owned by one worker slot for the duration of a run.
///
/// `pdf_real` holds the joint two-point PDF evaluated on the internal
/// `n x n` signal grid; `scratch` is a spare plane in the padded
/// real-to-complex layout (`n * (n + 2)` values) for kernel
/// implementations that work through Fourier space. Both are created once
/// and mutated in place on every fill.
#[derive(Debug)]
pub struct KernelWorkspace {
    n_signal: usize,
    pdf_real: Array2<f64>,
    scratch: Vec<f64>,
}

impl KernelWorkspace {
    /// Fallible allocation; `None` means out of memory.
    pub fn try_new(n_signal: usize) -> Option<Self> {
        let pdf = try_alloc_zeroed(n_signal * n_signal)?;
        let scratch = try_alloc_zeroed(n_signal * (n_signal + 2))?;
        let pdf_real = Array2::from_shape_vec((n_signal, n_signal), pdf).ok()?;
        Some(Self {
            n_signal,
            pdf_real,
            scratch,
        })
    }

    pub fn n_signal(&self) -> usize {
        self.n_signal
    }

    pub fn pdf_real(&self) -> &Array2<f64> {
        &self.pdf_real
    }

    pub fn pdf_real_mut(&mut self) -> &mut Array2<f64> {
        &mut self.pdf_real
    }

    /// Transform scratch in the padded r2c layout, `n * (n + 2)` values.
    pub fn scratch_mut(&mut self) -> &mut [f64] {
        &mut self.scratch
    }
}

fn try_alloc_zeroed(len: usize) -> Option<Vec<f64>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).ok()?;
    v.resize(len, 0.0);
    Some(v)
}

/// A bounded set of [`KernelWorkspace`]s, one per worker slot.
///
/// Slot `k` is used exclusively by pool worker `k` for the whole
/// accumulation; the mutex per slot is never contended, it only threads
/// the mutable borrow through the parallel region. Buffers are freed on
/// drop, absent slots included.
#[derive(Debug)]
pub struct WorkspacePool {
    slots: Vec<Mutex<KernelWorkspace>>,
}

impl WorkspacePool {
    /// Allocates up to `n_workers` workspaces sized for `n_signal` grid
    /// points. Stops at the first allocation failure; zero successes is
    /// fatal, fewer than requested is logged and accepted.
    pub fn acquire(n_workers: usize, n_signal: usize) -> Result<Self, CovarianceError> {
        Self::acquire_with(n_workers, |_slot| KernelWorkspace::try_new(n_signal))
    }

    /// Allocation with an injectable factory; the seam the degrade tests
    /// use, since `try_reserve` failures cannot be provoked portably.
    pub fn acquire_with(
        n_workers: usize,
        mut factory: impl FnMut(usize) -> Option<KernelWorkspace>,
    ) -> Result<Self, CovarianceError> {
        log::debug!("trying to allocate workspaces for {n_workers} workers");
        let mut slots = Vec::new();
        for slot in 0..n_workers {
            match factory(slot) {
                Some(ws) => slots.push(Mutex::new(ws)),
                // not a critical error: run with what we have
                None => break,
            }
        }
        if slots.len() < n_workers {
            log::warn!(
                "allocated only {} of {} workspaces because memory ran out; \
                 running with reduced parallelism",
                slots.len(),
                n_workers
            );
        }
        if slots.is_empty() {
            return Err(CovarianceError::NoWorkspaces);
        }
        Ok(Self { slots })
    }

    /// Number of successfully allocated slots (the effective worker count).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn slot(&self, index: usize) -> &Mutex<KernelWorkspace> {
        &self.slots[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_buffers_have_the_documented_shapes() {
        let ws = KernelWorkspace::try_new(8).unwrap();
        assert_eq!(ws.n_signal(), 8);
        assert_eq!(ws.pdf_real().dim(), (8, 8));
        let mut ws = ws;
        assert_eq!(ws.scratch_mut().len(), 8 * 10);
    }

    #[test]
    fn full_allocation_yields_one_slot_per_worker() {
        let pool = WorkspacePool::acquire(4, 16).unwrap();
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn partial_allocation_degrades_without_error() {
        let pool = WorkspacePool::acquire_with(8, |slot| {
            (slot < 3).then(|| KernelWorkspace::try_new(4).unwrap())
        })
        .unwrap();
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn zero_allocations_is_fatal() {
        let err = WorkspacePool::acquire_with(8, |_| None).unwrap_err();
        assert!(matches!(err, CovarianceError::NoWorkspaces));
    }
}
