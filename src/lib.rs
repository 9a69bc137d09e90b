#![allow(warnings)]
//! This crate constructs maximally localized Wannier functions from
//! ab-initio electronic-structure output, currently including:
//!
//! 1: Construction of the finite-difference b-vector scheme on the k-mesh
//!
//! 2: The spread functional, its decomposition and its gauge gradient
//!
//! 3: Disentanglement of an optimal subspace from a larger band manifold
//!
//! 4: Parallel-transport gauge construction and global rotation refinement
//!
//! 5: Full iterative maximal localization and subspace splitting
//!
//! Reading and writing of the surrounding file formats (`win`/`amn`/`mmn`/
//! `eig`/`chk`) is left to collaborating crates; this library works on the
//! assembled [`Model`] alone.
use crate::kpoints::gen_kmesh;
use crate::math::{polar_unitary, unitarity_residual};
use ndarray::prelude::*;
use ndarray_linalg::Inverse;
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

pub mod bvector;
pub mod disentangle;
pub mod error;
pub mod kpoints;
pub mod localize;
pub mod math;
pub mod model_struct;
pub mod ndarray_lapack;
pub mod rgrid;
pub mod split;
pub mod spread;
#[cfg(test)]
pub(crate) mod tests_support;
pub mod transport;

pub use crate::bvector::{build_bvectors, BVectors};
pub use crate::error::{Result, WannError};
pub use crate::localize::{ConvergenceReport, ConvergenceStatus, PathOrder, WannConfig};
pub use crate::rgrid::RGrid;
pub use crate::split::{Partition, SubspaceSplit};
pub use crate::spread::{spread_functional, SpreadResult};

/// Semi-unitarity tolerance applied when a gauge enters the pipeline.
pub const GAUGE_TOL: f64 = 1e-8;

/// The mutable optimization state threaded through the pipeline stages.
///
/// Every stage borrows the model exclusively, updates the gauge `u` (and,
/// for subspace splitting, the overlaps `m`) and hands it back; no two
/// stages ever run concurrently on the same model.
#[allow(non_snake_case)]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Model {
    /// The lattice vectors of the crystal, a 3$\times$3 matrix with the axis0
    /// direction storing one lattice vector per row.
    pub lat: Array2<f64>,
    /// The reciprocal lattice vectors, rows again, satisfying
    /// lat_g = 2$\pi$ (lat$^{-1}$)$^T$.
    pub lat_g: Array2<f64>,
    /// The Monkhorst-Pack mesh dimensions.
    pub k_mesh: [usize; 3],
    /// Fractional k-points in lexicographic mesh order, one per row.
    pub k_points: Array2<f64>,
    /// The finite-difference neighbor scheme, computed once and immutable.
    pub bvectors: BVectors,
    /// Bands whose span must be preserved exactly through disentanglement,
    /// one boolean row per k-point.
    pub frozen: Array2<bool>,
    /// The overlaps of cell-periodic Bloch states at neighboring k-points,
    /// $M^{(k,b)}_{mn}=\bra{u_{m k}}\ket{u_{n,k+b}}$, stored as
    /// nk$\times$n_bvec$\times$n_band$\times$n_band.
    pub m: Array4<Complex<f64>>,
    /// The gauge, nk$\times$n_band$\times$n_wann, with semi-unitary columns
    /// at every k-point.
    pub u: Array3<Complex<f64>>,
    /// Energies attached to the rotated states, informational only.
    pub eig: Array2<f64>,
    /// Whether a disentanglement step produced the current gauge; carried
    /// for checkpoint provenance.
    pub dis_performed: bool,
    /// Bands dropped by the upstream calculation, carried for checkpoint
    /// provenance and never consulted by the optimizer.
    pub excluded_bands: Vec<usize>,
}

#[allow(non_snake_case)]
impl Model {
    /// Assemble and validate a model from collaborator data.
    ///
    /// - lat: the lattice vectors, one per row
    ///
    /// - k_mesh: the Monkhorst-Pack mesh dimensions
    ///
    /// - bvectors: the neighbor scheme, usually from [`Model::from_overlaps`]
    ///   or [`bvector::build_bvectors`]
    ///
    /// - frozen: the frozen-band mask, nk$\times$n_band
    ///
    /// - m: the neighbor overlaps, nk$\times$n_bvec$\times$n_band$\times$n_band
    ///
    /// - u: the initial gauge, nk$\times$n_band$\times$n_wann, semi-unitary
    ///
    /// - eig: the energies of the rotated states, nk$\times$n_wann
    ///
    /// Every shape and the semi-unitarity of the gauge are checked here;
    /// downstream stages assume a valid model.
    pub fn new(
        lat: Array2<f64>,
        k_mesh: [usize; 3],
        bvectors: BVectors,
        frozen: Array2<bool>,
        m: Array4<Complex<f64>>,
        u: Array3<Complex<f64>>,
        eig: Array2<f64>,
    ) -> Result<Model> {
        if lat.shape() != [3, 3] {
            return Err(WannError::DimensionMismatch {
                context: "lattice".to_string(),
                expected: 3,
                found: lat.nrows(),
            });
        }
        let lat_g = lat.inv()?.t().to_owned() * (2.0 * PI);
        let nk = k_mesh[0] * k_mesh[1] * k_mesh[2];
        let k_points = gen_kmesh(k_mesh);
        let (nk_m, n_bvec, n_band, n_band2) = m.dim();
        if nk_m != nk {
            return Err(WannError::DimensionMismatch {
                context: "overlap array k axis".to_string(),
                expected: nk,
                found: nk_m,
            });
        }
        if n_band != n_band2 {
            return Err(WannError::DimensionMismatch {
                context: "overlap matrices".to_string(),
                expected: n_band,
                found: n_band2,
            });
        }
        if bvectors.n_kpoints() != nk || bvectors.n_bvec() != n_bvec {
            return Err(WannError::DimensionMismatch {
                context: "bvector scheme".to_string(),
                expected: n_bvec,
                found: bvectors.n_bvec(),
            });
        }
        let (nk_u, nb_u, n_wann) = u.dim();
        if nk_u != nk || nb_u != n_band || n_wann > n_band {
            return Err(WannError::DimensionMismatch {
                context: "gauge array".to_string(),
                expected: n_band,
                found: nb_u,
            });
        }
        if eig.dim() != (nk, n_wann) {
            return Err(WannError::DimensionMismatch {
                context: "eigenvalue array".to_string(),
                expected: nk * n_wann,
                found: eig.len(),
            });
        }
        if frozen.dim() != (nk, n_band) {
            return Err(WannError::DimensionMismatch {
                context: "frozen mask".to_string(),
                expected: nk * n_band,
                found: frozen.len(),
            });
        }
        for k in 0..nk {
            let n_froz = frozen.row(k).iter().filter(|&&x| x).count();
            if n_froz > n_wann {
                return Err(WannError::DimensionMismatch {
                    context: format!("frozen bands at k-point {}", k),
                    expected: n_wann,
                    found: n_froz,
                });
            }
        }
        let model = Model {
            lat,
            lat_g,
            k_mesh,
            k_points,
            bvectors,
            frozen,
            m,
            u,
            eig,
            dis_performed: false,
            excluded_bands: Vec::new(),
        };
        model.check_gauge()?;
        Ok(model)
    }

    /// Like [`Model::new`], deriving the b-vector scheme from the mesh and
    /// lattice with the given completeness tolerance.
    pub fn from_overlaps(
        lat: Array2<f64>,
        k_mesh: [usize; 3],
        frozen: Array2<bool>,
        m: Array4<Complex<f64>>,
        u: Array3<Complex<f64>>,
        eig: Array2<f64>,
        tol: f64,
    ) -> Result<Model> {
        if lat.shape() != [3, 3] {
            return Err(WannError::DimensionMismatch {
                context: "lattice".to_string(),
                expected: 3,
                found: lat.nrows(),
            });
        }
        let lat_g = lat.inv()?.t().to_owned() * (2.0 * PI);
        let k_points = gen_kmesh(k_mesh);
        let bvectors = build_bvectors(&k_points, k_mesh, &lat_g, tol)?;
        Model::new(lat, k_mesh, bvectors, frozen, m, u, eig)
    }

    /// Assemble a model from a raw projection gauge (the `amn`-style matrices
    /// produced by projecting Bloch states onto trial orbitals), which is in
    /// general not semi-unitary. Each k-point is Löwdin-orthonormalized
    /// through the polar decomposition before validation.
    pub fn from_projection(
        lat: Array2<f64>,
        k_mesh: [usize; 3],
        frozen: Array2<bool>,
        m: Array4<Complex<f64>>,
        a: Array3<Complex<f64>>,
        eig: Array2<f64>,
        tol: f64,
    ) -> Result<Model> {
        let (nk, n_band, n_wann) = a.dim();
        let mut u = Array3::<Complex<f64>>::zeros((nk, n_band, n_wann));
        for k in 0..nk {
            let ortho = polar_unitary(&a.slice(s![k, .., ..]))?;
            u.slice_mut(s![k, .., ..]).assign(&ortho);
        }
        Model::from_overlaps(lat, k_mesh, frozen, m, u, eig, tol)
    }

    /// Verify the semi-unitarity invariant of the current gauge.
    pub fn check_gauge(&self) -> Result<()> {
        for k in 0..self.n_kpoints() {
            let residual = unitarity_residual(&self.u.slice(s![k, .., ..]));
            if residual > GAUGE_TOL {
                return Err(WannError::GaugeNotUnitary { kpt: k, residual });
            }
        }
        Ok(())
    }
}
