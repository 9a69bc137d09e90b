//!Construction of the finite-difference b-vector scheme on the k-mesh.
//!
//!Neighbor shells are enumerated by increasing distance in reciprocal space
//!and accumulated until the completeness condition
//!$$\sum_b w_b\, b_\alpha b_\beta = \delta_{\alpha\beta}$$
//!admits a least-squares solution, which makes the finite-difference
//!Berry-connection estimator exact to leading order. The scheme is computed
//!once per model and immutable afterwards.
use crate::error::{Result, WannError};
use crate::kpoints::{index_kpt, shift_kpt};
use ndarray::prelude::*;
use ndarray_linalg::{LeastSquaresSvd, Norm};
use serde::{Deserialize, Serialize};

/// How many distinct neighbor shells the search may accumulate before giving
/// up.
const MAX_SHELLS: usize = 8;
/// Half-width of the integer offset cube scanned for shell candidates.
const SEARCH_RANGE: isize = 3;

/// The finite-difference neighbor scheme of a Monkhorst-Pack mesh.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BVectors {
    /// Cartesian displacement vectors, one row per b-vector.
    pub vectors: Array2<f64>,
    /// The completeness weight of every b-vector.
    pub weights: Array1<f64>,
    /// The integer mesh offset generating every b-vector.
    pub offsets: Array2<isize>,
    /// `kpb_k[[k, b]]` is the mesh index reached by adding b-vector `b` to
    /// k-point `k`.
    pub kpb_k: Array2<usize>,
    /// The reciprocal lattice vector wrapping `k + b` back into the mesh.
    pub kpb_g: Array3<isize>,
}

impl BVectors {
    #[inline(always)]
    pub fn n_bvec(&self) -> usize {
        self.vectors.nrows()
    }
    #[inline(always)]
    pub fn n_kpoints(&self) -> usize {
        self.kpb_k.nrows()
    }
    /// Total completeness weight, the natural scale of the spread gradient.
    #[inline(always)]
    pub fn weight_sum(&self) -> f64 {
        self.weights.sum()
    }
    /// The b-vector generated by a given integer mesh offset, if present.
    pub fn find_offset(&self, offset: [isize; 3]) -> Option<usize> {
        self.offsets
            .axis_iter(Axis(0))
            .position(|row| row[0] == offset[0] && row[1] == offset[1] && row[2] == offset[2])
    }
}

struct Candidate {
    offset: [isize; 3],
    cart: [f64; 3],
    dist: f64,
}

#[allow(non_snake_case)]
fn shell_candidates(k_mesh: [usize; 3], lat_g: &Array2<f64>) -> Vec<Candidate> {
    let mut cand = Vec::new();
    for di in -SEARCH_RANGE..=SEARCH_RANGE {
        for dj in -SEARCH_RANGE..=SEARCH_RANGE {
            for dl in -SEARCH_RANGE..=SEARCH_RANGE {
                if di == 0 && dj == 0 && dl == 0 {
                    continue;
                }
                let frac = arr1(&[
                    (di as f64) / (k_mesh[0] as f64),
                    (dj as f64) / (k_mesh[1] as f64),
                    (dl as f64) / (k_mesh[2] as f64),
                ]);
                let b = frac.dot(lat_g);
                cand.push(Candidate {
                    offset: [di, dj, dl],
                    cart: [b[0], b[1], b[2]],
                    dist: b.norm_l2(),
                });
            }
        }
    }
    cand.sort_by(|x, y| {
        x.dist
            .partial_cmp(&y.dist)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(x.offset.cmp(&y.offset))
    });
    cand
}

/// Group sorted candidates into equal-distance shells.
fn group_shells(cand: &[Candidate]) -> Vec<Vec<usize>> {
    let mut shells: Vec<Vec<usize>> = Vec::new();
    let mut shell_dist = f64::NEG_INFINITY;
    for (i, c) in cand.iter().enumerate() {
        if c.dist - shell_dist > 1e-6 * (1.0 + shell_dist.max(0.0)) {
            shells.push(Vec::new());
            shell_dist = c.dist;
        }
        if let Some(last) = shells.last_mut() {
            last.push(i);
        }
        if shells.len() > MAX_SHELLS {
            break;
        }
    }
    shells.truncate(MAX_SHELLS);
    shells
}

/// The six independent components of $\sum_{b\in s} b\otimes b$ for one shell.
fn shell_column(cand: &[Candidate], shell: &[usize]) -> [f64; 6] {
    let mut col = [0.0; 6];
    for &i in shell {
        let b = cand[i].cart;
        col[0] += b[0] * b[0];
        col[1] += b[1] * b[1];
        col[2] += b[2] * b[2];
        col[3] += b[0] * b[1];
        col[4] += b[0] * b[2];
        col[5] += b[1] * b[2];
    }
    col
}

/// Derive the finite-difference scheme for a k-mesh.
///
/// `k_points` must be the lexicographic mesh of `k_mesh` (as produced by
/// [`crate::kpoints::gen_kmesh`]); `lat_g` holds the reciprocal lattice
/// vectors in its rows. `tol` bounds the allowed residual of the
/// completeness condition.
#[allow(non_snake_case)]
pub fn build_bvectors(
    k_points: &Array2<f64>,
    k_mesh: [usize; 3],
    lat_g: &Array2<f64>,
    tol: f64,
) -> Result<BVectors> {
    let nk = k_mesh[0] * k_mesh[1] * k_mesh[2];
    if k_points.nrows() != nk {
        return Err(WannError::DimensionMismatch {
            context: "k_points rows".to_string(),
            expected: nk,
            found: k_points.nrows(),
        });
    }
    if lat_g.shape() != [3, 3] {
        return Err(WannError::DimensionMismatch {
            context: "reciprocal lattice".to_string(),
            expected: 3,
            found: lat_g.nrows(),
        });
    }
    let cand = shell_candidates(k_mesh, lat_g);
    let shells = group_shells(&cand);
    let target = arr1(&[1.0, 1.0, 1.0, 0.0, 0.0, 0.0]);

    let mut active: Vec<usize> = Vec::new();
    for s in 0..shells.len() {
        active.push(s);
        let mut a = Array2::<f64>::zeros((6, active.len()));
        for (c, &sh) in active.iter().enumerate() {
            let col = shell_column(&cand, &shells[sh]);
            for r in 0..6 {
                a[[r, c]] = col[r];
            }
        }
        let lsq = a.least_squares(&target)?;
        if (lsq.rank as usize) < active.len() {
            // the newest shell is linearly dependent on the accepted ones
            active.pop();
            continue;
        }
        let w = lsq.solution;
        let residual = (a.dot(&w) - &target).norm_l2();
        if residual < tol {
            if w.iter().any(|x| !x.is_finite()) {
                return Err(WannError::DegenerateWeights { residual });
            }
            return Ok(assemble(&cand, &shells, &active, &w, k_mesh, nk));
        }
    }
    Err(WannError::InsufficientShells {
        searched: shells.len(),
    })
}

fn assemble(
    cand: &[Candidate],
    shells: &[Vec<usize>],
    active: &[usize],
    shell_weights: &Array1<f64>,
    k_mesh: [usize; 3],
    nk: usize,
) -> BVectors {
    let n_bvec: usize = active.iter().map(|&s| shells[s].len()).sum();
    let mut vectors = Array2::<f64>::zeros((n_bvec, 3));
    let mut weights = Array1::<f64>::zeros(n_bvec);
    let mut offsets = Array2::<isize>::zeros((n_bvec, 3));
    let mut row = 0;
    for (c, &s) in active.iter().enumerate() {
        for &i in &shells[s] {
            for r in 0..3 {
                vectors[[row, r]] = cand[i].cart[r];
                offsets[[row, r]] = cand[i].offset[r];
            }
            weights[row] = shell_weights[c];
            row += 1;
        }
    }
    let mut kpb_k = Array2::<usize>::zeros((nk, n_bvec));
    let mut kpb_g = Array3::<isize>::zeros((nk, n_bvec, 3));
    for ik in 0..nk {
        let idx = index_kpt(ik, k_mesh);
        for b in 0..n_bvec {
            let off = [offsets[[b, 0]], offsets[[b, 1]], offsets[[b, 2]]];
            let (jk, g) = shift_kpt(idx, off, k_mesh);
            kpb_k[[ik, b]] = jk;
            for r in 0..3 {
                kpb_g[[ik, b, r]] = g[r];
            }
        }
    }
    BVectors {
        vectors,
        weights,
        offsets,
        kpb_k,
        kpb_g,
    }
}
