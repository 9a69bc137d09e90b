//!Partition a converged gauge into independent band groups, typically
//!valence and conduction, each of which becomes a self-contained [`Model`]
//!that can be re-optimized on its own.
//!
//!The block-diagonalizing unitary per k-point comes from the chosen
//!Hermitian indicator: for an energy partition the indicator is the diagonal
//!operator of the rotated-state energies, whose eigenbasis is the stable
//!energy ordering; an explicit band-index partition permutes the requested
//!functions to the front. In both cases the cross-block overlap residual is
//!checked before the split is accepted.
use crate::error::{Result, WannError};
use crate::math::{dagger, norm_fro};
use crate::Model;
use ndarray::prelude::*;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// How to assign the Wannier functions to the two groups.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Partition {
    /// The `n_first` lowest-energy functions at every k-point form the first
    /// group. Degenerate energies are ordered by band index, so the
    /// assignment is deterministic.
    Energy { n_first: usize },
    /// An explicit list of function indices forming the first group, the
    /// same at every k-point.
    Bands { first: Vec<usize> },
}

/// The outcome of [`Model::split_subspace`]: two independent models plus the
/// per-k block unitaries that map the original gauge onto each group, for
/// regenerating downstream real-space data per subspace.
#[derive(Clone, Debug)]
pub struct SubspaceSplit {
    pub model_a: Model,
    pub model_b: Model,
    pub v_a: Array3<Complex<f64>>,
    pub v_b: Array3<Complex<f64>>,
}

impl Model {
    /// Split the current n_wann-dimensional manifold into two disjoint
    /// groups. `tol` bounds the allowed cross-block overlap residual; a
    /// residual above it means the groups are still coupled and the split
    /// would corrupt both halves.
    #[allow(non_snake_case)]
    pub fn split_subspace(&self, partition: &Partition, tol: f64) -> Result<SubspaceSplit> {
        let nk = self.n_kpoints();
        let n_bvec = self.n_bvec();
        let n_wann = self.n_wann();

        // per-k column order of the block unitary
        let orders: Vec<Vec<usize>> = match partition {
            Partition::Energy { n_first } => {
                if *n_first == 0 || *n_first >= n_wann {
                    return Err(WannError::InvalidPartition {
                        n_first: *n_first,
                        n_wann,
                    });
                }
                (0..nk)
                    .map(|k| {
                        let row = self.eig.row(k);
                        let mut order: Vec<usize> = (0..n_wann).collect();
                        order.sort_by(|&a, &b| {
                            row[a]
                                .partial_cmp(&row[b])
                                .unwrap_or(std::cmp::Ordering::Equal)
                                .then(a.cmp(&b))
                        });
                        order
                    })
                    .collect()
            }
            Partition::Bands { first } => {
                let mut seen = vec![false; n_wann];
                for &n in first {
                    if n >= n_wann || seen[n] {
                        return Err(WannError::InvalidPartition {
                            n_first: first.len(),
                            n_wann,
                        });
                    }
                    seen[n] = true;
                }
                if first.is_empty() || first.len() >= n_wann {
                    return Err(WannError::InvalidPartition {
                        n_first: first.len(),
                        n_wann,
                    });
                }
                let mut order = first.clone();
                order.extend((0..n_wann).filter(|n| !seen[*n]));
                vec![order; nk]
            }
        };
        let n1 = match partition {
            Partition::Energy { n_first } => *n_first,
            Partition::Bands { first } => first.len(),
        };
        let n2 = n_wann - n1;

        // u_split = u . V with V the per-k column permutation
        let mut v_a = Array3::<Complex<f64>>::zeros((nk, n_wann, n1));
        let mut v_b = Array3::<Complex<f64>>::zeros((nk, n_wann, n2));
        let n_band = self.n_band();
        let mut ua = Array3::<Complex<f64>>::zeros((nk, n_band, n1));
        let mut ub = Array3::<Complex<f64>>::zeros((nk, n_band, n2));
        for k in 0..nk {
            for (c, &src) in orders[k].iter().enumerate() {
                if c < n1 {
                    v_a[[k, src, c]] = Complex::new(1.0, 0.0);
                } else {
                    v_b[[k, src, c - n1]] = Complex::new(1.0, 0.0);
                }
            }
            let uk = self.u.slice(s![k, .., ..]);
            ua.slice_mut(s![k, .., ..])
                .assign(&uk.dot(&v_a.slice(s![k, .., ..])));
            ub.slice_mut(s![k, .., ..])
                .assign(&uk.dot(&v_b.slice(s![k, .., ..])));
        }

        // cross-block overlaps must be negligible for the halves to be
        // independent
        let mut residual = 0.0f64;
        for k in 0..nk {
            for b in 0..n_bvec {
                let kpb = self.bvectors.kpb_k[[k, b]];
                let cross = dagger(&ua.slice(s![k, .., ..]))
                    .dot(&self.m.slice(s![k, b, .., ..]))
                    .dot(&ub.slice(s![kpb, .., ..]));
                residual = residual.max(norm_fro(&cross));
            }
        }
        if residual > tol {
            return Err(WannError::NonSeparableSubspace { residual, tol });
        }

        let model_a = self.restrict(&ua, &orders, 0, n1)?;
        let model_b = self.restrict(&ub, &orders, n1, n2)?;
        Ok(SubspaceSplit {
            model_a,
            model_b,
            v_a,
            v_b,
        })
    }

    /// Build the independent sub-model spanned by `u_sub`, with the overlaps
    /// rotated into the group and the gauge reset to the identity.
    fn restrict(
        &self,
        u_sub: &Array3<Complex<f64>>,
        orders: &[Vec<usize>],
        col0: usize,
        n_sub: usize,
    ) -> Result<Model> {
        let nk = self.n_kpoints();
        let n_bvec = self.n_bvec();
        let mut m = Array4::<Complex<f64>>::zeros((nk, n_bvec, n_sub, n_sub));
        for k in 0..nk {
            let uk_dag = dagger(&u_sub.slice(s![k, .., ..]));
            for b in 0..n_bvec {
                let kpb = self.bvectors.kpb_k[[k, b]];
                let rot = uk_dag
                    .dot(&self.m.slice(s![k, b, .., ..]))
                    .dot(&u_sub.slice(s![kpb, .., ..]));
                m.slice_mut(s![k, b, .., ..]).assign(&rot);
            }
        }
        let mut u = Array3::<Complex<f64>>::zeros((nk, n_sub, n_sub));
        let mut eig = Array2::<f64>::zeros((nk, n_sub));
        for k in 0..nk {
            for c in 0..n_sub {
                u[[k, c, c]] = Complex::new(1.0, 0.0);
                eig[[k, c]] = self.eig[[k, orders[k][col0 + c]]];
            }
        }
        let frozen = Array2::from_elem((nk, n_sub), false);
        let mut model = Model::new(
            self.lat.clone(),
            self.k_mesh,
            self.bvectors.clone(),
            frozen,
            m,
            u,
            eig,
        )?;
        model.dis_performed = self.dis_performed;
        model.excluded_bands = self.excluded_bands.clone();
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::localize::WannConfig;
    use crate::math::unitarity_residual;
    use crate::tests_support::toy_model;
    use ndarray::prelude::*;

    fn converged_model() -> (Model, f64) {
        let mut model = toy_model(2, 2);
        let mut config = WannConfig::default();
        config.step_size = 0.3;
        config.max_iter = 5000;
        let report = model.max_localize(&config).unwrap();
        (model, report.final_spread)
    }

    #[test]
    fn energy_partition_splits_a_converged_gauge() {
        let (model, _) = converged_model();
        let split = model
            .split_subspace(&Partition::Energy { n_first: 1 }, 1e-2)
            .unwrap();
        assert_eq!(split.model_a.n_wann(), 1);
        assert_eq!(split.model_b.n_wann(), 1);
        for k in 0..model.n_kpoints() {
            assert!(unitarity_residual(&split.model_a.u.slice(s![k, .., ..])) < 1e-10);
            assert!(unitarity_residual(&split.v_a.slice(s![k, .., ..])) < 1e-10);
        }
    }

    #[test]
    fn split_halves_relocalize_above_the_joint_optimum() {
        let (model, omega_full) = converged_model();
        let split = model
            .split_subspace(&Partition::Energy { n_first: 1 }, 1e-2)
            .unwrap();
        let mut config = WannConfig::default();
        config.max_iter = 3000;
        let mut model_a = split.model_a;
        let mut model_b = split.model_b;
        let ra = model_a.max_localize(&config).unwrap();
        let rb = model_b.max_localize(&config).unwrap();
        assert!(ra.final_spread + rb.final_spread >= omega_full - 1e-8);
    }

    #[test]
    fn inconsistent_partition_is_rejected() {
        let (model, _) = converged_model();
        assert!(model
            .split_subspace(&Partition::Energy { n_first: 0 }, 1e-2)
            .is_err());
        assert!(model
            .split_subspace(&Partition::Energy { n_first: 2 }, 1e-2)
            .is_err());
        assert!(model
            .split_subspace(&Partition::Bands { first: vec![0, 0] }, 1e-2)
            .is_err());
    }

    #[test]
    fn coupled_blocks_are_reported_as_non_separable() {
        // identity gauge, nothing localized: the cross-block overlaps are
        // far from zero and a tight tolerance must reject the split
        let model = toy_model(2, 2);
        let err = model
            .split_subspace(&Partition::Energy { n_first: 1 }, 1e-12)
            .unwrap_err();
        match err {
            WannError::NonSeparableSubspace { residual, .. } => assert!(residual > 1e-12),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
