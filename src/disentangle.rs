//!Disentanglement of an optimal n_wann-dimensional subspace from a larger
//!band manifold, the Souza-Marzari-Vanderbilt self-consistent scheme.
//!
//!Each outer iteration accumulates, at every k-point, the overlap-weighted
//!projector of the neighboring subspaces
//!$$Z^{(k)}=\sum_b w_b\,M^{(k,b)}P^{(k+b)}M^{(k,b)\dag},$$
//!restricts it to the bands not frozen at that k-point, and keeps the
//!eigenvectors with the largest eigenvalues; frozen bands enter the new
//!gauge as exact unit columns. The iteration stops when the subspace
//!projectors stop moving. Only the gauge-invariant spread is affected by
//!this stage; the in-subspace gauge is fixed afterwards by transport and
//!maximal localization.
use crate::error::Result;
use crate::localize::{ConvergenceReport, ConvergenceStatus, WannConfig};
use crate::math::{dagger, hermitize};
use crate::ndarray_lapack::eigh_range_idx;
use crate::spread::spread_functional;
use crate::Model;
use ndarray::prelude::*;
use ndarray_linalg::{Eigh, UPLO};
use num_complex::Complex;
use rayon::prelude::*;

fn projectors(u: &Array3<Complex<f64>>) -> Array3<Complex<f64>> {
    let (nk, n_band, _) = u.dim();
    let mut p = Array3::<Complex<f64>>::zeros((nk, n_band, n_band));
    for k in 0..nk {
        let uk = u.slice(s![k, .., ..]);
        p.slice_mut(s![k, .., ..]).assign(&uk.dot(&dagger(&uk)));
    }
    p
}

impl Model {
    /// Select the optimal subspace and overwrite the gauge with the
    /// resulting semi-unitary matrices. Returns the convergence report of
    /// the subspace iteration; hitting the cap is non-fatal and leaves the
    /// last iterate in place. `initial_spread`/`final_spread` track the
    /// gauge-invariant spread, the only part this stage can change, and
    /// `grad_norm` reports the last projector change.
    #[allow(non_snake_case)]
    pub fn disentangle(&mut self, config: &WannConfig) -> Result<ConvergenceReport> {
        self.check_gauge()?;
        let nk = self.n_kpoints();
        let n_band = self.n_band();
        let n_wann = self.n_wann();
        let n_bvec = self.n_bvec();

        let frozen_idx: Vec<Vec<usize>> = (0..nk)
            .map(|k| {
                (0..n_band)
                    .filter(|&n| self.frozen[[k, n]])
                    .collect::<Vec<_>>()
            })
            .collect();
        let free_idx: Vec<Vec<usize>> = (0..nk)
            .map(|k| {
                (0..n_band)
                    .filter(|&n| !self.frozen[[k, n]])
                    .collect::<Vec<_>>()
            })
            .collect();

        let omega0 = spread_functional(&self.m, &self.bvectors, &self.u).omega_i;
        let mut u = self.u.clone();
        let mut p = projectors(&u);
        let mut status = ConvergenceStatus::MaxIterExceeded;
        let mut iterations = config.max_iter;
        let mut diff = f64::INFINITY;

        for it in 0..config.max_iter {
            let rows: Result<Vec<Vec<Complex<f64>>>> = (0..nk)
                .into_par_iter()
                .map(|k| {
                    let mut z = Array2::<Complex<f64>>::zeros((n_band, n_band));
                    for b in 0..n_bvec {
                        let kpb = self.bvectors.kpb_k[[k, b]];
                        let mkb = self.m.slice(s![k, b, .., ..]);
                        let w = Complex::new(self.bvectors.weights[b], 0.0);
                        z = z + mkb.dot(&p.slice(s![kpb, .., ..])).dot(&dagger(&mkb)) * w;
                    }
                    let z = hermitize(&z);
                    let n_froz = frozen_idx[k].len();
                    let n_keep = n_wann - n_froz;
                    let free = &free_idx[k];
                    let mut uk = Array2::<Complex<f64>>::zeros((n_band, n_wann));
                    for (c, &i) in frozen_idx[k].iter().enumerate() {
                        uk[[i, c]] = Complex::new(1.0, 0.0);
                    }
                    if n_keep > 0 {
                        let zf = z.select(Axis(0), free).select(Axis(1), free);
                        let n_free = free.len();
                        let (vals, vecs) = if n_keep < n_free {
                            eigh_range_idx(&zf, n_free - n_keep + 1, n_free, UPLO::Lower)?
                        } else {
                            let (vals, vecs) = zf.eigh(UPLO::Lower)?;
                            (vals, vecs)
                        };
                        // deterministic order: eigenvalue descending, index
                        // ascending on ties
                        let mut order: Vec<usize> = (0..vals.len()).collect();
                        order.sort_by(|&a, &b| {
                            vals[b]
                                .partial_cmp(&vals[a])
                                .unwrap_or(std::cmp::Ordering::Equal)
                                .then(a.cmp(&b))
                        });
                        for (c, &col) in order.iter().take(n_keep).enumerate() {
                            for (r, &i) in free.iter().enumerate() {
                                uk[[i, n_froz + c]] = vecs[[r, col]];
                            }
                        }
                    }
                    Ok(uk.into_raw_vec_and_offset().0)
                })
                .collect();
            let flat: Vec<Complex<f64>> = rows?.into_iter().flatten().collect();
            u = Array3::from_shape_vec((nk, n_band, n_wann), flat).unwrap();

            let p_new = projectors(&u);
            diff = (&p_new - &p).iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt() / nk as f64;
            p = p_new;
            log::debug!("disentangle iter {}: projector change {:.3e}", it + 1, diff);
            if diff < config.conv_tol {
                status = ConvergenceStatus::Converged;
                iterations = it + 1;
                break;
            }
        }
        if status == ConvergenceStatus::MaxIterExceeded {
            log::warn!(
                "disentanglement hit the iteration cap of {}, returning the best iterate",
                config.max_iter
            );
        }
        self.u = u;
        self.dis_performed = true;
        let omega_f = spread_functional(&self.m, &self.bvectors, &self.u).omega_i;
        Ok(ConvergenceReport {
            status,
            iterations,
            initial_spread: omega0,
            final_spread: omega_f,
            grad_norm: diff,
        })
    }
}
