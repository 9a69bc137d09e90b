//!Parallel-transport gauge construction and the global residual rotation.
//!
//!Transport propagates a unitary alignment sequentially along a spanning
//!tree of the k-mesh: every k-point is aligned to its predecessor through
//!the polar factor of the transported overlap, which makes the gauge
//!continuous along the path without any iterative optimization. The
//!traversal is the lexicographic storage order of the mesh (last index
//!fastest), so results are reproducible bit for bit.
//!
//!Transport fixes the relative gauge between neighboring k-points but
//!leaves one global unitary undetermined; [`Model::optimal_rotation`]
//!resolves it by a cheap descent on the single n_wann$\times$n_wann
//!unitary applied at every k-point.
use crate::error::{Result, WannError};
use crate::kpoints::{index_kpt, kpt_index};
use crate::localize::WannConfig;
use crate::math::{dagger, exp_skew, polar_unitary};
use crate::spread::spread_functional;
use crate::Model;
use ndarray::prelude::*;
use num_complex::Complex;

impl Model {
    /// Rebuild the gauge by parallel transport along the lexicographic mesh
    /// path. The input gauge only contributes its column spaces; each
    /// k-point is first Löwdin-orthonormalized, then rotated onto the
    /// transported frame of its path predecessor.
    #[allow(non_snake_case)]
    pub fn parallel_transport(&mut self) -> Result<()> {
        let nk = self.n_kpoints();
        for k in 0..nk {
            let ortho = polar_unitary(&self.u.slice(s![k, .., ..]))?;
            self.u.slice_mut(s![k, .., ..]).assign(&ortho);
        }
        for k in 1..nk {
            let [i, j, l] = index_kpt(k, self.k_mesh);
            let (parent_idx, offset) = if l > 0 {
                ([i, j, l - 1], [0isize, 0, 1])
            } else if j > 0 {
                ([i, j - 1, 0], [0, 1, 0])
            } else {
                ([i - 1, 0, 0], [1, 0, 0])
            };
            let pk = kpt_index(parent_idx, self.k_mesh);
            let b = self
                .bvectors
                .find_offset(offset)
                .filter(|&b| self.bvectors.kpb_k[[pk, b]] == k)
                .ok_or(WannError::PathNotConnected { kpt: k })?;
            let s = dagger(&self.u.slice(s![pk, .., ..]))
                .dot(&self.m.slice(s![pk, b, .., ..]))
                .dot(&self.u.slice(s![k, .., ..]));
            let rot = polar_unitary(&dagger(&s))?;
            let aligned = self.u.slice(s![k, .., ..]).dot(&rot);
            self.u.slice_mut(s![k, .., ..]).assign(&aligned);
        }
        Ok(())
    }

    /// Find the single k-independent unitary that minimizes the total spread
    /// when right-multiplied onto the gauge at every k-point, apply it, and
    /// return it. Descent on such a small manifold converges in a handful of
    /// iterations; the best rotation seen is kept, so the spread never
    /// increases.
    #[allow(non_snake_case)]
    pub fn optimal_rotation(&mut self, config: &WannConfig) -> Result<Array2<Complex<f64>>> {
        let nk = self.n_kpoints();
        let n_wann = self.n_wann();
        let eta = config.step_size / (4.0 * self.bvectors.weight_sum());
        let mut w = Array2::<Complex<f64>>::eye(n_wann);
        let mut best_w = w.clone();
        let mut u_rot = self.u.clone();
        let mut res = spread_functional(&self.m, &self.bvectors, &u_rot);
        let mut best_omega = res.omega_total;
        let omega0 = res.omega_total;
        for it in 0..config.max_iter {
            let mut g_sum = Array2::<Complex<f64>>::zeros((n_wann, n_wann));
            for k in 0..nk {
                g_sum = g_sum + res.gradient.slice(s![k, .., ..]);
            }
            w = w.dot(&exp_skew(&g_sum, eta)?);
            for k in 0..nk {
                let rot = self.u.slice(s![k, .., ..]).dot(&w);
                u_rot.slice_mut(s![k, .., ..]).assign(&rot);
            }
            let prev = res.omega_total;
            res = spread_functional(&self.m, &self.bvectors, &u_rot);
            if res.omega_total < best_omega {
                best_omega = res.omega_total;
                best_w = w.clone();
            }
            if (prev - res.omega_total).abs() < config.conv_tol {
                break;
            }
        }
        log::debug!(
            "optimal rotation: spread {:.8} -> {:.8}",
            omega0,
            best_omega
        );
        for k in 0..nk {
            let rot = self.u.slice(s![k, .., ..]).dot(&best_w);
            self.u.slice_mut(s![k, .., ..]).assign(&rot);
        }
        Ok(best_w)
    }
}

#[cfg(test)]
mod tests {
    use crate::localize::WannConfig;
    use crate::math::unitarity_residual;
    use crate::tests_support::toy_model;
    use ndarray::prelude::*;

    #[test]
    fn transport_preserves_semi_unitarity() {
        let mut model = toy_model(2, 2);
        model.parallel_transport().unwrap();
        for k in 0..model.n_kpoints() {
            assert!(unitarity_residual(&model.u.slice(s![k, .., ..])) < 1e-10);
        }
    }

    #[test]
    fn optimal_rotation_never_increases_spread() {
        let mut model = toy_model(2, 2);
        model.parallel_transport().unwrap();
        let omega_before = model.spread().omega_total;
        let w = model.optimal_rotation(&WannConfig::default()).unwrap();
        assert!(unitarity_residual(&w) < 1e-10);
        let omega_after = model.spread().omega_total;
        assert!(omega_after <= omega_before + 1e-12);
    }
}
