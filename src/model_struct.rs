use crate::error::Result;
use crate::math::dagger;
use crate::spread::{spread_functional, SpreadResult};
use crate::Model;
use ndarray::prelude::*;
use num_complex::Complex;

impl Model {
    #[inline(always)]
    pub fn n_kpoints(&self) -> usize {
        self.k_points.nrows()
    }
    #[inline(always)]
    pub fn n_band(&self) -> usize {
        self.m.dim().2
    }
    #[inline(always)]
    pub fn n_wann(&self) -> usize {
        self.u.dim().2
    }
    #[inline(always)]
    pub fn n_bvec(&self) -> usize {
        self.bvectors.n_bvec()
    }
    /// Number of frozen bands at one k-point.
    #[inline(always)]
    pub fn n_frozen(&self, ik: usize) -> usize {
        self.frozen.row(ik).iter().filter(|&&x| x).count()
    }

    /// Reset the gauge to the trivial embedding, the identity on the first
    /// `n_wann` bands at every k-point.
    pub fn set_identity_gauge(&mut self) {
        let n_wann = self.n_wann();
        self.u.fill(Complex::new(0.0, 0.0));
        for k in 0..self.n_kpoints() {
            for n in 0..n_wann {
                self.u[[k, n, n]] = Complex::new(1.0, 0.0);
            }
        }
    }

    /// Evaluate the spread functional on the current state.
    pub fn spread(&self) -> SpreadResult {
        spread_functional(&self.m, &self.bvectors, &self.u)
    }

    /// Fold the current gauge into the overlaps,
    /// $M^{(k,b)} \leftarrow U^{(k)\dag} M^{(k,b)} U^{(k+b)}$,
    /// and reset the gauge to the identity on the rotated n_wann-dimensional
    /// manifold. The frozen mask is cleared: the rotated states are no longer
    /// individual input bands.
    pub fn rotate_overlaps(&mut self) -> Result<()> {
        let nk = self.n_kpoints();
        let n_bvec = self.n_bvec();
        let n_wann = self.n_wann();
        let mut m_new = Array4::<Complex<f64>>::zeros((nk, n_bvec, n_wann, n_wann));
        for k in 0..nk {
            let uk_dag = dagger(&self.u.slice(s![k, .., ..]));
            for b in 0..n_bvec {
                let kpb = self.bvectors.kpb_k[[k, b]];
                let rot = uk_dag
                    .dot(&self.m.slice(s![k, b, .., ..]))
                    .dot(&self.u.slice(s![kpb, .., ..]));
                m_new.slice_mut(s![k, b, .., ..]).assign(&rot);
            }
        }
        self.m = m_new;
        self.frozen = Array2::from_elem((nk, n_wann), false);
        self.u = Array3::zeros((nk, n_wann, n_wann));
        self.set_identity_gauge();
        self.check_gauge()
    }
}

#[cfg(test)]
mod tests {
    use crate::tests_support::toy_model;
    use crate::Model;
    use ndarray::prelude::*;
    use ndarray_linalg::Norm;
    use num_complex::Complex;
    use std::f64::consts::PI;

    #[test]
    fn reciprocal_lattice_invariant_holds() {
        let model = toy_model(2, 2);
        let product = model.lat_g.dot(&model.lat.t());
        let expected = Array2::<f64>::eye(3) * (2.0 * PI);
        assert!((&product - &expected).norm_l2() < 1e-12);
    }

    #[test]
    fn rotate_overlaps_preserves_the_spread() {
        let mut model = toy_model(2, 2);
        let before = model.spread();
        model.rotate_overlaps().unwrap();
        let after = model.spread();
        assert!((before.omega_total - after.omega_total).abs() < 1e-10);
        assert!((before.omega_i - after.omega_i).abs() < 1e-10);
        assert_eq!(model.n_band(), model.n_wann());
    }

    #[test]
    fn projection_input_is_orthonormalized() {
        let base = toy_model(2, 2);
        let a = base.u.mapv(|x| x * Complex::new(1.7, 0.0));
        let model = Model::from_projection(
            base.lat.clone(),
            base.k_mesh,
            base.frozen.clone(),
            base.m.clone(),
            a,
            base.eig.clone(),
            1e-6,
        )
        .unwrap();
        model.check_gauge().unwrap();
    }

    #[test]
    fn inconsistent_shapes_are_rejected() {
        let base = toy_model(2, 2);
        let bad_eig = Array2::<f64>::zeros((base.n_kpoints(), 3));
        let result = Model::new(
            base.lat.clone(),
            base.k_mesh,
            base.bvectors.clone(),
            base.frozen.clone(),
            base.m.clone(),
            base.u.clone(),
            bad_eig,
        );
        assert!(result.is_err());
    }
}
