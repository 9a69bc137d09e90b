//!The Marzari-Vanderbilt spread functional, its three-term decomposition and
//!its gauge gradient.
//!
//!For a gauge $U$ the rotated overlaps are
//!$\widetilde M^{(k,b)}=U^{(k)\dag}M^{(k,b)}U^{(k+b)}$ and the total spread
//!splits as $\Omega=\Omega_I+\Omega_{OD}+\Omega_D$ into a gauge-invariant
//!part, an off-diagonal part and a diagonal part. The gradient is returned
//!per k-point as the skew-Hermitian generator
//!$$G^{(k)}=\f{4}{N_k}\sum_b w_b\left(\mathcal A[R^{(k,b)}]-\mathcal S[T^{(k,b)}]\right)$$
//!with $R_{mn}=\widetilde M_{mn}\widetilde M_{nn}^*$,
//!$T_{mn}=\widetilde M_{mn}q_n/\widetilde M_{nn}$,
//!$\mathcal A[B]=(B-B^\dag)/2$ and $\mathcal S[B]=(B+B^\dag)/2i$. The sign
//!convention is such that $U^{(k)}\exp(\epsilon G^{(k)})$ with a small
//!positive step decreases $\Omega$.
use crate::bvector::BVectors;
use crate::math::dagger;
use ndarray::prelude::*;
use num_complex::Complex;
use num_traits::Zero;
use rayon::prelude::*;
use std::fmt;

/// The decomposed spread of one gauge, with per-function centers and the
/// manifold gradient. Pure data, produced by [`spread_functional`].
#[derive(Clone, Debug)]
pub struct SpreadResult {
    /// $\Omega=\Omega_I+\Omega_{OD}+\Omega_D$.
    pub omega_total: f64,
    /// The gauge-invariant part.
    pub omega_i: f64,
    /// The off-diagonal part.
    pub omega_od: f64,
    /// The diagonal part.
    pub omega_d: f64,
    /// Cartesian Wannier centers, one row per function.
    pub centers: Array2<f64>,
    /// The spread carried by every function individually.
    pub spreads: Array1<f64>,
    /// Skew-Hermitian descent generators, nk$\times$n_wann$\times$n_wann.
    pub gradient: Array3<Complex<f64>>,
}

impl fmt::Display for SpreadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  WF      center (x, y, z)            spread")?;
        for n in 0..self.spreads.len() {
            writeln!(
                f,
                "  {:3}  ({:10.6},{:10.6},{:10.6})  {:12.8}",
                n,
                self.centers[[n, 0]],
                self.centers[[n, 1]],
                self.centers[[n, 2]],
                self.spreads[n]
            )?;
        }
        write!(
            f,
            "  Omega total = {:.8}  (I = {:.8}, OD = {:.8}, D = {:.8})",
            self.omega_total, self.omega_i, self.omega_od, self.omega_d
        )
    }
}

#[inline(always)]
fn rotated_overlap(
    m: &Array4<Complex<f64>>,
    u: &Array3<Complex<f64>>,
    bv: &BVectors,
    k: usize,
    b: usize,
) -> Array2<Complex<f64>> {
    let kpb = bv.kpb_k[[k, b]];
    dagger(&u.slice(s![k, .., ..]))
        .dot(&m.slice(s![k, b, .., ..]))
        .dot(&u.slice(s![kpb, .., ..]))
}

/// Evaluate the spread functional, its decomposition, the Wannier centers
/// and the gauge gradient for one gauge. Deterministic and side-effect free.
#[allow(non_snake_case)]
pub fn spread_functional(
    m: &Array4<Complex<f64>>,
    bvectors: &BVectors,
    u: &Array3<Complex<f64>>,
) -> SpreadResult {
    let (nk, n_bvec, _, _) = m.dim();
    let n_wann = u.dim().2;
    assert_eq!(u.dim().0, nk);
    assert_eq!(bvectors.n_bvec(), n_bvec);
    let nk_f = nk as f64;

    // first pass, Wannier centers from the Berry-phase estimator
    let center_parts: Vec<Vec<f64>> = (0..nk)
        .into_par_iter()
        .map(|k| {
            let mut acc = vec![0.0; n_wann * 3];
            for b in 0..n_bvec {
                let mr = rotated_overlap(m, u, bvectors, k, b);
                let w = bvectors.weights[b];
                for n in 0..n_wann {
                    let phase = mr[[n, n]].arg();
                    for r in 0..3 {
                        acc[n * 3 + r] += w * bvectors.vectors[[b, r]] * phase;
                    }
                }
            }
            acc
        })
        .collect();
    let mut centers = Array2::<f64>::zeros((n_wann, 3));
    for part in &center_parts {
        for n in 0..n_wann {
            for r in 0..3 {
                centers[[n, r]] -= part[n * 3 + r] / nk_f;
            }
        }
    }

    // second pass, spread decomposition and gradient
    struct KPart {
        oi: f64,
        ood: f64,
        od: f64,
        spreads: Vec<f64>,
        grad: Vec<Complex<f64>>,
    }
    let parts: Vec<KPart> = (0..nk)
        .into_par_iter()
        .map(|k| {
            let mut oi = 0.0;
            let mut ood = 0.0;
            let mut od = 0.0;
            let mut spreads = vec![0.0; n_wann];
            let mut g = Array2::<Complex<f64>>::zeros((n_wann, n_wann));
            for b in 0..n_bvec {
                let mr = rotated_overlap(m, u, bvectors, k, b);
                let w = bvectors.weights[b];
                let mut sum_all = 0.0;
                let mut sum_diag = 0.0;
                let mut r_mat = mr.clone();
                let mut t_mat = mr.clone();
                for n in 0..n_wann {
                    let d = mr[[n, n]];
                    let bdotr = (0..3)
                        .map(|r| bvectors.vectors[[b, r]] * centers[[n, r]])
                        .sum::<f64>();
                    let q = d.arg() + bdotr;
                    let absq = d.norm_sqr();
                    sum_diag += absq;
                    od += w * q * q;
                    spreads[n] += w * (1.0 - absq + q * q);
                    let scale_t = if absq < 1e-24 {
                        Complex::zero()
                    } else {
                        Complex::new(q, 0.0) / d
                    };
                    let scale_r = d.conj();
                    for row in 0..n_wann {
                        r_mat[[row, n]] *= scale_r;
                        t_mat[[row, n]] *= scale_t;
                    }
                }
                sum_all += mr.iter().map(|x| x.norm_sqr()).sum::<f64>();
                oi += w * (n_wann as f64 - sum_all);
                ood += w * (sum_all - sum_diag);
                let a_part = (&r_mat - &dagger(&r_mat)) * Complex::new(0.5, 0.0);
                let s_part = (&t_mat + &dagger(&t_mat)) * Complex::new(0.0, -0.5);
                g = g + (a_part - s_part) * Complex::new(4.0 * w, 0.0);
            }
            KPart {
                oi,
                ood,
                od,
                spreads,
                grad: g.into_raw_vec_and_offset().0,
            }
        })
        .collect();

    let mut omega_i = 0.0;
    let mut omega_od = 0.0;
    let mut omega_d = 0.0;
    let mut spreads = Array1::<f64>::zeros(n_wann);
    let mut gradient = Array3::<Complex<f64>>::zeros((nk, n_wann, n_wann));
    for (k, part) in parts.iter().enumerate() {
        omega_i += part.oi / nk_f;
        omega_od += part.ood / nk_f;
        omega_d += part.od / nk_f;
        for n in 0..n_wann {
            spreads[n] += part.spreads[n] / nk_f;
        }
        for (flat, val) in part.grad.iter().enumerate() {
            let row = flat / n_wann;
            let col = flat % n_wann;
            gradient[[k, row, col]] = *val / Complex::new(nk_f, 0.0);
        }
    }
    SpreadResult {
        omega_total: omega_i + omega_od + omega_d,
        omega_i,
        omega_od,
        omega_d,
        centers,
        spreads,
        gradient,
    }
}
