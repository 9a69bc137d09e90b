//!Deterministic synthetic models shared by the unit tests.
use crate::math::exp_skew;
use crate::Model;
use ndarray::prelude::*;
use num_complex::Complex;
use std::f64::consts::PI;

/// A smooth unitary "hidden gauge" at one k-point, built from a
/// skew-Hermitian generator with band-dependent harmonics of the fractional
/// coordinates. Deterministic in all inputs.
fn hidden_rotation(kf: ArrayView1<f64>, n_band: usize) -> Array2<Complex<f64>> {
    let mut g = Array2::<Complex<f64>>::zeros((n_band, n_band));
    for p in 0..n_band {
        for q in (p + 1)..n_band {
            let phase = 2.0 * PI * (kf[0] * ((p + 1) as f64) + kf[1] * ((q + 1) as f64) + kf[2]);
            let val = Complex::new(0.2 * phase.sin(), 0.15 * phase.cos());
            g[[p, q]] = val;
            g[[q, p]] = -val.conj();
        }
        let diag = 2.0 * PI * (kf[0] + kf[1] * ((p + 1) as f64));
        g[[p, p]] = Complex::new(0.0, 0.1 * diag.sin());
    }
    exp_skew(&g, 1.0).unwrap()
}

/// A 2x2x2 cubic crystal whose overlaps are exactly
/// $Q_k^\dag\,\mathrm{diag}(e^{-i b\cdot\tau_n})\,Q_{k+b}$ for smooth hidden
/// rotations $Q_k$: the gauge $U_k=Q_k^\dag$ reaches zero total spread with
/// Wannier centers at $\tau_n$. The returned model starts from the identity
/// gauge on the first `n_wann` bands.
pub fn toy_model(n_band: usize, n_wann: usize) -> Model {
    let k_mesh = [2usize, 2, 2];
    let nk = 8;
    let lat = Array2::<f64>::eye(3);
    let lat_g = Array2::<f64>::eye(3) * (2.0 * PI);
    let k_points = crate::kpoints::gen_kmesh(k_mesh);
    let bv = crate::bvector::build_bvectors(&k_points, k_mesh, &lat_g, 1e-6).unwrap();
    let n_bvec = bv.n_bvec();

    let tau: Vec<[f64; 3]> = (0..n_band)
        .map(|n| {
            let x = n as f64;
            [0.1 + 0.05 * x, 0.05 + 0.08 * x, 0.3 - 0.07 * x]
        })
        .collect();
    let q: Vec<Array2<Complex<f64>>> = (0..nk)
        .map(|k| hidden_rotation(k_points.row(k), n_band))
        .collect();

    let mut m = Array4::<Complex<f64>>::zeros((nk, n_bvec, n_band, n_band));
    for k in 0..nk {
        let qk_dag = q[k].t().mapv(|x| x.conj());
        for b in 0..n_bvec {
            let kpb = bv.kpb_k[[k, b]];
            let mut d = Array2::<Complex<f64>>::zeros((n_band, n_band));
            for n in 0..n_band {
                let bdott = (0..3).map(|r| bv.vectors[[b, r]] * tau[n][r]).sum::<f64>();
                d[[n, n]] = Complex::new(0.0, -bdott).exp();
            }
            let mkb = qk_dag.dot(&d).dot(&q[kpb]);
            m.slice_mut(s![k, b, .., ..]).assign(&mkb);
        }
    }

    let mut u = Array3::<Complex<f64>>::zeros((nk, n_band, n_wann));
    for k in 0..nk {
        for n in 0..n_wann {
            u[[k, n, n]] = Complex::new(1.0, 0.0);
        }
    }
    let mut eig = Array2::<f64>::zeros((nk, n_wann));
    for k in 0..nk {
        for n in 0..n_wann {
            eig[[k, n]] = n as f64;
        }
    }
    let frozen = Array2::from_elem((nk, n_band), false);
    Model::new(lat, k_mesh, bv, frozen, m, u, eig).unwrap()
}
