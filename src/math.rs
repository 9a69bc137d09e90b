//!Dense-matrix helpers shared by the gauge optimizers: Hermitian conjugation,
//!polar decomposition and the unitary matrix exponential of a skew-Hermitian
//!generator.
use crate::error::{Result, WannError};
use ndarray::prelude::*;
use ndarray::{ArrayBase, Data, Ix2};
use ndarray_linalg::{Eigh, SVD, UPLO};
use num_complex::Complex;

#[allow(non_snake_case)]
#[inline(always)]
pub fn dagger<S>(A: &ArrayBase<S, Ix2>) -> Array2<Complex<f64>>
where
    S: Data<Elem = Complex<f64>>,
{
    //! 做 $A^\dag$ 操作
    A.t().mapv(|x| x.conj())
}

#[allow(non_snake_case)]
#[inline(always)]
pub fn hermitize(A: &Array2<Complex<f64>>) -> Array2<Complex<f64>> {
    (A + &dagger(A)) * Complex::new(0.5, 0.0)
}

/// Frobenius norm of a complex matrix.
#[allow(non_snake_case)]
#[inline(always)]
pub fn norm_fro<S>(A: &ArrayBase<S, Ix2>) -> f64
where
    S: Data<Elem = Complex<f64>>,
{
    A.iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt()
}

/// The unitary polar factor of a (possibly rectangular, rows >= cols) matrix,
/// i.e. the semi-unitary matrix closest to the input in Frobenius norm,
/// obtained from the thin SVD $A=W\Sigma V^\dag$ as $W V^\dag$.
#[allow(non_snake_case)]
pub fn polar_unitary<S>(A: &ArrayBase<S, Ix2>) -> Result<Array2<Complex<f64>>>
where
    S: Data<Elem = Complex<f64>>,
{
    let n = A.ncols();
    let (w, _s, vt) = A.svd(true, true)?;
    let w = w.ok_or(WannError::Lapack {
        routine: "zgesvd",
        info: -1,
    })?;
    let vt = vt.ok_or(WannError::Lapack {
        routine: "zgesvd",
        info: -1,
    })?;
    Ok(w.slice(s![.., ..n]).dot(&vt))
}

/// $e^{\epsilon G}$ for a skew-Hermitian generator $G$, evaluated through the
/// eigendecomposition of the Hermitian matrix $-iG$. The result is unitary to
/// machine precision for any step $\epsilon$.
#[allow(non_snake_case)]
pub fn exp_skew(G: &Array2<Complex<f64>>, epsilon: f64) -> Result<Array2<Complex<f64>>> {
    let H = hermitize(&G.mapv(|x| x * Complex::new(0.0, -1.0)));
    let (vals, vecs) = H.eigh(UPLO::Lower)?;
    let phases = vals.mapv(|x| Complex::new(0.0, epsilon * x).exp());
    Ok(vecs.dot(&Array2::from_diag(&phases)).dot(&dagger(&vecs)))
}

/// $|U^\dag U - I|_F$, the semi-unitarity residual of a gauge matrix.
#[allow(non_snake_case)]
pub fn unitarity_residual<S>(U: &ArrayBase<S, Ix2>) -> f64
where
    S: Data<Elem = Complex<f64>>,
{
    let n = U.ncols();
    let overlap = dagger(U).dot(U);
    let eye = Array2::<Complex<f64>>::eye(n);
    norm_fro(&(overlap - eye))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn polar_of_unitary_is_identity_rotation() {
        let theta: f64 = 0.4;
        let u = array![
            [
                Complex::new(theta.cos(), 0.0),
                Complex::new(-theta.sin(), 0.0)
            ],
            [
                Complex::new(theta.sin(), 0.0),
                Complex::new(theta.cos(), 0.0)
            ],
        ];
        let scaled = u.mapv(|x| x * Complex::new(2.5, 0.0));
        let w = polar_unitary(&scaled).unwrap();
        assert!(norm_fro(&(&w - &u)) < 1e-12);
    }

    #[test]
    fn exp_skew_is_unitary() {
        let g = array![
            [Complex::new(0.0, 0.3), Complex::new(0.2, 0.5)],
            [Complex::new(-0.2, 0.5), Complex::new(0.0, -0.7)],
        ];
        let e = exp_skew(&g, 0.37).unwrap();
        assert!(unitarity_residual(&e) < 1e-12);
    }

    #[test]
    fn exp_skew_of_diagonal_generator_is_phase() {
        let g = array![[Complex::new(0.0, 1.0)]];
        let e = exp_skew(&g, 0.5).unwrap();
        assert!((e[[0, 0]] - Complex::new(0.0, 0.5).exp()).norm() < 1e-14);
    }
}
