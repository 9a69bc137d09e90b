//!这个模块是用来求解厄米矩阵的部分本征值的模块, 用的lapack的 zheevx 函数求解.
//!The disentanglement step only ever needs the few highest eigenvectors of the
//!accumulated projector matrix, so an index-ranged solve is cheaper than a
//!full `Eigh` when the band manifold is large.
#[cfg(any(feature = "intel-mkl-system", feature = "intel-mkl-static"))]
extern crate intel_mkl_src as _src;

#[cfg(any(feature = "openblas-system", feature = "openblas-static"))]
extern crate openblas_src as _src;

#[cfg(any(feature = "netlib-system", feature = "netlib-static"))]
extern crate netlib_src as _src;

use crate::error::{Result, WannError};
use lapack::zheevx;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use ndarray_linalg::UPLO;
use num_complex::Complex;

/// Eigenvalues `il..=iu` (1-based, ascending order) of a Hermitian matrix and
/// the matching eigenvectors, returned with the eigenvectors in columns.
pub fn eigh_range_idx<S>(
    x: &ArrayBase<S, Ix2>,
    il: usize,
    iu: usize,
    uplo: UPLO,
) -> Result<(Array1<f64>, Array2<Complex<f64>>)>
where
    S: Data<Elem = Complex<f64>>,
{
    let n = x.shape()[0] as i32;
    let nsel = iu - il + 1;
    // LAPACK is column-major, so feed it the transposed row-major buffer
    let mut a: Vec<_> = x.t().iter().cloned().collect();
    let mut w = vec![0.0; n as usize];
    let mut z = vec![Complex::new(0.0, 0.0); (n as usize) * nsel];
    let mut m = 0;
    let mut info = 0;
    let mut ifail = vec![0; n as usize];
    let mut work = vec![Complex::new(0.0, 0.0); (2 * n) as usize];
    let mut rwork = vec![0.0; (7 * n) as usize];
    let mut iwork = vec![0; (5 * n) as usize];
    let job1 = b'V';
    let job2 = b'I';
    let job3 = match uplo {
        UPLO::Upper => b'U',
        UPLO::Lower => b'L',
    };

    unsafe {
        zheevx(
            job1,
            job2,
            job3,
            n,
            &mut a,
            n,
            0.0,
            0.0,
            il as i32,
            iu as i32,
            2.0 * f64::MIN_POSITIVE,
            &mut m,
            &mut w,
            &mut z,
            n,
            &mut work,
            2 * n,
            &mut rwork,
            &mut iwork,
            &mut ifail,
            &mut info,
        );
    }
    if info != 0 {
        return Err(WannError::Lapack {
            routine: "zheevx",
            info,
        });
    }
    if m as usize != nsel {
        return Err(WannError::Lapack {
            routine: "zheevx",
            info: m,
        });
    }
    let vals = Array1::<f64>::from_vec(w.into_iter().take(nsel).collect());
    // z holds the selected eigenvectors as column-major columns
    let vecs = Array2::<Complex<f64>>::from_shape_vec([nsel, n as usize], z)
        .map_err(|_| WannError::Lapack {
            routine: "zheevx",
            info: -1,
        })?
        .reversed_axes();
    Ok((vals, vecs))
}
