//!Monkhorst-Pack mesh generation and mesh index arithmetic. The k-point
//!storage order is lexicographic with the last mesh index running fastest;
//!every component that traverses the mesh (overlap lookup, parallel
//!transport) relies on this order being fixed.
use ndarray::{Array1, Array2};

/// Fractional k-points of a `n1 x n2 x n3` Monkhorst-Pack mesh, one row per
/// k-point, in lexicographic order.
#[allow(non_snake_case)]
pub fn gen_kmesh(k_mesh: [usize; 3]) -> Array2<f64> {
    let nk = k_mesh[0] * k_mesh[1] * k_mesh[2];
    let mut kvec = Array2::<f64>::zeros((nk, 3));
    let mut row = 0;
    for i in 0..k_mesh[0] {
        for j in 0..k_mesh[1] {
            for l in 0..k_mesh[2] {
                kvec[[row, 0]] = (i as f64) / (k_mesh[0] as f64);
                kvec[[row, 1]] = (j as f64) / (k_mesh[1] as f64);
                kvec[[row, 2]] = (l as f64) / (k_mesh[2] as f64);
                row += 1;
            }
        }
    }
    kvec
}

/// The flat index of the mesh point `(i,j,l)`.
#[inline(always)]
pub fn kpt_index(idx: [usize; 3], k_mesh: [usize; 3]) -> usize {
    (idx[0] * k_mesh[1] + idx[1]) * k_mesh[2] + idx[2]
}

/// The mesh coordinates of a flat k-point index.
#[inline(always)]
pub fn index_kpt(ik: usize, k_mesh: [usize; 3]) -> [usize; 3] {
    let l = ik % k_mesh[2];
    let j = (ik / k_mesh[2]) % k_mesh[1];
    let i = ik / (k_mesh[1] * k_mesh[2]);
    [i, j, l]
}

/// Shift the mesh point `idx` by an integer offset, wrapping periodically.
/// Returns the flat index of the shifted point and the reciprocal lattice
/// vector absorbed by the wrap, so that
/// `k[idx] + offset/mesh = k[shifted] + G`.
#[inline(always)]
pub fn shift_kpt(idx: [usize; 3], offset: [isize; 3], k_mesh: [usize; 3]) -> (usize, [isize; 3]) {
    let mut wrapped = [0usize; 3];
    let mut g = [0isize; 3];
    for r in 0..3 {
        let n = k_mesh[r] as isize;
        let shifted = idx[r] as isize + offset[r];
        wrapped[r] = shifted.rem_euclid(n) as usize;
        g[r] = shifted.div_euclid(n);
    }
    (kpt_index(wrapped, k_mesh), g)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gen_kmesh() {
        let kmesh = gen_kmesh([2, 2, 2]);
        assert_eq!(kmesh.shape(), &[8, 3]);
        assert_eq!(kmesh.row(0).to_vec(), vec![0.0, 0.0, 0.0]);
        assert_eq!(kmesh.row(1).to_vec(), vec![0.0, 0.0, 0.5]);
        assert_eq!(kmesh.row(7).to_vec(), vec![0.5, 0.5, 0.5]);
    }

    #[test]
    fn index_round_trip() {
        let mesh = [3, 4, 5];
        for ik in 0..60 {
            assert_eq!(kpt_index(index_kpt(ik, mesh), mesh), ik);
        }
    }

    #[test]
    fn shift_wraps_and_records_g() {
        let mesh = [2, 2, 2];
        let (ik, g) = shift_kpt([1, 0, 1], [1, 0, 1], mesh);
        assert_eq!(ik, kpt_index([0, 0, 0], mesh));
        assert_eq!(g, [1, 0, 1]);
        let (ik, g) = shift_kpt([0, 0, 0], [-1, 0, 0], mesh);
        assert_eq!(ik, kpt_index([1, 0, 0], mesh));
        assert_eq!(g, [-1, 0, 0]);
    }
}
