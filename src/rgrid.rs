//!Real-space sampling grid handed to visualization collaborators together
//!with a localized gauge. The optimizer never touches it.
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

/// A uniform fractional-coordinate grid over one unit cell.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RGrid {
    /// The lattice vectors spanning the grid, one per row.
    pub lat: Array2<f64>,
    /// Fractional x coordinate of every grid point.
    pub X: Array3<f64>,
    /// Fractional y coordinate of every grid point.
    pub Y: Array3<f64>,
    /// Fractional z coordinate of every grid point.
    pub Z: Array3<f64>,
}

#[allow(non_snake_case)]
impl RGrid {
    pub fn new(lat: Array2<f64>, n: [usize; 3]) -> RGrid {
        let mut X = Array3::<f64>::zeros(n);
        let mut Y = Array3::<f64>::zeros(n);
        let mut Z = Array3::<f64>::zeros(n);
        for i in 0..n[0] {
            for j in 0..n[1] {
                for l in 0..n[2] {
                    X[[i, j, l]] = (i as f64) / (n[0] as f64);
                    Y[[i, j, l]] = (j as f64) / (n[1] as f64);
                    Z[[i, j, l]] = (l as f64) / (n[2] as f64);
                }
            }
        }
        RGrid { lat, X, Y, Z }
    }

    #[inline(always)]
    pub fn shape(&self) -> [usize; 3] {
        let d = self.X.dim();
        [d.0, d.1, d.2]
    }

    /// Cartesian position of one grid point.
    pub fn cartesian(&self, idx: [usize; 3]) -> Array1<f64> {
        let frac = arr1(&[self.X[idx], self.Y[idx], self.Z[idx]]);
        frac.dot(&self.lat)
    }
}
