//! src/error.rs
//! This module defines the custom error types for the entire Wannier library.
//! By using a centralized error enum, fallible operations return recoverable
//! Results instead of panicking, which keeps the optimization pipeline usable
//! as a library component.

use thiserror::Error;

/// The primary error type for all fallible operations in this library.
#[derive(Error, Debug)]
pub enum WannError {
    // --- Input consistency ---
    #[error("Dimension mismatch for '{context}': expected {expected}, got {found}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("Gauge matrix at k-point {kpt} is not semi-unitary: |U^H U - I| = {residual:e}")]
    GaugeNotUnitary { kpt: usize, residual: f64 },

    // --- B-vector scheme construction ---
    #[error("No combination of the first {searched} neighbor shells satisfies the completeness condition")]
    InsufficientShells { searched: usize },

    #[error("The shell weight system is singular, least-squares residual {residual:e}")]
    DegenerateWeights { residual: f64 },

    #[error("k-point {kpt} is not connected to its path predecessor by any b-vector")]
    PathNotConnected { kpt: usize },

    // --- Subspace separation ---
    #[error("Requested partition of {n_first} out of {n_wann} Wannier functions is invalid")]
    InvalidPartition { n_first: usize, n_wann: usize },

    #[error("Cross-block overlap residual {residual:e} exceeds tolerance {tol:e}, the subspaces do not separate")]
    NonSeparableSubspace { residual: f64, tol: f64 },

    // --- Linear algebra backend ---
    #[error("Linear algebra operation failed")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error("LAPACK routine '{routine}' failed with non-zero info code: {info}")]
    Lapack { routine: &'static str, info: i32 },
}

/// A specialized `Result` type for this library's operations.
pub type Result<T> = std::result::Result<T, WannError>;
