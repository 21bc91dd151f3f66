//! Local shape analysis via weighted-covariance eigendecomposition.
//!
//! For a center and its neighboring centers, the kernel-weighted covariance
//! of neighbor offsets is eigendecomposed into an ordered local frame and a
//! linearity score `sigma = lambda_max / sum(lambda)`. Sigma near 1 marks a
//! locally linear (tubular) neighborhood, lower values planar or blob-like
//! ones.

use nalgebra::{Matrix3, Vector3, SVD};
use num_complex::Complex;

use crate::kernel::theta;

/// Result of analyzing one center's neighborhood.
#[derive(Debug, Clone)]
pub struct LocalShape {
    /// Linearity score in `[0, 1]`.
    pub sigma: f64,
    /// Columns are unit eigenvectors ordered by descending eigenvalue.
    /// Eigenvector sign is arbitrary per decomposition run.
    pub frame: Matrix3<f64>,
    /// Eigenvalues in descending order, matching the frame columns.
    pub eigenvalues: Vector3<f64>,
}

/// Kernel-weighted covariance of neighbor offsets:
/// `C = sum_j theta(|r_j|, h) * (r_j r_j^T)` with `r_j = neighbor_j - center`.
///
/// Symmetric by construction; the decomposition below still tolerates
/// floating noise as if it were not.
pub fn weighted_covariance(
    center: &Vector3<f64>,
    neighbors: &[Vector3<f64>],
    h: f64,
) -> Matrix3<f64> {
    let mut cov = Matrix3::zeros();
    for neighbor in neighbors {
        let offset = neighbor - center;
        let weight = theta(offset.norm(), h);
        cov += weight * offset * offset.transpose();
    }
    cov
}

/// Analyzes a center's neighborhood at bandwidth `h`.
///
/// Neighbors may include the center itself; a zero offset contributes
/// nothing to the covariance. A fully degenerate (all-zero) covariance
/// yields sigma 0; its frame columns stay unit-norm but carry no
/// directional information (repeated eigenvalues may even share a
/// nullspace vector), and nothing downstream consumes them in that case.
pub fn analyze(center: &Vector3<f64>, neighbors: &[Vector3<f64>], h: f64) -> LocalShape {
    let cov = weighted_covariance(center, neighbors, h);
    let mut pairs = eigenpairs(&cov);
    pairs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let eigenvalues = Vector3::new(pairs[0].0, pairs[1].0, pairs[2].0);
    let frame = Matrix3::from_columns(&[pairs[0].1, pairs[1].1, pairs[2].1]);

    let sum: f64 = eigenvalues.iter().sum();
    let sigma = if sum > f64::MIN_POSITIVE {
        (eigenvalues[0] / sum).clamp(0.0, 1.0)
    } else {
        0.0
    };

    LocalShape {
        sigma,
        frame,
        eigenvalues,
    }
}

/// General eigenpairs of a (nominally symmetric) 3x3 matrix.
///
/// Eigenvalues are computed over the complex field and coerced to their
/// real parts; each eigenvector is recovered as the SVD nullspace of the
/// shifted matrix and renormalized to unit length. This tolerates the
/// numerically asymmetric case rather than assuming exact symmetry.
fn eigenpairs(matrix: &Matrix3<f64>) -> [(f64, Vector3<f64>); 3] {
    let eigenvalues = matrix.complex_eigenvalues();
    let complex_matrix = matrix.map(|v| Complex::new(v, 0.0));

    let mut pairs = [(0.0, Vector3::zeros()); 3];
    for (idx, pair) in pairs.iter_mut().enumerate() {
        let lambda = eigenvalues[idx];

        let mut shifted = complex_matrix;
        for i in 0..3 {
            shifted[(i, i)] -= lambda;
        }

        let vector = SVD::new(shifted, false, true)
            .v_t
            .and_then(|v_t| {
                let row = v_t.row(2);
                let real = Vector3::new(row[0].re, row[1].re, row[2].re);
                let norm = real.norm();
                (norm > f64::EPSILON).then(|| real / norm)
            })
            .unwrap_or_else(|| canonical_axis(idx));

        *pair = (lambda.re, vector);
    }
    pairs
}

fn canonical_axis(idx: usize) -> Vector3<f64> {
    let mut axis = Vector3::zeros();
    axis[idx] = 1.0;
    axis
}
