//! 2D ellipse-fit primitive used by the recentering post-pass.
//!
//! The fit is pluggable: the post-pass only needs the ellipse center, so
//! the trait exposes exactly that and reports failure by returning `None`.

use nalgebra::{DMatrix, SymmetricEigen, Vector2};

/// A conic-fitting primitive returning the center of the fitted ellipse.
pub trait EllipseFit {
    /// Fits an ellipse to `points` and returns its center, or `None` when
    /// the input is rejected (too few points, colinear points, or a conic
    /// that is not an ellipse).
    fn fit_center(&self, points: &[Vector2<f64>]) -> Option<Vector2<f64>>;
}

/// Direct least-squares conic fit.
///
/// Builds the design matrix of `[x^2, xy, y^2, x, y, 1]` rows over
/// mean-centered coordinates and takes the eigenvector of the smallest
/// eigenvalue of its Gram matrix as the conic coefficients. Inputs whose
/// best conic is not an ellipse (`b^2 - 4ac >= 0`) are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConicFit;

impl EllipseFit for ConicFit {
    fn fit_center(&self, points: &[Vector2<f64>]) -> Option<Vector2<f64>> {
        if points.len() < 5 {
            return None;
        }

        // Mean-center for conditioning; undone on the way out.
        let mut mean = Vector2::zeros();
        for p in points {
            mean += p;
        }
        mean /= points.len() as f64;

        let mut design = DMatrix::zeros(points.len(), 6);
        for (i, p) in points.iter().enumerate() {
            let x = p.x - mean.x;
            let y = p.y - mean.y;
            design[(i, 0)] = x * x;
            design[(i, 1)] = x * y;
            design[(i, 2)] = y * y;
            design[(i, 3)] = x;
            design[(i, 4)] = y;
            design[(i, 5)] = 1.0;
        }

        let gram = design.transpose() * &design;
        if gram.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let eig = SymmetricEigen::new(gram);
        let mut min_idx = 0;
        for i in 1..eig.eigenvalues.len() {
            if eig.eigenvalues[i] < eig.eigenvalues[min_idx] {
                min_idx = i;
            }
        }
        let conic = eig.eigenvectors.column(min_idx);
        let (a, b, c, d, e) = (conic[0], conic[1], conic[2], conic[3], conic[4]);

        let discriminant = b * b - 4.0 * a * c;
        if discriminant >= 0.0 {
            return None;
        }

        // Stationary point of the conic form.
        let cx = (b * e - 2.0 * c * d) / -discriminant;
        let cy = (b * d - 2.0 * a * e) / -discriminant;
        if !cx.is_finite() || !cy.is_finite() {
            return None;
        }

        Some(Vector2::new(cx + mean.x, cy + mean.y))
    }
}
