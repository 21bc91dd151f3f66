//! Radial kernel and local-density weights.
//!
//! The kernel is a Gaussian bump `theta(r, h) = exp(-r^2 / (h/2)^2)` whose
//! bandwidth `h` sets the spatial scale of influence. Density weights
//! normalize every downstream weighting so that densely sampled regions of
//! the cloud do not dominate the contraction.

use nalgebra::Vector3;

/// Smallest value the kernel is allowed to return. Keeps downstream
/// denominators representable and never exactly zero.
pub const THETA_FLOOR: f64 = 1e-323;

/// Offset added to distances before they are used as divisors, so a query
/// coinciding with a sample does not produce a singularity.
pub const DIST_EPSILON: f64 = 1e-10;

/// Evaluates the radial kernel at distance `r` with bandwidth `h`.
///
/// The result lies in `(0, 1]`: it is clipped below at [`THETA_FLOOR`]
/// rather than underflowing to zero.
pub fn theta(r: f64, h: f64) -> f64 {
    let half = h / 2.0;
    let value = (-(r * r) / (half * half)).exp();
    value.max(THETA_FLOOR)
}

/// Per-point local density normalizers at bandwidth `hd`.
///
/// For each point `p_j` this is `1 + sum_i theta(|p_i - p_j|, hd)`, with the
/// self term included (contributing exactly 1), so every weight is at least
/// 1. Computed once per run and held read-only through all iterations.
/// Quadratic in the cloud size; acceptable for the cloud caps this crate
/// targets.
pub fn density_over_cloud(points: &[Vector3<f64>], hd: f64) -> Vec<f64> {
    points
        .iter()
        .map(|p| density_at(p, points, hd))
        .collect()
}

/// Density estimate anchored at an arbitrary query location.
///
/// Same sum as [`density_over_cloud`] but against a location that need not
/// be a member of the cloud. Returns a single scalar.
pub fn density_at(location: &Vector3<f64>, points: &[Vector3<f64>], hd: f64) -> f64 {
    let sum: f64 = points
        .iter()
        .map(|p| theta((p - location).norm(), hd))
        .sum();
    1.0 + sum
}
