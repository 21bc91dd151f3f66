//! The two weighted-centroid terms driving the contraction update.
//!
//! `attraction` (term1) pulls a center toward the local mass of the raw
//! point cloud; `repulsion` (term2) pulls it toward the centroid of its
//! neighboring centers, countering over-contraction of thin regions. Both
//! return `None` instead of dividing by a vanishing weight sum.

use nalgebra::Vector3;

use crate::kernel::{theta, DIST_EPSILON};

/// Weight sums at or below this threshold make a term undefined.
pub const WEIGHT_SUM_FLOOR: f64 = 1e-20;

/// Point-attraction term: the kernel-weighted centroid of the cloud as seen
/// from `center`, with each point's contribution divided by its local
/// density weight.
///
/// Returns `None` when the total weight is at or below
/// [`WEIGHT_SUM_FLOOR`], e.g. when every point lies many bandwidths away.
/// Never returns non-finite values.
pub fn attraction(
    center: &Vector3<f64>,
    points: &[Vector3<f64>],
    h: f64,
    density_weights: &[f64],
) -> Option<Vector3<f64>> {
    debug_assert_eq!(points.len(), density_weights.len());

    let mut weight_sum = 0.0;
    let mut weighted = Vector3::zeros();
    for (point, density) in points.iter().zip(density_weights) {
        let r = (point - center).norm() + DIST_EPSILON;
        let alpha = theta(r, h) / r / density;
        weight_sum += alpha;
        weighted += point * alpha;
    }

    if weight_sum > WEIGHT_SUM_FLOOR {
        Some(weighted / weight_sum)
    } else {
        None
    }
}

/// Center-smoothing term: the kernel-weighted centroid of all *other*
/// centers, with weights `theta(r, h) / r^2`.
///
/// `self_index` identifies the queried center inside `centers` so it can be
/// excluded from its own neighborhood. Same undefined-sum sentinel policy
/// as [`attraction`].
pub fn repulsion(
    center: &Vector3<f64>,
    self_index: usize,
    centers: &[Vector3<f64>],
    h: f64,
) -> Option<Vector3<f64>> {
    let mut weight_sum = 0.0;
    let mut weighted = Vector3::zeros();
    for (j, other) in centers.iter().enumerate() {
        if j == self_index {
            continue;
        }
        let r = (other - center).norm() + DIST_EPSILON;
        let beta = theta(r, h) / (r * r);
        weight_sum += beta;
        weighted += other * beta;
    }

    if weight_sum > WEIGHT_SUM_FLOOR {
        Some(weighted / weight_sum)
    } else {
        None
    }
}
