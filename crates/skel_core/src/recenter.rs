//! Branch recentering post-pass.
//!
//! Contraction can drag branch centers off the true medial axis, toward
//! whichever side of the tube was sampled more densely. For each branch
//! center this pass projects its nearest neighbors onto the cross-sectional
//! plane orthogonal to the tangent, fits an ellipse to the projection, and
//! moves the center to the ellipse center. The along-tangent coordinate is
//! preserved exactly because the correction happens inside the plane.

use nalgebra::{Vector2, Vector3};
use rand::rngs::StdRng;
use rand::Rng;
use rstar::primitives::GeomWithData;
use rstar::RTree;
use tracing::debug;

use crate::centers::{CenterLabel, CenterSet};
use crate::ellipse::EllipseFit;

type IndexedCenter = GeomWithData<[f64; 3], usize>;

/// Recenters branch-labeled centers via cross-sectional ellipse fits.
///
/// `downsampling_rate` in `[0, 1]` is the probability that a given branch
/// center undergoes the pass (1 recenters all of them); `knn` is the
/// neighbor count gathered per center. Ellipse-fit failures and non-finite
/// tangents leave the affected center unchanged. Neighbor queries run
/// against the pre-pass snapshot of positions.
pub fn recenter_branches<F: EllipseFit>(
    centers: &mut CenterSet,
    downsampling_rate: f64,
    knn: usize,
    fitter: &F,
    rng: &mut StdRng,
) {
    let snapshot = centers.positions_owned();
    let tree = RTree::bulk_load(
        snapshot
            .iter()
            .enumerate()
            .map(|(i, p)| IndexedCenter::new([p.x, p.y, p.z], i))
            .collect(),
    );

    let mut moved = 0usize;
    let mut skipped = 0usize;
    for i in 0..centers.len() {
        if centers.label(i) != CenterLabel::Branch {
            continue;
        }
        if rng.gen::<f64>() > downsampling_rate {
            continue;
        }

        let position = snapshot[i];
        let tangent = centers.frame(i).column(0).into_owned();
        if !tangent.iter().all(|v| v.is_finite()) {
            skipped += 1;
            continue;
        }
        let Some((u, v)) = plane_basis(&tangent) else {
            skipped += 1;
            continue;
        };

        // Neighbor offsets expressed in the cross-sectional plane. Dropping
        // the tangent component is the orthogonal projection.
        let projected: Vec<Vector2<f64>> = tree
            .nearest_neighbor_iter(&[position.x, position.y, position.z])
            .filter(|item| item.data != i)
            .take(knn)
            .filter_map(|item| {
                let neighbor = snapshot[item.data];
                if !neighbor.iter().all(|c| c.is_finite()) {
                    return None;
                }
                let offset = neighbor - position;
                Some(Vector2::new(offset.dot(&u), offset.dot(&v)))
            })
            .collect();

        match fitter.fit_center(&projected) {
            Some(ellipse_center) => {
                let corrected = position + ellipse_center.x * u + ellipse_center.y * v;
                centers.set_position(i, corrected);
                moved += 1;
            }
            None => skipped += 1,
        }
    }
    debug!(moved, skipped, "recenter pass finished");
}

/// Orthonormal basis of the plane orthogonal to `tangent`.
fn plane_basis(tangent: &Vector3<f64>) -> Option<(Vector3<f64>, Vector3<f64>)> {
    let norm = tangent.norm();
    if norm <= f64::EPSILON {
        return None;
    }
    let t = tangent / norm;
    let pick = if t.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let u = t.cross(&pick).normalize();
    let v = t.cross(&u);
    Some((u, v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ellipse::ConicFit;
    use approx::assert_relative_eq;
    use nalgebra::Matrix3;
    use rand::SeedableRng;

    /// Ten centers: index 0 at a known position with a z tangent, the rest
    /// on a circle in its cross-sectional plane.
    fn ring_fixture(ring_center: Vector3<f64>, offset: Vector2<f64>) -> CenterSet {
        let cloud: Vec<Vector3<f64>> = (0..30)
            .map(|i| Vector3::new(i as f64 * 0.1, (i % 3) as f64, (i % 5) as f64))
            .collect();
        let mut rng = StdRng::seed_from_u64(1);
        let mut centers = CenterSet::seed(cloud, 9, &mut rng).unwrap();

        let start = ring_center + Vector3::new(offset.x, offset.y, 0.0);
        centers.set_position(0, start);
        centers.set_frame(
            0,
            Matrix3::from_columns(&[Vector3::z(), Vector3::x(), Vector3::y()]),
        );
        centers.set_label(0, CenterLabel::Branch);

        for k in 0..8 {
            let angle = k as f64 * std::f64::consts::FRAC_PI_4;
            let on_ring = ring_center + Vector3::new(angle.cos(), angle.sin(), 0.0);
            centers.set_position(k + 1, on_ring);
        }
        centers
    }

    #[test]
    fn symmetric_neighborhood_leaves_center_fixed() {
        let ring_center = Vector3::new(2.0, -1.0, 3.0);
        let mut centers = ring_fixture(ring_center, Vector2::zeros());
        let mut rng = StdRng::seed_from_u64(2);

        recenter_branches(&mut centers, 1.0, 8, &ConicFit, &mut rng);

        let corrected = centers.position(0);
        assert_relative_eq!(corrected.x, ring_center.x, epsilon = 1e-9);
        assert_relative_eq!(corrected.y, ring_center.y, epsilon = 1e-9);
        assert_relative_eq!(corrected.z, ring_center.z, epsilon = 1e-9);
    }

    #[test]
    fn drifted_center_is_pulled_back_to_the_ring_axis() {
        let ring_center = Vector3::new(0.0, 0.0, 1.0);
        let drift = Vector2::new(0.4, -0.3);
        let mut centers = ring_fixture(ring_center, drift);
        let mut rng = StdRng::seed_from_u64(3);

        recenter_branches(&mut centers, 1.0, 8, &ConicFit, &mut rng);

        let corrected = centers.position(0);
        assert_relative_eq!(corrected.x, ring_center.x, epsilon = 1e-9);
        assert_relative_eq!(corrected.y, ring_center.y, epsilon = 1e-9);
        // Along-tangent coordinate is untouched.
        assert_relative_eq!(corrected.z, ring_center.z, epsilon = 1e-9);
    }

    #[test]
    fn non_finite_tangent_leaves_center_unchanged() {
        let ring_center = Vector3::new(0.0, 0.0, 0.0);
        let mut centers = ring_fixture(ring_center, Vector2::zeros());
        centers.set_frame(
            0,
            Matrix3::from_columns(&[
                Vector3::new(f64::NAN, 0.0, 0.0),
                Vector3::x(),
                Vector3::y(),
            ]),
        );
        let before = centers.position(0);
        let mut rng = StdRng::seed_from_u64(4);

        recenter_branches(&mut centers, 1.0, 8, &ConicFit, &mut rng);
        assert_eq!(centers.position(0), before);
    }

    #[test]
    fn failed_fit_leaves_center_unchanged() {
        let ring_center = Vector3::new(0.0, 0.0, 0.0);
        let mut centers = ring_fixture(ring_center, Vector2::zeros());
        let before = centers.position(0);
        let mut rng = StdRng::seed_from_u64(5);

        // Too few neighbors for a conic.
        recenter_branches(&mut centers, 1.0, 3, &ConicFit, &mut rng);
        assert_eq!(centers.position(0), before);
    }

    #[test]
    fn zero_downsampling_rate_skips_every_center() {
        let ring_center = Vector3::new(1.0, 1.0, 1.0);
        let mut centers = ring_fixture(ring_center, Vector2::new(0.5, 0.0));
        let before = centers.position(0);
        let mut rng = StdRng::seed_from_u64(6);

        recenter_branches(&mut centers, 0.0, 8, &ConicFit, &mut rng);
        assert_eq!(centers.position(0), before);
    }
}
