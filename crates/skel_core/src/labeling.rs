//! Connectivity and labeling collaborator.
//!
//! The contraction controller only requires the trait; the concrete policy
//! deciding which centers form branches is pluggable. The default policy
//! here thresholds the linearity score and links branch centers along
//! their tangents.

use serde::{Deserialize, Serialize};

use crate::centers::{CenterLabel, CenterSet};

/// Decides center labels and inter-center connectivity after each
/// contraction round.
pub trait ConnectivityLabeler {
    fn find_connections(&mut self, centers: &mut CenterSet);
}

/// Default labeling policy.
///
/// A center whose sigma reaches `sigma_threshold` becomes a branch center
/// and is connected to its nearest sufficiently tangent-aligned neighbor on
/// each side, within the current bandwidth. Non-branch centers adjacent to
/// a branch become bridges; the rest stay non-branch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SigmaLabeler {
    pub sigma_threshold: f64,
    /// Minimum |cos| between a neighbor offset and the tangent for the
    /// neighbor to count as "along" the branch.
    pub alignment_threshold: f64,
}

impl Default for SigmaLabeler {
    fn default() -> Self {
        Self {
            sigma_threshold: 0.9,
            alignment_threshold: 0.7,
        }
    }
}

impl ConnectivityLabeler for SigmaLabeler {
    fn find_connections(&mut self, centers: &mut CenterSet) {
        let h = centers.bandwidth();
        let positions = centers.positions_owned();
        centers.clear_connections();

        for i in 0..centers.len() {
            if centers.sigma(i) < self.sigma_threshold {
                centers.set_label(i, CenterLabel::NonBranch);
                continue;
            }
            centers.set_label(i, CenterLabel::Branch);

            let tangent = centers.frame(i).column(0).into_owned();
            // Nearest aligned neighbor on each side of the tangent.
            let mut best: [Option<(f64, usize)>; 2] = [None, None];
            for (j, other) in positions.iter().enumerate() {
                if j == i {
                    continue;
                }
                let offset = other - positions[i];
                let dist = offset.norm();
                if dist <= 0.0 || dist > h {
                    continue;
                }
                let along = offset.dot(&tangent);
                if along.abs() / dist < self.alignment_threshold {
                    continue;
                }
                let side = usize::from(along < 0.0);
                if best[side].map_or(true, |(d, _)| dist < d) {
                    best[side] = Some((dist, j));
                }
            }
            for found in best.into_iter().flatten() {
                centers.connect(i, found.1);
            }
        }

        // A non-branch center linked to a branch acts as its bridge.
        for i in 0..centers.len() {
            if centers.label(i) != CenterLabel::NonBranch {
                continue;
            }
            let touches_branch = centers
                .connections(i)
                .iter()
                .any(|&j| centers.label(j) == CenterLabel::Branch);
            if touches_branch {
                centers.set_label(i, CenterLabel::Bridge);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn line_cloud() -> Vec<Vector3<f64>> {
        (0..40)
            .map(|i| Vector3::new(i as f64 * 0.25, 0.0, 0.0))
            .collect()
    }

    #[test]
    fn linear_centers_become_connected_branches() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut centers = CenterSet::seed(line_cloud(), 8, &mut rng).unwrap();
        let h = centers.h0();
        centers.contract(h, &vec![1.0; centers.points().len()]);
        centers.update_properties();

        let mut labeler = SigmaLabeler::default();
        labeler.find_connections(&mut centers);

        let branch_count = centers
            .labels()
            .iter()
            .filter(|&&l| l == CenterLabel::Branch)
            .count();
        assert_eq!(branch_count, centers.len());

        let connected = (0..centers.len())
            .filter(|&i| !centers.connections(i).is_empty())
            .count();
        assert!(connected >= centers.len() - 1);
    }

    #[test]
    fn blob_centers_stay_non_branch() {
        // Points spread over a ball give no center a linear neighborhood.
        let mut cloud = Vec::new();
        for i in 0..5 {
            for j in 0..5 {
                for k in 0..5 {
                    cloud.push(Vector3::new(i as f64, j as f64, k as f64));
                }
            }
        }
        let mut rng = StdRng::seed_from_u64(6);
        let mut centers = CenterSet::seed(cloud, 12, &mut rng).unwrap();
        centers.contract(centers.h0(), &vec![1.0; centers.points().len()]);
        centers.update_properties();

        let mut labeler = SigmaLabeler::default();
        labeler.find_connections(&mut centers);

        let non_branch = centers
            .labels()
            .iter()
            .filter(|&&l| matches!(l, CenterLabel::NonBranch | CenterLabel::Bridge))
            .count();
        assert!(non_branch > centers.len() / 2);
    }
}
