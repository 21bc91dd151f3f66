//! The center container: a structure-of-arrays over all skeleton centers
//! plus the point cloud they contract toward.
//!
//! Centers are created once at seeding time and mutated in place every
//! inner iteration; the point cloud and its density weights stay immutable
//! for the whole run. All per-round position updates are Jacobi style:
//! every new position is computed from the same prior snapshot before any
//! update is applied.

use anyhow::{bail, Result};
use nalgebra::{Matrix3, Vector3};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::shape;
use crate::terms::{attraction, repulsion};

/// Classification of a center's local geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CenterLabel {
    Unclassified,
    Branch,
    NonBranch,
    Bridge,
}

/// The ordered collection of all centers, their per-center state, and the
/// current bandwidth. Owns the (possibly subsampled) point cloud.
#[derive(Debug, Clone)]
pub struct CenterSet {
    points: Vec<Vector3<f64>>,
    positions: Vec<Vector3<f64>>,
    frames: Vec<Matrix3<f64>>,
    eigenvalues: Vec<Vector3<f64>>,
    sigmas: Vec<f64>,
    labels: Vec<CenterLabel>,
    connections: Vec<Vec<usize>>,
    h: f64,
    h0: f64,
}

impl CenterSet {
    /// Seeds `center_count` centers by sampling distinct cloud points with
    /// the provided (deterministically seeded) generator.
    pub fn seed(points: Vec<Vector3<f64>>, center_count: usize, rng: &mut StdRng) -> Result<Self> {
        if center_count == 0 {
            bail!("Center count must be at least one.");
        }
        if points.len() <= center_count {
            bail!(
                "Point cloud must be larger than the requested center count ({} points, {} centers).",
                points.len(),
                center_count
            );
        }

        let indices = rand::seq::index::sample(rng, points.len(), center_count);
        let positions: Vec<Vector3<f64>> = indices.iter().map(|i| points[i]).collect();
        let h0 = initial_bandwidth(&points);

        Ok(Self {
            points,
            positions,
            frames: vec![Matrix3::identity(); center_count],
            eigenvalues: vec![Vector3::zeros(); center_count],
            sigmas: vec![0.0; center_count],
            labels: vec![CenterLabel::Unclassified; center_count],
            connections: vec![Vec::new(); center_count],
            h: h0,
            h0,
        })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// The retained point cloud the centers contract toward.
    pub fn points(&self) -> &[Vector3<f64>] {
        &self.points
    }

    /// Current center positions (the skeleton points).
    pub fn positions(&self) -> &[Vector3<f64>] {
        &self.positions
    }

    /// Owned copy of the current center positions, for consumers that must
    /// outlive further mutation (e.g. before/after observers).
    pub fn positions_owned(&self) -> Vec<Vector3<f64>> {
        self.positions.clone()
    }

    pub fn position(&self, index: usize) -> Vector3<f64> {
        self.positions[index]
    }

    /// Local frame of a center; columns are unit eigenvectors ordered by
    /// descending eigenvalue, column 0 being the tangent estimate.
    pub fn frame(&self, index: usize) -> &Matrix3<f64> {
        &self.frames[index]
    }

    pub fn eigenvalues(&self, index: usize) -> Vector3<f64> {
        self.eigenvalues[index]
    }

    pub fn sigma(&self, index: usize) -> f64 {
        self.sigmas[index]
    }

    pub fn label(&self, index: usize) -> CenterLabel {
        self.labels[index]
    }

    pub fn labels(&self) -> &[CenterLabel] {
        &self.labels
    }

    pub fn set_label(&mut self, index: usize, label: CenterLabel) {
        self.labels[index] = label;
    }

    /// Indices of centers connected to `index`.
    pub fn connections(&self, index: usize) -> &[usize] {
        &self.connections[index]
    }

    /// Records a symmetric connection between two centers.
    pub fn connect(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        if !self.connections[a].contains(&b) {
            self.connections[a].push(b);
        }
        if !self.connections[b].contains(&a) {
            self.connections[b].push(a);
        }
    }

    pub fn clear_connections(&mut self) {
        for list in &mut self.connections {
            list.clear();
        }
    }

    /// Current bandwidth, as set by the most recent contraction round.
    pub fn bandwidth(&self) -> f64 {
        self.h
    }

    /// Initial bandwidth estimated from the cloud at seeding time.
    pub fn h0(&self) -> f64 {
        self.h0
    }

    /// One Jacobi contraction round at bandwidth `h`.
    ///
    /// For every center, the attraction and repulsion terms and the local
    /// linearity are evaluated against the same prior snapshot of all
    /// positions; no center observes a sibling's already-advanced position
    /// within the round. The new position blends the two terms as
    /// `sigma * repulsion + (1 - sigma) * attraction`, falling back to
    /// whichever term is defined when the other is not and keeping the old
    /// position when both are undefined. Returns the accumulated movement
    /// across all centers.
    pub fn contract(&mut self, h: f64, density_weights: &[f64]) -> f64 {
        self.h = h;
        let snapshot = self.positions.clone();

        let mut error = 0.0;
        let mut updated = Vec::with_capacity(snapshot.len());
        for (i, current) in snapshot.iter().enumerate() {
            let pull = attraction(current, &self.points, h, density_weights);
            let smooth = repulsion(current, i, &snapshot, h);
            let sigma = shape::analyze(current, &snapshot, h).sigma;

            let next = match (pull, smooth) {
                (Some(a), Some(s)) => sigma * s + (1.0 - sigma) * a,
                (Some(a), None) => a,
                (None, Some(s)) => s,
                (None, None) => *current,
            };

            error += (next - current).norm();
            updated.push(next);
        }

        self.positions = updated;
        error
    }

    /// Recomputes every center's frame, eigenvalues, and sigma from the
    /// current positions at the current bandwidth.
    pub fn update_properties(&mut self) {
        let snapshot = self.positions.clone();
        for i in 0..self.positions.len() {
            let local = shape::analyze(&snapshot[i], &snapshot, self.h);
            self.sigmas[i] = local.sigma;
            self.frames[i] = local.frame;
            self.eigenvalues[i] = local.eigenvalues;
        }
    }

    pub(crate) fn set_position(&mut self, index: usize, position: Vector3<f64>) {
        self.positions[index] = position;
    }

    #[cfg(test)]
    pub(crate) fn set_frame(&mut self, index: usize, frame: Matrix3<f64>) {
        self.frames[index] = frame;
    }
}

/// Initial bandwidth heuristic: twice the bounding-box diagonal divided by
/// the cube root of the cloud size.
fn initial_bandwidth(points: &[Vector3<f64>]) -> f64 {
    let mut min = points[0];
    let mut max = points[0];
    for p in points {
        min = min.inf(p);
        max = max.sup(p);
    }
    let diagonal = (max - min).norm();
    2.0 * diagonal / (points.len() as f64).cbrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::density_over_cloud;
    use rand::SeedableRng;

    fn grid_cloud() -> Vec<Vector3<f64>> {
        let mut points = Vec::new();
        for i in 0..5 {
            for j in 0..5 {
                for k in 0..3 {
                    points.push(Vector3::new(i as f64, j as f64, k as f64 * 0.5));
                }
            }
        }
        points
    }

    #[test]
    fn seeding_is_deterministic_for_a_fixed_seed() {
        let points = grid_cloud();
        let mut rng_a = StdRng::seed_from_u64(7);
        let mut rng_b = StdRng::seed_from_u64(7);
        let a = CenterSet::seed(points.clone(), 10, &mut rng_a).unwrap();
        let b = CenterSet::seed(points, 10, &mut rng_b).unwrap();
        assert_eq!(a.positions(), b.positions());
    }

    #[test]
    fn seeding_rejects_too_small_clouds() {
        let points = vec![Vector3::zeros(); 5];
        let mut rng = StdRng::seed_from_u64(0);
        assert!(CenterSet::seed(points, 5, &mut rng).is_err());
    }

    #[test]
    fn initial_bandwidth_is_positive_and_scale_dependent() {
        let small = grid_cloud();
        let large: Vec<_> = small.iter().map(|p| p * 10.0).collect();
        let h_small = initial_bandwidth(&small);
        let h_large = initial_bandwidth(&large);
        assert!(h_small > 0.0);
        assert!((h_large / h_small - 10.0).abs() < 1e-9);
    }

    #[test]
    fn contract_moves_centers_and_reports_finite_error() {
        let points = grid_cloud();
        let mut rng = StdRng::seed_from_u64(11);
        let mut centers = CenterSet::seed(points, 8, &mut rng).unwrap();
        let h0 = centers.h0();
        let weights = density_over_cloud(centers.points(), h0);

        let error = centers.contract(h0, &weights);
        assert!(error.is_finite());
        assert!(error > 0.0);
        for p in centers.positions() {
            assert!(p.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn update_properties_keeps_sigma_in_unit_interval() {
        let points = grid_cloud();
        let mut rng = StdRng::seed_from_u64(13);
        let mut centers = CenterSet::seed(points, 8, &mut rng).unwrap();
        let h0 = centers.h0();
        let weights = density_over_cloud(centers.points(), h0);

        centers.contract(h0, &weights);
        centers.update_properties();
        for i in 0..centers.len() {
            let sigma = centers.sigma(i);
            assert!((0.0..=1.0).contains(&sigma));
            for col in 0..3 {
                assert!((centers.frame(i).column(col).norm() - 1.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn connections_are_symmetric_and_deduplicated() {
        let points = grid_cloud();
        let mut rng = StdRng::seed_from_u64(17);
        let mut centers = CenterSet::seed(points, 6, &mut rng).unwrap();

        centers.connect(0, 3);
        centers.connect(3, 0);
        centers.connect(2, 2);

        assert_eq!(centers.connections(0), &[3]);
        assert_eq!(centers.connections(3), &[0]);
        assert!(centers.connections(2).is_empty());

        centers.clear_connections();
        assert!(centers.connections(0).is_empty());
    }
}
