//! The two-level contraction loop driving centers toward the skeleton.
//!
//! The outer loop grows the bandwidth so early rounds resolve fine local
//! structure and later rounds bridge gaps between already-contracted
//! regions; the inner loop runs Jacobi contraction rounds until the
//! accumulated movement stops changing. Termination is by full skeleton
//! (no non-branch centers left), stagnation (five rounds without branch
//! progress), or the outer iteration cap.

use anyhow::{bail, Result};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::centers::{CenterLabel, CenterSet};
use crate::ellipse::{ConicFit, EllipseFit};
use crate::kernel::density_over_cloud;
use crate::labeling::{ConnectivityLabeler, SigmaLabeler};
use crate::recenter::recenter_branches;

/// Inner contraction rounds per bandwidth value.
const INNER_ITERATIONS: usize = 30;
/// Inner loop stops early when the movement error changes less than this.
const ERROR_TOLERANCE: f64 = 0.001;
/// Outer rounds without branch progress before giving up.
const STAGNATION_LIMIT: usize = 5;

/// Run parameters for a skeletonization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SkeletonizeSettings {
    /// Number of centers to contract; fixed for the run.
    pub center_count: usize,
    /// Larger clouds are randomly subsampled down to this many points.
    pub max_points: usize,
    /// Cap on outer (bandwidth-growing) rounds.
    pub max_iterations: usize,
    /// Probability that a branch center undergoes the recenter pass.
    pub downsampling_rate: f64,
    /// Whether to run the connectivity/labeling step each round.
    pub try_make_skeleton: bool,
    /// Neighborhood size for the recenter pass; 0 disables recentering.
    pub recenter_knn: usize,
    /// Seed for subsampling and center placement; runs are reproducible.
    pub seed: u64,
}

impl Default for SkeletonizeSettings {
    fn default() -> Self {
        Self {
            center_count: 1000,
            max_points: 10000,
            max_iterations: 50,
            downsampling_rate: 0.5,
            try_make_skeleton: true,
            recenter_knn: 200,
            seed: 3074,
        }
    }
}

/// Scoped hook around the recenter pass.
///
/// Fires before and after the pass whenever recentering is enabled, and
/// must never affect numerical results. The default methods are no-ops, so
/// visualization and debugging sinks only implement what they need.
pub trait RecenterObserver {
    fn before(&mut self, _positions: &[Vector3<f64>]) {}
    fn after(&mut self, _positions: &[Vector3<f64>]) {}
}

/// Observer that does nothing; the default when visualization is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RecenterObserver for NoopObserver {}

/// Extracts a curve skeleton from `points` with the default labeling
/// policy, conic fit, and no observer.
pub fn skeletonize(points: &[Vector3<f64>], settings: &SkeletonizeSettings) -> Result<CenterSet> {
    skeletonize_with(
        points,
        settings,
        &mut SigmaLabeler::default(),
        &ConicFit,
        &mut NoopObserver,
    )
}

/// Extracts a curve skeleton with explicit collaborators.
///
/// Preconditions are rejected before any iteration begins: the cloud must
/// be larger than both the requested center count and the recenter
/// neighborhood size, and the downsampling rate must lie in `[0, 1]`.
pub fn skeletonize_with<L, F, O>(
    points: &[Vector3<f64>],
    settings: &SkeletonizeSettings,
    labeler: &mut L,
    fitter: &F,
    observer: &mut O,
) -> Result<CenterSet>
where
    L: ConnectivityLabeler,
    F: EllipseFit,
    O: RecenterObserver,
{
    if points.len() <= settings.center_count {
        bail!(
            "Point cloud must be larger than the center count ({} points, {} centers).",
            points.len(),
            settings.center_count
        );
    }
    if settings.max_points <= settings.center_count {
        bail!(
            "max_points must exceed the center count ({} <= {}).",
            settings.max_points,
            settings.center_count
        );
    }
    if settings.recenter_knn > 0 && points.len() <= settings.recenter_knn {
        bail!(
            "Point cloud must be larger than the recenter neighborhood ({} points, knn {}).",
            points.len(),
            settings.recenter_knn
        );
    }
    if !(0.0..=1.0).contains(&settings.downsampling_rate) {
        bail!(
            "downsampling_rate must lie in [0, 1], got {}.",
            settings.downsampling_rate
        );
    }

    let mut rng = StdRng::seed_from_u64(settings.seed);

    let cloud: Vec<Vector3<f64>> = if points.len() > settings.max_points {
        rand::seq::index::sample(&mut rng, points.len(), settings.max_points)
            .iter()
            .map(|i| points[i])
            .collect()
    } else {
        points.to_vec()
    };

    let mut centers = CenterSet::seed(cloud, settings.center_count, &mut rng)?;
    let h0 = centers.h0();
    let mut h = h0;
    info!(
        h0,
        points = centers.points().len(),
        centers = centers.len(),
        max_iterations = settings.max_iterations,
        "starting contraction"
    );

    let density_weights = density_over_cloud(centers.points(), h0);

    let mut last_non_branch = centers.len();
    let mut unchanged_rounds = 0usize;

    for round in 0..settings.max_iterations {
        let bridge_count = count_label(&centers, CenterLabel::Bridge);
        let non_branch_count = count_label(&centers, CenterLabel::NonBranch);
        debug!(round, h, bridge_count, non_branch_count, "contraction round");

        let mut last_error = 0.0;
        for _ in 0..INNER_ITERATIONS {
            let error = centers.contract(h, &density_weights);
            centers.update_properties();
            if (error - last_error).abs() < ERROR_TOLERANCE {
                break;
            }
            last_error = error;
        }

        if settings.try_make_skeleton {
            labeler.find_connections(&mut centers);
        }

        let non_branch = count_label(&centers, CenterLabel::NonBranch);
        debug!(round, non_branch, "non-branch centers remaining");

        if non_branch == last_non_branch {
            unchanged_rounds += 1;
        } else if non_branch < last_non_branch {
            unchanged_rounds = 0;
        }

        if unchanged_rounds >= STAGNATION_LIMIT {
            info!(round, "no further branch progress; stopping");
            break;
        }
        if non_branch == 0 {
            info!(round, "found whole skeleton");
            break;
        }

        last_non_branch = non_branch;
        h += h0 / 2.0;
    }

    if settings.recenter_knn > 0 {
        observer.before(centers.positions());
        recenter_branches(
            &mut centers,
            settings.downsampling_rate,
            settings.recenter_knn,
            fitter,
            &mut rng,
        );
        observer.after(centers.positions());
    }

    Ok(centers)
}

fn count_label(centers: &CenterSet, label: CenterLabel) -> usize {
    centers.labels().iter().filter(|&&l| l == label).count()
}
