//! Curve-skeleton extraction from unorganized 3D point clouds.
//!
//! A small set of representative centers is iteratively contracted toward
//! the local mass of the cloud while kernel-weighted principal-component
//! analysis distinguishes tubular regions from blob-like ones. Leaf
//! modules (`kernel`, `terms`, `shape`, `ellipse`) hold the numeric
//! primitives; `centers` owns the mutable center container; `contraction`
//! drives the two-level iteration; `recenter` corrects branch-point drift
//! after contraction.

pub mod centers;
pub mod contraction;
pub mod ellipse;
pub mod kernel;
pub mod labeling;
pub mod recenter;
pub mod shape;
pub mod terms;

pub use centers::{CenterLabel, CenterSet};
pub use contraction::{
    skeletonize, skeletonize_with, NoopObserver, RecenterObserver, SkeletonizeSettings,
};
pub use ellipse::{ConicFit, EllipseFit};
pub use labeling::{ConnectivityLabeler, SigmaLabeler};
