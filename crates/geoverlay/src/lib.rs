//! Polygon overlay engine used for areal apportionment.
//!
//! The crate exposes a narrow [`GeometryEngine`] trait (overlay, clip, erase,
//! dissolve, area, repair, reprojection) and a default [`PlanarEngine`]
//! implementation built on `geo` boolean operations, with an `rstar` R-tree
//! used to prune candidate pairs. All area computations assume the input is in
//! a projected, equal-area CRS with metre units.

mod crs;
mod engine;
mod index;
mod planar;
mod proj;
mod repair;

pub use crs::Crs;
pub use engine::{Fragment, GeometryEngine, OverlayError, Parents};
pub use index::SpatialIndex;
pub use planar::PlanarEngine;

/// Square metres per hectare.
pub const M2_PER_HA: f64 = 10_000.0;
