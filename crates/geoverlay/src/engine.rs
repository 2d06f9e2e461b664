use geo::MultiPolygon;
use smallvec::SmallVec;
use thiserror::Error;

use crate::Crs;

/// Parent indices of a fragment, one slot per overlaid input layer.
/// `None` means the fragment lies outside every feature of that layer.
pub type Parents = SmallVec<[Option<usize>; 4]>;

/// One piece of a topological overlay.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub geometry: MultiPolygon<f64>,
    pub parents: Parents,
    /// Planar area in square CRS units (m² for the working CRS).
    pub area: f64,
}

impl Fragment {
    /// Parent feature index in overlay layer `layer`, if any.
    #[inline]
    pub fn parent(&self, layer: usize) -> Option<usize> {
        self.parents.get(layer).copied().flatten()
    }
}

/// Errors that can occur in geometry engine calls.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// A boolean operation failed on the input and again after one repair attempt.
    #[error("geometry fault in {op} (after repair): {detail}")]
    Fault { op: &'static str, detail: String },
    /// A coordinate transformation could not be built or applied.
    #[error("reprojection failed: {0}")]
    Projection(String),
    /// The caller passed an empty layer list.
    #[error("overlay requires at least one layer")]
    NoLayers,
}

/// The geometry capabilities the model core consumes.
///
/// Every operation is pure: inputs are borrowed, results are new collections.
/// Results that refer back to inputs carry the input's position in the slice.
pub trait GeometryEngine: Send + Sync {
    /// Transform shapes between coordinate reference systems.
    fn reproject(&self, shapes: &[MultiPolygon<f64>], from: &Crs, to: &Crs) -> Result<Vec<MultiPolygon<f64>>, OverlayError>;

    /// Keep the parts of each shape inside `boundary`; shapes that vanish are dropped.
    fn clip(&self, shapes: &[MultiPolygon<f64>], boundary: &MultiPolygon<f64>) -> Result<Vec<(usize, MultiPolygon<f64>)>, OverlayError>;

    /// Remove `subtract` from each shape; shapes that vanish are dropped.
    fn erase(&self, shapes: &[MultiPolygon<f64>], subtract: &MultiPolygon<f64>) -> Result<Vec<(usize, MultiPolygon<f64>)>, OverlayError>;

    /// Full topological overlay: every piece of every input, split wherever
    /// features of different layers overlap. Fragment parents follow the order of `layers`.
    fn union(&self, layers: &[&[MultiPolygon<f64>]]) -> Result<Vec<Fragment>, OverlayError>;

    /// Overlay restricted to pieces covered by a feature of every layer.
    fn intersect(&self, layers: &[&[MultiPolygon<f64>]]) -> Result<Vec<Fragment>, OverlayError>;

    /// Merge all shapes into a single footprint.
    fn dissolve(&self, shapes: &[MultiPolygon<f64>]) -> Result<MultiPolygon<f64>, OverlayError>;

    /// Planar area in hectares.
    fn area_hectares(&self, shape: &MultiPolygon<f64>) -> f64;

    /// Best-effort repair of an invalid shape (closure, duplicates, degenerate rings, self-intersections).
    fn repair(&self, shape: &MultiPolygon<f64>) -> MultiPolygon<f64>;
}
