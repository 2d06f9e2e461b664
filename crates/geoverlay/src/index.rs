use geo::{BoundingRect, MultiPolygon, Rect};
use rstar::{RTree, RTreeObject, AABB};

/// A bounding box in an R-tree, associated with a MultiPolygon by index.
#[derive(Debug, Clone)]
struct BoundingBox {
    idx: usize, // Index of corresponding MultiPolygon in the indexed slice
    bbox: Rect<f64>,
}

impl RTreeObject for BoundingBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.bbox.min().into(), self.bbox.max().into())
    }
}

/// R-tree over the bounding boxes of a slice of MultiPolygons.
///
/// Empty shapes have no bounding box and are never returned as candidates.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    rtree: RTree<BoundingBox>,
}

impl SpatialIndex {
    /// Bulk-load an index over `shapes`; candidate ids are positions in `shapes`.
    pub fn new(shapes: &[MultiPolygon<f64>]) -> Self {
        Self {
            rtree: RTree::bulk_load(shapes.iter().enumerate()
                .filter_map(|(idx, shape)| shape.bounding_rect().map(|bbox| BoundingBox { idx, bbox }))
                .collect()),
        }
    }

    /// Number of indexed (non-empty) shapes.
    #[inline] pub fn len(&self) -> usize { self.rtree.size() }

    #[inline] pub fn is_empty(&self) -> bool { self.rtree.size() == 0 }

    /// Indices of shapes whose bounding box intersects `shape`'s bounding box, sorted ascending.
    pub fn candidates(&self, shape: &MultiPolygon<f64>) -> Vec<usize> {
        let Some(rect) = shape.bounding_rect() else { return Vec::new() };
        let envelope = AABB::from_corners(rect.min().into(), rect.max().into());

        // Sorted so overlay output order does not depend on tree layout.
        let mut found = self.rtree.locate_in_envelope_intersecting(&envelope)
            .map(|bb| bb.idx)
            .collect::<Vec<_>>();
        found.sort_unstable();
        found
    }
}

#[cfg(test)]
mod tests {
    use geo::{polygon, MultiPolygon};

    use super::SpatialIndex;

    fn square(x: f64, y: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x, y: y), (x: x + size, y: y), (x: x + size, y: y + size), (x: x, y: y + size), (x: x, y: y),
        ]])
    }

    #[test]
    fn finds_overlapping_boxes_only() {
        let shapes = vec![square(0.0, 0.0, 1.0), square(5.0, 5.0, 1.0), square(0.5, 0.5, 1.0)];
        let index = SpatialIndex::new(&shapes);
        assert_eq!(index.len(), 3);
        assert_eq!(index.candidates(&square(0.2, 0.2, 0.1)), vec![0]);
        assert_eq!(index.candidates(&square(0.9, 0.9, 0.2)), vec![0, 2]);
        assert!(index.candidates(&square(10.0, 10.0, 1.0)).is_empty());
    }

    #[test]
    fn empty_shapes_are_skipped() {
        let shapes = vec![MultiPolygon::new(vec![]), square(0.0, 0.0, 1.0)];
        let index = SpatialIndex::new(&shapes);
        assert_eq!(index.len(), 1);
        assert!(index.candidates(&MultiPolygon::new(vec![])).is_empty());
    }
}
