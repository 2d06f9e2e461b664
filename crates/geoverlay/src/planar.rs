use std::panic::{self, AssertUnwindSafe};

use ahash::AHashMap;
use geo::{Area, BooleanOps, MultiPolygon};
use smallvec::smallvec;

use crate::{Crs, Fragment, GeometryEngine, OverlayError, Parents, SpatialIndex, M2_PER_HA};
use crate::{proj, repair};

#[derive(Debug, Clone, Copy)]
enum BoolOp { Intersection, Union, Difference }

impl BoolOp {
    fn name(self) -> &'static str {
        match self {
            BoolOp::Intersection => "intersection",
            BoolOp::Union => "union",
            BoolOp::Difference => "difference",
        }
    }
}

/// Planar overlay engine on `geo` boolean operations.
///
/// Pieces smaller than `sliver_m2` are discarded as overlay noise.
#[derive(Debug, Clone)]
pub struct PlanarEngine {
    sliver_m2: f64,
}

impl Default for PlanarEngine {
    fn default() -> Self { Self { sliver_m2: 1e-6 } }
}

impl PlanarEngine {
    pub fn new(sliver_m2: f64) -> Self { Self { sliver_m2: sliver_m2.max(0.0) } }

    #[inline] pub fn sliver_m2(&self) -> f64 { self.sliver_m2 }

    /// Run a boolean op; on failure repair both operands once and retry.
    fn boolean(&self, op: BoolOp, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>, OverlayError> {
        fn run(op: BoolOp, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> Option<MultiPolygon<f64>> {
            panic::catch_unwind(AssertUnwindSafe(|| match op {
                BoolOp::Intersection => a.intersection(b),
                BoolOp::Union => a.union(b),
                BoolOp::Difference => a.difference(b),
            })).ok()
        }

        if repair::is_finite(a) && repair::is_finite(b) {
            if let Some(out) = run(op, a, b) { return Ok(out) }
        }
        run(op, &self.repair(a), &self.repair(b)).ok_or_else(|| OverlayError::Fault {
            op: op.name(),
            detail: format!("operands with {} and {} polygons", a.0.len(), b.0.len()),
        })
    }

    /// Union of the shapes at `ids`, reduced pairwise to keep operand sizes balanced.
    fn footprint(&self, shapes: &[MultiPolygon<f64>], ids: &[usize]) -> Result<MultiPolygon<f64>, OverlayError> {
        let mut level: Vec<MultiPolygon<f64>> = ids.iter().map(|&i| shapes[i].clone()).collect();
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            let mut pieces = level.into_iter();
            while let Some(a) = pieces.next() {
                match pieces.next() {
                    Some(b) => next.push(self.boolean(BoolOp::Union, &a, &b)?),
                    None => next.push(a),
                }
            }
            level = next;
        }
        Ok(level.pop().unwrap_or_else(|| MultiPolygon::new(vec![])))
    }

    #[inline]
    fn keep(&self, shape: &MultiPolygon<f64>) -> Option<f64> {
        let area = shape.unsigned_area();
        (area > self.sliver_m2).then_some(area)
    }

    /// Overlay the running fragment list with one more layer.
    ///
    /// `keep_outside` keeps the pieces of fragments and of layer features not
    /// covered by the other side (union semantics); otherwise only the
    /// overlapping pieces survive (intersection semantics).
    fn overlay_step(&self, fragments: Vec<Fragment>, layer: &[MultiPolygon<f64>], depth: usize, keep_outside: bool) -> Result<Vec<Fragment>, OverlayError> {
        let index = SpatialIndex::new(layer);
        let mut out = Vec::with_capacity(fragments.len() + layer.len());
        let mut covering: AHashMap<usize, Vec<usize>> = AHashMap::new();

        for (fi, fragment) in fragments.iter().enumerate() {
            let mut hits = Vec::new();
            for j in index.candidates(&fragment.geometry) {
                let piece = self.boolean(BoolOp::Intersection, &fragment.geometry, &layer[j])?;
                let Some(area) = self.keep(&piece) else { continue };

                let mut parents = fragment.parents.clone();
                parents.push(Some(j));
                out.push(Fragment { geometry: piece, parents, area });
                hits.push(j);
                covering.entry(j).or_default().push(fi);
            }

            if keep_outside {
                let rest = if hits.is_empty() {
                    fragment.geometry.clone()
                } else {
                    self.boolean(BoolOp::Difference, &fragment.geometry, &self.footprint(layer, &hits)?)?
                };
                if let Some(area) = self.keep(&rest) {
                    let mut parents = fragment.parents.clone();
                    parents.push(None);
                    out.push(Fragment { geometry: rest, parents, area });
                }
            }
        }

        if keep_outside {
            let covered: Vec<MultiPolygon<f64>> = fragments.into_iter().map(|f| f.geometry).collect();
            for (j, shape) in layer.iter().enumerate() {
                let rest = match covering.get(&j) {
                    Some(ids) => self.boolean(BoolOp::Difference, shape, &self.footprint(&covered, ids)?)?,
                    None => shape.clone(),
                };
                if let Some(area) = self.keep(&rest) {
                    let mut parents: Parents = smallvec![None; depth];
                    parents.push(Some(j));
                    out.push(Fragment { geometry: rest, parents, area });
                }
            }
        }

        Ok(out)
    }

    fn overlay(&self, layers: &[&[MultiPolygon<f64>]], keep_outside: bool) -> Result<Vec<Fragment>, OverlayError> {
        let (first, rest) = layers.split_first().ok_or(OverlayError::NoLayers)?;

        let mut fragments = first.iter().enumerate()
            .filter_map(|(i, shape)| self.keep(shape).map(|area| Fragment {
                geometry: shape.clone(),
                parents: smallvec![Some(i)],
                area,
            }))
            .collect::<Vec<_>>();

        for (offset, layer) in rest.iter().enumerate() {
            fragments = self.overlay_step(fragments, layer, offset + 1, keep_outside)?;
        }
        Ok(fragments)
    }

    fn cut(&self, op: BoolOp, shapes: &[MultiPolygon<f64>], other: &MultiPolygon<f64>) -> Result<Vec<(usize, MultiPolygon<f64>)>, OverlayError> {
        let mut out = Vec::with_capacity(shapes.len());
        for (i, shape) in shapes.iter().enumerate() {
            let piece = self.boolean(op, shape, other)?;
            if self.keep(&piece).is_some() { out.push((i, piece)) }
        }
        Ok(out)
    }
}

impl GeometryEngine for PlanarEngine {
    fn reproject(&self, shapes: &[MultiPolygon<f64>], from: &Crs, to: &Crs) -> Result<Vec<MultiPolygon<f64>>, OverlayError> {
        proj::reproject(shapes, from, to)
    }

    fn clip(&self, shapes: &[MultiPolygon<f64>], boundary: &MultiPolygon<f64>) -> Result<Vec<(usize, MultiPolygon<f64>)>, OverlayError> {
        self.cut(BoolOp::Intersection, shapes, boundary)
    }

    fn erase(&self, shapes: &[MultiPolygon<f64>], subtract: &MultiPolygon<f64>) -> Result<Vec<(usize, MultiPolygon<f64>)>, OverlayError> {
        if subtract.0.is_empty() {
            return Ok(shapes.iter().cloned().enumerate()
                .filter(|(_, shape)| self.keep(shape).is_some())
                .collect());
        }
        self.cut(BoolOp::Difference, shapes, subtract)
    }

    fn union(&self, layers: &[&[MultiPolygon<f64>]]) -> Result<Vec<Fragment>, OverlayError> {
        self.overlay(layers, true)
    }

    fn intersect(&self, layers: &[&[MultiPolygon<f64>]]) -> Result<Vec<Fragment>, OverlayError> {
        self.overlay(layers, false)
    }

    fn dissolve(&self, shapes: &[MultiPolygon<f64>]) -> Result<MultiPolygon<f64>, OverlayError> {
        let ids: Vec<usize> = (0..shapes.len()).collect();
        self.footprint(shapes, &ids)
    }

    fn area_hectares(&self, shape: &MultiPolygon<f64>) -> f64 {
        shape.unsigned_area() / M2_PER_HA
    }

    fn repair(&self, shape: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        let cleaned = repair::clean(shape);
        // Self-union resolves self-intersections and ring orientation.
        panic::catch_unwind(AssertUnwindSafe(|| cleaned.union(&MultiPolygon::new(vec![]))))
            .unwrap_or(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use geo::{polygon, MultiPolygon};

    use super::PlanarEngine;
    use crate::GeometryEngine;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1), (x: x0, y: y0),
        ]])
    }

    #[test]
    fn area_in_hectares() {
        let engine = PlanarEngine::default();
        assert_relative_eq!(engine.area_hectares(&rect(0.0, 0.0, 1000.0, 100.0)), 10.0, max_relative = 1e-12);
    }

    #[test]
    fn erase_with_empty_subtract_keeps_shapes() {
        let engine = PlanarEngine::default();
        let shapes = vec![rect(0.0, 0.0, 1.0, 1.0), MultiPolygon::new(vec![])];
        let erased = engine.erase(&shapes, &MultiPolygon::new(vec![])).unwrap();
        assert_eq!(erased.len(), 1);
        assert_eq!(erased[0].0, 0);
    }

    #[test]
    fn self_intersecting_bowtie_is_repaired() {
        let engine = PlanarEngine::default();
        let bowtie = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0), (x: 2.0, y: 2.0), (x: 2.0, y: 0.0), (x: 0.0, y: 2.0), (x: 0.0, y: 0.0),
        ]]);
        let repaired = engine.repair(&bowtie);
        // Two triangles of area 1 each.
        assert_relative_eq!(engine.area_hectares(&repaired) * 10_000.0, 2.0, max_relative = 1e-9);
    }

    #[test]
    fn intersect_requires_every_layer() {
        let engine = PlanarEngine::default();
        let a = vec![rect(0.0, 0.0, 10.0, 10.0)];
        let b = vec![rect(5.0, 0.0, 15.0, 10.0)];
        let c = vec![rect(0.0, 0.0, 7.0, 10.0)];
        let frags = engine.intersect(&[&a, &b, &c]).unwrap();
        assert_eq!(frags.len(), 1);
        assert_relative_eq!(frags[0].area, 20.0, max_relative = 1e-9);
        assert_eq!(frags[0].parents.as_slice(), &[Some(0), Some(0), Some(0)]);
    }

    #[test]
    fn empty_layer_list_is_an_error() {
        assert!(PlanarEngine::default().union(&[]).is_err());
    }
}
