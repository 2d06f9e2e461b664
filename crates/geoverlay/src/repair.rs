use geo::{Coord, LineString, MultiPolygon, Polygon};

/// Ensure first and last are the same for geo::LineString coords
fn ensure_closed(coords: &mut Vec<Coord<f64>>) {
    if let (Some(&first), Some(&last)) = (coords.first(), coords.last()) {
        if first != last { coords.push(first) }
    }
}

/// Get the signed area of a closed coord list (negative for clockwise)
fn signed_area(pts: &[Coord<f64>]) -> f64 {
    pts.windows(2).map(|w| w[0].x * w[1].y - w[1].x * w[0].y).sum::<f64>() / 2.0
}

/// Drop non-finite and repeated consecutive coordinates, then close the ring.
/// Returns `None` when fewer than three distinct vertices or no area remain.
fn clean_ring(ring: &LineString<f64>) -> Option<LineString<f64>> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(ring.0.len() + 1);
    for &c in ring.0.iter().filter(|c| c.x.is_finite() && c.y.is_finite()) {
        if coords.last() != Some(&c) { coords.push(c) }
    }
    ensure_closed(&mut coords);

    if coords.len() < 4 || signed_area(&coords) == 0.0 { return None }
    Some(LineString(coords))
}

fn clean_polygon(polygon: &Polygon<f64>) -> Option<Polygon<f64>> {
    let exterior = clean_ring(polygon.exterior())?;
    let interiors = polygon.interiors().iter().filter_map(clean_ring).collect();
    Some(Polygon::new(exterior, interiors))
}

/// Structural cleanup applied before topological normalization.
pub(crate) fn clean(shape: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    MultiPolygon::new(shape.0.iter().filter_map(clean_polygon).collect())
}

/// True when every coordinate is finite.
pub(crate) fn is_finite(shape: &MultiPolygon<f64>) -> bool {
    shape.0.iter().all(|polygon| {
        std::iter::once(polygon.exterior()).chain(polygon.interiors())
            .all(|ring| ring.0.iter().all(|c| c.x.is_finite() && c.y.is_finite()))
    })
}

#[cfg(test)]
mod tests {
    use geo::{Coord, LineString, MultiPolygon, Polygon};

    use super::{clean, is_finite};

    fn ring(pts: &[(f64, f64)]) -> LineString<f64> {
        LineString(pts.iter().map(|&(x, y)| Coord { x, y }).collect())
    }

    #[test]
    fn closes_open_rings_and_drops_duplicates() {
        let shape = MultiPolygon::new(vec![Polygon::new(
            ring(&[(0.0, 0.0), (1.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]),
            vec![],
        )]);
        let cleaned = clean(&shape);
        assert_eq!(cleaned.0.len(), 1);
        let coords = &cleaned.0[0].exterior().0;
        assert_eq!(coords.len(), 5);
        assert_eq!(coords.first(), coords.last());
    }

    #[test]
    fn drops_degenerate_polygons() {
        let shape = MultiPolygon::new(vec![Polygon::new(
            ring(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (0.0, 0.0)]),
            vec![],
        )]);
        assert!(clean(&shape).0.is_empty());
    }

    #[test]
    fn nan_coordinates_are_not_finite() {
        let shape = MultiPolygon::new(vec![Polygon::new(
            ring(&[(0.0, 0.0), (f64::NAN, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]),
            vec![],
        )]);
        assert!(!is_finite(&shape));
        assert!(is_finite(&clean(&shape)));
    }
}
