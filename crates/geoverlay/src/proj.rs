use geo::{Coord, MapCoords, MultiPolygon};
use proj4rs::{proj::Proj as Proj4, transform::transform};

use crate::{Crs, OverlayError};

/// Build a PROJ.4 transform endpoint for `crs`.
fn build(crs: &Crs) -> Result<Proj4, OverlayError> {
    Proj4::from_proj_string(crs.proj4())
        .map_err(|e| OverlayError::Projection(format!("failed to build PROJ.4 '{}': {e:?}", crs.proj4())))
}

/// Reproject shapes from `from` to `to`.
/// Geographic systems are in degrees at the API boundary; proj4rs wants radians.
pub(crate) fn reproject(shapes: &[MultiPolygon<f64>], from: &Crs, to: &Crs) -> Result<Vec<MultiPolygon<f64>>, OverlayError> {
    if from == to { return Ok(shapes.to_vec()) }

    let (src, dst) = (build(from)?, build(to)?);
    let (src_deg, dst_deg) = (from.is_geographic(), to.is_geographic());

    shapes.iter()
        .map(|shape| shape.try_map_coords(|coord: Coord<f64>| {
            let mut point = if src_deg {
                (coord.x.to_radians(), coord.y.to_radians(), 0.0)
            } else {
                (coord.x, coord.y, 0.0)
            };
            transform(&src, &dst, &mut point)
                .map_err(|e| OverlayError::Projection(format!("CRS transform failed at ({}, {}): {e:?}", coord.x, coord.y)))?;
            Ok(if dst_deg {
                Coord { x: point.0.to_degrees(), y: point.1.to_degrees() }
            } else {
                Coord { x: point.0, y: point.1 }
            })
        }))
        .collect()
}
