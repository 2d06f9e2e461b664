use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use geoverlay::Crs;
use serde_json::{Map, Number, Value};
use shapefile::{dbase::{FieldValue, Record}, Point, PolygonRing, Reader, Shape};

use super::{Feature, Layer};

/// Convert shapefile rings into a `geo::MultiPolygon`.
/// Shapefile stores each outer ring followed by its holes.
fn rings_to_geo(rings: &[PolygonRing<Point>]) -> MultiPolygon<f64> {
    fn closed(points: &[Point]) -> LineString<f64> {
        let mut coords: Vec<Coord<f64>> = points.iter().map(|p| Coord { x: p.x, y: p.y }).collect();
        if let (Some(&first), Some(&last)) = (coords.first(), coords.last()) {
            if first != last { coords.push(first) }
        }
        LineString(coords)
    }

    let mut polys = Vec::new();
    let mut exterior: Option<LineString<f64>> = None;
    let mut holes = Vec::new();

    for ring in rings {
        match ring {
            PolygonRing::Outer(points) => {
                if let Some(ext) = exterior.replace(closed(points)) {
                    polys.push(Polygon::new(ext, std::mem::take(&mut holes)));
                }
            }
            PolygonRing::Inner(points) => holes.push(closed(points)),
        }
    }
    if let Some(ext) = exterior {
        polys.push(Polygon::new(ext, holes));
    }
    MultiPolygon(polys)
}

fn shape_to_multipolygon(shape: Shape) -> Result<MultiPolygon<f64>> {
    match shape {
        Shape::Polygon(polygon) => Ok(rings_to_geo(polygon.rings())),
        Shape::PolygonM(polygon) => {
            let rings = polygon.rings().iter()
                .map(|r| r.points().iter().map(|p| Point { x: p.x, y: p.y }).collect::<Vec<_>>())
                .zip(polygon.rings().iter().map(|r| matches!(r, PolygonRing::Outer(_))))
                .map(|(pts, outer)| if outer { PolygonRing::Outer(pts) } else { PolygonRing::Inner(pts) })
                .collect::<Vec<_>>();
            Ok(rings_to_geo(&rings))
        }
        Shape::PolygonZ(polygon) => {
            let rings = polygon.rings().iter()
                .map(|r| r.points().iter().map(|p| Point { x: p.x, y: p.y }).collect::<Vec<_>>())
                .zip(polygon.rings().iter().map(|r| matches!(r, PolygonRing::Outer(_))))
                .map(|(pts, outer)| if outer { PolygonRing::Outer(pts) } else { PolygonRing::Inner(pts) })
                .collect::<Vec<_>>();
            Ok(rings_to_geo(&rings))
        }
        Shape::NullShape => Ok(MultiPolygon::new(vec![])),
        other => bail!("found non-Polygon shape in layer: {:?}", other.shapetype()),
    }
}

fn field_to_json(value: FieldValue) -> Value {
    let number = |f: f64| Number::from_f64(f).map_or(Value::Null, Value::Number);
    match value {
        FieldValue::Character(Some(s)) => Value::String(s.trim().to_string()),
        FieldValue::Memo(s) => Value::String(s),
        FieldValue::Numeric(Some(n)) => number(n),
        FieldValue::Float(Some(n)) => number(n as f64),
        FieldValue::Double(n) | FieldValue::Currency(n) => number(n),
        FieldValue::Integer(i) => Value::from(i),
        FieldValue::Logical(Some(b)) => Value::Bool(b),
        FieldValue::Date(Some(d)) => Value::String(format!("{:04}-{:02}-{:02}", d.year(), d.month(), d.day())),
        _ => Value::Null,
    }
}

fn record_to_properties(record: Record) -> Map<String, Value> {
    let fields: std::collections::HashMap<String, FieldValue> = record.into();
    fields.into_iter().map(|(k, v)| (k, field_to_json(v))).collect()
}

/// Read the CRS from the `.prj` next to `path`, if present and recognizable.
fn sniff_prj(path: &Path) -> Result<Option<Crs>> {
    let prj = path.with_extension("prj");
    if !prj.is_file() { return Ok(None) }
    let wkt = fs::read_to_string(&prj)
        .with_context(|| format!("Failed to read {}", prj.display()))?;
    Ok(Crs::from_prj_wkt(&wkt))
}

/// Reads all polygon shapes and attribute records from a `.shp` file.
pub(crate) fn read_shapefile(path: &Path) -> Result<Layer> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open shapefile: {}", path.display()))?;

    let mut features = Vec::with_capacity(reader.shape_count()?);
    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result.context("Error reading shape+record")?;
        features.push(Feature {
            geometry: shape_to_multipolygon(shape)?,
            properties: record_to_properties(record),
        });
    }

    Ok(Layer {
        name: path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default(),
        crs: sniff_prj(path)?,
        features,
    })
}
