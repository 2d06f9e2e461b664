use std::{fs, path::Path};

use anyhow::{anyhow, bail, Context, Result};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use geoverlay::Crs;
use serde_json::{json, Map, Value};

use super::{Feature, Layer};

fn ring_to_json(ring: &LineString<f64>) -> Value {
    Value::Array(ring.coords().map(|c| json!([c.x, c.y])).collect())
}

fn multipolygon_to_json(mp: &MultiPolygon<f64>) -> Value {
    let polygons: Vec<Value> = mp.0.iter()
        .map(|poly| {
            let mut rings = vec![ring_to_json(poly.exterior())];
            rings.extend(poly.interiors().iter().map(ring_to_json));
            Value::Array(rings)
        })
        .collect();
    json!({ "type": "MultiPolygon", "coordinates": polygons })
}

/// Serialize features as a GeoJSON FeatureCollection.
/// A non-WGS84 CRS is recorded in a `crs` member so the file reads back unambiguously.
pub(crate) fn write_geojson_bytes(features: &[Feature], crs: Option<&Crs>) -> Result<Vec<u8>> {
    let features: Vec<Value> = features.iter()
        .map(|f| json!({
            "type": "Feature",
            "geometry": multipolygon_to_json(&f.geometry),
            "properties": Value::Object(f.properties.clone()),
        }))
        .collect();

    let mut collection = json!({ "type": "FeatureCollection", "features": features });
    if let Some(crs) = crs.filter(|&c| *c != Crs::wgs84()) {
        collection["crs"] = json!({ "type": "proj4", "properties": { "proj4": crs.proj4() } });
    }
    serde_json::to_vec(&collection).context("Failed to serialize GeoJSON to bytes")
}

fn parse_ring(coords: &Value) -> Result<LineString<f64>> {
    let coords = coords.as_array().ok_or_else(|| anyhow!("Invalid ring: expected an array of positions"))?;
    let mut points = coords.iter()
        .map(|pos| -> Result<Coord<f64>> {
            let x = pos.get(0).and_then(Value::as_f64);
            let y = pos.get(1).and_then(Value::as_f64);
            match (x, y) {
                (Some(x), Some(y)) => Ok(Coord { x, y }),
                _ => bail!("Invalid coordinate: {pos}"),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    if let (Some(&first), Some(&last)) = (points.first(), points.last()) {
        if first != last { points.push(first) }
    }
    Ok(LineString(points))
}

fn parse_polygon(rings: &Value) -> Result<Option<Polygon<f64>>> {
    let rings = rings.as_array().ok_or_else(|| anyhow!("Invalid polygon: expected an array of rings"))?;
    let Some((exterior, interiors)) = rings.split_first() else { return Ok(None) };
    Ok(Some(Polygon::new(
        parse_ring(exterior)?,
        interiors.iter().map(parse_ring).collect::<Result<_>>()?,
    )))
}

fn parse_geometry(geometry: &Value) -> Result<MultiPolygon<f64>> {
    if geometry.is_null() { return Ok(MultiPolygon::new(vec![])) }
    let coords = &geometry["coordinates"];
    match geometry["type"].as_str() {
        Some("Polygon") => Ok(MultiPolygon(parse_polygon(coords)?.into_iter().collect())),
        Some("MultiPolygon") => {
            let polys = coords.as_array().ok_or_else(|| anyhow!("Invalid MultiPolygon coordinates"))?;
            let mut out = Vec::with_capacity(polys.len());
            for poly in polys {
                out.extend(parse_polygon(poly)?);
            }
            Ok(MultiPolygon(out))
        }
        other => bail!("unsupported GeoJSON geometry type: {:?}", other),
    }
}

/// CRS named by a `crs` member; absent means WGS84 per RFC 7946.
fn parse_crs(value: &Value) -> Option<Crs> {
    let Some(crs) = value.get("crs") else { return Some(Crs::wgs84()) };
    let props = &crs["properties"];
    if let Some(proj4) = props["proj4"].as_str() {
        return Some(Crs::new(proj4));
    }
    let name = props["name"].as_str()?.to_ascii_uppercase();
    if name.ends_with("CRS84") || name.ends_with(":4326") { return Some(Crs::wgs84()) }
    if name.ends_with(":4269") { return Some(Crs::nad83()) }
    if name.ends_with(":102003") || name.ends_with(":5070") { return Some(Crs::albers_conus()) }
    None
}

pub(crate) fn read_geojson_bytes(name: &str, bytes: &[u8]) -> Result<Layer> {
    let value: Value = serde_json::from_slice(bytes).context("Failed to parse GeoJSON bytes")?;
    let features = value["features"].as_array()
        .ok_or_else(|| anyhow!("GeoJSON '{name}' is not a FeatureCollection"))?
        .iter()
        .map(|feature| -> Result<Feature> {
            Ok(Feature {
                geometry: parse_geometry(&feature["geometry"])?,
                properties: feature["properties"].as_object().cloned().unwrap_or_else(Map::new),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Layer { name: name.to_string(), crs: parse_crs(&value), features })
}

pub(crate) fn read_geojson(path: &Path) -> Result<Layer> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    read_geojson_bytes(&name, &bytes)
}

#[cfg(test)]
mod tests {
    use geo::polygon;

    use super::*;

    #[test]
    fn written_collection_reads_back() {
        let mp = MultiPolygon::new(vec![polygon![
            exterior: [(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 4.0), (x: 0.0, y: 4.0), (x: 0.0, y: 0.0)],
            interiors: [[(x: 1.0, y: 1.0), (x: 2.0, y: 1.0), (x: 2.0, y: 2.0), (x: 1.0, y: 2.0), (x: 1.0, y: 1.0)]],
        ]]);
        let features = vec![Feature::new(mp.clone()).with("bin", "0101").with("kcal", 12.5)];

        let bytes = write_geojson_bytes(&features, Some(&Crs::albers_conus())).unwrap();
        let layer = read_geojson_bytes("units", &bytes).unwrap();

        assert_eq!(layer.crs, Some(Crs::albers_conus()));
        assert_eq!(layer.features, features);
    }

    #[test]
    fn plain_polygons_and_default_crs() {
        let doc = br#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"ATTRIBUTE":"PEM1C"},
             "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1]]]}},
            {"type":"Feature","properties":null,"geometry":null}
        ]}"#;
        let layer = read_geojson_bytes("wetlands", doc).unwrap();
        assert_eq!(layer.crs, Some(Crs::wgs84()));
        assert_eq!(layer.len(), 2);
        // Ring gets closed.
        assert_eq!(layer.features[0].geometry.0[0].exterior().0.len(), 5);
        assert!(layer.features[1].geometry.0.is_empty());
        assert!(layer.features[1].properties.is_empty());
    }

    #[test]
    fn rejects_points() {
        let doc = br#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{},"geometry":{"type":"Point","coordinates":[0,0]}}]}"#;
        assert!(read_geojson_bytes("pts", doc).is_err());
    }
}
