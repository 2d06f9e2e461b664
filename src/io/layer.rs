use std::path::Path;

use anyhow::{Context, Result};
use geo::MultiPolygon;
use geoverlay::{Crs, GeometryEngine};
use serde_json::{Map, Value};
use tracing::debug;

use crate::ModelError;

/// One polygon feature with its attribute row.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: MultiPolygon<f64>,
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn new(geometry: MultiPolygon<f64>) -> Self {
        Self { geometry, properties: Map::new() }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Text value of `field`; numbers are rendered without a trailing `.0`.
    pub fn text(&self, field: &str) -> Option<String> {
        match self.properties.get(field)? {
            Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(i.to_string()),
                None => n.as_f64().map(|f| if f.fract() == 0.0 && f.abs() < 1e15 { format!("{}", f as i64) } else { f.to_string() }),
            },
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Numeric value of `field`; numeric strings are parsed.
    pub fn number(&self, field: &str) -> Option<f64> {
        match self.properties.get(field)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// A polygon layer as read from disk.
#[derive(Debug, Clone, Default)]
pub struct Layer {
    pub name: String,
    pub crs: Option<Crs>,
    pub features: Vec<Feature>,
}

impl Layer {
    #[inline] pub fn len(&self) -> usize { self.features.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.features.is_empty() }

    pub fn geometries(&self) -> Vec<MultiPolygon<f64>> {
        self.features.iter().map(|f| f.geometry.clone()).collect()
    }

    /// True when at least one feature carries `field`, or the layer is empty.
    pub fn has_field(&self, field: &str) -> bool {
        self.features.is_empty() || self.features.iter().any(|f| f.properties.contains_key(field))
    }

    /// Configuration error unless `field` is present on the layer.
    pub fn require_field(&self, field: &str) -> Result<()> {
        if !self.has_field(field) {
            return Err(ModelError::config(format!("layer '{}' has no field '{field}'", self.name)).into());
        }
        Ok(())
    }

    /// Bring the layer into `target`, using `fallback` when the source carries no CRS.
    pub fn reproject(self, engine: &dyn GeometryEngine, target: &Crs, fallback: Option<&Crs>) -> Result<Self> {
        let source = self.crs.clone().or_else(|| fallback.cloned())
            .ok_or_else(|| ModelError::config(format!(
                "layer '{}' has no recognizable CRS; pass --source-crs with a PROJ.4 definition", self.name)))?;

        let shapes = engine.reproject(&self.geometries(), &source, target)
            .map_err(|e| ModelError::geometry(format!("reproject {}", self.name), e))?;
        debug!(layer = %self.name, from = %source, to = %target, "reprojected {} features", shapes.len());

        let features = self.features.into_iter().zip(shapes)
            .map(|(feature, geometry)| Feature { geometry, ..feature })
            .collect();
        Ok(Self { name: self.name, crs: Some(target.clone()), features })
    }

    /// Keep only the parts of features inside `boundary`.
    pub fn clip(self, engine: &dyn GeometryEngine, boundary: &MultiPolygon<f64>) -> Result<Self> {
        let clipped = engine.clip(&self.geometries(), boundary)
            .map_err(|e| ModelError::geometry(format!("clip {}", self.name), e))?;
        let before = self.features.len();
        let features = clipped.into_iter()
            .map(|(i, geometry)| Feature { geometry, properties: self.features[i].properties.clone() })
            .collect::<Vec<_>>();
        debug!(layer = %self.name, kept = features.len(), dropped = before - features.len(), "clipped to AOI");
        Ok(Self { features, ..self })
    }
}

/// Read a polygon layer by extension (`.shp`, `.geojson`/`.json`).
pub fn read_layer(path: &Path) -> Result<Layer> {
    if !path.is_file() {
        return Err(ModelError::config(format!("input not found: {}", path.display())).into());
    }
    let ext = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("shp") => super::shp::read_shapefile(path),
        Some("geojson") | Some("json") => super::geojson::read_geojson(path),
        _ => Err(ModelError::config(format!("unsupported layer format: {}", path.display())).into()),
    }
    .with_context(|| format!("Failed to read layer {}", path.display()))
}

/// Read, reproject into `target`, and optionally clip to `aoi`.
pub fn load_layer(engine: &dyn GeometryEngine, path: &Path, target: &Crs, fallback: Option<&Crs>, aoi: Option<&MultiPolygon<f64>>) -> Result<Layer> {
    let layer = read_layer(path)?.reproject(engine, target, fallback)?;
    match aoi {
        Some(boundary) => layer.clip(engine, boundary),
        None => Ok(layer),
    }
}

#[cfg(test)]
mod tests {
    use geo::{polygon, MultiPolygon};
    use geoverlay::{Crs, PlanarEngine};
    use serde_json::json;

    use super::*;

    fn square(x0: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x0, y: 0.0), (x: x0 + size, y: 0.0), (x: x0 + size, y: size), (x: x0, y: size), (x: x0, y: 0.0),
        ]])
    }

    #[test]
    fn text_and_number_coercion() {
        let f = Feature::new(square(0.0, 1.0))
            .with("HUC12", json!(101100010101.0))
            .with("name", json!("  Upper Creek "))
            .with("kcal", json!("12.5"))
            .with("blank", json!(""));
        assert_eq!(f.text("HUC12").as_deref(), Some("101100010101"));
        assert_eq!(f.text("name").as_deref(), Some("Upper Creek"));
        assert_eq!(f.number("kcal"), Some(12.5));
        assert_eq!(f.text("blank"), None);
        assert_eq!(f.text("missing"), None);
    }

    #[test]
    fn missing_field_is_config_error() {
        let layer = Layer {
            name: "units".into(),
            crs: None,
            features: vec![Feature::new(square(0.0, 1.0)).with("key", "a")],
        };
        assert!(layer.require_field("key").is_ok());
        let err = layer.require_field("HUC12").unwrap_err();
        assert!(crate::error::is_config_error(&err));
    }

    #[test]
    fn reproject_without_crs_needs_fallback() {
        let engine = PlanarEngine::default();
        let layer = Layer { name: "x".into(), crs: None, features: vec![Feature::new(square(0.0, 1.0))] };
        assert!(layer.clone().reproject(&engine, &Crs::albers_conus(), None).is_err());

        let out = layer.reproject(&engine, &Crs::albers_conus(), Some(&Crs::albers_conus())).unwrap();
        assert_eq!(out.crs, Some(Crs::albers_conus()));
        assert_eq!(out.features[0].geometry, square(0.0, 1.0));
    }

    #[test]
    fn clip_keeps_attributes_of_survivors() {
        let engine = PlanarEngine::default();
        let layer = Layer {
            name: "wetlands".into(),
            crs: Some(Crs::albers_conus()),
            features: vec![
                Feature::new(square(0.0, 10.0)).with("id", 1),
                Feature::new(square(100.0, 10.0)).with("id", 2),
            ],
        };
        let out = layer.clip(&engine, &square(5.0, 10.0)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.features[0].number("id"), Some(1.0));
    }
}
