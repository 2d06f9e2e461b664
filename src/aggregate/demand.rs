use std::collections::BTreeMap;

use anyhow::Result;
use geo::MultiPolygon;
use geoverlay::GeometryEngine;

use crate::{io::Layer, ModelError};

/// An administrative polygon carrying energy demand.
#[derive(Debug, Clone, PartialEq)]
pub struct DemandPolygon {
    pub admin_key: String,
    pub species: Option<String>,
    /// One value per [`DemandLayer::metrics`] entry.
    pub metrics: Vec<f64>,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemandLayer {
    pub metrics: Vec<String>,
    pub polygons: Vec<DemandPolygon>,
}

impl DemandLayer {
    /// Read demand polygons; every named metric field must exist. Null metrics count as 0.
    pub fn from_layer(layer: &Layer, admin_field: &str, species_field: Option<&str>, metrics: &[String]) -> Result<Self> {
        if metrics.is_empty() {
            return Err(ModelError::config("at least one demand metric field is required").into());
        }
        layer.require_field(admin_field)?;
        if let Some(field) = species_field { layer.require_field(field)? }
        for metric in metrics { layer.require_field(metric)? }

        let polygons = layer.features.iter().enumerate()
            .map(|(i, f)| -> Result<DemandPolygon> {
                let admin_key = f.text(admin_field).ok_or_else(|| ModelError::config(format!(
                    "demand polygon {i} in '{}' has no value for '{admin_field}'", layer.name)))?;
                Ok(DemandPolygon {
                    admin_key,
                    species: species_field.and_then(|s| f.text(s)),
                    metrics: metrics.iter().map(|m| f.number(m).unwrap_or(0.0)).collect(),
                    geometry: f.geometry.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { metrics: metrics.to_vec(), polygons })
    }

    /// Keep polygons whose species tag equals `species` (case-insensitive).
    pub fn filter_species(self, species: &str) -> Self {
        Self {
            polygons: self.polygons.into_iter()
                .filter(|p| p.species.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(species)))
                .collect(),
            ..self
        }
    }

    /// Metric totals per admin key, summed over species.
    pub fn admin_totals(&self) -> BTreeMap<String, Vec<f64>> {
        let mut totals: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for p in &self.polygons {
            let row = totals.entry(p.admin_key.clone()).or_insert_with(|| vec![0.0; self.metrics.len()]);
            for (acc, v) in row.iter_mut().zip(&p.metrics) { *acc += v }
        }
        totals
    }

    /// One footprint per admin key (key order), so per-species copies of a boundary count once.
    pub fn admin_footprints(&self, engine: &dyn GeometryEngine) -> Result<(Vec<String>, Vec<MultiPolygon<f64>>)> {
        let mut shapes: BTreeMap<&str, Vec<MultiPolygon<f64>>> = BTreeMap::new();
        for p in &self.polygons {
            shapes.entry(&p.admin_key).or_default().push(p.geometry.clone());
        }

        let mut keys = Vec::with_capacity(shapes.len());
        let mut footprints = Vec::with_capacity(shapes.len());
        for (key, parts) in shapes {
            let footprint = if parts.len() == 1 {
                parts.into_iter().next().unwrap_or_else(|| MultiPolygon::new(vec![]))
            } else {
                engine.dissolve(&parts).map_err(|e| ModelError::geometry("demand footprint", e))?
            };
            keys.push(key.to_string());
            footprints.push(footprint);
        }
        Ok((keys, footprints))
    }
}

#[cfg(test)]
mod tests {
    use geo::{polygon, Area};
    use geoverlay::PlanarEngine;

    use super::*;
    use crate::io::Feature;

    fn square(x0: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![(x: x0, y: 0.0), (x: x0 + 10.0, y: 0.0), (x: x0 + 10.0, y: 10.0), (x: x0, y: 10.0), (x: x0, y: 0.0)]])
    }

    fn layer() -> Layer {
        let f = |fips: &str, sp: &str, lta: f64, x0: f64| Feature::new(square(x0))
            .with("fips", fips).with("species", sp).with("LTADemand", lta).with("X80Demand", lta * 2.0);
        Layer {
            name: "demand".into(),
            crs: None,
            features: vec![f("17001", "MALL", 100.0, 0.0), f("17001", "WODU", 50.0, 0.0), f("17003", "MALL", 10.0, 10.0)],
        }
    }

    fn metrics() -> Vec<String> { vec!["LTADemand".into(), "X80Demand".into()] }

    #[test]
    fn totals_sum_species_per_admin() {
        let demand = DemandLayer::from_layer(&layer(), "fips", Some("species"), &metrics()).unwrap();
        let totals = demand.admin_totals();
        assert_eq!(totals["17001"], vec![150.0, 300.0]);
        assert_eq!(totals["17003"], vec![10.0, 20.0]);

        let mallard = demand.filter_species("mall").admin_totals();
        assert_eq!(mallard["17001"], vec![100.0, 200.0]);
    }

    #[test]
    fn missing_metric_field_is_config_error() {
        let err = DemandLayer::from_layer(&layer(), "fips", None, &["Y90Demand".to_string()]).unwrap_err();
        assert!(crate::error::is_config_error(&err));
    }

    #[test]
    fn footprints_dedupe_shared_boundaries() {
        let demand = DemandLayer::from_layer(&layer(), "fips", None, &metrics()).unwrap();
        let (keys, shapes) = demand.admin_footprints(&PlanarEngine::default()).unwrap();
        assert_eq!(keys, vec!["17001", "17003"]);
        assert!((shapes[0].unsigned_area() - 100.0).abs() < 1e-9);
    }
}
