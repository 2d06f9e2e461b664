//! Protected lands: flattening overlapping sources and clipping habitat to them.

use anyhow::Result;
use geo::MultiPolygon;
use geoverlay::GeometryEngine;
use tracing::{debug, info};

use crate::{habitat::HabitatPolygon, io::{Feature, Layer}, ModelError};

/// One protected-land dataset, in priority order with its peers.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectedSource {
    pub name: String,
    pub polygons: Vec<MultiPolygon<f64>>,
}

impl ProtectedSource {
    pub fn from_layer(layer: &Layer) -> Self {
        Self { name: layer.name.clone(), polygons: layer.geometries() }
    }
}

/// A single-part piece of flattened protected land.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectedLand {
    pub source: String,
    pub area_ha: f64,
    pub geometry: MultiPolygon<f64>,
}

impl ProtectedLand {
    pub(crate) fn to_feature(&self) -> Feature {
        Feature::new(self.geometry.clone())
            .with("source", self.source.as_str())
            .with("area_ha", self.area_ha)
    }

    pub(crate) fn from_feature(feature: &Feature) -> Self {
        Self {
            source: feature.text("source").unwrap_or_default(),
            area_ha: feature.number("area_ha").unwrap_or(0.0),
            geometry: feature.geometry.clone(),
        }
    }
}

fn fault(e: geoverlay::OverlayError) -> ModelError {
    ModelError::geometry("protected", e)
}

/// Flatten protected sources so every hectare is counted once.
///
/// Each source is dissolved into its own footprint, then erased by the
/// footprint of every earlier source, and split into single parts. Areas are
/// recomputed from the merged geometry.
pub fn merge_protected(engine: &dyn GeometryEngine, sources: &[ProtectedSource]) -> Result<Vec<ProtectedLand>> {
    let mut merged = Vec::new();
    let mut covered: Option<MultiPolygon<f64>> = None;

    for source in sources {
        let footprint = engine.dissolve(&source.polygons).map_err(fault)?;
        let remaining = match &covered {
            Some(prev) => engine.erase(std::slice::from_ref(&footprint), prev).map_err(fault)?
                .into_iter().next().map(|(_, g)| g).unwrap_or_else(|| MultiPolygon::new(vec![])),
            None => footprint.clone(),
        };

        let before = merged.len();
        merged.extend(remaining.0.into_iter().map(|part| {
            let geometry = MultiPolygon::new(vec![part]);
            ProtectedLand { source: source.name.clone(), area_ha: engine.area_hectares(&geometry), geometry }
        }));
        debug!(source = %source.name, parts = merged.len() - before, "flattened protected source");

        covered = Some(match covered {
            Some(prev) => engine.dissolve(&[prev, footprint]).map_err(fault)?,
            None => footprint,
        });
    }

    info!(parts = merged.len(), area_ha = merged.iter().map(|p| p.area_ha).sum::<f64>(), "merged protected lands");
    Ok(merged)
}

/// Habitat inside protected land, with area and energy recomputed for the clipped pieces.
pub fn protected_supply(engine: &dyn GeometryEngine, supply: &[HabitatPolygon], protected: &[ProtectedLand]) -> Result<Vec<HabitatPolygon>> {
    let shapes: Vec<MultiPolygon<f64>> = protected.iter().map(|p| p.geometry.clone()).collect();
    let footprint = engine.dissolve(&shapes).map_err(fault)?;
    if footprint.0.is_empty() { return Ok(Vec::new()) }

    let supply_geoms: Vec<MultiPolygon<f64>> = supply.iter().map(|p| p.geometry.clone()).collect();
    let clipped = engine.clip(&supply_geoms, &footprint).map_err(fault)?;

    Ok(clipped.into_iter()
        .map(|(i, geometry)| {
            let area_ha = engine.area_hectares(&geometry);
            HabitatPolygon {
                area_ha,
                avail_kcal: supply[i].kcal_per_ha.map(|d| d * area_ha),
                geometry,
                ..supply[i].clone()
            }
        })
        .collect())
}
