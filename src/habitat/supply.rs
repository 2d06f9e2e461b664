use anyhow::Result;
use geo::MultiPolygon;
use geoverlay::GeometryEngine;
use tracing::{debug, info};

use super::HabitatPolygon;
use crate::ModelError;

/// Merge habitat layers into one non-overlapping supply layer.
///
/// `sources[0]` is the primary layer and is kept whole. Every later layer is
/// erased by the footprint of all layers before it; erased pieces get their
/// area and energy recomputed. Polygons are renumbered in output order.
pub fn assemble_supply(engine: &dyn GeometryEngine, sources: Vec<Vec<HabitatPolygon>>) -> Result<Vec<HabitatPolygon>> {
    let mut supply: Vec<HabitatPolygon> = Vec::new();
    let mut covered: Option<MultiPolygon<f64>> = None;

    for (rank, layer) in sources.into_iter().enumerate() {
        let shapes: Vec<MultiPolygon<f64>> = layer.iter().map(|p| p.geometry.clone()).collect();

        let kept: Vec<HabitatPolygon> = match &covered {
            None => layer,
            Some(footprint) => {
                let erased = engine.erase(&shapes, footprint)
                    .map_err(|e| ModelError::geometry("supply", e))?;
                erased.into_iter()
                    .map(|(i, geometry)| {
                        let area_ha = engine.area_hectares(&geometry);
                        HabitatPolygon {
                            area_ha,
                            avail_kcal: layer[i].kcal_per_ha.map(|d| d * area_ha),
                            geometry,
                            ..layer[i].clone()
                        }
                    })
                    .collect()
            }
        };
        debug!(rank, input = shapes.len(), kept = kept.len(), "erased supplementary habitat");

        let layer_footprint = engine.dissolve(&shapes).map_err(|e| ModelError::geometry("supply", e))?;
        covered = Some(match covered {
            None => layer_footprint,
            Some(prev) => engine.dissolve(&[prev, layer_footprint]).map_err(|e| ModelError::geometry("supply", e))?,
        });
        supply.extend(kept);
    }

    for (id, p) in supply.iter_mut().enumerate() {
        p.id = id;
    }
    info!(polygons = supply.len(), area_ha = total_area_ha(&supply), "assembled habitat supply");
    Ok(supply)
}

/// Σ `area_ha`.
pub fn total_area_ha(polygons: &[HabitatPolygon]) -> f64 {
    polygons.iter().map(|p| p.area_ha).sum()
}

/// Σ available energy, treating null as 0.
pub fn total_kcal(polygons: &[HabitatPolygon]) -> f64 {
    polygons.iter().map(HabitatPolygon::energy).sum()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use geo::polygon;
    use geoverlay::PlanarEngine;

    use super::*;
    use crate::habitat::{apply_energy, EnergyTable};

    fn rect(x0: f64, x1: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![(x: x0, y: 0.0), (x: x1, y: 0.0), (x: x1, y: 100.0), (x: x0, y: 100.0), (x: x0, y: 0.0)]])
    }

    fn layer(engine: &PlanarEngine, source: &str, class: &str, rects: &[(f64, f64)]) -> Vec<HabitatPolygon> {
        let polys = rects.iter().enumerate()
            .map(|(i, &(a, b))| HabitatPolygon { class: Some(class.into()), ..HabitatPolygon::new(i, source, None, rect(a, b)) })
            .collect();
        apply_energy(engine, polys, &EnergyTable::new([("Marsh", 50.0), ("Forest", 10.0)])).0
    }

    #[test]
    fn supplementary_layers_lose_covered_area() {
        let engine = PlanarEngine::default();
        // Primary: 0..1000 m (10 ha). Extra: 500..2000 m, of which 500 m overlaps.
        let primary = layer(&engine, "nwi", "Marsh", &[(0.0, 1000.0)]);
        let extra = layer(&engine, "nlcd", "Forest", &[(500.0, 2000.0), (100.0, 200.0)]);

        let supply = assemble_supply(&engine, vec![primary, extra]).unwrap();

        // The fully covered extra polygon disappears.
        assert_eq!(supply.len(), 2);
        assert_relative_eq!(total_area_ha(&supply), 20.0, max_relative = 1e-4);
        assert_relative_eq!(supply[1].area_ha, 10.0, max_relative = 1e-9);
        assert_relative_eq!(supply[1].energy(), 100.0, max_relative = 1e-9);
        assert_eq!(supply[1].source, "nlcd");
        assert_eq!(supply.iter().map(|p| p.id).collect::<Vec<_>>(), vec![0, 1]);
        assert_relative_eq!(total_kcal(&supply), 600.0, max_relative = 1e-9);
    }

    #[test]
    fn later_layers_are_erased_by_all_earlier_ones() {
        let engine = PlanarEngine::default();
        let a = layer(&engine, "a", "Marsh", &[(0.0, 100.0)]);
        let b = layer(&engine, "b", "Marsh", &[(50.0, 200.0)]);
        let c = layer(&engine, "c", "Marsh", &[(0.0, 300.0)]);

        let supply = assemble_supply(&engine, vec![a, b, c]).unwrap();
        let from = |s: &str| total_area_ha(&supply.iter().filter(|p| p.source == s).cloned().collect::<Vec<_>>());
        assert_relative_eq!(from("a"), 1.0, max_relative = 1e-9);
        assert_relative_eq!(from("b"), 1.0, max_relative = 1e-9);
        assert_relative_eq!(from("c"), 1.0, max_relative = 1e-9);
    }

    #[test]
    fn no_sources_is_empty() {
        let engine = PlanarEngine::default();
        assert!(assemble_supply(&engine, vec![]).unwrap().is_empty());
    }
}
