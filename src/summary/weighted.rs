use std::collections::BTreeMap;

use anyhow::Result;
use geo::{Area, MultiPolygon};
use geoverlay::GeometryEngine;

use crate::{aggregate::{unit_geometries, ReportingUnit}, habitat::HabitatPolygon, ModelError};

/// A piece of classified habitat inside one reporting unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassShare {
    pub bin: String,
    pub class: String,
    pub kcal_per_ha: f64,
    /// Energy of the piece, prorated from its parent polygon by area.
    pub avail_kcal: f64,
}

/// Split habitat with a known density by reporting unit.
pub fn class_shares(engine: &dyn GeometryEngine, units: &[ReportingUnit], supply: &[HabitatPolygon]) -> Result<Vec<ClassShare>> {
    let rated: Vec<&HabitatPolygon> = supply.iter()
        .filter(|p| p.class().is_some() && p.kcal_per_ha.is_some())
        .collect();
    let geoms: Vec<MultiPolygon<f64>> = rated.iter().map(|p| p.geometry.clone()).collect();
    let areas: Vec<f64> = geoms.iter().map(|g| g.unsigned_area()).collect();

    let fragments = engine.intersect(&[&geoms, &unit_geometries(units)])
        .map_err(|e| ModelError::geometry("weighted mean", e))?;

    Ok(fragments.iter()
        .filter_map(|f| {
            let (s, u) = (f.parent(0)?, f.parent(1)?);
            let polygon = rated[s];
            let share = if areas[s] > 0.0 { f.area / areas[s] } else { 0.0 };
            Some(ClassShare {
                bin: units[u].key.clone(),
                class: polygon.class()?.to_string(),
                kcal_per_ha: polygon.kcal_per_ha?,
                avail_kcal: polygon.energy() * share,
            })
        })
        .collect())
}

#[derive(Default)]
struct ClassAcc {
    density_sum: f64,
    pieces: usize,
    kcal: f64,
}

/// Energy-weighted mean density per unit.
///
/// `wt = Σ_class mean_density(class) × kcal(class) / kcal(unit)`, where the
/// class density is the plain mean over the class's pieces in the unit. A unit
/// with no energy gets 0.
pub fn weighted_mean(shares: &[ClassShare]) -> BTreeMap<String, f64> {
    let mut by_unit: BTreeMap<&str, BTreeMap<&str, ClassAcc>> = BTreeMap::new();
    for share in shares {
        let acc = by_unit.entry(&share.bin).or_default().entry(&share.class).or_default();
        acc.density_sum += share.kcal_per_ha;
        acc.pieces += 1;
        acc.kcal += share.avail_kcal;
    }

    by_unit.into_iter()
        .map(|(bin, classes)| {
            let total: f64 = classes.values().map(|c| c.kcal).sum();
            let wt = if total > 0.0 {
                classes.values()
                    .map(|c| (c.density_sum / c.pieces as f64) * (c.kcal / total))
                    .sum()
            } else {
                0.0
            };
            (bin.to_string(), wt)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use geo::polygon;
    use geoverlay::PlanarEngine;

    use super::*;

    fn share(bin: &str, class: &str, density: f64, kcal: f64) -> ClassShare {
        ClassShare { bin: bin.into(), class: class.into(), kcal_per_ha: density, avail_kcal: kcal }
    }

    #[test]
    fn energy_share_weighting() {
        let wt = weighted_mean(&[share("A", "Marsh", 50.0, 500.0), share("A", "OpenWater", 20.0, 100.0)]);
        assert_relative_eq!(wt["A"], 50.0 * 500.0 / 600.0 + 20.0 * 100.0 / 600.0, max_relative = 1e-12);
        assert_relative_eq!(wt["A"], 45.0, max_relative = 1e-12);
    }

    #[test]
    fn class_density_is_a_plain_mean_over_pieces() {
        let wt = weighted_mean(&[share("A", "Marsh", 40.0, 10.0), share("A", "Marsh", 60.0, 990.0)]);
        assert_relative_eq!(wt["A"], 50.0, max_relative = 1e-12);
    }

    #[test]
    fn mean_stays_within_class_extremes() {
        let shares = [
            share("A", "Marsh", 50.0, 5.0),
            share("A", "Forest", 5.0, 300.0),
            share("A", "Crop", 120.0, 42.0),
            share("A", "Crop", 80.0, 1.0),
        ];
        let wt = weighted_mean(&shares)["A"];
        assert!((5.0..=100.0).contains(&wt), "{wt}");
    }

    #[test]
    fn zero_energy_unit_is_zero() {
        let wt = weighted_mean(&[share("A", "Marsh", 50.0, 0.0)]);
        assert_eq!(wt["A"], 0.0);
        assert!(weighted_mean(&[]).is_empty());
    }

    #[test]
    fn shares_are_split_by_unit() {
        let engine = PlanarEngine::default();
        let rect = |x0: f64, x1: f64| MultiPolygon::new(vec![polygon![(x: x0, y: 0.0), (x: x1, y: 0.0), (x: x1, y: 100.0), (x: x0, y: 100.0), (x: x0, y: 0.0)]]);
        let units = vec![ReportingUnit::new("A", rect(0.0, 100.0)), ReportingUnit::new("B", rect(100.0, 200.0))];

        let mut marsh = HabitatPolygon::new(0, "nwi", None, rect(50.0, 150.0));
        marsh.class = Some("Marsh".into());
        marsh.kcal_per_ha = Some(50.0);
        marsh.avail_kcal = Some(50.0);
        let unrated = HabitatPolygon::new(1, "nwi", None, rect(0.0, 10.0));

        let shares = class_shares(&engine, &units, &[marsh, unrated]).unwrap();
        assert_eq!(shares.len(), 2);
        assert!(shares.iter().all(|s| (s.avail_kcal - 25.0).abs() < 1e-9));
    }
}
